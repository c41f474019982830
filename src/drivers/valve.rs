//! Duty-cycle valve driver.
//!
//! A valve is one solenoid channel (spring return) or a pair of channels
//! (actively opened and actively closed), with optional active-low limit
//! switches confirming each end position.
//!
//! ## Interlock
//!
//! The open and close channels of a double-acting valve are never
//! energized together.  A direction change zeroes both channels at once
//! and energizes the new direction only after [`DEAD_TIME`] has passed,
//! on a later [`DutyCycleValve::update`].
//!
//! ## Modes
//!
//! - **Manual**: `update` drives the valve to the manual target.  Pulse
//!   trains are cancelled.
//! - **Auto**: idle valves are held closed; a pulse train alternates open
//!   for `open_duration` and closed for `close_duration` until `pulses`
//!   open→close edges have happened.
//!
//! ## Blockage
//!
//! When a limit switch is wired for the commanded direction the valve has
//! [`CONFIRM_TIMEOUT`] to assert it.  Missing it sets the sticky `blocked`
//! flag, which only a later successful confirmation clears.  Blockage is
//! advisory: the mode logic keeps running.

use core::time::Duration;

use embedded_hal::digital::InputPin;
use log::{debug, error, info, warn};

use crate::app::ports::Actuator;
use crate::error::ValveFault;
use crate::time::{Deadline, Instant};

/// Gap between de-energizing one direction and energizing the other.
pub const DEAD_TIME: Duration = Duration::from_millis(100);

/// Time allowed for a limit switch to confirm a move.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseState {
    Idle,
    Pulsing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Waiting for the open limit switch.
    Opening(Deadline),
    /// Waiting for the closed limit switch.
    Closing(Deadline),
    /// No confirmation outstanding.
    Settled,
}

/// Timing of one pulse train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePlan {
    pub pulses: u16,
    pub open_duration: Duration,
    pub close_duration: Duration,
}

pub struct DutyCycleValve<A: Actuator, P: InputPin> {
    index: u8,
    open_ch: A,
    close_ch: Option<A>,
    gpio_open: Option<P>,
    gpio_close: Option<P>,

    mode: ValveMode,
    manual_target: bool,

    pulse_state: PulseState,
    pulse_count: u16,
    plan: PulsePlan,
    toggle_at: Deadline,

    commanded: Direction,
    /// Set while waiting out the dead-time before energizing `commanded`.
    energize_at: Option<Deadline>,
    position: Position,
    moved_at: Instant,
    blocked: bool,
}

impl<A: Actuator, P: InputPin> DutyCycleValve<A, P> {
    /// Build a valve and drive it closed.  `index` is 1-based and only
    /// used for logging.
    pub fn new(index: u8, open_ch: A, close_ch: Option<A>, now: Instant) -> Self {
        let mut valve = Self {
            index,
            open_ch,
            close_ch,
            gpio_open: None,
            gpio_close: None,
            mode: ValveMode::Auto,
            manual_target: false,
            pulse_state: PulseState::Idle,
            pulse_count: 0,
            plan: PulsePlan {
                pulses: 0,
                open_duration: Duration::ZERO,
                close_duration: Duration::ZERO,
            },
            toggle_at: Deadline::expired(now),
            commanded: Direction::Closed,
            energize_at: None,
            position: Position::Settled,
            moved_at: now,
            blocked: false,
        };
        valve.close(now);
        valve
    }

    /// Attach limit switches.  Either may be absent.
    pub fn with_position_inputs(mut self, open: Option<P>, close: Option<P>) -> Self {
        self.gpio_open = open;
        self.gpio_close = close;
        self
    }

    // ── Direction commands ────────────────────────────────────

    pub fn open(&mut self, now: Instant) {
        info!("Valve v{:02}: opening", self.index);
        self.drive(Direction::Open, now);
    }

    pub fn close(&mut self, now: Instant) {
        info!("Valve v{:02}: closing", self.index);
        self.drive(Direction::Closed, now);
    }

    fn drive(&mut self, dir: Direction, now: Instant) {
        self.commanded = dir;
        self.moved_at = now;

        match self.close_ch.as_mut() {
            None => {
                let duty = if dir == Direction::Open { 1.0 } else { 0.0 };
                self.open_ch.set_duty(duty);
            }
            Some(close_ch) => {
                let was_energized = self.open_ch.is_energized() || close_ch.is_energized();
                self.open_ch.set_duty(0.0);
                close_ch.set_duty(0.0);
                if was_energized {
                    self.energize_at = Some(Deadline::after(now, DEAD_TIME));
                } else if self.energize_at.is_none() {
                    self.energize_commanded();
                }
            }
        }

        let has_switch = match dir {
            Direction::Open => self.gpio_open.is_some(),
            Direction::Closed => self.gpio_close.is_some(),
        };
        let window = Deadline::after(now, CONFIRM_TIMEOUT);
        self.position = match (dir, has_switch) {
            (Direction::Open, true) => Position::Opening(window),
            (Direction::Closed, true) => Position::Closing(window),
            (_, false) => Position::Settled,
        };
    }

    fn energize_commanded(&mut self) {
        match self.commanded {
            Direction::Open => self.open_ch.set_duty(1.0),
            Direction::Closed => {
                if let Some(c) = self.close_ch.as_mut() {
                    c.set_duty(1.0);
                }
            }
        }
    }

    // ── Mode control ──────────────────────────────────────────

    pub fn set_manual(&mut self, manual: bool) {
        let mode = if manual { ValveMode::Manual } else { ValveMode::Auto };
        if mode != self.mode {
            info!("Valve v{:02}: mode {:?}", self.index, mode);
        }
        self.mode = mode;
    }

    pub fn set_manual_target(&mut self, open: bool) {
        self.manual_target = open;
    }

    /// Switch to Manual and flip the manual target.  Console `v <n>`.
    pub fn toggle_manual(&mut self) {
        self.set_manual(true);
        self.manual_target = !self.manual_target;
    }

    /// Begin a pulse train.  Ignored while one is running or in Manual.
    pub fn start_pulsing(&mut self, plan: PulsePlan, now: Instant) {
        if self.pulse_state == PulseState::Pulsing {
            debug!("Valve v{:02}: already pulsing", self.index);
            return;
        }
        if self.mode == ValveMode::Manual {
            warn!("Valve v{:02}: manual mode, pulse train ignored", self.index);
            return;
        }
        if plan.pulses == 0 {
            return;
        }
        info!(
            "Valve v{:02}: pulsing {}x ({}s open / {}s closed)",
            self.index,
            plan.pulses,
            plan.open_duration.as_secs(),
            plan.close_duration.as_secs()
        );
        self.plan = plan;
        self.pulse_count = 0;
        self.pulse_state = PulseState::Pulsing;
        self.toggle_at = Deadline::expired(now);
        if self.commanded == Direction::Open {
            self.close(now);
        }
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Advance dead-time, position confirmation and mode logic.
    ///
    /// Returns a fault the tick it is detected.
    pub fn update(&mut self, now: Instant) -> Option<ValveFault> {
        if let Some(d) = self.energize_at {
            if d.is_elapsed(now) {
                self.energize_at = None;
                self.energize_commanded();
            }
        }

        let fault = self.check_position(now);

        if self.position == Position::Settled && self.energize_at.is_none() {
            match self.mode {
                ValveMode::Manual => self.run_manual(now),
                ValveMode::Auto => self.run_auto(now),
            }
        }
        fault
    }

    fn check_position(&mut self, now: Instant) -> Option<ValveFault> {
        let (window, pin, label) = match self.position {
            Position::Settled => return None,
            Position::Opening(w) => (w, self.gpio_open.as_mut(), "opened"),
            Position::Closing(w) => (w, self.gpio_close.as_mut(), "closed"),
        };

        // Active low: the switch pulls the line to ground at the end stop.
        let asserted = pin.is_some_and(|p| p.is_low().unwrap_or(false));
        if asserted {
            self.position = Position::Settled;
            self.blocked = false;
            info!(
                "Valve v{:02}: {label} in {:.1}s",
                self.index,
                window.elapsed(now).as_millis() as f32 / 1000.0
            );
            return None;
        }

        if window.is_elapsed(now) {
            self.position = Position::Settled;
            self.blocked = true;
            error!(
                "Valve v{:02}: not {label} after {}s, possible blockage",
                self.index,
                CONFIRM_TIMEOUT.as_secs()
            );
            return Some(ValveFault::PositionTimeout);
        }
        None
    }

    fn run_manual(&mut self, now: Instant) {
        if self.pulse_state == PulseState::Pulsing {
            info!("Valve v{:02}: pulse train cancelled", self.index);
            self.pulse_state = PulseState::Idle;
        }
        match (self.manual_target, self.commanded) {
            (true, Direction::Closed) => self.open(now),
            (false, Direction::Open) => self.close(now),
            _ => {}
        }
    }

    fn run_auto(&mut self, now: Instant) {
        match (self.pulse_state, self.commanded) {
            (PulseState::Idle, Direction::Open) => self.close(now),
            (PulseState::Idle, Direction::Closed) => {}
            (PulseState::Pulsing, Direction::Open) => {
                if self.toggle_at.is_elapsed(now) {
                    self.close(now);
                    self.toggle_at = Deadline::after(now, self.plan.close_duration);
                    self.pulse_count += 1;
                    if self.pulse_count >= self.plan.pulses {
                        self.pulse_state = PulseState::Idle;
                        info!(
                            "Valve v{:02}: pulse train complete ({})",
                            self.index, self.pulse_count
                        );
                    }
                }
            }
            (PulseState::Pulsing, Direction::Closed) => {
                if self.toggle_at.is_elapsed(now) {
                    self.open(now);
                    self.toggle_at = Deadline::after(now, self.plan.open_duration);
                }
            }
        }
    }

    /// Zero both channels immediately, bypassing the dead-time.  Used
    /// for emergency stop; the valve is left commanded closed.
    pub fn force_off(&mut self) {
        self.open_ch.set_duty(0.0);
        if let Some(c) = self.close_ch.as_mut() {
            c.set_duty(0.0);
        }
        self.commanded = Direction::Closed;
        self.energize_at = None;
        self.pulse_state = PulseState::Idle;
        self.position = Position::Settled;
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn mode(&self) -> ValveMode {
        self.mode
    }

    pub fn manual_target(&self) -> bool {
        self.manual_target
    }

    pub fn is_open(&self) -> bool {
        self.commanded == Direction::Open
    }

    pub fn commanded(&self) -> Direction {
        self.commanded
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn pulse_state(&self) -> PulseState {
        self.pulse_state
    }

    pub fn pulse_count(&self) -> u16 {
        self.pulse_count
    }

    pub fn pulses_target(&self) -> u16 {
        self.plan.pulses
    }

    /// When the current direction was commanded.
    pub fn moved_at(&self) -> Instant {
        self.moved_at
    }

    pub fn open_channel(&self) -> &A {
        &self.open_ch
    }

    pub fn close_channel(&self) -> Option<&A> {
        self.close_ch.as_ref()
    }

    /// `*` blocked, `1` open, `0` closed.
    pub fn status_char(&self) -> char {
        if self.blocked {
            '*'
        } else if self.is_open() {
            '1'
        } else {
            '0'
        }
    }
}
