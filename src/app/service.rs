//! Controller: the super-loop core.
//!
//! [`Controller`] owns the gascard driver, the actuator pool, both
//! schedulers and the fault supervisor.  Clocks, the watchdog and the
//! event sink are injected at call sites, so the whole controller runs on
//! the host against mocks.
//!
//! ```text
//!  GasSensorLink ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                    │          Controller           │
//!  ActuatorPool  ◀── │ Gascard · Sampling · Feeding  │ ◀── RealTimeClock
//!                    └──────────────────────────────┘
//! ```
//!
//! Nothing in a tick blocks beyond the gascard's bounded acknowledgment
//! wait, so every valve deadline is checked at the loop rate.

use core::time::Duration;

use embedded_hal::digital::InputPin;
use log::{error, info, warn};

use crate::config::SystemConfig;
use crate::drivers::pool::ActuatorPool;
use crate::drivers::valve::{PulsePlan, PulseState, ValveMode};
use crate::error::{ActuatorError, Result, SensorError};
use crate::safety::{FaultInputs, FaultSupervisor};
use crate::scheduler::{FeedScheduler, SamplingPlan, SamplingScheduler};
use crate::sensors::gascard::{GasSensorDriver, SensorMode, STARTUP_TIMEOUT};
use crate::time::{Deadline, Instant};

use super::commands::AppCommand;
use super::events::{AppEvent, TelemetryData};
use super::ports::{
    Actuator, ActuatorPort, EventSink, GasSensorLink, MonotonicClock, RealTimeClock, WatchdogPort,
};

/// Gascard health as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHealth {
    /// Not fitted, or never reached ready at startup.
    Unavailable,
    Ready,
    /// Went quiet; a restart was sent and is retried at the deadline.
    Recovering(Deadline),
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct Controller<L, C, A, P>
where
    L: GasSensorLink,
    C: MonotonicClock,
    A: Actuator,
    P: InputPin,
{
    config: SystemConfig,
    clock: C,
    gascard: Option<GasSensorDriver<L, C>>,
    sensor: SensorHealth,
    pool: ActuatorPool<A, P>,
    sampler: SamplingScheduler,
    feeder: FeedScheduler,
    safety: FaultSupervisor,
    telemetry_due: Deadline,
    /// Emergency stop latched from the console.
    halted: bool,
    tick_count: u64,
}

impl<L, C, A, P> Controller<L, C, A, P>
where
    L: GasSensorLink,
    C: MonotonicClock,
    A: Actuator,
    P: InputPin,
{
    /// Assemble the controller.  Nothing is driven until [`start`](Self::start).
    pub fn new(
        config: SystemConfig,
        clock: C,
        gascard: Option<GasSensorDriver<L, C>>,
        pool: ActuatorPool<A, P>,
    ) -> Self {
        let now = clock.now();
        Self {
            sampler: SamplingScheduler::new(SamplingPlan::from_config(&config)),
            feeder: FeedScheduler::new(config.feed_times.clone()),
            telemetry_due: Deadline::after(now, telemetry_interval(&config)),
            config,
            clock,
            gascard,
            sensor: SensorHealth::Unavailable,
            pool,
            safety: FaultSupervisor::new(),
            halted: false,
            tick_count: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Drive everything off, apply valve modes and bring up the gascard.
    ///
    /// A gascard that does not come up is logged and left unavailable;
    /// valves and pumps run regardless.
    pub fn start(&mut self, watchdog: &impl WatchdogPort, sink: &mut impl EventSink) {
        self.pool.all_off();
        self.pool.close_all_valves(self.clock.now());
        self.pool.configure_valves(&self.config);

        self.sensor = match self.gascard.as_mut() {
            None => {
                warn!("Gascard: not fitted, sampling without readings");
                SensorHealth::Unavailable
            }
            Some(gc) => match gc.start(watchdog) {
                Ok(()) => SensorHealth::Ready,
                Err(e) => {
                    error!("Gascard: startup failed: {e}");
                    SensorHealth::Unavailable
                }
            },
        };

        self.telemetry_due = Deadline::after(self.clock.now(), telemetry_interval(&self.config));
        info!(
            "Controller started: {} pumps, {} valves, gascard {}",
            self.pool.pump_count(),
            self.pool.valve_count(),
            if self.sensor == SensorHealth::Ready { "ready" } else { "unavailable" }
        );
        sink.emit(&AppEvent::Started {
            sensor_ready: self.sensor == SensorHealth::Ready,
        });
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One pass of the super-loop.
    pub fn tick(
        &mut self,
        rtc: &mut impl RealTimeClock,
        watchdog: &impl WatchdogPort,
        sink: &mut impl EventSink,
    ) {
        self.tick_count += 1;

        // 1. Watchdog
        watchdog.feed();
        let now = self.clock.now();

        // 2. Gascard input, staleness and recovery
        self.service_gascard(now, sink);

        if !self.halted {
            // 3. Pump timers and valve state machines
            self.pool.update(now, |valve, _| {
                sink.emit(&AppEvent::ValveBlocked { valve });
            });

            // 4. Feed schedule
            if self.feeder.tick(now, &*rtc) {
                self.start_feed(now, sink);
            }

            // 5. Sampling schedule
            let reading = self.live_concentration();
            self.sampler.tick(now, rtc, &mut self.pool, reading, sink);
        }

        // 6. Advisory faults
        let previous = self.safety.faults();
        let faults = self.safety.evaluate(&FaultInputs {
            sensor_unavailable: self.sensor == SensorHealth::Unavailable,
            sensor_stale: matches!(self.sensor, SensorHealth::Recovering(_)),
            valve_blocked: self.pool.any_valve_blocked(),
        });
        if faults != previous {
            if faults != 0 {
                sink.emit(&AppEvent::FaultDetected(faults));
            } else {
                sink.emit(&AppEvent::FaultCleared);
            }
        }

        // 7. Telemetry
        if self.telemetry_due.is_elapsed(now) {
            self.telemetry_due = Deadline::after(now, telemetry_interval(&self.config));
            sink.emit(&AppEvent::Telemetry(self.build_telemetry()));
        }
    }

    fn service_gascard(&mut self, now: Instant, sink: &mut impl EventSink) {
        let Some(gc) = self.gascard.as_mut() else {
            return;
        };

        match gc.poll() {
            Ok(_) => {}
            Err(SensorError::Stale) => {
                // Banners arrive seconds apart while the card boots; a
                // restart already in flight is left to its own deadline.
                if !matches!(self.sensor, SensorHealth::Recovering(_)) {
                    sink.emit(&AppEvent::SensorStale);
                    self.sensor = begin_recovery(gc, now);
                }
            }
            Err(e) => warn!("Gascard: {e}"),
        }

        match self.sensor {
            SensorHealth::Unavailable | SensorHealth::Recovering(_) if gc.is_ready() => {
                info!("Gascard: ready");
                sink.emit(&AppEvent::SensorReady);
                self.sensor = SensorHealth::Ready;
            }
            SensorHealth::Recovering(retry) if retry.is_elapsed(now) => {
                warn!("Gascard: still not ready, restarting again");
                self.sensor = begin_recovery(gc, now);
            }
            _ => {}
        }
    }

    /// Concentration usable for a capture: only while the card is ready.
    fn live_concentration(&self) -> Option<f32> {
        self.gascard
            .as_ref()
            .filter(|gc| gc.is_ready())
            .and_then(GasSensorDriver::concentration)
    }

    fn start_feed(&mut self, now: Instant, sink: &mut impl EventSink) {
        let plan = PulsePlan {
            pulses: self.config.pulses,
            open_duration: Duration::from_secs(u64::from(self.config.valve_open_secs)),
            close_duration: Duration::from_secs(u64::from(self.config.valve_close_secs)),
        };
        let started = self.pool.start_feed(plan, now);
        info!("Feed: {started} valve(s) pulsing");
        sink.emit(&AppEvent::FeedStarted {
            valves: started as u8,
        });
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (console or configuration push).
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        rtc: &mut impl RealTimeClock,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        let now = self.clock.now();
        match cmd {
            AppCommand::RunPump {
                index,
                speed,
                duration,
            } => {
                self.ensure_running()?;
                if self.sampler.is_sampling() {
                    return Err(ActuatorError::ChannelBusy(index).into());
                }
                let pump = self.pool.pump_mut(index)?;
                match duration {
                    Some(d) => pump.run_for(speed, d, now),
                    None => pump.set(speed),
                }
            }
            AppCommand::ToggleValve { index } => {
                self.ensure_running()?;
                let valve = self.pool.valve_mut(index)?;
                valve.toggle_manual();
                let target = valve.manual_target();
                info!(
                    "Valve v{index:02}: manual {}",
                    if target { "open" } else { "closed" }
                );
                // Keep config in step so a later reconfigure doesn't undo it.
                if let Some(cfg) = (index as usize)
                    .checked_sub(1)
                    .and_then(|i| self.config.valves.get_mut(i))
                {
                    cfg.mode = ValveMode::Manual;
                    cfg.manual_open = target;
                }
            }
            AppCommand::Gascard(line) => {
                let gc = self.gascard.as_mut().ok_or(SensorError::Absent)?;
                info!("Gascard: writing [{line}]");
                if !gc.write_command(&line)? {
                    return Err(SensorError::CommandUnacknowledged.into());
                }
            }
            AppCommand::StartCycle => {
                self.ensure_running()?;
                self.sampler.start_cycle(now, &mut self.pool, sink)?;
            }
            AppCommand::StartFeed => {
                self.ensure_running()?;
                self.start_feed(now, sink);
            }
            AppCommand::UpdateConfig(config) => {
                config.validate()?;
                self.apply_config(config);
            }
            AppCommand::SetEnv { key, value } => {
                let mut next = self.config.clone();
                next.apply_env(&key, &value)?;
                info!("Config: {key} = {value}");
                self.apply_config(next);
            }
            AppCommand::SetTime(time) => {
                info!("Clock: set to {time}");
                rtc.set_time_of_day(time);
                self.sampler.rearm();
                self.feeder.rearm();
            }
            AppCommand::EmergencyStop => {
                self.emergency_stop(sink);
            }
            AppCommand::Resume => {
                if self.halted {
                    warn!("Controller: resuming after emergency stop");
                    self.halted = false;
                    self.pool.close_all_valves(self.clock.now());
                    self.pool.configure_valves(&self.config);
                }
            }
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.halted {
            return Err(ActuatorError::Halted.into());
        }
        Ok(())
    }

    /// Swap in a validated configuration.  Sampling picks up the new plan
    /// at its next cycle.
    fn apply_config(&mut self, config: SystemConfig) {
        self.sampler.set_plan(SamplingPlan::from_config(&config));
        self.feeder.set_times(config.feed_times.clone());
        if config.valves != self.config.valves {
            self.pool.configure_valves(&config);
        }
        self.config = config;
        info!("Configuration updated at runtime");
    }

    /// Abort any cycle, drive every channel to zero and latch.
    pub fn emergency_stop(&mut self, sink: &mut impl EventSink) {
        error!("Controller: EMERGENCY STOP");
        self.sampler.abort();
        self.pool.all_off();
        self.halted = true;
        sink.emit(&AppEvent::EmergencyStop);
    }

    /// Drive every channel to zero on the way out of the super-loop.
    pub fn shutdown(&mut self) {
        error!("Controller: shutting down, all actuators off");
        self.sampler.abort();
        self.pool.all_off();
        self.halted = true;
    }

    // ── Queries ───────────────────────────────────────────────

    /// Build a telemetry snapshot from the current state.
    pub fn build_telemetry(&self) -> TelemetryData {
        let gc = self.gascard.as_ref();
        let now = self.clock.now();
        TelemetryData {
            sensor_ready: gc.is_some_and(GasSensorDriver::is_ready),
            sensor_mode: gc.map_or(SensorMode::Unknown, GasSensorDriver::mode),
            concentration: gc.and_then(GasSensorDriver::concentration),
            temperature: gc.and_then(GasSensorDriver::temperature),
            pressure: gc.and_then(GasSensorDriver::pressure),
            sample: gc.and_then(GasSensorDriver::sample),
            reference: gc.and_then(GasSensorDriver::reference),
            captured: *self.sampler.captured(),
            active_pump: self.sampler.active_pump(),
            valve_status: self.pool.valve_status(),
            feed_progress: self
                .pool
                .valves()
                .iter()
                .find(|v| v.pulse_state() == PulseState::Pulsing)
                .map(|v| (v.pulse_count(), v.pulses_target())),
            next_feed_secs: self.feeder.countdown(now).map(|d| d.as_secs()),
            fault_flags: self.safety.faults(),
        }
    }

    pub fn sensor_health(&self) -> SensorHealth {
        self.sensor
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_sampling()
    }

    /// Total control ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Current active fault bitmask (0 = no faults).
    pub fn fault_flags(&self) -> u8 {
        self.safety.faults()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn pool(&self) -> &ActuatorPool<A, P> {
        &self.pool
    }

    pub fn gascard(&self) -> Option<&GasSensorDriver<L, C>> {
        self.gascard.as_ref()
    }

    pub fn sampler(&self) -> &SamplingScheduler {
        &self.sampler
    }

    pub fn feeder(&self) -> &FeedScheduler {
        &self.feeder
    }
}

fn begin_recovery<L: GasSensorLink, C: MonotonicClock>(
    gc: &mut GasSensorDriver<L, C>,
    now: Instant,
) -> SensorHealth {
    if let Err(e) = gc.begin_restart() {
        warn!("Gascard: restart failed: {e}");
    }
    SensorHealth::Recovering(Deadline::after(now, STARTUP_TIMEOUT))
}

fn telemetry_interval(config: &SystemConfig) -> Duration {
    Duration::from_secs(u64::from(config.telemetry_interval_secs.max(1)))
}
