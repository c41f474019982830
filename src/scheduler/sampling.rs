//! Sampling scheduler: one gascard shared across several sample points.
//!
//! ```text
//!   Idle ──(RTC alarm / interval)──▶ Sampling(i) ──(pump_duration)──▶ Sampling(i+1)
//!     ▲                                                                   │
//!     └───────────────────── all pumps off ◀── last step ◀────────────────┘
//! ```
//!
//! Each step runs one pump from the sequence so the gascard sees that
//! point's gas; when the step's time is up the current concentration is
//! captured for that pump and the next one starts.  Sequences may repeat
//! an index (`[1, 4, 2, 4, 3, 4]` flushes through pump 4 between points);
//! the last capture for a pump wins.
//!
//! Exactly one pump runs during a cycle.  A trigger arriving mid-cycle is
//! dropped, never queued, and a new plan only takes effect at the next
//! cycle start.

use core::time::Duration;

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{ActuatorPort, EventSink, RealTimeClock};
use crate::config::{MAX_PUMPS, PumpSequence, SampleSchedule, SystemConfig};
use crate::error::ScheduleError;
use crate::time::{Deadline, Instant, TimeOfDay};

/// Everything a cycle needs, snapshotted at cycle start.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPlan {
    pub schedule: SampleSchedule,
    pub sequence: PumpSequence,
    pub pump_duration: Duration,
    pub speeds: [f32; MAX_PUMPS],
}

impl SamplingPlan {
    pub fn from_config(config: &SystemConfig) -> Self {
        Self {
            schedule: config.sample_schedule.clone(),
            sequence: config.pump_sequence.clone(),
            pump_duration: Duration::from_secs(u64::from(config.pump_duration_secs)),
            speeds: config.pump_speed,
        }
    }

    fn speed(&self, pump: u8) -> f32 {
        (pump as usize)
            .checked_sub(1)
            .and_then(|i| self.speeds.get(i))
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
struct ActiveCycle {
    plan: SamplingPlan,
    index: usize,
    step: Deadline,
    started_at: Instant,
}

#[derive(Debug, Clone)]
enum CycleState {
    Idle,
    Sampling(ActiveCycle),
}

pub struct SamplingScheduler {
    /// Applies from the next cycle.
    plan: SamplingPlan,
    state: CycleState,
    captured: [Option<f32>; MAX_PUMPS],
    next_alarm: Option<TimeOfDay>,
    interval: Option<Deadline>,
    /// Schedule changed (or RTC was unset) and the trigger must be re-armed.
    needs_arm: bool,
    rtc_unset_logged: bool,
    cycles: u32,
}

impl SamplingScheduler {
    pub fn new(plan: SamplingPlan) -> Self {
        Self {
            plan,
            state: CycleState::Idle,
            captured: [None; MAX_PUMPS],
            next_alarm: None,
            interval: None,
            needs_arm: true,
            rtc_unset_logged: false,
            cycles: 0,
        }
    }

    /// Replace the plan.  A running cycle keeps its own snapshot.
    pub fn set_plan(&mut self, plan: SamplingPlan) {
        if plan.schedule != self.plan.schedule {
            self.needs_arm = true;
        }
        self.plan = plan;
    }

    /// Re-arm an RTC alarm on the next tick, e.g. after the wall clock
    /// was set.  Interval schedules keep their countdown.
    pub fn rearm(&mut self) {
        if matches!(self.plan.schedule, SampleSchedule::Times(_)) {
            self.needs_arm = true;
        }
    }

    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }

    // ── Trigger arming ────────────────────────────────────────

    fn arm(&mut self, now: Instant, rtc: &mut impl RealTimeClock) {
        match &self.plan.schedule {
            SampleSchedule::IntervalSecs(secs) => {
                self.next_alarm = None;
                rtc.clear_alarm();
                self.interval = Some(Deadline::after(
                    now,
                    Duration::from_secs(u64::from(*secs)),
                ));
                self.needs_arm = false;
                info!("Scheduler: sampling every {secs}s");
            }
            SampleSchedule::Times(times) => {
                self.interval = None;
                let Some(tod) = rtc.time_of_day() else {
                    if !self.rtc_unset_logged {
                        warn!("Scheduler: RTC not set, sampling alarm not armed");
                        self.rtc_unset_logged = true;
                    }
                    self.needs_arm = true;
                    return;
                };
                self.rtc_unset_logged = false;
                if let Some((next, wait)) = TimeOfDay::next_after(times, tod) {
                    rtc.set_alarm(next);
                    self.next_alarm = Some(next);
                    info!("Scheduler: next sampling at {next} (in {}s)", wait.as_secs());
                }
                self.needs_arm = false;
            }
        }
    }

    /// Whether the configured trigger fired.  Re-arms it either way so
    /// scheduling never depends on how long a cycle takes.
    fn poll_trigger(&mut self, now: Instant, rtc: &mut impl RealTimeClock) -> bool {
        match self.plan.schedule {
            SampleSchedule::IntervalSecs(_) => {
                if self.interval.is_some_and(|d| d.is_elapsed(now)) {
                    self.arm(now, rtc);
                    return true;
                }
                false
            }
            SampleSchedule::Times(_) => {
                if rtc.alarm_fired() {
                    rtc.clear_alarm();
                    self.arm(now, rtc);
                    return true;
                }
                false
            }
        }
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Advance the scheduler.  `concentration` is the gascard's latest
    /// reading, polled earlier in the same tick.
    pub fn tick(
        &mut self,
        now: Instant,
        rtc: &mut impl RealTimeClock,
        pumps: &mut impl ActuatorPort,
        concentration: Option<f32>,
        sink: &mut impl EventSink,
    ) {
        if self.needs_arm {
            self.arm(now, rtc);
        }

        if self.poll_trigger(now, rtc) {
            match self.start_cycle(now, pumps, sink) {
                // Logged and reported by `start_cycle`.
                Ok(()) | Err(ScheduleError::Overlap) => {}
            }
        }

        self.advance(now, pumps, concentration, sink);
    }

    /// Start a cycle now.  Used by the schedule and by the console.
    pub fn start_cycle(
        &mut self,
        now: Instant,
        pumps: &mut impl ActuatorPort,
        sink: &mut impl EventSink,
    ) -> Result<(), ScheduleError> {
        if let CycleState::Sampling(active) = &self.state {
            warn!(
                "Scheduler: cycle {} still at step {}/{}, trigger dropped",
                self.cycles,
                active.index + 1,
                active.plan.sequence.len()
            );
            sink.emit(&AppEvent::CycleSkipped);
            return Err(ScheduleError::Overlap);
        }

        let plan = self.plan.clone();
        let Some(&first) = plan.sequence.first() else {
            warn!("Scheduler: empty pump sequence, nothing to sample");
            return Ok(());
        };

        self.cycles = self.cycles.wrapping_add(1);
        info!(
            "Scheduler: cycle {} started, sequence {:?}",
            self.cycles,
            plan.sequence.as_slice()
        );
        sink.emit(&AppEvent::CycleStarted { cycle: self.cycles });

        pumps.stop_all_pumps();
        activate(pumps, first, plan.speed(first));
        self.state = CycleState::Sampling(ActiveCycle {
            step: Deadline::after(now, plan.pump_duration),
            plan,
            index: 0,
            started_at: now,
        });
        Ok(())
    }

    /// Drop a running cycle without capturing.  The caller owns turning
    /// the pumps off.
    pub fn abort(&mut self) {
        if let CycleState::Sampling(active) = &self.state {
            warn!(
                "Scheduler: cycle {} aborted at step {}/{}",
                self.cycles,
                active.index + 1,
                active.plan.sequence.len()
            );
            self.state = CycleState::Idle;
        }
    }

    fn advance(
        &mut self,
        now: Instant,
        pumps: &mut impl ActuatorPort,
        concentration: Option<f32>,
        sink: &mut impl EventSink,
    ) {
        let CycleState::Sampling(active) = &mut self.state else {
            return;
        };
        if !active.step.is_elapsed(now) {
            return;
        }

        let pump = active.plan.sequence[active.index];
        if let Err(e) = pumps.stop_pump(pump) {
            warn!("Scheduler: {e}");
        }
        match concentration {
            Some(value) => {
                let slot = (pump as usize).checked_sub(1);
                if let Some(slot) = slot.and_then(|i| self.captured.get_mut(i)) {
                    *slot = Some(value);
                }
                info!("Scheduler: pump {pump} captured {value:.4}");
                sink.emit(&AppEvent::SampleCaptured {
                    pump,
                    concentration: value,
                });
            }
            None => warn!("Scheduler: no gascard reading for pump {pump}, keeping previous"),
        }

        active.index += 1;
        if let Some(&next) = active.plan.sequence.get(active.index) {
            activate(pumps, next, active.plan.speed(next));
            active.step = Deadline::after(now, active.plan.pump_duration);
            return;
        }

        pumps.stop_all_pumps();
        info!(
            "Scheduler: cycle {} complete in {}s",
            self.cycles,
            now.duration_since(active.started_at).as_secs()
        );
        sink.emit(&AppEvent::CycleCompleted {
            cycle: self.cycles,
            captured: self.captured,
        });
        self.state = CycleState::Idle;
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn is_sampling(&self) -> bool {
        matches!(self.state, CycleState::Sampling(_))
    }

    /// Position in the running cycle's sequence.
    pub fn sequence_index(&self) -> Option<usize> {
        match &self.state {
            CycleState::Sampling(a) => Some(a.index),
            CycleState::Idle => None,
        }
    }

    /// Pump currently running for the cycle.
    pub fn active_pump(&self) -> Option<u8> {
        match &self.state {
            CycleState::Sampling(a) => a.plan.sequence.get(a.index).copied(),
            CycleState::Idle => None,
        }
    }

    /// Most recent capture per pump, indexed by `pump - 1`.
    pub fn captured(&self) -> &[Option<f32>; MAX_PUMPS] {
        &self.captured
    }

    pub fn next_alarm(&self) -> Option<TimeOfDay> {
        self.next_alarm
    }

    /// Completed or running cycles since boot.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }
}

fn activate(pumps: &mut impl ActuatorPort, pump: u8, speed: f32) {
    match pumps.set_pump(pump, speed) {
        Ok(()) => info!("Scheduler: pump {pump} on at {speed:.2}"),
        Err(e) => warn!("Scheduler: {e}"),
    }
}
