//! Sampling pump driver.
//!
//! Variable-speed, single-direction DC pump on one actuator channel.
//! A run may carry a stop deadline (console `p <n> <speed> <secs>`); the
//! pump stops itself on the first [`Pump::update`] after it.
//!
//! ## Dual-target design
//!
//! The channel is an [`Actuator`]; on ESP-IDF that is an LEDC channel, on
//! host/test an in-memory recorder.

use core::time::Duration;

use log::info;

use crate::app::ports::Actuator;
use crate::time::{Deadline, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpState {
    Stopped,
    Running { speed: f32, until: Option<Deadline> },
}

pub struct Pump<A: Actuator> {
    index: u8,
    channel: A,
    state: PumpState,
}

impl<A: Actuator> Pump<A> {
    /// Wrap a channel and make sure it is off.
    pub fn new(index: u8, mut channel: A) -> Self {
        channel.set_duty(0.0);
        Self {
            index,
            channel,
            state: PumpState::Stopped,
        }
    }

    /// Run at `speed` (clamped to `[0, 1]`), indefinitely.  Zero stops.
    pub fn set(&mut self, speed: f32) {
        self.run(speed, None);
    }

    /// Run at `speed` until `now + duration`.
    pub fn run_for(&mut self, speed: f32, duration: Duration, now: Instant) {
        info!(
            "Pump {}: speed={:.2} for {}s",
            self.index,
            speed,
            duration.as_secs()
        );
        self.run(speed, Some(Deadline::after(now, duration)));
    }

    fn run(&mut self, speed: f32, until: Option<Deadline>) {
        let speed = if speed.is_finite() { speed.clamp(0.0, 1.0) } else { 0.0 };
        if speed == 0.0 {
            self.stop();
            return;
        }
        self.channel.set_duty(speed);
        self.state = PumpState::Running { speed, until };
    }

    pub fn stop(&mut self) {
        self.channel.set_duty(0.0);
        self.state = PumpState::Stopped;
    }

    /// Stop a timed run whose deadline has passed.
    pub fn update(&mut self, now: Instant) {
        if let PumpState::Running { until: Some(d), .. } = self.state {
            if d.is_elapsed(now) {
                info!("Pump {}: timed run finished", self.index);
                self.stop();
            }
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, PumpState::Stopped)
    }

    pub fn duty(&self) -> f32 {
        self.channel.duty()
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}
