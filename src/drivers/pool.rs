//! The actuator pool: every pump and valve the controller drives.
//!
//! Owned by the process root and lent to the sampling scheduler, the feed
//! scheduler, the console and the shutdown path.  Nothing else holds an
//! actuator, so emergency stop reaches every channel through one call.
//!
//! A board that was not detected at boot simply contributes no pumps or
//! no valves; callers see `NoSuchChannel`.

use embedded_hal::digital::InputPin;
use log::warn;

use crate::app::ports::{Actuator, ActuatorPort};
use crate::config::{MAX_PUMPS, MAX_VALVES, SystemConfig};
use crate::drivers::pump::Pump;
use crate::drivers::valve::{DutyCycleValve, PulsePlan, ValveMode};
use crate::error::{ActuatorError, ValveFault};
use crate::time::Instant;

pub struct ActuatorPool<A: Actuator, P: InputPin> {
    pumps: heapless::Vec<Pump<A>, MAX_PUMPS>,
    valves: heapless::Vec<DutyCycleValve<A, P>, MAX_VALVES>,
}

impl<A: Actuator, P: InputPin> Default for ActuatorPool<A, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actuator, P: InputPin> ActuatorPool<A, P> {
    pub fn new() -> Self {
        Self {
            pumps: heapless::Vec::new(),
            valves: heapless::Vec::new(),
        }
    }

    /// Add the next pump.  Its index is its 1-based position.
    pub fn add_pump(&mut self, channel: A) -> Result<u8, ActuatorError> {
        let index = self.pumps.len() as u8 + 1;
        self.pumps
            .push(Pump::new(index, channel))
            .map_err(|_| ActuatorError::NoSuchChannel(index))?;
        Ok(index)
    }

    /// Add the next valve.  Its index must be its 1-based position.
    pub fn add_valve(&mut self, valve: DutyCycleValve<A, P>) -> Result<u8, ActuatorError> {
        let index = valve.index();
        if index as usize != self.valves.len() + 1 {
            return Err(ActuatorError::NoSuchChannel(index));
        }
        self.valves
            .push(valve)
            .map_err(|_| ActuatorError::NoSuchChannel(index))?;
        Ok(index)
    }

    // ── Access ────────────────────────────────────────────────

    pub fn pump(&self, index: u8) -> Result<&Pump<A>, ActuatorError> {
        slot(index)
            .and_then(|i| self.pumps.get(i))
            .ok_or(ActuatorError::NoSuchChannel(index))
    }

    pub fn pump_mut(&mut self, index: u8) -> Result<&mut Pump<A>, ActuatorError> {
        slot(index)
            .and_then(|i| self.pumps.get_mut(i))
            .ok_or(ActuatorError::NoSuchChannel(index))
    }

    pub fn valve(&self, index: u8) -> Result<&DutyCycleValve<A, P>, ActuatorError> {
        slot(index)
            .and_then(|i| self.valves.get(i))
            .ok_or(ActuatorError::NoSuchChannel(index))
    }

    pub fn valve_mut(&mut self, index: u8) -> Result<&mut DutyCycleValve<A, P>, ActuatorError> {
        slot(index)
            .and_then(|i| self.valves.get_mut(i))
            .ok_or(ActuatorError::NoSuchChannel(index))
    }

    pub fn pumps(&self) -> &[Pump<A>] {
        &self.pumps
    }

    pub fn valves(&self) -> &[DutyCycleValve<A, P>] {
        &self.valves
    }

    pub fn valve_count(&self) -> u8 {
        self.valves.len() as u8
    }

    // ── Control ───────────────────────────────────────────────

    /// Push valve mode and manual target from configuration.
    pub fn configure_valves(&mut self, config: &SystemConfig) {
        for (valve, cfg) in self.valves.iter_mut().zip(config.valves.iter()) {
            valve.set_manual(cfg.mode == ValveMode::Manual);
            valve.set_manual_target(cfg.manual_open);
        }
    }

    /// Actively drive every valve to closed.  After [`ActuatorPort::all_off`]
    /// a double-acting valve is de-energized wherever it stopped; this
    /// energizes its close coil again.
    pub fn close_all_valves(&mut self, now: Instant) {
        for valve in &mut self.valves {
            valve.close(now);
        }
    }

    /// Start a pulse train on every valve in Auto.  Returns how many
    /// started.
    pub fn start_feed(&mut self, plan: PulsePlan, now: Instant) -> usize {
        let mut started = 0;
        for valve in self.valves.iter_mut().filter(|v| v.mode() == ValveMode::Auto) {
            valve.start_pulsing(plan, now);
            started += 1;
        }
        started
    }

    /// Advance every pump timer and valve state machine.  `on_fault` is
    /// called with the index of each valve that failed confirmation this
    /// tick.
    pub fn update(&mut self, now: Instant, mut on_fault: impl FnMut(u8, ValveFault)) {
        for pump in &mut self.pumps {
            pump.update(now);
        }
        for valve in &mut self.valves {
            if let Some(fault) = valve.update(now) {
                on_fault(valve.index(), fault);
            }
        }
    }

    pub fn any_valve_blocked(&self) -> bool {
        self.valves.iter().any(DutyCycleValve::is_blocked)
    }

    /// One character per valve: `0` closed, `1` open, `*` blocked.
    pub fn valve_status(&self) -> heapless::String<MAX_VALVES> {
        self.valves.iter().map(DutyCycleValve::status_char).collect()
    }
}

fn slot(index: u8) -> Option<usize> {
    (index as usize).checked_sub(1)
}

impl<A: Actuator, P: InputPin> ActuatorPort for ActuatorPool<A, P> {
    fn pump_count(&self) -> u8 {
        self.pumps.len() as u8
    }

    fn set_pump(&mut self, index: u8, duty: f32) -> Result<(), ActuatorError> {
        self.pump_mut(index)?.set(duty);
        Ok(())
    }

    fn stop_pump(&mut self, index: u8) -> Result<(), ActuatorError> {
        self.pump_mut(index)?.stop();
        Ok(())
    }

    fn pump_duty(&self, index: u8) -> Option<f32> {
        self.pump(index).ok().map(Pump::duty)
    }

    fn stop_all_pumps(&mut self) {
        for pump in &mut self.pumps {
            pump.stop();
        }
    }

    fn all_off(&mut self) {
        warn!("Actuators: all off");
        self.stop_all_pumps();
        for valve in &mut self.valves {
            valve.force_off();
        }
    }
}
