//! Advisory fault supervisor.
//!
//! The supervisor runs **every tick after the components have advanced**
//! and accumulates a fault bitmask that is reported with telemetry.
//!
//! None of these faults stop actuation.  A valve that failed its position
//! confirmation keeps pulsing, and a gascard that is down only means the
//! sampling cycle captures no new readings.  The bitmask exists so that
//! several conditions can be reported at once and cleared individually.

use log::{error, info};

use crate::error::Fault;

/// Inputs the supervisor judges each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInputs {
    /// The gascard is missing or never reached ready.
    pub sensor_unavailable: bool,
    /// The gascard went quiet and is being restarted.
    pub sensor_stale: bool,
    /// Any valve holds its `blocked` flag.
    pub valve_blocked: bool,
}

#[derive(Debug, Default)]
pub struct FaultSupervisor {
    faults: u8,
}

impl FaultSupervisor {
    pub fn new() -> Self {
        Self { faults: 0 }
    }

    /// Re-evaluate every fault.  Returns the updated bitmask.
    pub fn evaluate(&mut self, inputs: &FaultInputs) -> u8 {
        self.eval_fault(Fault::SensorUnavailable, inputs.sensor_unavailable);
        self.eval_fault(Fault::SensorStale, inputs.sensor_stale);
        self.eval_fault(Fault::ValveBlocked, inputs.valve_blocked);
        self.faults
    }

    pub fn faults(&self) -> u8 {
        self.faults
    }

    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    pub fn has_fault(&self, fault: Fault) -> bool {
        self.faults & fault.mask() != 0
    }

    fn eval_fault(&mut self, fault: Fault, condition: bool) {
        if condition {
            if self.faults & fault.mask() == 0 {
                error!("FAULT SET: {fault}");
            }
            self.faults |= fault.mask();
        } else {
            if self.faults & fault.mask() != 0 {
                info!("FAULT CLEARED: {fault}");
            }
            self.faults &= !fault.mask();
        }
    }
}
