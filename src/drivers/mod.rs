//! Actuator drivers, hardware initialisation, and peripheral helpers.

pub mod hw_init;
pub mod pool;
pub mod pump;
pub mod valve;
pub mod watchdog;
