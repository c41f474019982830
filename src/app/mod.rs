//! Application core: pure domain logic, zero I/O.
//!
//! The [`service::Controller`] sequences the gascard, the sampling and
//! feed schedulers and the actuator pool.  All interaction with hardware
//! happens through the **port traits** in [`ports`], so this layer runs
//! on the host against mocks.

pub mod commands;
pub mod console;
pub mod events;
pub mod ports;
pub mod service;
