//! GasMux firmware library.
//!
//! One gascard NDIR sensor multiplexed across several sample points by
//! pumps, plus timed dosing through motorised valves.  Exposes the
//! pure-logic modules for integration testing. All ESP-IDF-specific code
//! is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod safety;
pub mod scheduler;
pub mod shutdown;
pub mod time;

pub mod adapters;
pub mod drivers;
pub mod pins;
pub mod sensors;
