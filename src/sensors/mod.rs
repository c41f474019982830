//! Sensor drivers.
//!
//! The controller reads a single instrument, the gascard NDIR gas sensor,
//! over a UART; see [`gascard`].

pub mod gascard;
