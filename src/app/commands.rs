//! Inbound commands to the application core.
//!
//! These represent actions requested by the outside world (the serial
//! console or a configuration push) that the
//! [`Controller`](super::service::Controller) interprets and acts upon.

use core::time::Duration;

use crate::config::SystemConfig;
use crate::sensors::gascard::protocol::Line;
use crate::time::TimeOfDay;

/// Longest environment key or value accepted from the console.
pub const MAX_ENV_LEN: usize = 64;

pub type EnvString = heapless::String<MAX_ENV_LEN>;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Run a pump at `speed`, optionally stopping after `duration`.
    RunPump {
        index: u8,
        speed: f32,
        duration: Option<Duration>,
    },

    /// Put a valve in Manual and flip its target.
    ToggleValve { index: u8 },

    /// Forward a raw command line to the gascard.
    Gascard(Line),

    /// Start a sampling cycle now.
    StartCycle,

    /// Start a feed now.
    StartFeed,

    /// Replace the whole configuration.
    UpdateConfig(SystemConfig),

    /// Change one setting by its environment key.
    SetEnv { key: EnvString, value: EnvString },

    /// Set the wall clock.
    SetTime(TimeOfDay),

    /// Drive every actuator to zero and hold them there.
    EmergencyStop,

    /// Release a latched emergency stop.
    Resume,
}
