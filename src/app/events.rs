//! Outbound application events.
//!
//! The [`Controller`](super::service::Controller) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them; on the board they become tagged log
//! lines on the console.

use crate::config::{MAX_PUMPS, MAX_VALVES};
use crate::sensors::gascard::SensorMode;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Periodic telemetry snapshot.
    Telemetry(TelemetryData),

    /// The controller has started.  `sensor_ready` is false when the
    /// gascard did not come up.
    Started { sensor_ready: bool },

    /// A sampling cycle began.
    CycleStarted { cycle: u32 },

    /// A reading was captured for a pump at the end of its step.
    SampleCaptured { pump: u8, concentration: f32 },

    /// The last step of a cycle finished.  `captured` is indexed by
    /// `pump - 1`.
    CycleCompleted {
        cycle: u32,
        captured: [Option<f32>; MAX_PUMPS],
    },

    /// A trigger arrived while a cycle was running and was dropped.
    CycleSkipped,

    /// A feed started pulse trains on `valves` valves.
    FeedStarted { valves: u8 },

    /// A valve failed its position confirmation.
    ValveBlocked { valve: u8 },

    /// The gascard went quiet; a restart has been requested.
    SensorStale,

    /// The gascard reported ready again.
    SensorReady,

    /// One or more advisory faults were raised.
    FaultDetected(u8),

    /// All advisory faults have been cleared.
    FaultCleared,

    /// Every actuator was driven to zero.
    EmergencyStop,
}

/// A point-in-time telemetry snapshot suitable for logging or transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryData {
    pub sensor_ready: bool,
    pub sensor_mode: SensorMode,
    pub concentration: Option<f32>,
    pub temperature: Option<f32>,
    pub pressure: Option<f32>,
    pub sample: Option<i32>,
    pub reference: Option<i32>,
    /// Last capture per pump.
    pub captured: [Option<f32>; MAX_PUMPS],
    /// Pump currently driven by a sampling cycle.
    pub active_pump: Option<u8>,
    /// `0`/`1`/`*` per valve.
    pub valve_status: heapless::String<MAX_VALVES>,
    /// Pulses done and pulses planned on the first valve still pulsing.
    pub feed_progress: Option<(u16, u16)>,
    /// Seconds until the next feed, if the RTC is set.
    pub next_feed_secs: Option<u64>,
    pub fault_flags: u8,
}
