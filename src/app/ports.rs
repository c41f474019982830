//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Driven adapters (serial link, actuator channels, clocks, watchdog, event
//! sinks) implement these traits.  The [`Controller`](super::service::Controller)
//! and the components it owns consume them via generics, so the domain core
//! never touches hardware directly and every state machine runs on the host.
//!
//! Valve position feedback is not wrapped in a port of our own: the valves
//! consume `embedded_hal::digital::InputPin` directly.

use core::time::Duration;

use crate::error::ActuatorError;
use crate::time::{Instant, TimeOfDay};

// ───────────────────────────────────────────────────────────────
// Gas sensor link (driven adapter: UART ↔ domain)
// ───────────────────────────────────────────────────────────────

/// Byte-stream transport to the gascard.
///
/// Lines are CR or CRLF terminated on the wire; `read_line` hands back the
/// line content without its terminator.
pub trait GasSensorLink {
    type Error: core::fmt::Debug;

    /// Bytes currently buffered and not yet consumed.
    fn bytes_available(&mut self) -> usize;

    /// Copy the next complete line into `buf` and return its length.
    ///
    /// Waits at most `timeout` for a line to complete; `Duration::ZERO`
    /// never blocks.  `Ok(None)` if no complete line arrived in time.
    /// Lines longer than `buf` are truncated.
    fn read_line(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, Self::Error>;

    /// Write raw bytes.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Discard everything received so far, complete lines and partial.
    fn flush_input(&mut self) -> Result<(), Self::Error>;
}

// ───────────────────────────────────────────────────────────────
// Actuator channel (driven adapter: domain → one output)
// ───────────────────────────────────────────────────────────────

/// A single physical driver channel: a solenoid coil, a motor driver half,
/// a relay.  Duty is normalised to `[0.0, 1.0]`; valves only use 0 and 1.
pub trait Actuator {
    fn set_duty(&mut self, duty: f32);

    /// The duty last commanded.
    fn duty(&self) -> f32;

    fn is_energized(&self) -> bool {
        self.duty() > 0.0
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator port (domain → pump bank)
// ───────────────────────────────────────────────────────────────

/// Write-side port used by the sampling scheduler to drive pumps by their
/// 1-based index.
pub trait ActuatorPort {
    /// Number of pump channels fitted.
    fn pump_count(&self) -> u8;

    /// Run pump `index` at `duty` (clamped to `[0, 1]`).
    fn set_pump(&mut self, index: u8, duty: f32) -> Result<(), ActuatorError>;

    /// Stop pump `index`.
    fn stop_pump(&mut self, index: u8) -> Result<(), ActuatorError>;

    /// Current duty of pump `index`, `None` if not fitted.
    fn pump_duty(&self, index: u8) -> Option<f32>;

    /// Stop every pump.
    fn stop_all_pumps(&mut self);

    /// Drive every pump and valve channel to zero for a safe shutdown.
    fn all_off(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clocks
// ───────────────────────────────────────────────────────────────

/// Monotonic time since boot.
pub trait MonotonicClock {
    fn now(&self) -> Instant;
}

/// Wall-clock source with a single daily wake alarm.
pub trait RealTimeClock {
    /// Current local time of day, `None` if the clock is not set.
    fn time_of_day(&self) -> Option<TimeOfDay>;

    /// Arm the alarm for the next occurrence of `at`.  Replaces any
    /// previously armed alarm.
    fn set_alarm(&mut self, at: TimeOfDay);

    /// Whether the alarm-status flag is raised.
    fn alarm_fired(&mut self) -> bool;

    /// Lower the alarm-status flag and disarm.
    fn clear_alarm(&mut self);

    /// Set the wall clock.
    fn set_time_of_day(&mut self, now: TimeOfDay);
}

// ───────────────────────────────────────────────────────────────
// Watchdog
// ───────────────────────────────────────────────────────────────

/// Hardware watchdog.  Must be fed at least once per loop iteration and
/// from inside every time-boxed wait.
pub trait WatchdogPort {
    fn feed(&self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, the
/// cloud-sync queue, a display).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}
