//! Unified error types for the GasMux firmware.
//!
//! Every component handles its own failures at its boundary and turns them
//! into log lines plus state flags; these types are what crosses that
//! boundary.  All variants are `Copy` so they can be passed through the
//! super-loop without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The gascard failed to start, went quiet, or sent garbage.
    Sensor(SensorError),
    /// A valve did not confirm its position.
    Valve(ValveFault),
    /// An actuator command could not be honoured.
    Actuator(ActuatorError),
    /// A sampling trigger collided with a running cycle.
    Schedule(ScheduleError),
    /// Configuration is invalid or could not be parsed.
    Config(ConfigError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Valve(e) => write!(f, "valve: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Schedule(e) => write!(f, "schedule: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The boot banner (or settings line) never arrived within the budget.
    Timeout,
    /// No line received for longer than the staleness threshold.
    Stale,
    /// A command was not echoed back.  Soft failure.
    CommandUnacknowledged,
    /// A telemetry or settings line was malformed.
    Parse,
    /// The serial link itself reported an error.
    Link,
    /// No gascard is fitted (or it was never brought up).
    Absent,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "gascard did not become ready"),
            Self::Stale => write!(f, "no data from gascard"),
            Self::CommandUnacknowledged => write!(f, "command not acknowledged"),
            Self::Parse => write!(f, "malformed gascard line"),
            Self::Link => write!(f, "serial link error"),
            Self::Absent => write!(f, "no gascard fitted"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Valve faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveFault {
    /// Position feedback did not assert within the confirmation window.
    PositionTimeout,
}

impl fmt::Display for ValveFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PositionTimeout => write!(f, "position not confirmed, possible blockage"),
        }
    }
}

impl From<ValveFault> for Error {
    fn from(e: ValveFault) -> Self {
        Self::Valve(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// No pump or valve is fitted at this (1-based) index.
    NoSuchChannel(u8),
    /// The channel is owned by a running sampling cycle.
    ChannelBusy(u8),
    /// Emergency stop is latched.
    Halted,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchChannel(i) => write!(f, "no actuator at index {i}"),
            Self::ChannelBusy(i) => write!(f, "actuator {i} is busy with a sampling cycle"),
            Self::Halted => write!(f, "halted by emergency stop"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Schedule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// A cycle trigger arrived while a cycle was running; it was dropped.
    Overlap,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap => write!(f, "cycle already running, trigger dropped"),
        }
    }
}

impl From<ScheduleError> for Error {
    fn from(e: ScheduleError) -> Self {
        Self::Schedule(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation.  The message names the field.
    ValidationFailed(&'static str),
    /// An environment key matched none of the known settings.
    UnknownKey,
    /// A value could not be parsed into the field's type.
    Parse(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::UnknownKey => write!(f, "unknown key"),
            Self::Parse(msg) => write!(f, "could not parse {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Advisory faults
// ---------------------------------------------------------------------------

/// Advisory faults surfaced to telemetry.  None of them stop actuation; they
/// are accumulated in a bitfield by the fault supervisor so that several can
/// be reported at once and cleared individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fault {
    /// The gascard never became ready, or is not fitted.
    SensorUnavailable = 0b0000_0001,
    /// The gascard went quiet and is being restarted.
    SensorStale = 0b0000_0010,
    /// At least one valve failed its last position confirmation.
    ValveBlocked = 0b0000_0100,
}

impl Fault {
    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SensorUnavailable => write!(f, "gascard unavailable"),
            Self::SensorStale => write!(f, "gascard stale"),
            Self::ValveBlocked => write!(f, "valve blocked"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
