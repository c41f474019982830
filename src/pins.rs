//! GPIO / peripheral pin assignments for the GasMux controller board.
//!
//! Single source of truth: every driver and the panic hook reference this
//! module rather than hard-coding pin numbers.

use crate::config::{MAX_PUMPS, MAX_VALVES};

// ---------------------------------------------------------------------------
// Gascard (UART1)
// ---------------------------------------------------------------------------

pub const GASCARD_UART: i32 = 1;
pub const GASCARD_TX_GPIO: i32 = 17;
pub const GASCARD_RX_GPIO: i32 = 18;
/// The card's fixed line rate.
pub const GASCARD_BAUD: u32 = 57_600;

// ---------------------------------------------------------------------------
// Operator console (UART0, shared with the log output)
// ---------------------------------------------------------------------------

pub const CONSOLE_UART: i32 = 0;
pub const CONSOLE_BAUD: u32 = 115_200;

/// Driver RX ring size for both UARTs (bytes).
pub const UART_RX_BUFFER: i32 = 1024;

// ---------------------------------------------------------------------------
// Sampling pumps (DC motor drivers, LEDC PWM)
// ---------------------------------------------------------------------------

/// PWM input of each pump driver, pump 1 first.  LEDC channel `i` drives
/// pump `i + 1`.
pub const PUMP_PWM_GPIOS: [i32; MAX_PUMPS] = [1, 2, 3, 4];

/// LEDC timer resolution (bits).  10-bit gives 0 – 1023 duty levels.
pub const PWM_RESOLUTION_BITS: u32 = 10;
/// LEDC base frequency for the pump motors (25 kHz, inaudible).
pub const PUMP_PWM_FREQ_HZ: u32 = 25_000;

// ---------------------------------------------------------------------------
// Dosing valves (H-bridge, one input per direction)
// ---------------------------------------------------------------------------

/// Pins of one motorised valve.
#[derive(Debug, Clone, Copy)]
pub struct ValvePins {
    /// H-bridge input that drives the valve open.
    pub open: i32,
    /// H-bridge input that drives it closed; `None` for spring-return
    /// solenoids with a single coil.
    pub close: Option<i32>,
    /// Limit switch at the open end stop, active low.
    pub open_sense: Option<i32>,
    /// Limit switch at the closed end stop, active low.
    pub closed_sense: Option<i32>,
}

pub const VALVE_PINS: [ValvePins; MAX_VALVES] = [
    ValvePins {
        open: 5,
        close: Some(6),
        open_sense: Some(13),
        closed_sense: Some(14),
    },
    ValvePins {
        open: 7,
        close: Some(8),
        open_sense: Some(15),
        closed_sense: Some(16),
    },
    ValvePins {
        open: 9,
        close: Some(10),
        open_sense: None,
        closed_sense: None,
    },
    ValvePins {
        open: 11,
        close: Some(12),
        open_sense: None,
        closed_sense: None,
    },
];
