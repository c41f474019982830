//! Hardware adapters: real peripherals behind the domain port traits.
//!
//! | Type          | Implements                 | Peripheral            |
//! |---------------|----------------------------|-----------------------|
//! | `PwmChannel`  | [`Actuator`]               | LEDC channel (pump)   |
//! | `GpioChannel` | [`Actuator`]               | GPIO output (valve)   |
//! | `GpioInput`   | `embedded_hal` `InputPin`  | GPIO input (switch)   |
//! | `UartLink`    | [`GasSensorLink`]          | UART driver           |
//!
//! This is the only module in the system, apart from `hw_init`, that
//! touches actual hardware.  On non-espidf targets the `hw_init`
//! accessors are inert.

use core::convert::Infallible;
use core::time::Duration;

use embedded_hal::digital::{ErrorType, InputPin};

use crate::app::ports::{Actuator, GasSensorLink};
use crate::config::SystemConfig;
use crate::drivers::hw_init::{self, HwInitError};
use crate::drivers::pool::ActuatorPool;
use crate::drivers::valve::DutyCycleValve;
use crate::pins;
use crate::sensors::gascard::protocol::{LineAssembler, MAX_LINE};
use crate::time::Instant;

// ── Actuator channels ─────────────────────────────────────────

/// PWM output on an LEDC channel.
pub struct PwmChannel {
    channel: u32,
    duty: f32,
}

impl PwmChannel {
    pub fn new(channel: u32) -> Self {
        Self { channel, duty: 0.0 }
    }
}

/// On/off output on a GPIO: any duty above zero drives the pin high.
pub struct GpioChannel {
    pin: i32,
    duty: f32,
}

impl GpioChannel {
    pub fn new(pin: i32) -> Self {
        Self { pin, duty: 0.0 }
    }
}

/// Either kind of channel, so pumps and valves share one pool type.
pub enum BoardChannel {
    Pwm(PwmChannel),
    Gpio(GpioChannel),
}

impl Actuator for BoardChannel {
    fn set_duty(&mut self, duty: f32) {
        match self {
            Self::Pwm(ch) => {
                ch.duty = duty;
                hw_init::ledc_set(ch.channel, duty);
            }
            Self::Gpio(ch) => {
                ch.duty = duty;
                hw_init::gpio_write(ch.pin, duty > 0.0);
            }
        }
    }

    fn duty(&self) -> f32 {
        match self {
            Self::Pwm(ch) => ch.duty,
            Self::Gpio(ch) => ch.duty,
        }
    }
}

// ── Limit switch input ────────────────────────────────────────

pub struct GpioInput {
    pin: i32,
}

impl GpioInput {
    pub fn new(pin: i32) -> Self {
        Self { pin }
    }
}

impl ErrorType for GpioInput {
    type Error = Infallible;
}

impl InputPin for GpioInput {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(hw_init::gpio_read(self.pin))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!hw_init::gpio_read(self.pin))
    }
}

pub type BoardPool = ActuatorPool<BoardChannel, GpioInput>;

/// Build the actuator pool from the pin table: `config.pumps` pumps and
/// the enabled valves.  The first disabled valve ends the list, since
/// valve indices are positional.
pub fn build_pool(
    config: &SystemConfig,
    now: Instant,
) -> Result<BoardPool, crate::error::ActuatorError> {
    let mut pool = BoardPool::new();
    for channel in 0..u32::from(config.pumps).min(pins::PUMP_PWM_GPIOS.len() as u32) {
        pool.add_pump(BoardChannel::Pwm(PwmChannel::new(channel)))?;
    }
    for (i, (valve, cfg)) in pins::VALVE_PINS.iter().zip(&config.valves).enumerate() {
        if !cfg.enabled {
            break;
        }
        let open = BoardChannel::Gpio(GpioChannel::new(valve.open));
        let close = valve.close.map(|p| BoardChannel::Gpio(GpioChannel::new(p)));
        let v = DutyCycleValve::new(i as u8 + 1, open, close, now).with_position_inputs(
            valve.open_sense.map(GpioInput::new),
            valve.closed_sense.map(GpioInput::new),
        );
        pool.add_valve(v)?;
    }
    Ok(pool)
}

// ── Serial link ───────────────────────────────────────────────

/// Line-oriented link over a UART driver.  Used for the gascard and for
/// the operator console.
pub struct UartLink {
    port: i32,
    assembler: LineAssembler<MAX_LINE>,
}

impl UartLink {
    pub fn new(port: i32) -> Self {
        Self {
            port,
            assembler: LineAssembler::new(),
        }
    }
}

impl GasSensorLink for UartLink {
    type Error = HwInitError;

    fn bytes_available(&mut self) -> usize {
        hw_init::uart_buffered(self.port) + self.assembler.partial_len()
    }

    fn read_line(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, HwInitError> {
        let started = std::time::Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            let mut byte = [0u8; 1];
            if hw_init::uart_read(self.port, &mut byte, remaining.as_millis() as u32)? == 0 {
                return Ok(None);
            }
            if let Some(line) = self.assembler.push(byte[0]) {
                let n = line.len().min(buf.len());
                buf[..n].copy_from_slice(&line[..n]);
                return Ok(Some(n));
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), HwInitError> {
        hw_init::uart_write(self.port, data)
    }

    fn flush_input(&mut self) -> Result<(), HwInitError> {
        self.assembler.clear();
        hw_init::uart_flush(self.port)
    }
}
