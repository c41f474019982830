//! One-shot hardware peripheral initialization and raw peripheral access.
//!
//! Configures the two UARTs, the valve GPIOs and the pump LEDC channels
//! using raw ESP-IDF sys calls.  Called once from `main()` before the
//! super-loop starts.  The adapters and the panic hook go through the
//! small accessors at the bottom of each section; on the host they are
//! inert.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

// ── Error type ────────────────────────────────────────────────

/// Errors from peripheral initialization or a raw peripheral call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    UartFailed(i32),
    GpioConfigFailed(i32),
    LedcFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UartFailed(rc) => write!(f, "UART call failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcFailed(rc) => write!(f, "LEDC config failed (rc={})", rc),
        }
    }
}

#[cfg(target_os = "espidf")]
fn check(ret: esp_err_t, err: fn(i32) -> HwInitError) -> Result<(), HwInitError> {
    if ret == ESP_OK { Ok(()) } else { Err(err(ret)) }
}

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before the super-loop; single-threaded.
    unsafe {
        init_gpio_outputs()?;
        init_gpio_inputs()?;
        init_ledc()?;
        init_uart(
            pins::GASCARD_UART,
            pins::GASCARD_BAUD,
            Some((pins::GASCARD_TX_GPIO, pins::GASCARD_RX_GPIO)),
        )?;
        init_uart(pins::CONSOLE_UART, pins::CONSOLE_BAUD, None)?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── Emergency shutdown ────────────────────────────────────────

/// Drive every pump and valve output low straight from the pin table.
///
/// Needs no driver object, so the panic hook can call it.
pub fn force_outputs_safe() {
    for channel in 0..pins::PUMP_PWM_GPIOS.len() as u32 {
        ledc_set(channel, 0.0);
    }
    for valve in &pins::VALVE_PINS {
        gpio_write(valve.open, false);
        if let Some(close) = valve.close {
            gpio_write(close, false);
        }
    }
}

// ── GPIO Outputs (valve H-bridge inputs) ──────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<(), HwInitError> {
    let output_pins = pins::VALVE_PINS
        .iter()
        .flat_map(|v| core::iter::once(v.open).chain(v.close));

    for pin in output_pins {
        // Low before the pin becomes an output: no glitch on the coil.
        unsafe { gpio_set_level(pin, 0) };
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_ENABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        check(unsafe { gpio_config(&cfg) }, HwInitError::GpioConfigFailed)?;
        unsafe { gpio_set_level(pin, 0) };
    }

    info!("hw_init: valve outputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an already-configured output pin;
    // main loop and panic hook only.
    unsafe { gpio_set_level(pin, if high { 1 } else { 0 }); }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── GPIO Inputs (valve limit switches) ────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_inputs() -> Result<(), HwInitError> {
    let input_pins = pins::VALVE_PINS
        .iter()
        .flat_map(|v| v.open_sense.into_iter().chain(v.closed_sense));

    for pin in input_pins {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        check(unsafe { gpio_config(&cfg) }, HwInitError::GpioConfigFailed)?;
    }

    info!("hw_init: limit switch inputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

/// Pulled up with nothing attached: reads high (switch open).
#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

// ── LEDC PWM (pumps) ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc() -> Result<(), HwInitError> {
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_10_BIT,
        freq_hz: pins::PUMP_PWM_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    check(unsafe { ledc_timer_config(&timer) }, HwInitError::LedcFailed)?;

    for (i, &gpio) in pins::PUMP_PWM_GPIOS.iter().enumerate() {
        let ret = unsafe {
            ledc_channel_config(&ledc_channel_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel: ledc_channel_t_LEDC_CHANNEL_0 + i as u32,
                timer_sel: ledc_timer_t_LEDC_TIMER_0,
                gpio_num: gpio,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            })
        };
        check(ret, HwInitError::LedcFailed)?;
    }

    info!("hw_init: LEDC configured (pumps on CH0-CH{})", pins::PUMP_PWM_GPIOS.len() - 1);
    Ok(())
}

/// Set a pump channel's duty, `0.0..=1.0`.
#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: f32) {
    let max = (1u32 << pins::PWM_RESOLUTION_BITS) - 1;
    let raw = (duty.clamp(0.0, 1.0) * max as f32) as u32;
    // SAFETY: LEDC channels were configured in init_ledc(); only the main
    // loop and the panic hook write duty.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, raw);
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(_channel: u32, _duty: f32) {}

// ── UART ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_uart(port: i32, baud: u32, pins: Option<(i32, i32)>) -> Result<(), HwInitError> {
    if let Some((tx, rx)) = pins {
        let cfg = uart_config_t {
            baud_rate: baud as i32,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };
        check(unsafe { uart_param_config(port, &cfg) }, HwInitError::UartFailed)?;
        check(
            unsafe { uart_set_pin(port, tx, rx, UART_PIN_NO_CHANGE, UART_PIN_NO_CHANGE) },
            HwInitError::UartFailed,
        )?;
    }
    let ret = unsafe {
        uart_driver_install(port, pins::UART_RX_BUFFER, 0, 0, core::ptr::null_mut(), 0)
    };
    check(ret, HwInitError::UartFailed)?;
    info!("hw_init: UART{} at {} baud", port, baud);
    Ok(())
}

/// Read up to `buf.len()` bytes, waiting at most `timeout_ms` for the first.
#[cfg(target_os = "espidf")]
pub fn uart_read(port: i32, buf: &mut [u8], timeout_ms: u32) -> Result<usize, HwInitError> {
    let ticks = (u64::from(timeout_ms) * u64::from(CONFIG_FREERTOS_HZ) / 1000) as TickType_t;
    // SAFETY: the driver is installed; `buf` is valid for `len` bytes.
    let n = unsafe { uart_read_bytes(port, buf.as_mut_ptr().cast(), buf.len() as u32, ticks) };
    if n < 0 {
        return Err(HwInitError::UartFailed(n));
    }
    Ok(n as usize)
}

#[cfg(not(target_os = "espidf"))]
pub fn uart_read(_port: i32, _buf: &mut [u8], _timeout_ms: u32) -> Result<usize, HwInitError> {
    Ok(0)
}

#[cfg(target_os = "espidf")]
pub fn uart_write(port: i32, data: &[u8]) -> Result<(), HwInitError> {
    // SAFETY: the driver is installed; `data` is valid for its length.
    let n = unsafe { uart_write_bytes(port, data.as_ptr().cast(), data.len()) };
    if n < 0 {
        return Err(HwInitError::UartFailed(n));
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn uart_write(_port: i32, _data: &[u8]) -> Result<(), HwInitError> {
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn uart_buffered(port: i32) -> usize {
    let mut len: usize = 0;
    // SAFETY: writes into a valid local.
    let ret = unsafe { uart_get_buffered_data_len(port, &mut len) };
    if ret == ESP_OK { len } else { 0 }
}

#[cfg(not(target_os = "espidf"))]
pub fn uart_buffered(_port: i32) -> usize {
    0
}

#[cfg(target_os = "espidf")]
pub fn uart_flush(port: i32) -> Result<(), HwInitError> {
    // SAFETY: the driver is installed.
    check(unsafe { uart_flush_input(port) }, HwInitError::UartFailed)
}

#[cfg(not(target_os = "espidf"))]
pub fn uart_flush(_port: i32) -> Result<(), HwInitError> {
    Ok(())
}
