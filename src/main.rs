//! GasMux firmware entry point.
//!
//! Hexagonal architecture around a single cooperative super-loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  UartLink          BoardChannel / GpioInput   LogEventSink     │
//! │  (gascard+console) (Actuator, InputPin)       (EventSink)      │
//! │  SystemClock       SoftRtc                    Watchdog         │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Controller (pure logic)                   │    │
//! │  │  GasSensorDriver · SamplingScheduler · FeedScheduler   │    │
//! │  │  ActuatorPool (pumps, DutyCycleValves) · Faults        │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use core::time::Duration;

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use gasmux::adapters::hardware::{UartLink, build_pool};
use gasmux::adapters::log_sink::LogEventSink;
use gasmux::adapters::time::{SoftRtc, SystemClock};
use gasmux::app::console;
use gasmux::app::ports::{GasSensorLink, MonotonicClock};
use gasmux::app::service::Controller;
use gasmux::config::SystemConfig;
use gasmux::drivers::hw_init;
use gasmux::drivers::watchdog::Watchdog;
use gasmux::pins;
use gasmux::sensors::gascard::GasSensorDriver;
use gasmux::sensors::gascard::protocol::MAX_LINE;
use gasmux::shutdown;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  GasMux v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    shutdown::install_panic_handler();

    // ── 2. Outputs off before anything else ───────────────────
    // A watchdog reset does no graceful shutdown; assume the worst.
    if let Err(e) = hw_init::init_peripherals() {
        hw_init::force_outputs_safe();
        return Err(anyhow!("HAL init failed: {e}"));
    }
    hw_init::force_outputs_safe();

    // ── 3. Configuration ──────────────────────────────────────
    let config = match option_env!("GASMUX_CONFIG") {
        Some(json) => SystemConfig::from_json(json).unwrap_or_else(|e| {
            warn!("Baked-in config rejected ({e}), using defaults");
            SystemConfig::default()
        }),
        None => SystemConfig::default(),
    };

    // ── 4. Construct adapters ─────────────────────────────────
    let watchdog = Watchdog::new(config.watchdog_timeout_secs);
    let clock = SystemClock::new();
    let mut rtc = SoftRtc::new();
    let mut sink = LogEventSink::new();
    let mut console_link = UartLink::new(pins::CONSOLE_UART);

    let pool = build_pool(&config, clock.now()).map_err(|e| anyhow!("actuator pool: {e}"))?;
    let gascard = GasSensorDriver::new(UartLink::new(pins::GASCARD_UART), clock);

    // ── 5. Controller ─────────────────────────────────────────
    let loop_period = Duration::from_millis(u64::from(config.control_loop_interval_ms));
    let mut controller = Controller::new(config, clock, Some(gascard), pool);
    controller.start(&watchdog, &mut sink);

    info!("System ready. Entering super-loop.");

    // ── 6. Super-loop ─────────────────────────────────────────
    let result: Result<()> = loop {
        controller.tick(&mut rtc, &watchdog, &mut sink);

        if let Err(e) = service_console(&mut console_link, &mut controller, &mut rtc, &mut sink) {
            break Err(e);
        }

        std::thread::sleep(loop_period);
    };

    // ── 7. Way out: everything off ────────────────────────────
    controller.shutdown();
    if let Err(e) = &result {
        error!("Super-loop exited: {e}");
    }
    result
}

/// Handle every complete console line that is buffered, never blocking.
/// Only a failing UART ends the loop; bad input is logged.
fn service_console<L, C, A, P>(
    link: &mut UartLink,
    controller: &mut Controller<L, C, A, P>,
    rtc: &mut SoftRtc,
    sink: &mut LogEventSink,
) -> Result<()>
where
    L: GasSensorLink,
    C: MonotonicClock,
    A: gasmux::app::ports::Actuator,
    P: embedded_hal::digital::InputPin,
{
    let mut line = [0u8; MAX_LINE];
    while let Some(n) = link
        .read_line(&mut line, Duration::ZERO)
        .map_err(|e| anyhow!("console link: {e}"))?
    {
        let Ok(text) = core::str::from_utf8(&line[..n]) else {
            warn!("Console: input is not UTF-8");
            continue;
        };
        match console::parse(text) {
            Ok(Some(cmd)) => {
                if let Err(e) = controller.handle_command(cmd, rtc, sink) {
                    warn!("Console: {text}: {e}");
                }
            }
            Ok(None) => {}
            Err(usage) => warn!("Console: {usage}"),
        }
    }
    Ok(())
}
