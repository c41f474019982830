//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to the UART console in production).

use core::fmt::Write as _;

use log::{error, info, warn};

use crate::app::events::{AppEvent, TelemetryData};
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => log_telemetry(t),
            AppEvent::Started { sensor_ready } => {
                info!("START | gascard={}", if *sensor_ready { "ready" } else { "unavailable" });
            }
            AppEvent::CycleStarted { cycle } => info!("CYCLE | {cycle} started"),
            AppEvent::SampleCaptured {
                pump,
                concentration,
            } => info!("CYCLE | gc{pump}={concentration:.4}"),
            AppEvent::CycleCompleted { cycle, captured } => {
                info!("CYCLE | {cycle} complete | {}", captures(captured));
            }
            AppEvent::CycleSkipped => warn!("CYCLE | trigger skipped, cycle still running"),
            AppEvent::FeedStarted { valves } => info!("VALVE | feed started on {valves}"),
            AppEvent::ValveBlocked { valve } => error!("VALVE | v{valve:02} blocked"),
            AppEvent::SensorStale => warn!("SENSOR | stale, restarting"),
            AppEvent::SensorReady => info!("SENSOR | ready"),
            AppEvent::FaultDetected(flags) => warn!("FAULT | detected, flags=0b{flags:08b}"),
            AppEvent::FaultCleared => info!("FAULT | all cleared"),
            AppEvent::EmergencyStop => error!("FAULT | emergency stop"),
        }
    }
}

fn log_telemetry(t: &TelemetryData) {
    info!(
        "TELEM | gascard={} mode={:?} | conc={:.4} T={:.1} P={:.1} | {} | \
         pump={} | valves={} | faults=0b{:08b}",
        if t.sensor_ready { "ready" } else { "down" },
        t.sensor_mode,
        t.concentration.unwrap_or(f32::NAN),
        t.temperature.unwrap_or(f32::NAN),
        t.pressure.unwrap_or(f32::NAN),
        captures(&t.captured),
        t.active_pump.unwrap_or(0),
        t.valve_status,
        t.fault_flags,
    );
    if let Some((done, planned)) = t.feed_progress {
        info!("TELEM | pulse {done}/{planned}");
    }
    if let Some(secs) = t.next_feed_secs {
        info!(
            "TELEM | next feed in {:02}:{:02}:{:02}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        );
    }
}

/// `gc1=0.0123 gc2=- ...`, one key per pump.
fn captures(captured: &[Option<f32>]) -> heapless::String<96> {
    let mut out = heapless::String::new();
    for (i, c) in captured.iter().enumerate() {
        let sep = if i == 0 { "" } else { " " };
        // Fits: four pumps at most.
        let _ = match c {
            Some(v) => write!(out, "{sep}gc{}={v:.4}", i + 1),
            None => write!(out, "{sep}gc{}=-", i + 1),
        };
    }
    out
}
