//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the device if the super-loop stalls for longer than the
//! configured timeout.  A watchdog reset performs no graceful shutdown;
//! boot therefore always drives every actuator to off before anything
//! else.
//!
//! The main loop feeds it every iteration, and the gascard handshakes feed
//! it from inside their time-boxed waits.

use core::cell::Cell;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::{
    ESP_OK, esp_err_t, esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_delete,
    esp_task_wdt_reconfigure, esp_task_wdt_reset,
};
use log::{info, warn};

use crate::app::ports::WatchdogPort;

pub struct Watchdog {
    timeout_secs: u32,
    /// Current task is on the TWDT's list; always false on the host.
    subscribed: bool,
    feeds: Cell<u32>,
}

impl Watchdog {
    /// Configure the TWDT and subscribe the current task.
    ///
    /// Failure to subscribe is logged and leaves an inert watchdog: the
    /// firmware still runs, it just loses its liveness backstop.
    pub fn new(timeout_secs: u32) -> Self {
        let subscribed = match subscribe(timeout_secs) {
            Ok(true) => {
                info!("Watchdog: subscribed ({timeout_secs}s timeout, panic on trigger)");
                true
            }
            Ok(false) => {
                info!("Watchdog(sim): {timeout_secs}s, feeds counted only");
                false
            }
            Err(rc) => {
                warn!("Watchdog: failed to subscribe (rc={rc})");
                false
            }
        };
        Self {
            timeout_secs,
            subscribed,
            feeds: Cell::new(0),
        }
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Feeds since boot, wrapping.
    pub fn feeds(&self) -> u32 {
        self.feeds.get()
    }
}

impl WatchdogPort for Watchdog {
    fn feed(&self) {
        self.feeds.set(self.feeds.get().wrapping_add(1));
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: resets the TWDT entry of the calling task, which
            // subscribed in `new`.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: removes the calling task's own subscription.
            unsafe {
                esp_task_wdt_delete(core::ptr::null_mut());
            }
        }
    }
}

#[cfg(target_os = "espidf")]
fn subscribe(timeout_secs: u32) -> Result<bool, esp_err_t> {
    let cfg = esp_task_wdt_config_t {
        timeout_ms: timeout_secs.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    // SAFETY: plain FFI calls with a valid config; runs once from main.
    let ret = unsafe { esp_task_wdt_reconfigure(&cfg) };
    if ret != ESP_OK {
        warn!("Watchdog: reconfigure returned {ret} (may already be configured)");
    }
    // SAFETY: a null handle subscribes the calling task.
    match unsafe { esp_task_wdt_add(core::ptr::null_mut()) } {
        ESP_OK => Ok(true),
        rc => Err(rc),
    }
}

#[cfg(not(target_os = "espidf"))]
fn subscribe(_timeout_secs: u32) -> Result<bool, i32> {
    Ok(false)
}
