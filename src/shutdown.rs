//! Last-resort shutdown paths.
//!
//! A panic anywhere in the firmware must not leave a pump running or a
//! valve coil energised until the watchdog resets the chip.  The hook
//! installed here drives every output low straight from the pin table
//! (see [`hw_init::force_outputs_safe`]), which needs no actuator object
//! and therefore works whatever state the controller was in.

use core::any::Any;

use crate::drivers::hw_init;

/// Install a panic hook that forces every output off, then hands over to
/// the previous hook (which aborts and resets on the board).
pub fn install_panic_handler() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC: {}", panic_reason(info.payload()));
        hw_init::force_outputs_safe();
        log::error!("PANIC: all outputs forced off");
        previous(info);
    }));
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_from_str_and_string_payloads() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_reason(s.as_ref()), "bang");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_reason(s.as_ref()), "unknown panic");
    }
}
