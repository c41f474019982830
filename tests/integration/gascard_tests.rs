//! Integration tests: gascard driver over a scripted serial link.

use core::time::Duration;

use gasmux::app::ports::MonotonicClock;
use gasmux::error::SensorError;
use gasmux::sensors::gascard::{
    GasSensorDriver, LineKind, STALE_AFTER, STARTUP_TIMEOUT, SensorMode,
};

use crate::mock_hw::{BOOTING, MockClock, MockLink, MockWatchdog, READY, SETTINGS};

/// Driver on `link`, whose blocking reads take time on the returned clock.
fn driver(link: &MockLink) -> (GasSensorDriver<MockLink, MockClock>, MockClock) {
    let clock = MockClock::default();
    link.attach_clock(&clock);
    (GasSensorDriver::new(link.clone(), clock.clone()), clock)
}

fn elapsed(clock: &MockClock) -> Duration {
    Duration::from_millis(clock.now().as_millis())
}

#[test]
fn card_booting_into_normal_mode_is_switched_to_channel_mode() {
    let link = MockLink::default();
    link.reply("N1", &["N1"]);
    let (mut gc, _) = driver(&link);

    link.send(BOOTING);
    gc.poll().unwrap();
    assert_eq!(gc.mode(), SensorMode::Booting);

    link.send(READY);
    gc.poll().unwrap();
    assert!(gc.is_ready());

    link.send("N 1200 3400 0");
    assert_eq!(gc.poll().unwrap(), Some(LineKind::Normal));
    assert_eq!(link.commands(), vec!["N1"]);

    link.send("N1 1200 3400 0 0.0421 23 1009.8");
    assert_eq!(gc.poll().unwrap(), Some(LineKind::NormalChannel));
    assert_eq!(gc.mode(), SensorMode::NormalChannel);
    assert_eq!(gc.concentration(), Some(0.0421));
}

#[test]
fn settings_survive_later_telemetry() {
    let link = MockLink::healthy_card();
    let (mut gc, _) = driver(&link);
    gc.start(&MockWatchdog::default()).unwrap();

    link.send("N1 1200 3400 0 0.5000 24 1012.5");
    gc.poll().unwrap();

    let s = gc.settings().unwrap();
    assert_eq!(s.firmware_version.as_str(), "2.11");
    assert_eq!(s.config_register.as_str(), "0x1F");
    assert_eq!(s.switches_state.as_str(), "0101");
    assert_eq!(gc.pressure(), Some(1012.5));
}

#[test]
fn missing_settings_do_not_fail_startup() {
    let link = MockLink::default();
    link.reply("q", &[BOOTING, READY]);
    link.reply("N1", &["N1"]);
    let (mut gc, _) = driver(&link);

    gc.start(&MockWatchdog::default()).unwrap();
    assert!(gc.is_ready());
    assert!(gc.settings().is_none());
}

#[test]
fn restart_feeds_watchdog_while_waiting() {
    let link = MockLink::default();
    let (mut gc, clock) = driver(&link);
    let wd = MockWatchdog::default();

    assert_eq!(gc.restart(&wd), Err(SensorError::Timeout));
    assert!(wd.feeds.get() > 100);
    // Gives up on the startup budget, not on the staleness rule.
    let spent = elapsed(&clock);
    assert!(spent >= STARTUP_TIMEOUT, "gave up after {spent:?}");
    assert!(spent < STARTUP_TIMEOUT + Duration::from_secs(2), "took {spent:?}");
}

#[test]
fn restart_waits_through_bootloader_silence() {
    let link = MockLink::default();
    link.reply("q", &[BOOTING]);
    // Ten quiet seconds between the two banners, as a real card does.
    link.send_at(10_700, READY);
    let (mut gc, clock) = driver(&link);

    assert_eq!(gc.restart(&MockWatchdog::default()), Ok(()));
    assert!(gc.is_ready());
    let spent = elapsed(&clock);
    assert!(spent >= Duration::from_millis(10_700));
    assert!(spent < STARTUP_TIMEOUT);
}

#[test]
fn start_survives_slow_boot_without_settings() {
    let link = MockLink::default();
    link.reply("q", &[BOOTING]);
    link.reply("N1", &["N1"]);
    link.send_at(10_700, READY);
    let (mut gc, _) = driver(&link);

    assert_eq!(gc.start(&MockWatchdog::default()), Ok(()));
    assert!(gc.is_ready());
    assert!(gc.settings().is_none());
    assert_eq!(link.commands(), vec!["X", "q", "X", "N1"]);
}

#[test]
fn begin_restart_does_not_block_and_recovers_on_poll() {
    let link = MockLink::healthy_card();
    let (mut gc, clock) = driver(&link);
    gc.start(&MockWatchdog::default()).unwrap();

    clock.advance_ms(STALE_AFTER.as_millis() as u64 + 1);
    assert_eq!(gc.poll(), Err(SensorError::Stale));

    link.clear_written();
    gc.begin_restart().unwrap();
    assert!(!gc.is_ready());
    assert_eq!(link.commands(), vec!["X", "q"]);

    // The healthy card answers `q` with both banners straight away.
    gc.poll().unwrap();
    assert!(gc.is_ready());
}

#[test]
fn settings_line_is_parsed_outside_startup() {
    let link = MockLink::healthy_card();
    let (mut gc, _) = driver(&link);
    gc.start(&MockWatchdog::default()).unwrap();

    link.send(&SETTINGS.replace("SN0042", "SN0099"));
    assert_eq!(gc.poll().unwrap(), Some(LineKind::Settings));
    assert_eq!(gc.settings().unwrap().serial_number.as_str(), "SN0099");
}
