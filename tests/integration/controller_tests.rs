//! Integration tests: Controller → gascard / schedulers / actuator pool.

use gasmux::app::commands::AppCommand;
use gasmux::app::console;
use gasmux::app::events::AppEvent;
use gasmux::app::ports::RealTimeClock;
use gasmux::app::service::{Controller, SensorHealth};
use gasmux::config::{PumpSequence, SampleSchedule, SystemConfig};
use gasmux::error::Fault;
use gasmux::sensors::gascard::GasSensorDriver;
use gasmux::time::TimeOfDay;

use crate::mock_hw::{
    MockChannel, MockClock, MockLink, MockPin, MockRtc, MockWatchdog, PoolHandles,
    RecordingSink, READY, mock_pool,
};

type TestController = Controller<MockLink, MockClock, MockChannel, MockPin>;

struct Rig {
    c: TestController,
    clock: MockClock,
    link: MockLink,
    hw: PoolHandles,
    rtc: MockRtc,
    wd: MockWatchdog,
    sink: RecordingSink,
}

impl Rig {
    fn new(config: SystemConfig, link: Option<MockLink>, pumps: usize, valves: usize) -> Self {
        let clock = MockClock::default();
        let (pool, hw) = mock_pool(pumps, valves);
        let gascard = link
            .clone()
            .map(|l| GasSensorDriver::new(l, clock.clone()));
        let mut rig = Self {
            c: Controller::new(config, clock.clone(), gascard, pool),
            rtc: MockRtc::new(clock.clone()),
            clock,
            link: link.unwrap_or_default(),
            hw,
            wd: MockWatchdog::default(),
            sink: RecordingSink::default(),
        };
        rig.c.start(&rig.wd, &mut rig.sink);
        rig
    }

    fn tick(&mut self) {
        self.c.tick(&mut self.rtc, &self.wd, &mut self.sink);
    }

    fn command(&mut self, cmd: AppCommand) -> gasmux::error::Result<()> {
        self.c.handle_command(cmd, &mut self.rtc, &mut self.sink)
    }

    fn console(&mut self, line: &str) -> gasmux::error::Result<()> {
        let cmd = console::parse(line).unwrap().unwrap();
        self.command(cmd)
    }

    /// Mirror the valve coils onto their limit switches, as a free valve
    /// would.
    fn follow_switches(&self) {
        for ((open, close), (open_sw, closed_sw)) in self.hw.valves.iter().zip(&self.hw.switches) {
            open_sw.0.set(open.get() > 0.0);
            closed_sw.0.set(close.get() > 0.0);
        }
    }

    fn running_pumps(&self) -> usize {
        self.hw.pumps.iter().filter(|p| p.get() > 0.0).count()
    }
}

fn telemetry(concentration: f32) -> String {
    format!("N1 1200 3400 0 {concentration:.4} 24 1012.5")
}

// ── Gascard lifecycle ─────────────────────────────────────────

#[test]
fn startup_handshake_reaches_ready() {
    let rig = Rig::new(SystemConfig::default(), Some(MockLink::healthy_card()), 4, 1);

    assert_eq!(rig.c.sensor_health(), SensorHealth::Ready);
    assert!(rig.sink.contains(&AppEvent::Started { sensor_ready: true }));
    assert_eq!(rig.link.commands(), vec!["X", "q", "X", "N1"]);
    let settings = rig.c.gascard().unwrap().settings().unwrap();
    assert_eq!(settings.serial_number.as_str(), "SN0042");
    assert!(rig.wd.feeds.get() > 0, "handshake must feed the watchdog");
}

#[test]
fn silent_card_leaves_sensor_unavailable() {
    let mut rig = Rig::new(SystemConfig::default(), Some(MockLink::default()), 4, 1);

    assert_eq!(rig.c.sensor_health(), SensorHealth::Unavailable);
    assert!(rig.sink.contains(&AppEvent::Started { sensor_ready: false }));

    rig.tick();
    assert_ne!(rig.c.fault_flags() & Fault::SensorUnavailable.mask(), 0);

    // A card that comes up late is picked up by the normal poll.
    rig.link.send(READY);
    rig.tick();
    assert_eq!(rig.c.sensor_health(), SensorHealth::Ready);
    assert!(rig.sink.contains(&AppEvent::SensorReady));
    assert_eq!(rig.c.fault_flags(), 0);
    assert!(rig.sink.contains(&AppEvent::FaultCleared));
}

#[test]
fn stale_card_is_restarted_until_it_recovers() {
    let link = MockLink::healthy_card();
    let mut rig = Rig::new(SystemConfig::default(), Some(link.clone()), 4, 1);
    // From here on the card reboots silently.
    link.0.borrow_mut().replies.retain(|(cmd, _)| cmd != "q");
    link.clear_written();

    link.send(&telemetry(0.25));
    rig.tick();
    assert_eq!(rig.c.gascard().unwrap().concentration(), Some(0.25));

    rig.clock.advance_secs(6);
    rig.tick();
    assert!(rig.sink.contains(&AppEvent::SensorStale));
    assert!(matches!(rig.c.sensor_health(), SensorHealth::Recovering(_)));
    assert_ne!(rig.c.fault_flags() & Fault::SensorStale.mask(), 0);
    assert_eq!(link.commands(), vec!["X", "q"]);

    // Still booting: quiet again, but the restart is not repeated yet.
    rig.clock.advance_secs(6);
    rig.tick();
    assert_eq!(rig.sink.count(|e| *e == AppEvent::SensorStale), 1);
    assert_eq!(link.commands().len(), 2);

    // Retry once the startup budget has run out.
    rig.clock.advance_secs(25);
    rig.tick();
    assert_eq!(link.commands(), vec!["X", "q", "X", "q"]);

    // The card finally boots into normal mode and is switched to N1.
    link.send(READY);
    rig.tick();
    assert_eq!(rig.c.sensor_health(), SensorHealth::Ready);
    assert!(rig.sink.contains(&AppEvent::SensorReady));

    link.send("N 1200 3400 0");
    rig.tick();
    assert_eq!(link.commands().last().map(String::as_str), Some("N1"));
    assert_eq!(rig.c.fault_flags(), 0);
}

// ── Sampling ──────────────────────────────────────────────────

fn sampling_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.pumps = 2;
    config.pump_sequence = PumpSequence::from_slice(&[1, 2]).unwrap();
    config.pump_duration_secs = 10;
    config.sample_schedule = SampleSchedule::IntervalSecs(60);
    config
}

#[test]
fn interval_cycle_captures_each_pump() {
    let link = MockLink::healthy_card();
    let mut rig = Rig::new(sampling_config(), Some(link.clone()), 2, 0);
    rig.tick();

    // The card reports a different gas depending on which point is pumped.
    for _ in 0..90 {
        let conc = match rig.c.sampler().active_pump() {
            Some(1) => 1.5,
            Some(2) => 2.5,
            _ => 0.1,
        };
        rig.clock.advance_secs(1);
        link.send(&telemetry(conc));
        rig.tick();
        assert!(rig.running_pumps() <= 1, "more than one pump running");
    }

    assert!(rig.sink.contains(&AppEvent::CycleStarted { cycle: 1 }));
    assert!(rig.sink.contains(&AppEvent::CycleCompleted {
        cycle: 1,
        captured: [Some(1.5), Some(2.5), None, None],
    }));
    assert!(!rig.c.is_sampling());
    assert_eq!(rig.running_pumps(), 0);
}

#[test]
fn cycle_without_gascard_still_runs_pumps() {
    let mut rig = Rig::new(sampling_config(), None, 2, 0);

    rig.command(AppCommand::StartCycle).unwrap();
    assert!(rig.hw.pumps[0].get() > 0.0);

    rig.clock.advance_secs(10);
    rig.tick();
    assert_eq!(rig.hw.pumps[0].get(), 0.0);
    assert!(rig.hw.pumps[1].get() > 0.0);

    rig.clock.advance_secs(10);
    rig.tick();
    assert!(rig.sink.contains(&AppEvent::CycleCompleted {
        cycle: 1,
        captured: [None; 4],
    }));
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::SampleCaptured { .. })), 0);
}

#[test]
fn alarm_schedule_starts_cycle_and_rearms() {
    let mut config = sampling_config();
    config.sample_schedule = SampleSchedule::Times(
        ["06:00", "18:00"].iter().map(|s| s.parse().unwrap()).collect(),
    );
    let mut rig = Rig::new(config, None, 2, 0);

    // No wall clock yet: nothing armed.
    rig.tick();
    assert_eq!(rig.rtc.alarm, None);

    rig.console("time 05:59:30").unwrap();
    rig.tick();
    assert_eq!(rig.rtc.alarm, TimeOfDay::new(6, 0, 0));

    rig.rtc.set_time_of_day(TimeOfDay::new(6, 0, 0).unwrap());
    rig.rtc.fired = true;
    rig.tick();
    assert!(rig.c.is_sampling());
    assert_eq!(rig.rtc.alarm, TimeOfDay::new(18, 0, 0));
    assert!(!rig.rtc.fired);
}

#[test]
fn overlapping_trigger_is_dropped() {
    let mut rig = Rig::new(sampling_config(), None, 2, 0);
    rig.command(AppCommand::StartCycle).unwrap();
    assert!(rig.command(AppCommand::StartCycle).is_err());
    assert!(rig.sink.contains(&AppEvent::CycleSkipped));
    assert_eq!(rig.c.sampler().cycles(), 1);
}

// ── Feeding ───────────────────────────────────────────────────

fn feed_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.feed_times = ["10:00"].iter().map(|s| s.parse().unwrap()).collect();
    config.pulses = 2;
    config.valve_open_secs = 1;
    config.valve_close_secs = 1;
    config
}

#[test]
fn feed_pulses_at_wall_clock_time() {
    let mut rig = Rig::new(feed_config(), None, 0, 1);
    rig.console("time 09:59:58").unwrap();

    let mut opens = 0;
    let mut was_open = false;
    for _ in 0..100 {
        rig.clock.advance_ms(100);
        rig.tick();
        rig.follow_switches();

        let (open, close) = &rig.hw.valves[0];
        assert!(
            !(open.get() > 0.0 && close.get() > 0.0),
            "both coils energized"
        );
        let is_open = open.get() > 0.0;
        if is_open && !was_open {
            opens += 1;
        }
        was_open = is_open;
    }

    assert!(rig.sink.contains(&AppEvent::FeedStarted { valves: 1 }));
    assert_eq!(opens, 2);
    let valve = &rig.c.pool().valves()[0];
    assert_eq!(valve.pulse_count(), 2);
    assert!(!valve.is_open());
    assert!(!valve.is_blocked());
}

#[test]
fn manual_valve_is_left_out_of_feed() {
    let mut rig = Rig::new(feed_config(), None, 0, 2);
    rig.console("set v02-mode manual").unwrap();
    rig.command(AppCommand::StartFeed).unwrap();
    assert!(rig.sink.contains(&AppEvent::FeedStarted { valves: 1 }));
}

#[test]
fn blocked_valve_raises_advisory_fault() {
    let mut rig = Rig::new(feed_config(), None, 0, 1);
    // Stuck mid-travel: neither end stop is reached.
    (rig.hw.switches[0].1).0.set(false);
    rig.command(AppCommand::StartFeed).unwrap();

    for _ in 0..110 {
        rig.clock.advance_ms(100);
        rig.tick();
    }
    assert!(rig.sink.contains(&AppEvent::ValveBlocked { valve: 1 }));
    assert_ne!(rig.c.fault_flags() & Fault::ValveBlocked.mask(), 0);
    assert_eq!(rig.c.build_telemetry().valve_status.as_str(), "*");

    // Blockage is advisory: the train carries on and a confirmed close
    // clears it.
    for _ in 0..30 {
        rig.clock.advance_ms(100);
        rig.tick();
        rig.follow_switches();
    }
    assert!(!rig.c.pool().valves()[0].is_blocked());
    assert_eq!(rig.c.fault_flags() & Fault::ValveBlocked.mask(), 0);
}

#[test]
fn startup_drives_valves_closed() {
    let mut rig = Rig::new(SystemConfig::default(), None, 0, 2);
    for (open, close) in &rig.hw.valves {
        assert_eq!(open.get(), 0.0);
        assert_eq!(close.get(), 1.0);
    }

    for _ in 0..120 {
        rig.clock.advance_ms(100);
        rig.tick();
    }
    assert_eq!(rig.hw.valves[0].1.get(), 1.0);
    assert!(!rig.c.pool().valves()[0].is_blocked());
    assert_eq!(rig.c.fault_flags() & Fault::ValveBlocked.mask(), 0);
}

#[test]
fn resume_closes_valves_again() {
    let mut rig = Rig::new(feed_config(), None, 0, 1);
    rig.console("stop").unwrap();
    assert_eq!(rig.hw.valves[0].1.get(), 0.0);

    rig.console("resume").unwrap();
    rig.clock.advance_ms(100);
    rig.tick();
    assert_eq!(rig.hw.valves[0].0.get(), 0.0);
    assert_eq!(rig.hw.valves[0].1.get(), 1.0);
}

// ── Console and emergency stop ────────────────────────────────

#[test]
fn console_timed_pump_run_stops_itself() {
    let mut rig = Rig::new(sampling_config(), None, 2, 0);
    rig.console("p2 0.5 3").unwrap();
    assert_eq!(rig.hw.pumps[1].get(), 0.5);

    rig.clock.advance_secs(2);
    rig.tick();
    assert_eq!(rig.hw.pumps[1].get(), 0.5);

    rig.clock.advance_secs(1);
    rig.tick();
    assert_eq!(rig.hw.pumps[1].get(), 0.0);
}

#[test]
fn console_forwards_unknown_lines_to_gascard() {
    let link = MockLink::healthy_card();
    let mut rig = Rig::new(SystemConfig::default(), Some(link.clone()), 4, 1);
    link.reply("Z", &["Z"]);
    link.clear_written();

    rig.console("Z").unwrap();
    assert_eq!(link.commands(), vec!["Z"]);
    assert!(rig.console("K 1").is_err(), "unacknowledged command must be reported");
}

#[test]
fn stop_aborts_cycle_and_holds_everything_off() {
    let mut rig = Rig::new(sampling_config(), None, 2, 1);
    rig.command(AppCommand::StartCycle).unwrap();
    rig.command(AppCommand::StartFeed).unwrap();
    rig.clock.advance_ms(200);
    rig.tick();

    rig.console("stop").unwrap();
    assert!(rig.sink.contains(&AppEvent::EmergencyStop));
    assert!(!rig.c.is_sampling());

    for _ in 0..30 {
        rig.clock.advance_secs(1);
        rig.tick();
        assert_eq!(rig.running_pumps(), 0);
        let (open, close) = &rig.hw.valves[0];
        assert_eq!(open.get(), 0.0);
        assert_eq!(close.get(), 0.0);
    }
    assert!(rig.console("p 1 1.0").is_err());

    rig.console("resume").unwrap();
    assert!(!rig.c.is_halted());
    rig.console("p 1 1.0").unwrap();
    assert_eq!(rig.hw.pumps[0].get(), 1.0);
}

#[test]
fn telemetry_is_emitted_at_interval() {
    let mut config = SystemConfig::default();
    config.telemetry_interval_secs = 5;
    let mut rig = Rig::new(config, None, 4, 1);

    for _ in 0..20 {
        rig.clock.advance_secs(1);
        rig.tick();
    }
    let frames = rig.sink.count(|e| matches!(e, AppEvent::Telemetry(_)));
    assert_eq!(frames, 4);
}
