//! Mock hardware adapters for integration tests.
//!
//! Every mock shares its state through `Rc` handles so a test can keep
//! poking at a link or reading a channel after the controller has taken
//! ownership of it.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::time::Duration;
use std::collections::VecDeque;
use std::rc::Rc;

use gasmux::app::events::AppEvent;
use gasmux::app::ports::{
    Actuator, EventSink, GasSensorLink, MonotonicClock, RealTimeClock, WatchdogPort,
};
use gasmux::drivers::pool::ActuatorPool;
use gasmux::drivers::valve::DutyCycleValve;
use gasmux::time::{Instant, TimeOfDay};

pub const READY: &str = " Application started from address 0x8000";
pub const BOOTING: &str = " Waiting for application S-Record";
pub const SETTINGS: &str = "X 2.11 SN0042 0x1F 50 4 0101";

// ── Clock ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockClock(Rc<Cell<u64>>);

#[allow(dead_code)]
impl MockClock {
    pub fn advance_ms(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }
}

impl MonotonicClock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.0.get())
    }
}

// ── Serial link ───────────────────────────────────────────────

#[derive(Default)]
pub struct LinkState {
    /// Lines the card has sent and the firmware not yet read.
    pub rx: VecDeque<String>,
    /// Written command → lines the card answers with.
    pub replies: Vec<(String, Vec<String>)>,
    pub written: Vec<u8>,
    /// When set, a read that finds nothing waits out its timeout on this
    /// clock.
    pub clock: Option<MockClock>,
    /// Lines the card sends once the clock reaches the given millisecond.
    pub later: VecDeque<(u64, String)>,
}

impl LinkState {
    fn deliver_due(&mut self) {
        let Some(now) = self.clock.as_ref().map(|c| c.0.get()) else {
            return;
        };
        while self.later.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, line)) = self.later.pop_front() {
                self.rx.push_back(line);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MockLink(pub Rc<RefCell<LinkState>>);

#[allow(dead_code)]
impl MockLink {
    /// A card that boots, reports its settings and acknowledges `N1`.
    pub fn healthy_card() -> Self {
        let link = Self::default();
        link.reply("q", &[BOOTING, READY]);
        link.reply("X", &["X", SETTINGS]);
        link.reply("N1", &["N1"]);
        link
    }

    /// Let blocking reads advance `clock` by their timeout.
    pub fn attach_clock(&self, clock: &MockClock) {
        self.0.borrow_mut().clock = Some(clock.clone());
    }

    /// Queue `line` to arrive at `at_ms` on the attached clock.
    pub fn send_at(&self, at_ms: u64, line: &str) {
        let mut state = self.0.borrow_mut();
        state.later.push_back((at_ms, line.to_owned()));
        state.later.make_contiguous().sort_by_key(|(at, _)| *at);
    }

    pub fn reply(&self, cmd: &str, lines: &[&str]) {
        self.0
            .borrow_mut()
            .replies
            .push((cmd.to_owned(), lines.iter().map(|l| (*l).to_owned()).collect()));
    }

    pub fn send(&self, line: &str) {
        self.0.borrow_mut().rx.push_back(line.to_owned());
    }

    /// Every CR-terminated command written so far.
    pub fn commands(&self) -> Vec<String> {
        commands(&self.0.borrow().written)
    }

    pub fn clear_written(&self) {
        self.0.borrow_mut().written.clear();
    }
}

fn commands(written: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(written)
        .split('\r')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl GasSensorLink for MockLink {
    type Error = Infallible;

    fn bytes_available(&mut self) -> usize {
        let mut state = self.0.borrow_mut();
        state.deliver_due();
        state.rx.iter().map(|l| l.len() + 1).sum()
    }

    fn read_line(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, Infallible> {
        let mut state = self.0.borrow_mut();
        state.deliver_due();
        if state.rx.is_empty() && !timeout.is_zero() {
            if let Some(clock) = state.clock.clone() {
                clock.advance_ms(timeout.as_millis() as u64);
                state.deliver_due();
            }
        }
        Ok(state.rx.pop_front().map(|l| {
            let n = l.len().min(buf.len());
            buf[..n].copy_from_slice(&l.as_bytes()[..n]);
            n
        }))
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Infallible> {
        let mut state = self.0.borrow_mut();
        state.written.extend_from_slice(data);
        if data == b"\r" {
            let cmd = commands(&state.written).pop().unwrap_or_default();
            let answer = state
                .replies
                .iter()
                .find(|(c, _)| *c == cmd)
                .map(|(_, lines)| lines.clone());
            if let Some(lines) = answer {
                state.rx.extend(lines);
            }
        }
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().rx.clear();
        Ok(())
    }
}

// ── Actuator channel ──────────────────────────────────────────

/// Channel whose duty is observable from the test.
#[derive(Clone, Default)]
pub struct MockChannel(pub Rc<Cell<f32>>);

#[allow(dead_code)]
impl MockChannel {
    pub fn get(&self) -> f32 {
        self.0.get()
    }
}

impl Actuator for MockChannel {
    fn set_duty(&mut self, duty: f32) {
        self.0.set(duty);
    }

    fn duty(&self) -> f32 {
        self.0.get()
    }
}

// ── Limit switch ──────────────────────────────────────────────

/// Active-low input; `true` in the cell means the switch is closed.
#[derive(Clone, Default)]
pub struct MockPin(pub Rc<Cell<bool>>);

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }
}

// ── Real-time clock ───────────────────────────────────────────

/// Wall clock that runs off a [`MockClock`] once it has been set.
pub struct MockRtc {
    clock: MockClock,
    set: Option<(TimeOfDay, u64)>,
    pub alarm: Option<TimeOfDay>,
    pub fired: bool,
}

impl MockRtc {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            set: None,
            alarm: None,
            fired: false,
        }
    }
}

impl RealTimeClock for MockRtc {
    fn time_of_day(&self) -> Option<TimeOfDay> {
        let (at, since) = self.set?;
        let elapsed = (self.clock.0.get() - since) / 1000;
        Some(TimeOfDay::from_secs_of_day(at.secs_of_day() + elapsed as u32))
    }

    fn set_alarm(&mut self, at: TimeOfDay) {
        self.alarm = Some(at);
        self.fired = false;
    }

    fn alarm_fired(&mut self) -> bool {
        self.fired
    }

    fn clear_alarm(&mut self) {
        self.alarm = None;
        self.fired = false;
    }

    fn set_time_of_day(&mut self, now: TimeOfDay) {
        self.set = Some((now, self.clock.0.get()));
    }
}

// ── Watchdog ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockWatchdog {
    pub feeds: Cell<u32>,
}

impl WatchdogPort for MockWatchdog {
    fn feed(&self) {
        self.feeds.set(self.feeds.get() + 1);
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Pool builder ──────────────────────────────────────────────

/// Handles on every channel of a [`mock_pool`].
pub struct PoolHandles {
    pub pumps: Vec<MockChannel>,
    /// `(open, close)` per valve.
    pub valves: Vec<(MockChannel, MockChannel)>,
    /// `(open switch, closed switch)` per valve.
    pub switches: Vec<(MockPin, MockPin)>,
}

/// `pumps` pumps and `valves` double-acting valves with both limit
/// switches wired, each sitting closed.
pub fn mock_pool(pumps: usize, valves: usize) -> (ActuatorPool<MockChannel, MockPin>, PoolHandles) {
    let mut pool = ActuatorPool::new();
    let mut handles = PoolHandles {
        pumps: Vec::new(),
        valves: Vec::new(),
        switches: Vec::new(),
    };
    for _ in 0..pumps {
        let ch = MockChannel::default();
        handles.pumps.push(ch.clone());
        pool.add_pump(ch).unwrap();
    }
    for i in 0..valves {
        let (open, close) = (MockChannel::default(), MockChannel::default());
        let (open_sw, closed_sw) = (MockPin::default(), MockPin::default());
        // Valves rest at their closed end stop.
        closed_sw.0.set(true);
        let valve =
            DutyCycleValve::new(i as u8 + 1, open.clone(), Some(close.clone()), Instant::ZERO)
                .with_position_inputs(Some(open_sw.clone()), Some(closed_sw.clone()));
        handles.valves.push((open, close));
        handles.switches.push((open_sw, closed_sw));
        pool.add_valve(valve).unwrap();
    }
    (pool, handles)
}
