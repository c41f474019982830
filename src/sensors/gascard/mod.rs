//! Gascard gas-concentration sensor driver.
//!
//! The card streams one text line per second over UART once it is in
//! `N1` (normal channel) mode.  Getting it there takes a short handshake:
//!
//! ```text
//!   X, q ──▶ " Waiting for application S-Record" ──▶ (~10 s)
//!        ──▶ " Application started from address" ──▶ ready
//!   X    ──▶ "X <fw> <serial> <cfg> <freq> <tc> <sw>"  (settings)
//!   N1   ──▶ "N1 <sample> <ref> <x> <conc> <temp> <press>" ...
//! ```
//!
//! [`GasSensorDriver::poll`] is the only thing the super-loop calls; it
//! never blocks beyond the bounded acknowledgment wait of a command it has
//! to send (switching a card that fell back to `N` mode into `N1`).
//! The blocking handshakes ([`GasSensorDriver::start`],
//! [`GasSensorDriver::restart`]) are time-boxed and feed the watchdog.

pub mod protocol;

use core::time::Duration;

use log::{debug, info, warn};

use crate::app::ports::{GasSensorLink, MonotonicClock, WatchdogPort};
use crate::error::SensorError;
use crate::time::{Deadline, Instant};

pub use protocol::{ChannelReading, GascardSettings, LineKind};
use protocol::{Banner, CONCENTRATION_SENTINEL, CR, Line, MAX_LINE};

/// No line for this long means the card has stalled or rebooted.
pub const STALE_AFTER: Duration = Duration::from_secs(5);

/// Budget for the boot banner after a restart.  The bootloader alone
/// takes about 10 s.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for the settings line after `X`.
pub const SETTINGS_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgment wait: `ACK_ATTEMPTS` reads of up to `ACK_WAIT` each.
const ACK_ATTEMPTS: u8 = 5;
const ACK_WAIT: Duration = Duration::from_millis(100);

/// Per-read wait inside the blocking handshakes.
const HANDSHAKE_WAIT: Duration = Duration::from_millis(100);

/// Upper bound on reads inside a handshake, in case the clock stalls.
const HANDSHAKE_MAX_READS: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    Unknown,
    Booting,
    Normal,
    NormalChannel,
    Settings,
}

/// Protocol state machine for one gascard on one serial link.
pub struct GasSensorDriver<L: GasSensorLink, C: MonotonicClock> {
    link: L,
    clock: C,
    mode: SensorMode,
    ready: bool,
    sample: Option<i32>,
    reference: Option<i32>,
    concentration: Option<f32>,
    temperature: Option<f32>,
    pressure: Option<f32>,
    settings: Option<GascardSettings>,
    last_rx: Instant,
    stale: bool,
    /// Line read while waiting for an acknowledgment that still needs
    /// handling by the next poll.
    pending: Option<Line>,
}

impl<L: GasSensorLink, C: MonotonicClock> GasSensorDriver<L, C> {
    pub fn new(link: L, clock: C) -> Self {
        let now = clock.now();
        Self {
            link,
            clock,
            mode: SensorMode::Unknown,
            ready: false,
            sample: None,
            reference: None,
            concentration: None,
            temperature: None,
            pressure: None,
            settings: None,
            last_rx: now,
            stale: false,
            pending: None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn mode(&self) -> SensorMode {
        self.mode
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Latest concentration (%), `None` until the first `N1` line.
    /// [`CONCENTRATION_SENTINEL`] after a malformed line.
    pub fn concentration(&self) -> Option<f32> {
        self.concentration
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn pressure(&self) -> Option<f32> {
        self.pressure
    }

    pub fn sample(&self) -> Option<i32> {
        self.sample
    }

    pub fn reference(&self) -> Option<i32> {
        self.reference
    }

    pub fn settings(&self) -> Option<&GascardSettings> {
        self.settings.as_ref()
    }

    pub fn last_rx(&self) -> Instant {
        self.last_rx
    }

    // ── Startup ───────────────────────────────────────────────

    /// Full bring-up: restart, read settings, enter `N1` streaming.
    ///
    /// Missing settings are logged and tolerated; only a missing boot
    /// banner fails.
    pub fn start(&mut self, watchdog: &impl WatchdogPort) -> Result<(), SensorError> {
        self.restart(watchdog)?;
        match self.read_settings(watchdog) {
            Ok(s) => info!(
                "Gascard: fw={} serial={} cfg={} freq={} tc={} sw={}",
                s.firmware_version,
                s.serial_number,
                s.config_register,
                s.frequency,
                s.time_constant,
                s.switches_state
            ),
            Err(e) => warn!("Gascard: settings read-out failed: {e}"),
        }
        self.write_command("N1")?;
        Ok(())
    }

    /// Send the reset sequence without waiting for the card to come back.
    ///
    /// The super-loop uses this to recover from a stale link: subsequent
    /// polls pick up the boot banner and the card's own `N` line.
    pub fn begin_restart(&mut self) -> Result<(), SensorError> {
        self.ready = false;
        self.mode = SensorMode::Unknown;
        self.pending = None;
        self.write_command("X")?;
        self.write_command("q")?;
        self.last_rx = self.clock.now();
        self.stale = false;
        Ok(())
    }

    /// Reset the card and wait for its ready banner.
    ///
    /// Time-boxed by [`STARTUP_TIMEOUT`]; the watchdog is fed on every
    /// read.  The card is silent for about 10 s between its two banners,
    /// so [`STALE_AFTER`] does not apply here.
    pub fn restart(&mut self, watchdog: &impl WatchdogPort) -> Result<(), SensorError> {
        info!("Gascard: restarting");
        self.begin_restart()?;
        let deadline = Deadline::after(self.clock.now(), STARTUP_TIMEOUT);
        for _ in 0..HANDSHAKE_MAX_READS {
            watchdog.feed();
            if self.ready {
                return Ok(());
            }
            if deadline.is_elapsed(self.clock.now()) {
                break;
            }
            self.receive(HANDSHAKE_WAIT)?;
        }
        if self.ready {
            return Ok(());
        }
        warn!("Gascard: no ready banner within {}s", STARTUP_TIMEOUT.as_secs());
        Err(SensorError::Timeout)
    }

    /// Ask for the settings line and wait for it.
    pub fn read_settings(
        &mut self,
        watchdog: &impl WatchdogPort,
    ) -> Result<&GascardSettings, SensorError> {
        self.settings = None;
        self.write_command("X")?;
        let deadline = Deadline::after(self.clock.now(), SETTINGS_TIMEOUT);
        for _ in 0..HANDSHAKE_MAX_READS {
            watchdog.feed();
            if self.settings.is_some() || deadline.is_elapsed(self.clock.now()) {
                break;
            }
            self.receive(HANDSHAKE_WAIT)?;
        }
        self.settings.as_ref().ok_or(SensorError::Timeout)
    }

    // ── Commands ──────────────────────────────────────────────

    /// Send `cmd` followed by CR and wait briefly for its acknowledgment.
    ///
    /// Input is flushed first so that any reply belongs to this command.
    /// Returns `Ok(false)` if no acknowledgment arrived; that is logged
    /// and otherwise ignored.  Only a link failure is an error.
    pub fn write_command(&mut self, cmd: &str) -> Result<bool, SensorError> {
        self.link.flush_input().map_err(link_err)?;
        self.pending = None;
        self.link.write(cmd.as_bytes()).map_err(link_err)?;
        self.link.write(&[CR]).map_err(link_err)?;

        let Some(expected) = protocol::expected_reply(cmd) else {
            debug!("Gascard: sent {cmd}");
            return Ok(true);
        };

        for _ in 0..ACK_ATTEMPTS {
            let Some(line) = self.read_line(ACK_WAIT)? else {
                continue;
            };
            if line.starts_with(expected) {
                debug!("Gascard: command {cmd} acknowledged");
                // Data that merely starts with the echo still needs parsing.
                if line.as_str() != expected {
                    self.pending = Some(line);
                }
                return Ok(true);
            }
            self.pending = Some(line);
        }

        if self.ready {
            warn!("Gascard: no acknowledgment of command {cmd}");
        }
        Ok(false)
    }

    // ── Polling ───────────────────────────────────────────────

    /// Process input without blocking.
    ///
    /// Everything buffered except the newest complete line is discarded so
    /// a backlog after a stall cannot hold the readings in the past.
    /// Returns the kind of line handled, if any.  `Err(Stale)` is returned
    /// once when the card goes quiet for [`STALE_AFTER`]; `ready` is
    /// cleared and the caller should restart the card.
    pub fn poll(&mut self) -> Result<Option<LineKind>, SensorError> {
        let handled = self.receive(Duration::ZERO)?;
        if handled.is_none() {
            self.check_stale()?;
        }
        Ok(handled)
    }

    /// Handle the pending line and the newest buffered one, waiting up to
    /// `wait` for input.  No staleness check.
    fn receive(&mut self, wait: Duration) -> Result<Option<LineKind>, SensorError> {
        let mut handled = None;
        if let Some(line) = self.pending.take() {
            handled = Some(self.handle_line(&line));
        }

        if wait.is_zero() && self.pending.is_none() && self.link.bytes_available() == 0 {
            return Ok(handled);
        }

        let mut newest = None;
        let mut timeout = wait;
        while let Some(line) = self.read_line(timeout)? {
            newest = Some(line);
            timeout = Duration::ZERO;
        }
        if let Some(line) = newest {
            handled = Some(self.handle_line(&line));
        }
        Ok(handled)
    }

    fn check_stale(&mut self) -> Result<(), SensorError> {
        let now = self.clock.now();
        if self.stale || now.duration_since(self.last_rx) <= STALE_AFTER {
            return Ok(());
        }
        warn!(
            "Gascard: no data in {} ms, marking not ready",
            now.duration_since(self.last_rx).as_millis()
        );
        self.stale = true;
        self.ready = false;
        self.mode = SensorMode::Unknown;
        Err(SensorError::Stale)
    }

    /// Read one complete line from the link.  Undecodable bytes count as
    /// traffic but are not returned.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<Line>, SensorError> {
        let mut buf = [0u8; MAX_LINE];
        loop {
            let Some(n) = self.link.read_line(&mut buf, timeout).map_err(link_err)? else {
                return Ok(None);
            };
            self.last_rx = self.clock.now();
            self.stale = false;
            let n = n.min(buf.len());
            match core::str::from_utf8(&buf[..n]) {
                Ok(s) => {
                    let mut line = Line::new();
                    // Cannot overflow: `buf` is MAX_LINE bytes.
                    let _ = line.push_str(s.trim_end_matches(['\r', '\n']));
                    return Ok(Some(line));
                }
                Err(_) => debug!("Gascard: dropped non-text line ({n} bytes)"),
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> LineKind {
        if !self.ready {
            match protocol::match_banner(line) {
                Some(Banner::Booting) => {
                    self.mode = SensorMode::Booting;
                    info!("Gascard: found, starting up (~10 s)");
                }
                Some(Banner::Ready) => {
                    self.ready = true;
                    info!("Gascard: ready");
                }
                None => debug!("Gascard: {line}"),
            }
            return LineKind::Other;
        }

        let kind = protocol::classify(line);
        match kind {
            LineKind::Normal => {
                self.mode = SensorMode::Normal;
                info!("Gascard: switching to N1 channel mode");
                if let Err(e) = self.write_command("N1") {
                    warn!("Gascard: N1 request failed: {e}");
                }
            }
            LineKind::NormalChannel => {
                self.mode = SensorMode::NormalChannel;
                self.apply_channel(line);
            }
            LineKind::Settings => {
                self.mode = SensorMode::Settings;
                match protocol::parse_settings(line) {
                    Ok(s) => self.settings = Some(s),
                    Err(_) => warn!("Gascard: malformed settings line: {line}"),
                }
            }
            LineKind::Other => debug!("Gascard: unrecognised line: {line}"),
        }
        kind
    }

    fn apply_channel(&mut self, line: &str) {
        match protocol::parse_channel(line) {
            Ok(r) => {
                self.sample = Some(r.sample);
                self.reference = Some(r.reference);
                self.concentration = Some(r.concentration);
                self.temperature = Some(r.temperature);
                self.pressure = Some(r.pressure);
                debug!("Gascard: {line}");
            }
            Err(_) => {
                self.concentration = Some(CONCENTRATION_SENTINEL);
                warn!("Gascard: malformed telemetry line: {line}");
            }
        }
    }
}

fn link_err<E: core::fmt::Debug>(e: E) -> SensorError {
    warn!("Gascard: serial link error: {e:?}");
    SensorError::Link
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct TestClock(Rc<Cell<u64>>);

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    impl MonotonicClock for TestClock {
        fn now(&self) -> Instant {
            Instant::from_millis(self.0.get())
        }
    }

    /// Scripted link: `rx` is what the card has sent, `replies` maps a
    /// written command to the lines the card answers with.
    #[derive(Default)]
    struct ScriptLink {
        rx: VecDeque<String>,
        replies: Vec<(String, Vec<String>)>,
        written: Vec<u8>,
        flushes: usize,
        /// Empty reads wait out their timeout on this clock.
        clock: Option<TestClock>,
    }

    impl ScriptLink {
        fn commands(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.written)
                .split('\r')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        }
    }

    impl GasSensorLink for ScriptLink {
        type Error = ();

        fn bytes_available(&mut self) -> usize {
            self.rx.iter().map(|l| l.len() + 1).sum()
        }

        fn read_line(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>, ()> {
            if self.rx.is_empty() {
                if let Some(clock) = &self.clock {
                    clock.advance(timeout.as_millis() as u64);
                }
            }
            Ok(self.rx.pop_front().map(|l| {
                let n = l.len().min(buf.len());
                buf[..n].copy_from_slice(&l.as_bytes()[..n]);
                n
            }))
        }

        fn write(&mut self, data: &[u8]) -> Result<(), ()> {
            self.written.extend_from_slice(data);
            if data == [CR] {
                let cmd = self.commands().pop().unwrap_or_default();
                if let Some((_, lines)) = self.replies.iter().find(|(c, _)| *c == cmd) {
                    self.rx.extend(lines.iter().cloned());
                }
            }
            Ok(())
        }

        fn flush_input(&mut self) -> Result<(), ()> {
            self.flushes += 1;
            self.rx.clear();
            Ok(())
        }
    }

    struct NoWatchdog;
    impl WatchdogPort for NoWatchdog {
        fn feed(&self) {}
    }

    fn ready_driver() -> (GasSensorDriver<ScriptLink, TestClock>, TestClock) {
        let clock = TestClock::default();
        let mut d = GasSensorDriver::new(ScriptLink::default(), clock.clone());
        d.link.rx.push_back(" Application started from address 0x8000".into());
        d.poll().unwrap();
        assert!(d.is_ready());
        (d, clock)
    }

    #[test]
    fn ready_banner_then_telemetry() {
        let (mut d, _) = ready_driver();
        d.link.rx.push_back("N1 123 456 7 12.3456 25 1013.2".into());
        assert_eq!(d.poll().unwrap(), Some(LineKind::NormalChannel));
        assert_eq!(d.mode(), SensorMode::NormalChannel);
        assert_eq!(d.concentration(), Some(12.3456));
        assert_eq!(d.temperature(), Some(25.0));
        assert_eq!(d.pressure(), Some(1013.2));
        assert_eq!(d.sample(), Some(123));
        assert_eq!(d.reference(), Some(456));
    }

    #[test]
    fn telemetry_before_ready_is_ignored() {
        let clock = TestClock::default();
        let mut d = GasSensorDriver::new(ScriptLink::default(), clock);
        d.link.rx.push_back("N1 123 456 7 12.3456 25 1013.2".into());
        d.poll().unwrap();
        assert_eq!(d.concentration(), None);
        assert_eq!(d.mode(), SensorMode::Unknown);
    }

    #[test]
    fn booting_banner_sets_booting_mode() {
        let clock = TestClock::default();
        let mut d = GasSensorDriver::new(ScriptLink::default(), clock);
        d.link.rx.push_back(" Waiting for application S-Record".into());
        d.poll().unwrap();
        assert_eq!(d.mode(), SensorMode::Booting);
        assert!(!d.is_ready());
    }

    #[test]
    fn backlog_keeps_only_newest_line() {
        let (mut d, _) = ready_driver();
        d.link.rx.push_back("N1 1 1 0 1.0 20 1000.0".into());
        d.link.rx.push_back("N1 2 2 0 2.0 21 1001.0".into());
        d.link.rx.push_back("N1 3 3 0 3.0 22 1002.0".into());
        d.poll().unwrap();
        assert_eq!(d.concentration(), Some(3.0));
        assert!(d.link.rx.is_empty());
    }

    #[test]
    fn malformed_telemetry_yields_sentinel() {
        let (mut d, _) = ready_driver();
        d.link.rx.push_back("N1 123 456 7 12.3456 25 1013.2".into());
        d.poll().unwrap();
        d.link.rx.push_back("N1 123 456 7 bad 25 1013.2".into());
        d.poll().unwrap();
        assert_eq!(d.concentration(), Some(CONCENTRATION_SENTINEL));
        assert_eq!(d.pressure(), Some(1013.2));
    }

    #[test]
    fn unrecognised_line_keeps_mode_and_concentration() {
        let (mut d, _) = ready_driver();
        d.link.rx.push_back("N1 123 456 7 12.3456 25 1013.2".into());
        d.poll().unwrap();
        d.link.rx.push_back("garbage".into());
        assert_eq!(d.poll().unwrap(), Some(LineKind::Other));
        assert_eq!(d.mode(), SensorMode::NormalChannel);
        assert_eq!(d.concentration(), Some(12.3456));
    }

    #[test]
    fn normal_mode_requests_channel_mode() {
        let (mut d, _) = ready_driver();
        d.link.replies.push(("N1".into(), vec!["N1".into()]));
        d.link.rx.push_back("N 0 0 0".into());
        d.poll().unwrap();
        assert_eq!(d.mode(), SensorMode::Normal);
        assert_eq!(d.link.commands(), vec!["N1".to_string()]);
    }

    #[test]
    fn pure_echo_is_not_parsed_as_telemetry() {
        let (mut d, _) = ready_driver();
        d.link.replies.push(("N1".into(), vec!["N1".into()]));
        assert!(d.write_command("N1").unwrap());
        d.poll().unwrap();
        assert_eq!(d.concentration(), None);
    }

    #[test]
    fn missing_ack_is_soft() {
        let (mut d, _) = ready_driver();
        assert!(!d.write_command("N1").unwrap());
        assert_eq!(d.link.flushes, 1);
    }

    #[test]
    fn reply_carrying_data_is_kept_for_next_poll() {
        let (mut d, _) = ready_driver();
        d.link
            .replies
            .push(("X".into(), vec!["X 2.11 SN0042 0x1F 50 4 0101".into()]));
        assert!(d.write_command("X").unwrap());
        d.poll().unwrap();
        assert_eq!(d.mode(), SensorMode::Settings);
        assert_eq!(d.settings().unwrap().serial_number.as_str(), "SN0042");
    }

    #[test]
    fn goes_stale_after_silence_and_reports_once() {
        let (mut d, clock) = ready_driver();
        clock.advance(5_000);
        assert_eq!(d.poll(), Ok(None));
        clock.advance(1);
        assert_eq!(d.poll(), Err(SensorError::Stale));
        assert!(!d.is_ready());
        assert_eq!(d.mode(), SensorMode::Unknown);
        clock.advance(10_000);
        assert_eq!(d.poll(), Ok(None));
    }

    #[test]
    fn start_runs_full_handshake() {
        let clock = TestClock::default();
        let mut link = ScriptLink::default();
        link.replies.push((
            "q".into(),
            vec![
                " Waiting for application S-Record".into(),
                " Application started from address 0x8000".into(),
            ],
        ));
        link.replies.push((
            "X".into(),
            vec!["X".into(), "X 2.11 SN0042 0x1F 50 4 0101".into()],
        ));
        link.replies.push(("N1".into(), vec!["N1".into()]));
        let mut d = GasSensorDriver::new(link, clock);

        d.start(&NoWatchdog).unwrap();

        assert!(d.is_ready());
        assert_eq!(d.settings().unwrap().firmware_version.as_str(), "2.11");
        assert_eq!(d.link.commands(), vec!["X", "q", "X", "N1"]);
    }

    #[test]
    fn restart_times_out_without_banner() {
        let clock = TestClock::default();
        let link = ScriptLink {
            clock: Some(clock.clone()),
            ..ScriptLink::default()
        };
        let mut d = GasSensorDriver::new(link, clock.clone());
        assert_eq!(d.restart(&NoWatchdog), Err(SensorError::Timeout));
        assert!(!d.is_ready());
        assert!(clock.0.get() >= STARTUP_TIMEOUT.as_millis() as u64);
    }

    #[test]
    fn booting_card_is_not_stale_during_restart() {
        let clock = TestClock::default();
        let mut link = ScriptLink {
            clock: Some(clock.clone()),
            ..ScriptLink::default()
        };
        link.replies.push(("q".into(), vec![" Waiting for application S-Record".into()]));
        let mut d = GasSensorDriver::new(link, clock.clone());

        // Banner arrives, then nothing for well past STALE_AFTER.
        assert_eq!(d.restart(&NoWatchdog), Err(SensorError::Timeout));
        assert_eq!(d.mode(), SensorMode::Booting);
        assert!(clock.0.get() >= STARTUP_TIMEOUT.as_millis() as u64);
    }
}
