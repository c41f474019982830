//! Serial console line parser.
//!
//! ```text
//!   p <pump> <speed> [secs]   run a pump (also `p1 0.5 30`)
//!   v <valve>                 manual toggle of a valve
//!   cycle | feed              start a sampling cycle or a feed now
//!   stop | resume             latch all actuators off, release
//!   set <key> <value>         change one setting by its env key
//!   time <HH:MM[:SS]>         set the wall clock
//!   anything else             forwarded to the gascard verbatim
//! ```
//!
//! Pump and valve indices are 1-based, like everywhere else.

use core::fmt;
use core::time::Duration;

use crate::app::commands::{AppCommand, EnvString};
use crate::sensors::gascard::protocol::Line;

/// A console line that looked like a command but had bad arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageError(pub &'static str);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usage: {}", self.0)
    }
}

const PUMP_USAGE: &str = "p <pump> <speed 0..1> [seconds], e.g. p 1 0.6 30";
const VALVE_USAGE: &str = "v <valve>, e.g. v 1";
const SET_USAGE: &str = "set <key> <value>, e.g. set pulses 24";
const TIME_USAGE: &str = "time <HH:MM[:SS]>, e.g. time 09:30";

/// Parse one console line.  Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<AppCommand>, UsageError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let cmd = match line {
        "cycle" => AppCommand::StartCycle,
        "feed" => AppCommand::StartFeed,
        "stop" => AppCommand::EmergencyStop,
        "resume" => AppCommand::Resume,
        _ if line.starts_with("set ") => parse_set(&line[4..])?,
        _ if line.starts_with("time ") => AppCommand::SetTime(
            line[5..].trim().parse().map_err(|_| UsageError(TIME_USAGE))?,
        ),
        _ if is_verb(line, 'p') => parse_pump(&line[1..])?,
        _ if is_verb(line, 'v') => parse_valve(&line[1..])?,
        _ => {
            let mut raw = Line::new();
            raw.push_str(line).map_err(|_| UsageError("gascard command too long"))?;
            AppCommand::Gascard(raw)
        }
    };
    Ok(Some(cmd))
}

/// `p 1 ...`, `p1 ...`: the letter followed by a digit or a space.
fn is_verb(line: &str, verb: char) -> bool {
    let mut chars = line.chars();
    chars.next() == Some(verb)
        && chars.next().is_some_and(|c| c == ' ' || c.is_ascii_digit())
}

fn parse_pump(args: &str) -> Result<AppCommand, UsageError> {
    let mut it = args.split_ascii_whitespace();
    let index = it
        .next()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or(UsageError(PUMP_USAGE))?;
    let speed = it
        .next()
        .and_then(|s| s.parse::<f32>().ok())
        .filter(|s| (0.0..=1.0).contains(s))
        .ok_or(UsageError(PUMP_USAGE))?;
    let duration = match it.next() {
        Some(s) => Some(Duration::from_secs(
            s.parse::<u64>().map_err(|_| UsageError(PUMP_USAGE))?,
        )),
        None => None,
    };
    if it.next().is_some() {
        return Err(UsageError(PUMP_USAGE));
    }
    Ok(AppCommand::RunPump {
        index,
        speed,
        duration,
    })
}

fn parse_valve(args: &str) -> Result<AppCommand, UsageError> {
    let index = args
        .trim()
        .parse::<u8>()
        .map_err(|_| UsageError(VALVE_USAGE))?;
    Ok(AppCommand::ToggleValve { index })
}

fn parse_set(args: &str) -> Result<AppCommand, UsageError> {
    let (key, value) = args
        .trim()
        .split_once(' ')
        .ok_or(UsageError(SET_USAGE))?;
    let mut k = EnvString::new();
    let mut v = EnvString::new();
    k.push_str(key.trim()).map_err(|_| UsageError(SET_USAGE))?;
    v.push_str(value.trim()).map_err(|_| UsageError(SET_USAGE))?;
    Ok(AppCommand::SetEnv { key: k, value: v })
}
