//! Gascard serial line protocol: classification and field parsing.
//!
//! Everything here is pure and allocation-free so it can be fuzzed and
//! property-tested on the host.  The stateful side lives in
//! [`GasSensorDriver`](super::GasSensorDriver).
//!
//! Line shapes (space separated, CR or CRLF terminated):
//!
//! ```text
//!   N  <...>                               normal mode, needs "N1" to stream
//!   N1 <sample> <ref> <x> <conc> <temp> <press>
//!   X  <fw> <serial> <cfg> <freq> <tc> <sw>
//!    Waiting for application S-Record      bootloader banner
//!    Application started from address 0x.. ready banner
//! ```

use crate::error::SensorError;

/// Longest line the driver keeps.  Real lines are well under 64 bytes.
pub const MAX_LINE: usize = 96;

/// Carriage return terminates every command.
pub const CR: u8 = b'\r';

pub const BOOTING_BANNER: &str = " Waiting for application S-Record";
pub const READY_BANNER: &str = " Application started from address";

/// Concentration reported when an `N1` line fails to parse.  Outside any
/// physically possible range so downstream consumers can spot it.
pub const CONCENTRATION_SENTINEL: f32 = -1.0;

/// Number of space-separated fields on `N1` and `X` lines, tag included.
const FIELD_COUNT: usize = 7;

/// Width of one settings field.
pub const SETTING_LEN: usize = 16;

pub type Line = heapless::String<MAX_LINE>;
pub type SettingField = heapless::String<SETTING_LEN>;

/// What a received line is, judged by its two-character prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `"N "`: normal mode.  The card must be asked for `N1`.
    Normal,
    /// `"N1"`: streaming telemetry.
    NormalChannel,
    /// `"X "`: settings read-out.
    Settings,
    /// Anything else: echoes, banners, noise.
    Other,
}

pub fn classify(line: &str) -> LineKind {
    match line.as_bytes() {
        [b'N', b' ', ..] => LineKind::Normal,
        [b'N', b'1', ..] => LineKind::NormalChannel,
        [b'X', b' ', ..] => LineKind::Settings,
        _ => LineKind::Other,
    }
}

/// Free-text banners printed by the gascard bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banner {
    /// Bootloader is waiting; the application follows in about 10 s.
    Booting,
    /// Application is running and will accept commands.
    Ready,
}

pub fn match_banner(line: &str) -> Option<Banner> {
    if line.starts_with(READY_BANNER) {
        Some(Banner::Ready)
    } else if line.starts_with(BOOTING_BANNER) {
        Some(Banner::Booting)
    } else {
        None
    }
}

/// One parsed `N1` telemetry line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub sample: i32,
    pub reference: i32,
    pub concentration: f32,
    pub temperature: f32,
    pub pressure: f32,
}

fn fields(line: &str) -> Result<[&str; FIELD_COUNT], SensorError> {
    let mut out = [""; FIELD_COUNT];
    let mut parts = line.split_ascii_whitespace();
    for slot in &mut out {
        *slot = parts.next().ok_or(SensorError::Parse)?;
    }
    if parts.next().is_some() {
        return Err(SensorError::Parse);
    }
    Ok(out)
}

/// Parse an `N1` line.  Field 3 is unused by the firmware.
pub fn parse_channel(line: &str) -> Result<ChannelReading, SensorError> {
    let f = fields(line)?;
    if f[0] != "N1" {
        return Err(SensorError::Parse);
    }
    let int = |s: &str| s.parse::<i32>().map_err(|_| SensorError::Parse);
    let float = |s: &str| s.parse::<f32>().map_err(|_| SensorError::Parse);
    Ok(ChannelReading {
        sample: int(f[1])?,
        reference: int(f[2])?,
        concentration: float(f[4])?,
        temperature: float(f[5])?,
        pressure: float(f[6])?,
    })
}

/// Settings captured from an `X` line.  Kept as text: the firmware only
/// logs and reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GascardSettings {
    pub firmware_version: SettingField,
    pub serial_number: SettingField,
    pub config_register: SettingField,
    pub frequency: SettingField,
    pub time_constant: SettingField,
    pub switches_state: SettingField,
}

pub fn parse_settings(line: &str) -> Result<GascardSettings, SensorError> {
    let f = fields(line)?;
    if f[0] != "X" {
        return Err(SensorError::Parse);
    }
    let text = |s: &str| SettingField::try_from(s).map_err(|_| SensorError::Parse);
    Ok(GascardSettings {
        firmware_version: text(f[1])?,
        serial_number: text(f[2])?,
        config_register: text(f[3])?,
        frequency: text(f[4])?,
        time_constant: text(f[5])?,
        switches_state: text(f[6])?,
    })
}

/// Reply that acknowledges `cmd`, or `None` if the card sends none.
///
/// `q` reboots the card, which answers with its boot banners instead of
/// an echo.  Everything else is echoed.
pub fn expected_reply(cmd: &str) -> Option<&str> {
    match cmd {
        "q" => None,
        other => Some(other),
    }
}

// ───────────────────────────────────────────────────────────────
// Byte → line assembly
// ───────────────────────────────────────────────────────────────

/// Accumulates UART bytes into complete lines.
///
/// CR, LF and CRLF all terminate a line; empty lines are dropped.  A line
/// that outgrows `N` is discarded up to its terminator rather than being
/// delivered truncated.
#[derive(Debug, Default)]
pub struct LineAssembler<const N: usize> {
    buf: heapless::Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Feed one byte.  Returns the finished line when `byte` terminates
    /// a non-empty one.
    pub fn push(&mut self, byte: u8) -> Option<heapless::Vec<u8, N>> {
        match byte {
            b'\r' | b'\n' => {
                let line = core::mem::take(&mut self.buf);
                if core::mem::take(&mut self.overflowed) {
                    log::warn!("Serial: dropped overlong line");
                    return None;
                }
                (!line.is_empty()).then_some(line)
            }
            _ if self.overflowed => None,
            _ => {
                if self.buf.push(byte).is_err() {
                    self.overflowed = true;
                    self.buf.clear();
                }
                None
            }
        }
    }

    /// Bytes of the line currently being assembled.
    pub fn partial_len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }
}
