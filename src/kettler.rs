//! Kettler serial protocol: line-framed ASCII at 57600 baud, CRLF terminated.
//!
//! The bike answers an `ST` poll with a status frame of 8 tab-separated
//! fields. There is no checksum byte; a frame is valid iff it has the right
//! field count and every field parses. Anything else is a `FrameError` and
//! is dropped without touching bike state.
//!
//! Frame layout (reply to `ST` or `PW`):
//!   HR  RPM  Speed  Distance  TargetPower  Energy  Time  CurrentPower
//!   e.g. `101\t047\t074\t002\t025\t0312\t01:12\t025`
//! Speed is in 0.1 km/h, Distance in 0.1 km, Time is MM:SS (HH:MM:SS past
//! the hour), powers in watts.
//!
//! Console key presses arrive as a 4-field frame whose last field is the
//! key code.

use std::time::Duration;

use thiserror::Error;

pub const BAUD_RATE: u32 = 57_600;
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);
/// The bike's native update rate: one `ST` poll per second.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const INIT_DELAY: Duration = Duration::from_millis(150);

/// Handshake sent after opening the port, 150 ms apart.
pub const INIT_SEQUENCE: &[&str] = &["VE", "ID", "VE", "KI", "CA", "RS", "CM", "SP1"];

pub const STATUS_POLL: &str = "ST";
pub const RESET_COMMAND: &str = "RS";
pub const EOL: &str = "\r\n";

/// Highest brake target the hardware accepts via `PW`.
pub const MAX_TARGET_POWER_WATTS: u16 = 600;
/// `PW0` releases the brake entirely — the fail-safe target.
pub const SAFE_IDLE_POWER_WATTS: u16 = 0;

/// Commands the rest of the daemon queues for the serial write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BikeCommand {
    /// Set the brake's target power in watts (clamped to the hardware range).
    TargetPower(u16),
    /// Reset the bike console.
    Reset,
}

/// Build a `PW` target-power command line (without EOL).
pub fn power_command(watts: u16) -> String {
    format!("PW{}", watts.min(MAX_TARGET_POWER_WATTS))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected 8 fields, got {0}")]
    FieldCount(usize),
    #[error("field '{field}' is not numeric: {value:?}")]
    BadField { field: &'static str, value: String },
    #[error("malformed time field: {0:?}")]
    BadTime(String),
}

/// One decoded serial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Status(StatusFrame),
    /// Console key press; the code is bike-firmware specific.
    Key(u16),
}

/// Telemetry snapshot as reported by the bike, still in wire units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    /// Beats per minute; 0 means no chest strap paired.
    pub heart_rate_bpm: u16,
    pub cadence_rpm: u16,
    /// Tenths of km/h.
    pub speed_tenths_kmh: u16,
    /// Tenths of km.
    pub distance_tenths_km: u16,
    /// Target power currently set on the brake.
    pub requested_power_watts: u16,
    /// Session energy in kJ (parsed for frame validity, unused downstream).
    pub energy_kj: u16,
    /// Session time as reported by the console.
    pub elapsed_secs: u32,
    /// Actual power on the brake.
    pub power_watts: u16,
}

/// Parse one CRLF-stripped line from the bike.
pub fn parse_frame(line: &str) -> Result<Frame, FrameError> {
    let fields: Vec<&str> = line.split('\t').collect();
    match fields.len() {
        8 => Ok(Frame::Status(parse_status(&fields)?)),
        4 => {
            let key = parse_u16("key", fields[3])?;
            Ok(Frame::Key(key))
        }
        n => Err(FrameError::FieldCount(n)),
    }
}

fn parse_status(fields: &[&str]) -> Result<StatusFrame, FrameError> {
    Ok(StatusFrame {
        heart_rate_bpm: parse_u16("heart rate", fields[0])?,
        cadence_rpm: parse_u16("cadence", fields[1])?,
        speed_tenths_kmh: parse_u16("speed", fields[2])?,
        distance_tenths_km: parse_u16("distance", fields[3])?,
        requested_power_watts: parse_u16("target power", fields[4])?,
        energy_kj: parse_u16("energy", fields[5])?,
        elapsed_secs: parse_elapsed(fields[6])?,
        power_watts: parse_u16("power", fields[7])?,
    })
}

fn parse_u16(field: &'static str, value: &str) -> Result<u16, FrameError> {
    value.trim().parse::<u16>().map_err(|_| FrameError::BadField {
        field,
        value: value.to_string(),
    })
}

/// Parse the console's session time: `MM:SS`, or `HH:MM:SS` past the hour.
fn parse_elapsed(value: &str) -> Result<u32, FrameError> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    let bad = || FrameError::BadTime(value.to_string());

    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;

    // The minute/hour fields are only bounded by their digit count, so the
    // conversion to seconds must not overflow on an absurd value.
    match nums.as_slice() {
        [m, s] if *s < 60 => m.checked_mul(60).and_then(|t| t.checked_add(*s)).ok_or_else(bad),
        [h, m, s] if *m < 60 && *s < 60 => h
            .checked_mul(3600)
            .and_then(|t| t.checked_add(m * 60 + s))
            .ok_or_else(bad),
        _ => Err(bad()),
    }
}
