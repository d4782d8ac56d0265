//! The single authoritative bike state.
//!
//! One instance lives behind an `Arc<Mutex<..>>` for the whole process.
//! The serial loop writes telemetry, the control point writes mode/targets,
//! and every reader gets an owned `BikeSnapshot` copy — never a live
//! reference — so a slow consumer can't stall ingestion.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::kettler::{StatusFrame, MAX_TARGET_POWER_WATTS};
use crate::physics::SimParams;
use crate::protocol;

pub type SharedState = Arc<Mutex<BikeState>>;

pub const MIN_GEAR: u8 = 1;
pub const MAX_GEAR: u8 = 20;
/// Startup gear, matching the console default.
pub const DEFAULT_GEAR: u8 = 4;

/// A mode change was requested while no controller owns the bike.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: no control owner connected")]
pub struct InvalidTransition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Idle,
    /// Hold a fixed target power regardless of cadence.
    Erg,
    /// Brake follows the terrain simulation.
    Sim,
}

#[derive(Debug)]
pub struct BikeState {
    speed_kmh: f64,
    cadence_rpm: f64,
    power_watts: i16,
    distance_m: f64,
    heart_rate_bpm: Option<u8>,
    elapsed_secs: u32,

    mode: Mode,
    target_power_watts: Option<u16>,
    sim_params: Option<SimParams>,
    gear: u8,

    control_owner_connected: bool,
    link_connected: bool,

    // Cumulative crank tracking for the Cycling Power Measurement. Advanced
    // from the bike-reported elapsed time, so replaying a frame adds nothing.
    crank_revolutions: f64,
    crank_event_time_1024: u32,
    last_frame_elapsed: Option<u32>,
}

impl Default for BikeState {
    fn default() -> Self {
        Self {
            speed_kmh: 0.0,
            cadence_rpm: 0.0,
            power_watts: 0,
            distance_m: 0.0,
            heart_rate_bpm: None,
            elapsed_secs: 0,
            mode: Mode::Idle,
            target_power_watts: None,
            sim_params: None,
            gear: DEFAULT_GEAR,
            control_owner_connected: false,
            link_connected: false,
            crank_revolutions: 0.0,
            crank_event_time_1024: 0,
            last_frame_elapsed: None,
        }
    }
}

impl BikeState {
    /// Apply one validated status frame from the serial link.
    ///
    /// Idempotent under replay: the frame's own elapsed-time field drives
    /// all accumulation, so applying the same frame twice equals once.
    pub fn apply_telemetry(&mut self, frame: &StatusFrame) {
        let dt = match self.last_frame_elapsed {
            Some(prev) if frame.elapsed_secs >= prev => frame.elapsed_secs - prev,
            // First frame, or the console was reset mid-session.
            _ => 0,
        };
        if dt > 0 && frame.cadence_rpm > 0 {
            self.crank_revolutions += frame.cadence_rpm as f64 / 60.0 * dt as f64;
            // Event time is modular (the wire field wraps at u16), so a huge
            // elapsed jump must wrap rather than overflow the multiply.
            self.crank_event_time_1024 =
                self.crank_event_time_1024.wrapping_add(dt.wrapping_mul(1024));
        }
        self.last_frame_elapsed = Some(frame.elapsed_secs);

        self.speed_kmh = frame.speed_tenths_kmh as f64 * 0.1;
        self.cadence_rpm = frame.cadence_rpm as f64;
        self.power_watts = frame.power_watts as i16;
        self.distance_m = frame.distance_tenths_km as f64 * 100.0;
        self.heart_rate_bpm = match frame.heart_rate_bpm {
            0 => None,
            hr => Some(hr.min(u8::MAX as u16) as u8),
        };
        self.elapsed_secs = frame.elapsed_secs;
    }

    /// Switch to ERG mode with a fixed power target (clamped to hardware).
    pub fn set_target_power(&mut self, watts: u16) -> Result<u16, InvalidTransition> {
        if !self.control_owner_connected {
            return Err(InvalidTransition);
        }
        let clamped = watts.min(MAX_TARGET_POWER_WATTS);
        self.mode = Mode::Erg;
        self.target_power_watts = Some(clamped);
        self.sim_params = None;
        Ok(clamped)
    }

    /// Switch to SIM mode; the target is recomputed per telemetry frame.
    pub fn set_simulation(&mut self, params: SimParams) -> Result<(), InvalidTransition> {
        if !self.control_owner_connected {
            return Err(InvalidTransition);
        }
        self.mode = Mode::Sim;
        self.sim_params = Some(params);
        self.target_power_watts = None;
        Ok(())
    }

    /// Return to Idle and clear both target fields. Always succeeds.
    pub fn stop(&mut self) {
        self.mode = Mode::Idle;
        self.target_power_watts = None;
        self.sim_params = None;
    }

    /// Track control ownership. Losing the owner forces Idle so the brake
    /// never keeps chasing a stale target.
    pub fn set_owner_connected(&mut self, connected: bool) {
        self.control_owner_connected = connected;
        if !connected {
            self.stop();
        }
    }

    pub fn set_link_connected(&mut self, connected: bool) {
        self.link_connected = connected;
    }

    pub fn set_gear(&mut self, gear: u8) {
        self.gear = gear.clamp(MIN_GEAR, MAX_GEAR);
    }

    pub fn gear_up(&mut self) {
        self.gear = (self.gear + 1).min(MAX_GEAR);
    }

    pub fn gear_down(&mut self) {
        self.gear = self.gear.saturating_sub(1).max(MIN_GEAR);
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn gear(&self) -> u8 {
        self.gear
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    pub fn sim_params(&self) -> Option<SimParams> {
        self.sim_params
    }

    /// Owned copy of the current state for codecs and the dashboard.
    pub fn snapshot(&self) -> BikeSnapshot {
        BikeSnapshot {
            speed_kmh: self.speed_kmh,
            cadence_rpm: self.cadence_rpm,
            power_watts: self.power_watts,
            distance_m: self.distance_m,
            heart_rate_bpm: self.heart_rate_bpm,
            elapsed_secs: self.elapsed_secs,
            mode: self.mode,
            target_power_watts: self.target_power_watts,
            sim_params: self.sim_params,
            gear: self.gear,
            control_owner_connected: self.control_owner_connected,
            link_connected: self.link_connected,
            crank_revolutions: self.crank_revolutions as u64 as u16,
            crank_event_time: (self.crank_event_time_1024 & 0xFFFF) as u16,
        }
    }
}

/// Immutable copy handed to the telemetry codec and the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct BikeSnapshot {
    pub speed_kmh: f64,
    pub cadence_rpm: f64,
    pub power_watts: i16,
    pub distance_m: f64,
    pub heart_rate_bpm: Option<u8>,
    pub elapsed_secs: u32,
    pub mode: Mode,
    pub target_power_watts: Option<u16>,
    pub sim_params: Option<SimParams>,
    pub gear: u8,
    pub control_owner_connected: bool,
    pub link_connected: bool,
    #[serde(skip)]
    pub crank_revolutions: u16,
    #[serde(skip)]
    pub crank_event_time: u16,
}

impl BikeSnapshot {
    /// Encode as FTMS Indoor Bike Data (0x2AD2) bytes.
    pub fn encode_indoor_bike_data(&self) -> Vec<u8> {
        protocol::encode_indoor_bike_data(
            scale_u16(self.speed_kmh, 100.0),
            scale_u16(self.cadence_rpm, 2.0),
            self.distance_m as u32,
            self.power_watts,
            self.heart_rate_bpm,
            self.elapsed_secs.min(u16::MAX as u32) as u16,
        )
    }

    /// Encode as Cycling Power Measurement (0x2A63) bytes.
    pub fn encode_power_measurement(&self) -> Vec<u8> {
        protocol::encode_power_measurement(
            self.power_watts,
            self.crank_revolutions,
            self.crank_event_time,
        )
    }
}

fn scale_u16(value: f64, scale: f64) -> u16 {
    (value * scale).round().clamp(0.0, u16::MAX as f64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(elapsed_secs: u32) -> StatusFrame {
        StatusFrame {
            heart_rate_bpm: 101,
            cadence_rpm: 80,
            speed_tenths_kmh: 274,
            distance_tenths_km: 12,
            requested_power_watts: 150,
            energy_kj: 312,
            elapsed_secs,
            power_watts: 148,
        }
    }

    fn sim() -> SimParams {
        SimParams {
            grade_percent: 2.0,
            wind_speed_ms: 0.0,
            crr: 0.005,
            cda: 0.39,
        }
    }

    #[test]
    fn test_apply_telemetry_maps_units() {
        let mut state = BikeState::default();
        state.apply_telemetry(&frame(72));

        let snap = state.snapshot();
        assert_eq!(snap.speed_kmh, 27.4);
        assert_eq!(snap.cadence_rpm, 80.0);
        assert_eq!(snap.power_watts, 148);
        assert_eq!(snap.distance_m, 1200.0);
        assert_eq!(snap.heart_rate_bpm, Some(101));
        assert_eq!(snap.elapsed_secs, 72);
    }

    #[test]
    fn test_apply_telemetry_idempotent_under_replay() {
        let mut once = BikeState::default();
        once.apply_telemetry(&frame(10));
        once.apply_telemetry(&frame(20));

        let mut twice = BikeState::default();
        twice.apply_telemetry(&frame(10));
        twice.apply_telemetry(&frame(20));
        twice.apply_telemetry(&frame(20)); // replay

        let a = once.snapshot();
        let b = twice.snapshot();
        assert_eq!(a.speed_kmh, b.speed_kmh);
        assert_eq!(a.crank_revolutions, b.crank_revolutions);
        assert_eq!(a.crank_event_time, b.crank_event_time);
    }

    #[test]
    fn test_crank_accumulation_from_frame_time() {
        let mut state = BikeState::default();
        state.apply_telemetry(&frame(0));
        state.apply_telemetry(&frame(60)); // 80 rpm for one minute

        let snap = state.snapshot();
        assert_eq!(snap.crank_revolutions, 80);
        assert_eq!(snap.crank_event_time, (60 * 1024 % 65536) as u16);
    }

    #[test]
    fn test_crank_time_wraps_on_huge_elapsed_jump() {
        // A console glitch can report an enormous session time. The event
        // time is modular, so the jump wraps instead of overflowing.
        let mut state = BikeState::default();
        state.apply_telemetry(&frame(0));
        state.apply_telemetry(&frame(5_000_000)); // dt * 1024 > u32::MAX

        // 1024 * dt mod 65536 = 1024 * (dt mod 64); 5_000_000 % 64 == 0.
        assert_eq!(state.snapshot().crank_event_time, 0);
    }

    #[test]
    fn test_zero_heart_rate_means_no_strap() {
        let mut state = BikeState::default();
        let mut f = frame(5);
        f.heart_rate_bpm = 0;
        state.apply_telemetry(&f);
        assert_eq!(state.snapshot().heart_rate_bpm, None);
    }

    #[test]
    fn test_mode_requires_owner() {
        let mut state = BikeState::default();
        assert_eq!(state.set_target_power(200), Err(InvalidTransition));
        assert_eq!(state.set_simulation(sim()), Err(InvalidTransition));
        assert_eq!(state.mode(), Mode::Idle);
    }

    #[test]
    fn test_mode_exclusivity_last_writer_wins() {
        let mut state = BikeState::default();
        state.set_owner_connected(true);

        state.set_target_power(250).unwrap();
        assert_eq!(state.mode(), Mode::Erg);
        assert_eq!(state.snapshot().target_power_watts, Some(250));

        state.set_simulation(sim()).unwrap();
        assert_eq!(state.mode(), Mode::Sim);
        let snap = state.snapshot();
        assert_eq!(snap.target_power_watts, None, "ERG target cleared by SIM");
        assert!(snap.sim_params.is_some());

        state.set_target_power(180).unwrap();
        assert_eq!(state.mode(), Mode::Erg);
        assert_eq!(state.snapshot().sim_params, None, "SIM params cleared by ERG");
    }

    #[test]
    fn test_target_power_clamped_to_hardware() {
        let mut state = BikeState::default();
        state.set_owner_connected(true);
        assert_eq!(state.set_target_power(5000), Ok(MAX_TARGET_POWER_WATTS));
    }

    #[test]
    fn test_owner_disconnect_forces_idle() {
        let mut state = BikeState::default();
        state.set_owner_connected(true);
        state.set_target_power(300).unwrap();

        state.set_owner_connected(false);
        let snap = state.snapshot();
        assert_eq!(snap.mode, Mode::Idle);
        assert_eq!(snap.target_power_watts, None);
        assert_eq!(snap.sim_params, None);
    }

    #[test]
    fn test_serial_reconnect_does_not_reset_mode() {
        let mut state = BikeState::default();
        state.set_owner_connected(true);
        state.set_target_power(220).unwrap();

        state.set_link_connected(false);
        state.set_link_connected(true);
        assert_eq!(state.mode(), Mode::Erg);
    }

    #[test]
    fn test_gear_clamps() {
        let mut state = BikeState::default();
        assert_eq!(state.gear(), DEFAULT_GEAR);

        state.set_gear(0);
        assert_eq!(state.gear(), MIN_GEAR);
        state.gear_down();
        assert_eq!(state.gear(), MIN_GEAR);

        state.set_gear(99);
        assert_eq!(state.gear(), MAX_GEAR);
        state.gear_up();
        assert_eq!(state.gear(), MAX_GEAR);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut state = BikeState::default();
        state.apply_telemetry(&frame(10));
        let snap = state.snapshot();

        let mut later = frame(20);
        later.speed_tenths_kmh = 999;
        state.apply_telemetry(&later);

        assert_eq!(snap.speed_kmh, 27.4, "snapshot unaffected by later frames");
    }
}
