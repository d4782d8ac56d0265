//! Road-load model for SIM mode.
//!
//! Training apps send simulated terrain (grade, wind, rolling and wind
//! resistance coefficients); the bike only understands a brake power target.
//! `compute_target_power` converts the terrain plus the rider's current
//! speed into the power the brake must absorb to make pedaling feel like
//! riding that terrain.

use serde::{Deserialize, Serialize};

use crate::kettler::MAX_TARGET_POWER_WATTS;

const GRAVITY_MS2: f64 = 9.81;
const AIR_DENSITY_KG_M3: f64 = 1.225;

/// Simulation parameters from the FTMS Set Indoor Bike Simulation opcode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    pub grade_percent: f64,
    /// Wind along the direction of travel: positive at the rider's back.
    pub wind_speed_ms: f64,
    /// Rolling resistance coefficient (dimensionless).
    pub crr: f64,
    /// Drag coefficient times frontal area, m².
    pub cda: f64,
}

/// Power in watts required to ride at `speed_kmh` against the simulated
/// terrain. Deterministic: identical inputs give bit-identical output.
///
/// Force terms: gravity `m*g*sin(atan(grade/100))`, rolling `Crr*m*g`,
/// aero `0.5*CdA*rho*(v-w)*|v-w|` (signed, so a tailwind faster than the
/// rider subtracts). Power = total force * speed, clamped to what the
/// brake can actually apply.
pub fn compute_target_power(
    params: &SimParams,
    speed_kmh: f64,
    rider_mass_kg: f64,
    bike_mass_kg: f64,
) -> u16 {
    let speed_ms = speed_kmh / 3.6;
    let mass = rider_mass_kg + bike_mass_kg;

    let slope = (params.grade_percent / 100.0).atan();
    let gravity = mass * GRAVITY_MS2 * slope.sin();
    let rolling = params.crr * mass * GRAVITY_MS2;

    let relative = speed_ms - params.wind_speed_ms;
    let aero = 0.5 * params.cda * AIR_DENSITY_KG_M3 * relative * relative.abs();

    let power = (gravity + rolling + aero) * speed_ms;
    power.clamp(0.0, MAX_TARGET_POWER_WATTS as f64) as u16
}

/// Virtual gear multiplier: each step away from gear 5 scales the target
/// by 10%, floor 0. Applied after the pure road-load model.
pub fn apply_gear(power_watts: u16, gear: u8) -> u16 {
    let factor = (1.0 + 0.1 * (gear as f64 - 5.0)).max(0.0);
    let scaled = power_watts as f64 * factor;
    scaled.clamp(0.0, MAX_TARGET_POWER_WATTS as f64) as u16
}
