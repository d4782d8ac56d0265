//! Persistent bridge configuration.
//!
//! Reads and writes `kettler_bridge.json` so the serial device, advertised
//! name, and rider setup survive daemon restarts. Command-line flags
//! override whatever is on disk.

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Saved bridge configuration. Every field has a usable default so a
/// missing or partial file still yields a working daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_local_name")]
    pub local_name: String,
    #[serde(default = "default_rider_mass")]
    pub rider_mass_kg: f64,
    #[serde(default = "default_bike_mass")]
    pub bike_mass_kg: f64,
    #[serde(default = "default_dashboard_port")]
    pub dashboard_port: u16,
}

fn default_device() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_local_name() -> String {
    "Kettler Racer 9".to_string()
}

fn default_rider_mass() -> f64 {
    75.0
}

fn default_bike_mass() -> f64 {
    10.0
}

fn default_dashboard_port() -> u16 {
    3000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            local_name: default_local_name(),
            rider_mass_kg: default_rider_mass(),
            bike_mass_kg: default_bike_mass(),
            dashboard_port: default_dashboard_port(),
        }
    }
}

/// Load config from disk. Returns defaults if the file is missing or invalid.
pub fn load(path: &str) -> BridgeConfig {
    let Ok(data) = std::fs::read_to_string(path) else {
        info!("No config at {}, using defaults", path);
        return BridgeConfig::default();
    };
    match serde_json::from_str::<BridgeConfig>(&data) {
        Ok(cfg) => {
            info!("Loaded config: device={}, name={}", cfg.device, cfg.local_name);
            cfg
        }
        Err(e) => {
            warn!("Failed to parse config {}: {}", path, e);
            BridgeConfig::default()
        }
    }
}

/// Save config to disk. Logs on failure but does not return error.
pub fn save(path: &str, config: &BridgeConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("Failed to write config {}: {}", path, e);
            } else {
                info!("Saved config to {}", path);
            }
        }
        Err(e) => {
            warn!("Failed to serialize config: {}", e);
        }
    }
}
