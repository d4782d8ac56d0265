mod bike;
mod ble;
mod config;
mod control;
mod dashboard;
mod error;
mod kettler;
mod physics;
mod protocol;
mod scheduler;
mod serial;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Mutex;

use bike::BikeState;
use control::ControlPoint;
use scheduler::Publisher;
use serial::SerialSettings;

const DEFAULT_CONFIG_PATH: &str = "kettler_bridge.json";

#[tokio::main]
async fn main() {
    env_logger::init();

    let cfg = parse_args();
    log::info!(
        "bridge starting, device: {}, dashboard port: {}",
        cfg.device,
        cfg.dashboard_port
    );

    let state = Arc::new(Mutex::new(BikeState::default()));
    let (command_tx, command_rx) = unbounded_channel();
    let control = Arc::new(Mutex::new(ControlPoint::new(command_tx)));
    let publisher = Publisher::new();

    let serial_state = state.clone();
    let serial_settings = SerialSettings {
        device: cfg.device.clone(),
        rider_mass_kg: cfg.rider_mass_kg,
        bike_mass_kg: cfg.bike_mass_kg,
    };
    let serial_task = tokio::task::spawn_blocking(move || {
        serial::run_blocking(serial_state, serial_settings, command_rx);
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received shutdown signal");
        }
        _ = serial_task => {
            log::error!("Serial task exited unexpectedly");
            std::process::exit(1);
        }
        _ = scheduler::run(publisher.clone(), state.clone(), Duration::from_secs(1)) => {
            log::error!("Telemetry scheduler exited unexpectedly");
            std::process::exit(1);
        }
        result = ble::run(state.clone(), control.clone(), publisher.clone(), cfg.local_name.clone()) => {
            if let Err(e) = result {
                log::error!("BLE service exited with error: {}", e);
                std::process::exit(1);
            }
        }
        result = dashboard::run(state.clone(), control.clone(), publisher.clone(), cfg.dashboard_port) => {
            if let Err(e) = result {
                log::error!("Dashboard exited with error: {}", e);
            }
        }
    }

    log::info!("bridge shutting down");
}

fn parse_args() -> config::BridgeConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut i = 1;
    while i < args.len() {
        if args[i].as_str() == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
                i += 1;
            }
        }
        i += 1;
    }

    let mut cfg = config::load(&config_path);

    // Flags override the file.
    let mut overridden = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--device" => {
                if let Some(device) = args.get(i + 1) {
                    cfg.device = device.clone();
                    overridden = true;
                    i += 1;
                }
            }
            "--name" => {
                if let Some(name) = args.get(i + 1) {
                    cfg.local_name = name.clone();
                    overridden = true;
                    i += 1;
                }
            }
            "--rider-mass" => {
                if let Some(mass) = args.get(i + 1) {
                    cfg.rider_mass_kg = mass.parse().unwrap_or(cfg.rider_mass_kg);
                    overridden = true;
                    i += 1;
                }
            }
            "--dashboard-port" => {
                if let Some(port) = args.get(i + 1) {
                    cfg.dashboard_port = port.parse().unwrap_or(cfg.dashboard_port);
                    overridden = true;
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    // Persist the effective config so flag overrides survive a restart.
    if overridden {
        config::save(&config_path, &cfg);
    }

    cfg
}
