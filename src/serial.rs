//! Serial poll loop for the bike console.
//!
//! The console is half-duplex: we send one command line, it answers one
//! line. A ticker polls `ST` at the bike's native 1 Hz; when a new brake
//! target is pending, `PW<watts>` replaces that tick's poll (both replies
//! carry a full status frame, so no telemetry is lost). The loop runs on a
//! blocking thread via `spawn_blocking`; the rest of the daemon talks to it
//! through the shared state and the command channel.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serialport::SerialPort;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::bike::{Mode, SharedState};
use crate::error::BridgeError;
use crate::kettler::{
    self, BikeCommand, Frame, BAUD_RATE, EOL, INIT_DELAY, INIT_SEQUENCE, POLL_INTERVAL,
    READ_TIMEOUT, RESET_COMMAND, STATUS_POLL,
};
use crate::physics;

pub struct SerialSettings {
    pub device: String,
    pub rider_mass_kg: f64,
    pub bike_mass_kg: f64,
}

/// Run the serial client. Opens the device, polls telemetry, auto-reopens
/// on failure. Never returns; call from `spawn_blocking`.
pub fn run_blocking(
    state: SharedState,
    settings: SerialSettings,
    mut commands: UnboundedReceiver<BikeCommand>,
) {
    let mut backoff = Duration::from_secs(1);

    loop {
        match session(&state, &settings, &mut commands, &mut backoff) {
            Ok(()) => info!("serial session ended cleanly"),
            Err(e) => warn!("serial session error: {}", e),
        }

        state.blocking_lock().set_link_connected(false);

        info!("reopening {} in {:?}...", settings.device, backoff);
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(Duration::from_secs(10));
    }
}

/// Open the port, handshake, and run the poll loop until an I/O error.
fn session(
    state: &SharedState,
    settings: &SerialSettings,
    commands: &mut UnboundedReceiver<BikeCommand>,
    backoff: &mut Duration,
) -> Result<(), BridgeError> {
    let port = serialport::new(&settings.device, BAUD_RATE)
        .timeout(READ_TIMEOUT)
        .open()?;
    info!("opened {} at {} baud", settings.device, BAUD_RATE);

    // Reset backoff on successful open.
    *backoff = Duration::from_secs(1);

    let mut writer = port.try_clone()?;
    let mut reader = BufReader::new(port);

    // Put the console in computer-controlled mode. It answers each command;
    // the replies carry nothing we need.
    for command in INIT_SEQUENCE {
        send_line(&mut writer, command)?;
        std::thread::sleep(INIT_DELAY);
    }
    while let Some(reply) = read_line(&mut reader)? {
        debug!("handshake reply: {:?}", reply);
    }

    state.blocking_lock().set_link_connected(true);

    let mut pending_power: Option<u16> = None;
    let mut last_sent_power: Option<u16> = None;
    let mut reset_pending = false;
    let mut next_poll = Instant::now();

    loop {
        // Drain the command channel; the newest target wins.
        while let Ok(command) = commands.try_recv() {
            match command {
                BikeCommand::TargetPower(watts) => pending_power = Some(watts),
                BikeCommand::Reset => reset_pending = true,
            }
        }

        let line = if reset_pending {
            reset_pending = false;
            pending_power = None;
            last_sent_power = None;
            RESET_COMMAND.to_string()
        } else if let Some(command) = power_line(pending_power, last_sent_power) {
            last_sent_power = pending_power;
            command
        } else {
            STATUS_POLL.to_string()
        };

        send_line(&mut writer, &line)?;

        match read_line(&mut reader)? {
            Some(reply) => match kettler::parse_frame(reply.trim_end()) {
                Ok(Frame::Status(frame)) => {
                    let mut bike = state.blocking_lock();
                    bike.apply_telemetry(&frame);

                    // SIM targets track the rider's speed, so recompute on
                    // every frame; the dedup above drops unchanged values.
                    if bike.mode() == Mode::Sim {
                        if let Some(params) = bike.sim_params() {
                            let road_load = physics::compute_target_power(
                                &params,
                                bike.speed_kmh(),
                                settings.rider_mass_kg,
                                settings.bike_mass_kg,
                            );
                            pending_power = Some(physics::apply_gear(road_load, bike.gear()));
                        }
                    }
                }
                Ok(Frame::Key(code)) => debug!("console key press: {}", code),
                Err(e) => debug!("dropping malformed frame {:?}: {}", reply.trim_end(), e),
            },
            // A missed reply is not fatal; the next poll usually answers.
            None => debug!("poll timed out"),
        }

        next_poll += POLL_INTERVAL;
        match next_poll.checked_duration_since(Instant::now()) {
            Some(wait) => std::thread::sleep(wait),
            None => next_poll = Instant::now(),
        }
    }
}

/// The `PW` line to send this tick, or `None` when the pending target has
/// already been sent.
fn power_line(pending_power: Option<u16>, last_sent_power: Option<u16>) -> Option<String> {
    match pending_power {
        Some(watts) if pending_power != last_sent_power => Some(kettler::power_command(watts)),
        _ => None,
    }
}

fn send_line(writer: &mut Box<dyn SerialPort>, line: &str) -> Result<(), BridgeError> {
    debug!("-> {}", line);
    writer.write_all(line.as_bytes())?;
    writer.write_all(EOL.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read one CRLF-terminated line. `Ok(None)` on read timeout.
fn read_line(reader: &mut BufReader<Box<dyn SerialPort>>) -> Result<Option<String>, BridgeError> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Err(std::io::Error::new(ErrorKind::UnexpectedEof, "device closed").into()),
        Ok(_) => {
            debug!("<- {:?}", line.trim_end());
            Ok(Some(line))
        }
        Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
        Err(e) => Err(e.into()),
    }
}
