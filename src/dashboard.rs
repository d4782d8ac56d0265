//! TCP dashboard for driving the daemon without BLE hardware.
//!
//! Listens on a TCP port (default 3000) and accepts line-based text commands
//! with hex-encoded binary payloads — mirroring exactly what a BLE client
//! would send/receive via GATT characteristics, plus rider-side shortcuts
//! like gear shifting.
//!
//! Usage from dev machine:
//!   nc rpi 3000
//!
//! Commands:
//!   state           → bike state as JSON
//!   ibd             → indoor bike data (0x2AD2) as hex
//!   cpm             → power measurement (0x2A63) as hex
//!   feat            → FTMS feature (0x2ACC) as hex
//!   pr              → supported power range (0x2AD8) as hex
//!   cp <hex>        → write to control point (0x2AD9), returns response hex
//!   watts <n>       → shortcut: take control and set an ERG target
//!   sim <grade> [wind crr cda] → shortcut: take control and set simulation
//!   gear up|down|<n> → shift the virtual gear
//!   stop            → stop the bike and release the brake
//!   sub             → subscribe to the 1 Hz telemetry stream (hex lines)
//!   help            → list commands

use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::bike::SharedState;
use crate::control::{ControlPoint, Controller};
use crate::protocol::{self, ControlRequest};
use crate::scheduler::Publisher;

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Run the TCP dashboard server.
pub async fn run(
    state: SharedState,
    control: Arc<Mutex<ControlPoint>>,
    publisher: Publisher,
    port: u16,
) -> Result<(), DynError> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Dashboard listening on port {}", port);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Dashboard client connected from {}", addr);

        let state = state.clone();
        let control = control.clone();
        let publisher = publisher.clone();

        tokio::spawn(async move {
            // The client runs on its own task so that even a panic in its
            // handler cannot skip the ownership cleanup below.
            let client = tokio::spawn(handle_client(
                stream,
                state.clone(),
                control.clone(),
                publisher,
            ));
            match client.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => info!("Dashboard client {} disconnected: {}", addr, e),
                Err(e) => warn!("Dashboard client {} handler failed: {}", addr, e),
            }
            // Release the brake if this client held control.
            let mut cp = control.lock().await;
            let mut bike = state.lock().await;
            cp.disconnect(Controller::Dashboard, &mut bike);
        });
    }
}

async fn handle_client(
    stream: tokio::net::TcpStream,
    state: SharedState,
    control: Arc<Mutex<ControlPoint>>,
    publisher: Publisher,
) -> Result<(), DynError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer
        .write_all(b"kettler> connected. type 'help' for commands.\n")
        .await?;

    loop {
        writer.write_all(b"kettler> ").await?;

        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim().to_lowercase();
                if line.is_empty() {
                    continue;
                }

                let response = match line.split_once(' ') {
                    Some(("cp", hex)) => handle_cp(hex.trim(), &state, &control).await,
                    Some(("watts", arg)) => handle_watts(arg.trim(), &state, &control).await,
                    Some(("sim", args)) => handle_sim(args.trim(), &state, &control).await,
                    Some(("gear", arg)) => handle_gear(arg.trim(), &state).await,
                    _ => match line.as_str() {
                        "help" => Ok(HELP_TEXT.to_string()),
                        "state" => handle_state(&state).await,
                        "ibd" => {
                            let data = state.lock().await.snapshot().encode_indoor_bike_data();
                            Ok(format!("data {}", hex_encode(&data)))
                        }
                        "cpm" => {
                            let data = state.lock().await.snapshot().encode_power_measurement();
                            Ok(format!("data {}", hex_encode(&data)))
                        }
                        "feat" => Ok(format!(
                            "feat {}",
                            hex_encode(&protocol::encode_ftms_feature())
                        )),
                        "pr" => Ok(format!(
                            "range {}",
                            hex_encode(&protocol::encode_power_range())
                        )),
                        "gear" => Ok(format!("gear {}", state.lock().await.gear())),
                        "stop" => {
                            let request = ControlRequest::StopOrPause(1);
                            dispatch(&request, &state, &control).await;
                            Ok("stopped".to_string())
                        }
                        "sub" => {
                            handle_subscribe(&publisher, &mut writer).await?;
                            continue; // subscribe handles its own output
                        }
                        "quit" | "exit" => return Ok(()),
                        _ => Ok(format!("unknown command: '{}'. type 'help'.", line)),
                    },
                };

                match response {
                    Ok(msg) => {
                        writer.write_all(msg.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                    Err(e) => {
                        writer
                            .write_all(format!("error: {}\n", e).as_bytes())
                            .await?;
                    }
                }
            }
            None => return Ok(()), // EOF
        }
    }
}

/// Run one control request through the same arbitration the BLE path uses.
async fn dispatch(
    request: &ControlRequest,
    state: &SharedState,
    control: &Arc<Mutex<ControlPoint>>,
) -> u8 {
    let mut cp = control.lock().await;
    let mut bike = state.lock().await;
    cp.handle(Controller::Dashboard, request, &mut bike)
}

/// The shortcut commands take control implicitly if nobody holds it.
async fn ensure_control(state: &SharedState, control: &Arc<Mutex<ControlPoint>>) -> u8 {
    dispatch(&ControlRequest::RequestControl, state, control).await
}

async fn handle_state(state: &SharedState) -> Result<String, DynError> {
    let snapshot = state.lock().await.snapshot();
    Ok(serde_json::to_string_pretty(&snapshot)?)
}

async fn handle_cp(
    hex: &str,
    state: &SharedState,
    control: &Arc<Mutex<ControlPoint>>,
) -> Result<String, DynError> {
    let bytes = hex_decode(hex)?;
    if bytes.is_empty() {
        return Ok("error: empty control point data".to_string());
    }

    let opcode = bytes[0];
    match protocol::parse_control_point(&bytes) {
        Some(request) => {
            let result = dispatch(&request, state, control).await;
            let response = protocol::encode_control_response(request.opcode(), result);

            let mut output = format!("parsed: {:?}\nresp {}", request, hex_encode(&response));
            if result != protocol::RESULT_SUCCESS {
                output.push_str("\nwarning: request refused (see daemon log)");
            }
            Ok(output)
        }
        None => {
            let response =
                protocol::encode_control_response(opcode, protocol::RESULT_NOT_SUPPORTED);
            Ok(format!(
                "parsed: unknown opcode 0x{:02x}\nresp {}",
                opcode,
                hex_encode(&response)
            ))
        }
    }
}

async fn handle_watts(
    arg: &str,
    state: &SharedState,
    control: &Arc<Mutex<ControlPoint>>,
) -> Result<String, DynError> {
    let watts: i16 = arg.parse()?;

    let granted = ensure_control(state, control).await;
    if granted != protocol::RESULT_SUCCESS {
        return Ok("error: control held by another client".to_string());
    }

    let result = dispatch(&ControlRequest::SetTargetPower(watts), state, control).await;
    if result == protocol::RESULT_SUCCESS {
        let target = state.lock().await.snapshot().target_power_watts;
        Ok(format!("erg target {} W", target.unwrap_or(0)))
    } else {
        Ok(format!("error: result code 0x{:02x}", result))
    }
}

/// `sim <grade%> [wind_ms crr cda]` — omitted trailing values use road
/// defaults (no wind, crr 0.004, cda 0.51).
async fn handle_sim(
    args: &str,
    state: &SharedState,
    control: &Arc<Mutex<ControlPoint>>,
) -> Result<String, DynError> {
    let mut parts = args.split_whitespace();
    let grade: f64 = parts.next().ok_or("missing grade")?.parse()?;
    let wind: f64 = parts.next().map(str::parse).transpose()?.unwrap_or(0.0);
    let crr: f64 = parts.next().map(str::parse).transpose()?.unwrap_or(0.004);
    let cda: f64 = parts.next().map(str::parse).transpose()?.unwrap_or(0.51);

    let granted = ensure_control(state, control).await;
    if granted != protocol::RESULT_SUCCESS {
        return Ok("error: control held by another client".to_string());
    }

    let request = ControlRequest::SetSimulation {
        wind_mms: (wind * 1000.0) as i16,
        grade_hundredths: (grade * 100.0) as i16,
        crr_ten_thousandths: (crr * 10000.0) as u8,
        cw_hundredths: (cda * 100.0) as u8,
    };
    let result = dispatch(&request, state, control).await;
    if result == protocol::RESULT_SUCCESS {
        Ok(format!(
            "sim grade={:.2}% wind={:.1} m/s crr={:.4} cda={:.2}",
            grade, wind, crr, cda
        ))
    } else {
        Ok(format!("error: result code 0x{:02x}", result))
    }
}

async fn handle_gear(arg: &str, state: &SharedState) -> Result<String, DynError> {
    let mut bike = state.lock().await;
    match arg {
        "up" => bike.gear_up(),
        "down" => bike.gear_down(),
        n => bike.set_gear(n.parse()?),
    }
    Ok(format!("gear {}", bike.gear()))
}

async fn handle_subscribe(
    publisher: &Publisher,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
) -> Result<(), DynError> {
    writer
        .write_all(b"subscribed to telemetry at 1 Hz. ctrl-c to stop.\n")
        .await?;

    let mut frames = publisher.subscribe("dashboard").await;
    while let Some(frame) = frames.recv().await {
        let line = format!(
            "ibd {} | cpm {}\n",
            hex_encode(&frame.indoor_bike_data),
            hex_encode(&frame.power_measurement),
        );
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }

    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("")
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, DynError> {
    let hex = hex.replace(' ', "");
    // The byte-indexed slicing below requires single-byte chars.
    if !hex.is_ascii() {
        return Err("hex string must be ASCII hex digits".into());
    }
    if hex.len() % 2 != 0 {
        return Err("hex string must have even length".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| -> DynError { Box::new(e) })
        })
        .collect()
}

const HELP_TEXT: &str = "\
commands:
  state           show current bike state as JSON
  ibd             read indoor bike data characteristic (0x2AD2) as hex
  cpm             read cycling power measurement (0x2A63) as hex
  feat            read FTMS feature characteristic (0x2ACC) as hex
  pr              read supported power range (0x2AD8) as hex
  cp <hex>        write to control point (0x2AD9), execute + show response
  watts <n>       take control and set an ERG target in watts
  sim <grade> [wind crr cda]  take control and set simulation parameters
  gear up|down|<n>  shift the virtual gear (1-20)
  stop            stop the bike and release the brake
  sub             subscribe to 1 Hz telemetry stream
  help            this message
  quit            disconnect

control point examples:
  cp 00           Request Control
  cp 05 fa00      Set Target Power 250 W (250 = 0x00fa LE)
  cp 11 0000fa003233  Sim: grade 2.50%, crr 0.0050, cw 0.51
  cp 07           Start or Resume
  cp 08 01        Stop
  cp 01           Reset (release control)

all values are little-endian hex, matching raw BLE GATT writes.";
