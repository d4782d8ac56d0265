//! BLE GATT server for the FTMS indoor bike and Cycling Power profiles.
//!
//! Advertises both services so fitness apps like Zwift, TrainerRoad, and
//! head units can subscribe to telemetry and send control commands. The
//! Cycling Power service carries the same power data for apps that don't
//! speak FTMS.

use std::sync::Arc;

use bluer::{
    adv::Advertisement,
    gatt::local::{
        characteristic_control, Application, Characteristic, CharacteristicControlEvent,
        CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
        CharacteristicWrite, CharacteristicWriteMethod, Service,
    },
};
use futures::{pin_mut, FutureExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::bike::{Mode, SharedState};
use crate::control::{ControlPoint, Controller};
use crate::protocol::{
    self, CONTROL_POINT_UUID, CPS_SERVICE_UUID, FEATURE_UUID, FTMS_SERVICE_UUID,
    INDOOR_BIKE_DATA_UUID, MACHINE_STATUS_UUID, POWER_FEATURE_UUID, POWER_MEASUREMENT_UUID,
    POWER_RANGE_UUID, SENSOR_LOCATION_UUID,
};
use crate::scheduler::Publisher;

type NotifyFn = Box<
    dyn Fn(
            bluer::gatt::local::CharacteristicNotifier,
        ) -> std::pin::Pin<Box<dyn futures::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Spawn a notification session that forwards one field of each published
/// telemetry frame until the client unsubscribes.
fn telemetry_notify_fn(
    publisher: Publisher,
    label: &'static str,
    select: fn(crate::scheduler::TelemetryFrame) -> Vec<u8>,
) -> NotifyFn {
    Box::new(move |notifier| {
        let publisher = publisher.clone();
        async move {
            tokio::spawn(async move {
                info!(
                    "{} notification session started (confirming={})",
                    label,
                    notifier.confirming()
                );
                let mut notifier = notifier;
                let mut frames = publisher.subscribe(label).await;
                while let Some(frame) = frames.recv().await {
                    if notifier.is_stopped() {
                        break;
                    }
                    let data = select(frame);
                    debug!("{} notify: {} bytes", label, data.len());
                    if let Err(err) = notifier.notify(data).await {
                        warn!("{} notification error: {}", label, err);
                        break;
                    }
                }
                info!("{} notification session ended", label);
            });
        }
        .boxed()
    })
}

/// Run the BLE GATT server. Registers both services, advertises, and
/// processes control point traffic until the adapter goes away.
pub async fn run(
    state: SharedState,
    control: Arc<Mutex<ControlPoint>>,
    publisher: Publisher,
    local_name: String,
) -> bluer::Result<()> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    info!(
        "BLE using adapter {} ({})",
        adapter.name(),
        adapter.address().await?
    );

    // --- Advertisement ---
    // FTMS spec Section 3.1: Service Data carries Flags (available) +
    // Fitness Machine Type (indoor bike).
    let ftms_service_data: Vec<u8> = vec![
        0x01, // Flags: bit 0 = Fitness Machine Available
        0x20, // Fitness Machine Type: bit 5 = Indoor Bike Supported
    ];
    let adv = Advertisement {
        advertisement_type: bluer::adv::Type::Peripheral,
        service_uuids: vec![FTMS_SERVICE_UUID, CPS_SERVICE_UUID]
            .into_iter()
            .collect(),
        service_data: [(FTMS_SERVICE_UUID, ftms_service_data)]
            .into_iter()
            .collect(),
        local_name: Some(local_name.clone()),
        discoverable: Some(true),
        ..Default::default()
    };
    let _adv_handle = adapter.advertise(adv).await?;
    info!("Advertising as {:?} with FTMS and CPS services", local_name);

    // --- Telemetry notifications ---
    let indoor_bike_notify_fn =
        telemetry_notify_fn(publisher.clone(), "Indoor Bike Data", |frame| {
            frame.indoor_bike_data
        });
    let power_measurement_notify_fn =
        telemetry_notify_fn(publisher.clone(), "Power Measurement", |frame| {
            frame.power_measurement
        });

    // --- Machine Status notify ---
    // Status updates are pushed when control commands take effect, so the
    // notifier is shared with the control point handler below.
    let status_notifier: Arc<Mutex<Option<bluer::gatt::local::CharacteristicNotifier>>> =
        Arc::new(Mutex::new(None));

    let sn_clone = status_notifier.clone();
    let machine_status_notify_fn: NotifyFn = Box::new(move |notifier| {
        let sn = sn_clone.clone();
        async move {
            info!(
                "Machine Status notification session started (confirming={})",
                notifier.confirming()
            );
            // Send initial "Stopped by User" so the client knows machine state.
            let mut notifier = notifier;
            let _ = notifier.notify(vec![0x02, 0x01]).await;
            let mut sn_guard = sn.lock().await;
            *sn_guard = Some(notifier);
        }
        .boxed()
    });

    let machine_status_state = state.clone();

    // --- Control Point write handler ---
    // IO mode: writes arrive on our event loop and indication responses go
    // out through the notify handle.
    let (cp_control, cp_handle) = characteristic_control();
    let cp_status_notifier = status_notifier.clone();

    // --- Build GATT Application ---
    let app = Application {
        services: vec![
            Service {
                uuid: FTMS_SERVICE_UUID,
                primary: true,
                characteristics: vec![
                    // Fitness Machine Feature (0x2ACC) -- Read
                    Characteristic {
                        uuid: FEATURE_UUID,
                        read: Some(CharacteristicRead {
                            read: true,
                            fun: Box::new(|_req| {
                                async move {
                                    debug!("Feature characteristic read");
                                    Ok(protocol::encode_ftms_feature().to_vec())
                                }
                                .boxed()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    // Indoor Bike Data (0x2AD2) -- Notify at 1 Hz
                    Characteristic {
                        uuid: INDOOR_BIKE_DATA_UUID,
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Fun(indoor_bike_notify_fn),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    // Supported Power Range (0x2AD8) -- Read
                    Characteristic {
                        uuid: POWER_RANGE_UUID,
                        read: Some(CharacteristicRead {
                            read: true,
                            fun: Box::new(|_req| {
                                async move {
                                    debug!("Power range characteristic read");
                                    Ok(protocol::encode_power_range().to_vec())
                                }
                                .boxed()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    // Fitness Machine Control Point (0x2AD9) -- Write + Indicate
                    Characteristic {
                        uuid: CONTROL_POINT_UUID,
                        write: Some(CharacteristicWrite {
                            write: true,
                            method: CharacteristicWriteMethod::Io,
                            ..Default::default()
                        }),
                        notify: Some(CharacteristicNotify {
                            indicate: true,
                            method: CharacteristicNotifyMethod::Io,
                            ..Default::default()
                        }),
                        control_handle: cp_handle,
                        ..Default::default()
                    },
                    // Fitness Machine Status (0x2ADA) -- Read + Notify
                    Characteristic {
                        uuid: MACHINE_STATUS_UUID,
                        read: Some(CharacteristicRead {
                            read: true,
                            fun: Box::new(move |_req| {
                                let state = machine_status_state.clone();
                                async move {
                                    debug!("Machine Status read");
                                    let status = match state.lock().await.mode() {
                                        Mode::Idle => vec![0x02, 0x01],
                                        Mode::Erg | Mode::Sim => vec![0x04],
                                    };
                                    Ok(status)
                                }
                                .boxed()
                            }),
                            ..Default::default()
                        }),
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Fun(machine_status_notify_fn),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            Service {
                uuid: CPS_SERVICE_UUID,
                primary: true,
                characteristics: vec![
                    // Cycling Power Measurement (0x2A63) -- Notify at 1 Hz
                    Characteristic {
                        uuid: POWER_MEASUREMENT_UUID,
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Fun(power_measurement_notify_fn),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    // Cycling Power Feature (0x2A65) -- Read
                    Characteristic {
                        uuid: POWER_FEATURE_UUID,
                        read: Some(CharacteristicRead {
                            read: true,
                            fun: Box::new(|_req| {
                                async move {
                                    debug!("Power feature characteristic read");
                                    Ok(protocol::encode_cps_feature().to_vec())
                                }
                                .boxed()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    // Sensor Location (0x2A5D) -- Read
                    Characteristic {
                        uuid: SENSOR_LOCATION_UUID,
                        read: Some(CharacteristicRead {
                            read: true,
                            fun: Box::new(|_req| {
                                async move { Ok(vec![protocol::SENSOR_LOCATION_REAR_HUB]) }
                                    .boxed()
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let _app_handle = adapter.serve_gatt_application(app).await?;
    info!("FTMS and CPS GATT services registered");

    // --- Control Point event loop ---
    // Process write requests (commands) and notify events (indication
    // subscribers) from the IO-mode control point characteristic.
    let mut cp_reader: Option<bluer::gatt::CharacteristicReader> = None;
    let mut cp_writer: Option<bluer::gatt::CharacteristicWriter> = None;
    let mut read_buf = Vec::new();

    pin_mut!(cp_control);

    info!("bridge BLE service running");

    loop {
        tokio::select! {
            // Handle control point IO events (new writer or subscriber)
            evt = cp_control.next() => {
                match evt {
                    Some(CharacteristicControlEvent::Write(req)) => {
                        info!(
                            "Control Point write session from {} (MTU {})",
                            req.device_address(), req.mtu()
                        );
                        read_buf = vec![0u8; req.mtu()];
                        match req.accept() {
                            Ok(reader) => cp_reader = Some(reader),
                            Err(e) => error!("Failed to accept CP write: {}", e),
                        }
                    }
                    Some(CharacteristicControlEvent::Notify(notifier)) => {
                        info!(
                            "Control Point indicate session from {} (MTU {})",
                            notifier.device_address(), notifier.mtu()
                        );
                        cp_writer = Some(notifier);
                    }
                    None => {
                        info!("Control Point control stream ended");
                        break;
                    }
                }
            }

            // Read incoming control point writes
            read_res = async {
                match &mut cp_reader {
                    Some(reader) => reader.read(&mut read_buf).await,
                    None => futures::future::pending().await,
                }
            } => {
                match read_res {
                    Ok(0) => {
                        info!("Control Point write stream ended");
                        cp_reader = None;
                        // The controlling app went away; release the brake.
                        let mut cp = control.lock().await;
                        let mut bike = state.lock().await;
                        cp.disconnect(Controller::Ble, &mut bike);
                    }
                    Ok(n) => {
                        let bytes = &read_buf[..n];
                        debug!("Control Point write: {} bytes {:02x?}", n, bytes);

                        let (opcode, result) = match protocol::parse_control_point(bytes) {
                            Some(request) => {
                                // Lock order: control point, then bike state.
                                let result = {
                                    let mut cp = control.lock().await;
                                    let mut bike = state.lock().await;
                                    cp.handle(Controller::Ble, &request, &mut bike)
                                };

                                // Announce the accepted change before the
                                // response indication.
                                if result == protocol::RESULT_SUCCESS {
                                    if let Some(status_data) = protocol::encode_machine_status(&request) {
                                        let mut sn = cp_status_notifier.lock().await;
                                        if let Some(notifier) = sn.as_mut() {
                                            if notifier.is_stopped() {
                                                *sn = None;
                                            } else if let Err(e) = notifier.notify(status_data).await {
                                                warn!("Status notification error: {}", e);
                                                *sn = None;
                                            }
                                        }
                                    }
                                }

                                (request.opcode(), result)
                            }
                            None => {
                                warn!("Unknown control point opcode: 0x{:02x}", bytes[0]);
                                (bytes[0], protocol::RESULT_NOT_SUPPORTED)
                            }
                        };

                        // Send the indication response via the writer. This is
                        // a datagram socket, so one write is one indication.
                        let response = protocol::encode_control_response(opcode, result);
                        if let Some(writer) = cp_writer.as_mut() {
                            if let Err(e) = writer.write(&response).await {
                                warn!("Control Point indication error: {}", e);
                                cp_writer = None;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Control Point read error: {}", e);
                        cp_reader = None;
                        let mut cp = control.lock().await;
                        let mut bike = state.lock().await;
                        cp.disconnect(Controller::Ble, &mut bike);
                    }
                }
            }
        }
    }

    Ok(())
}
