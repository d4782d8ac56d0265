/// FTMS (Fitness Machine Service) and CPS (Cycling Power Service) binary
/// protocol encoding/decoding.
///
/// All multi-byte values are little-endian per the Bluetooth GATT
/// specification. FTMS uses metric units internally: speed in km/h * 100,
/// cadence in rpm * 2, grade in % * 100.

use uuid::Uuid;

// Bluetooth SIG base UUID: 0000XXXX-0000-1000-8000-00805f9b34fb
pub const fn ble_uuid(short: u16) -> Uuid {
    Uuid::from_u128(
        ((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb_u128,
    )
}

// FTMS service and characteristic UUIDs
pub const FTMS_SERVICE_UUID: Uuid = ble_uuid(0x1826);
pub const FEATURE_UUID: Uuid = ble_uuid(0x2ACC);
pub const INDOOR_BIKE_DATA_UUID: Uuid = ble_uuid(0x2AD2);
pub const POWER_RANGE_UUID: Uuid = ble_uuid(0x2AD8);
pub const CONTROL_POINT_UUID: Uuid = ble_uuid(0x2AD9);
pub const MACHINE_STATUS_UUID: Uuid = ble_uuid(0x2ADA);

// CPS service and characteristic UUIDs
pub const CPS_SERVICE_UUID: Uuid = ble_uuid(0x1818);
pub const POWER_MEASUREMENT_UUID: Uuid = ble_uuid(0x2A63);
pub const POWER_FEATURE_UUID: Uuid = ble_uuid(0x2A65);
pub const SENSOR_LOCATION_UUID: Uuid = ble_uuid(0x2A5D);

/// Sensor Location characteristic value: Rear Hub.
pub const SENSOR_LOCATION_REAR_HUB: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    RequestControl,
    Reset,
    /// Resistance level in wire units (0.1 resolution). Parsed but the
    /// brake has no resistance-level concept, so it is always refused.
    SetTargetResistance(u8),
    SetTargetPower(i16), // watts
    StartOrResume,
    StopOrPause(u8), // 1=stop, 2=pause
    /// Raw wire units: wind m/s * 1000, grade % * 100, crr * 1e4, cw * 100.
    SetSimulation {
        wind_mms: i16,
        grade_hundredths: i16,
        crr_ten_thousandths: u8,
        cw_hundredths: u8,
    },
    SpinDownControl(u8),
}

impl ControlRequest {
    /// The wire opcode, echoed back in the response indication.
    pub fn opcode(&self) -> u8 {
        match self {
            ControlRequest::RequestControl => 0x00,
            ControlRequest::Reset => 0x01,
            ControlRequest::SetTargetResistance(_) => 0x04,
            ControlRequest::SetTargetPower(_) => 0x05,
            ControlRequest::StartOrResume => 0x07,
            ControlRequest::StopOrPause(_) => 0x08,
            ControlRequest::SetSimulation { .. } => 0x11,
            ControlRequest::SpinDownControl(_) => 0x13,
        }
    }
}

// Control Point result codes (FTMS spec Table 4.24)
pub const RESULT_SUCCESS: u8 = 0x01;
pub const RESULT_NOT_SUPPORTED: u8 = 0x02;
pub const RESULT_INVALID_PARAM: u8 = 0x03;
pub const RESULT_FAILED: u8 = 0x04;
pub const RESULT_NOT_PERMITTED: u8 = 0x05;
pub const RESPONSE_CODE: u8 = 0x80;

/// Encode FTMS Indoor Bike Data characteristic (0x2AD2).
///
/// Flags 0x0854 = bits 2,4,6,11 set (plus bit 9 when heart rate is known):
///   - Bit 0 = 0: Instantaneous Speed present (More Data not set)
///   - Bit 2 = 1: Instantaneous Cadence present
///   - Bit 4 = 1: Total Distance present
///   - Bit 6 = 1: Instantaneous Power present
///   - Bit 9 = 1: Heart Rate present (only with a paired strap)
///   - Bit 11 = 1: Elapsed Time present
///
/// Layout: flags(2) + speed(2) + cadence(2) + distance(3) + power(2)
///         [+ heart_rate(1)] + elapsed(2) = 13 or 14 bytes
pub fn encode_indoor_bike_data(
    speed_kmh_hundredths: u16,
    cadence_half_rpm: u16,
    distance_meters: u32,
    power_watts: i16,
    heart_rate_bpm: Option<u8>,
    elapsed_secs: u16,
) -> Vec<u8> {
    let mut flags: u16 = 0x0854;
    if heart_rate_bpm.is_some() {
        flags |= 0x0200;
    }
    let mut buf = Vec::with_capacity(14);

    // Flags (uint16 LE)
    buf.extend_from_slice(&flags.to_le_bytes());

    // Instantaneous Speed (uint16 LE, km/h with 0.01 resolution)
    buf.extend_from_slice(&speed_kmh_hundredths.to_le_bytes());

    // Instantaneous Cadence (uint16 LE, rpm with 0.5 resolution)
    buf.extend_from_slice(&cadence_half_rpm.to_le_bytes());

    // Total Distance (uint24 LE, meters)
    let dist_bytes = distance_meters.to_le_bytes();
    buf.push(dist_bytes[0]);
    buf.push(dist_bytes[1]);
    buf.push(dist_bytes[2]);

    // Instantaneous Power (sint16 LE, watts)
    buf.extend_from_slice(&power_watts.to_le_bytes());

    // Heart Rate (uint8, bpm) — only when a strap is paired
    if let Some(hr) = heart_rate_bpm {
        buf.push(hr);
    }

    // Elapsed Time (uint16 LE, seconds)
    buf.extend_from_slice(&elapsed_secs.to_le_bytes());

    buf
}

/// Encode FTMS Feature characteristic (0x2ACC).
///
/// Fitness Machine Features (uint32 LE):
///   - Bit 1: Cadence Supported
///   - Bit 2: Total Distance Supported
///   - Bit 10: Heart Rate Measurement Supported
///   - Bit 12: Elapsed Time Supported
///   - Bit 14: Power Measurement Supported
///   = 0x0000_5406
///
/// Target Setting Features (uint32 LE):
///   - Bit 3: Power Target Supported
///   - Bit 13: Indoor Bike Simulation Parameters Supported
///   = 0x0000_2008
pub fn encode_ftms_feature() -> [u8; 8] {
    let machine_features: u32 = 0x0000_5406;
    let target_features: u32 = 0x0000_2008;
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&machine_features.to_le_bytes());
    buf[4..8].copy_from_slice(&target_features.to_le_bytes());
    buf
}

/// Encode Supported Power Range characteristic (0x2AD8).
///
/// 3x sint16 LE: minimum, maximum, step (all in watts).
///   - Min: 50  (lowest target the brake holds reliably)
///   - Max: 600 (hardware limit)
///   - Step: 5
pub fn encode_power_range() -> [u8; 6] {
    let min: i16 = 50;
    let max: i16 = 600;
    let step: i16 = 5;
    let mut buf = [0u8; 6];
    buf[0..2].copy_from_slice(&min.to_le_bytes());
    buf[2..4].copy_from_slice(&max.to_le_bytes());
    buf[4..6].copy_from_slice(&step.to_le_bytes());
    buf
}

/// Encode Cycling Power Measurement characteristic (0x2A63).
///
/// Flags 0x0020 = bit 5 set: Crank Revolution Data present.
///
/// Layout: flags(2) + power(2) + crank_revs(2) + event_time(2) = 8 bytes.
/// Event time is in 1/1024 s units and wraps; apps derive cadence from
/// consecutive (revs, time) pairs.
pub fn encode_power_measurement(
    power_watts: i16,
    crank_revolutions: u16,
    crank_event_time_1024: u16,
) -> Vec<u8> {
    let flags: u16 = 0x0020;
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&power_watts.to_le_bytes());
    buf.extend_from_slice(&crank_revolutions.to_le_bytes());
    buf.extend_from_slice(&crank_event_time_1024.to_le_bytes());
    buf
}

/// Encode Cycling Power Feature characteristic (0x2A65).
///
/// uint32 LE, bit 3: Crank Revolution Data Supported = 0x0000_0008.
pub fn encode_cps_feature() -> [u8; 4] {
    0x0000_0008u32.to_le_bytes()
}

/// Parse FTMS Control Point writes (0x2AD9).
///
/// Returns `None` for unknown opcodes or malformed data.
pub fn parse_control_point(bytes: &[u8]) -> Option<ControlRequest> {
    let opcode = *bytes.first()?;
    match opcode {
        0x00 => Some(ControlRequest::RequestControl),
        0x01 => Some(ControlRequest::Reset),
        0x04 => {
            // Set Target Resistance Level: opcode(1) + uint8
            if bytes.len() < 2 {
                return None;
            }
            Some(ControlRequest::SetTargetResistance(bytes[1]))
        }
        0x05 => {
            // Set Target Power: opcode(1) + sint16 LE
            if bytes.len() < 3 {
                return None;
            }
            let watts = i16::from_le_bytes([bytes[1], bytes[2]]);
            Some(ControlRequest::SetTargetPower(watts))
        }
        0x07 => Some(ControlRequest::StartOrResume),
        0x08 => {
            // Stop or Pause: opcode(1) + uint8
            if bytes.len() < 2 {
                return None;
            }
            Some(ControlRequest::StopOrPause(bytes[1]))
        }
        0x11 => {
            // Set Indoor Bike Simulation Parameters:
            // opcode(1) + wind sint16 + grade sint16 + crr uint8 + cw uint8
            if bytes.len() < 7 {
                return None;
            }
            Some(ControlRequest::SetSimulation {
                wind_mms: i16::from_le_bytes([bytes[1], bytes[2]]),
                grade_hundredths: i16::from_le_bytes([bytes[3], bytes[4]]),
                crr_ten_thousandths: bytes[5],
                cw_hundredths: bytes[6],
            })
        }
        0x13 => {
            // Spin Down Control: opcode(1) + uint8
            if bytes.len() < 2 {
                return None;
            }
            Some(ControlRequest::SpinDownControl(bytes[1]))
        }
        _ => None,
    }
}

/// Encode a Control Point response indication.
///
/// Format: `[0x80, request_opcode, result_code]`
pub fn encode_control_response(request_opcode: u8, result: u8) -> Vec<u8> {
    vec![RESPONSE_CODE, request_opcode, result]
}

/// Encode a Fitness Machine Status notification (0x2ADA) announcing that a
/// control request took effect. Returns `None` for requests that have no
/// status opcode of their own.
pub fn encode_machine_status(request: &ControlRequest) -> Option<Vec<u8>> {
    match request {
        ControlRequest::Reset => Some(vec![0x01]),
        ControlRequest::StopOrPause(param) => Some(vec![0x02, *param]),
        ControlRequest::StartOrResume => Some(vec![0x04]),
        ControlRequest::SetTargetPower(watts) => {
            let mut buf = vec![0x08];
            buf.extend_from_slice(&watts.to_le_bytes());
            Some(buf)
        }
        ControlRequest::SetSimulation {
            wind_mms,
            grade_hundredths,
            crr_ten_thousandths,
            cw_hundredths,
        } => {
            let mut buf = vec![0x12];
            buf.extend_from_slice(&wind_mms.to_le_bytes());
            buf.extend_from_slice(&grade_hundredths.to_le_bytes());
            buf.push(*crr_ten_thousandths);
            buf.push(*cw_hundredths);
            Some(buf)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_from_short_form() {
        assert_eq!(
            FTMS_SERVICE_UUID.to_string(),
            "00001826-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            POWER_MEASUREMENT_UUID.to_string(),
            "00002a63-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_encode_indoor_bike_data_zeros() {
        let data = encode_indoor_bike_data(0, 0, 0, 0, None, 0);
        assert_eq!(data.len(), 13);
        // Flags: 0x0854 LE
        assert_eq!(data[0], 0x54);
        assert_eq!(data[1], 0x08);
        // Everything else zero
        assert!(data[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_indoor_bike_data_riding() {
        // 27.40 km/h, 80 rpm (160 half-rpm), 1200 m, 148 W, no strap, 72 s
        let data = encode_indoor_bike_data(2740, 160, 1200, 148, None, 72);
        assert_eq!(data.len(), 13);

        // Flags
        assert_eq!(u16::from_le_bytes([data[0], data[1]]), 0x0854);

        // Speed: 2740 = 0x0AB4 LE
        assert_eq!(u16::from_le_bytes([data[2], data[3]]), 2740);

        // Cadence
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), 160);

        // Distance: 1200 = 0x0004B0, 3 bytes LE
        assert_eq!(data[6], 0xB0);
        assert_eq!(data[7], 0x04);
        assert_eq!(data[8], 0x00);

        // Power
        assert_eq!(i16::from_le_bytes([data[9], data[10]]), 148);

        // Elapsed time
        assert_eq!(u16::from_le_bytes([data[11], data[12]]), 72);
    }

    #[test]
    fn test_encode_indoor_bike_data_with_heart_rate() {
        let data = encode_indoor_bike_data(2740, 160, 1200, 148, Some(101), 72);
        assert_eq!(data.len(), 14);

        // Heart rate bit set in flags
        assert_eq!(u16::from_le_bytes([data[0], data[1]]), 0x0854 | 0x0200);

        // Heart rate byte sits between power and elapsed time
        assert_eq!(data[11], 101);
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), 72);
    }

    #[test]
    fn test_encode_indoor_bike_data_negative_power() {
        // The brake never reports negative watts, but the field is signed.
        let data = encode_indoor_bike_data(0, 0, 0, -5, None, 0);
        assert_eq!(i16::from_le_bytes([data[9], data[10]]), -5);
    }

    #[test]
    fn test_encode_ftms_feature() {
        let feat = encode_ftms_feature();
        assert_eq!(feat.len(), 8);
        let machine = u32::from_le_bytes([feat[0], feat[1], feat[2], feat[3]]);
        let target = u32::from_le_bytes([feat[4], feat[5], feat[6], feat[7]]);
        assert_eq!(machine, 0x0000_5406);
        assert_eq!(target, 0x0000_2008);
    }

    #[test]
    fn test_encode_power_range() {
        let range = encode_power_range();
        let min = i16::from_le_bytes([range[0], range[1]]);
        let max = i16::from_le_bytes([range[2], range[3]]);
        let step = i16::from_le_bytes([range[4], range[5]]);
        assert_eq!(min, 50);
        assert_eq!(max, 600);
        assert_eq!(step, 5);
    }

    #[test]
    fn test_encode_power_measurement() {
        let data = encode_power_measurement(148, 1234, 51200);
        assert_eq!(data.len(), 8);
        assert_eq!(u16::from_le_bytes([data[0], data[1]]), 0x0020);
        assert_eq!(i16::from_le_bytes([data[2], data[3]]), 148);
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), 1234);
        assert_eq!(u16::from_le_bytes([data[6], data[7]]), 51200);
    }

    #[test]
    fn test_encode_cps_feature() {
        assert_eq!(encode_cps_feature(), [0x08, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_control_request_control() {
        assert_eq!(
            parse_control_point(&[0x00]),
            Some(ControlRequest::RequestControl)
        );
    }

    #[test]
    fn test_parse_control_reset() {
        assert_eq!(parse_control_point(&[0x01]), Some(ControlRequest::Reset));
    }

    #[test]
    fn test_parse_control_set_power() {
        // Opcode 0x05, power = 250 (0x00FA LE = [0xFA, 0x00])
        let cmd = parse_control_point(&[0x05, 0xFA, 0x00]);
        assert_eq!(cmd, Some(ControlRequest::SetTargetPower(250)));

        // Negative target (ERG below zero makes no sense but the wire allows it)
        // -10 as i16 = 0xFFF6 LE = [0xF6, 0xFF]
        let cmd_neg = parse_control_point(&[0x05, 0xF6, 0xFF]);
        assert_eq!(cmd_neg, Some(ControlRequest::SetTargetPower(-10)));
    }

    #[test]
    fn test_parse_control_simulation() {
        // wind = -1500 mm/s, grade = 250 (2.50%), crr = 50, cw = 51
        let wind = (-1500i16).to_le_bytes();
        let grade = 250i16.to_le_bytes();
        let cmd = parse_control_point(&[0x11, wind[0], wind[1], grade[0], grade[1], 50, 51]);
        assert_eq!(
            cmd,
            Some(ControlRequest::SetSimulation {
                wind_mms: -1500,
                grade_hundredths: 250,
                crr_ten_thousandths: 50,
                cw_hundredths: 51,
            })
        );
    }

    #[test]
    fn test_parse_control_start_stop() {
        assert_eq!(
            parse_control_point(&[0x07]),
            Some(ControlRequest::StartOrResume)
        );
        assert_eq!(
            parse_control_point(&[0x08, 0x01]),
            Some(ControlRequest::StopOrPause(1))
        );
        assert_eq!(
            parse_control_point(&[0x08, 0x02]),
            Some(ControlRequest::StopOrPause(2))
        );
    }

    #[test]
    fn test_parse_control_resistance_and_spin_down() {
        assert_eq!(
            parse_control_point(&[0x04, 0x14]),
            Some(ControlRequest::SetTargetResistance(0x14))
        );
        assert_eq!(
            parse_control_point(&[0x13, 0x01]),
            Some(ControlRequest::SpinDownControl(0x01))
        );
    }

    #[test]
    fn test_parse_control_unknown() {
        assert_eq!(parse_control_point(&[0xFF]), None);
    }

    #[test]
    fn test_parse_control_empty() {
        assert_eq!(parse_control_point(&[]), None);
    }

    #[test]
    fn test_parse_control_truncated() {
        // Set Target Power missing its sint16 param
        assert_eq!(parse_control_point(&[0x05]), None);
        assert_eq!(parse_control_point(&[0x05, 0xFA]), None);
        // Stop missing its uint8 param
        assert_eq!(parse_control_point(&[0x08]), None);
        // Simulation one byte short
        assert_eq!(parse_control_point(&[0x11, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn test_opcode_round_trips_through_parse() {
        let requests = [
            vec![0x00],
            vec![0x01],
            vec![0x04, 0x10],
            vec![0x05, 0xFA, 0x00],
            vec![0x07],
            vec![0x08, 0x01],
            vec![0x11, 0, 0, 0, 0, 0, 0],
            vec![0x13, 0x01],
        ];
        for bytes in requests {
            let req = parse_control_point(&bytes).unwrap();
            assert_eq!(req.opcode(), bytes[0]);
        }
    }

    #[test]
    fn test_encode_control_response() {
        let resp = encode_control_response(0x05, RESULT_SUCCESS);
        assert_eq!(resp, vec![0x80, 0x05, 0x01]);

        let resp = encode_control_response(0x00, RESULT_NOT_SUPPORTED);
        assert_eq!(resp, vec![0x80, 0x00, 0x02]);

        let resp = encode_control_response(0x01, RESULT_NOT_PERMITTED);
        assert_eq!(resp, vec![0x80, 0x01, 0x05]);
    }

    #[test]
    fn test_encode_machine_status() {
        assert_eq!(encode_machine_status(&ControlRequest::Reset), Some(vec![0x01]));
        assert_eq!(
            encode_machine_status(&ControlRequest::StopOrPause(2)),
            Some(vec![0x02, 0x02])
        );
        assert_eq!(
            encode_machine_status(&ControlRequest::StartOrResume),
            Some(vec![0x04])
        );
        assert_eq!(
            encode_machine_status(&ControlRequest::SetTargetPower(250)),
            Some(vec![0x08, 0xFA, 0x00])
        );
        let status = encode_machine_status(&ControlRequest::SetSimulation {
            wind_mms: 0,
            grade_hundredths: 250,
            crr_ten_thousandths: 50,
            cw_hundredths: 51,
        })
        .unwrap();
        assert_eq!(status, vec![0x12, 0x00, 0x00, 0xFA, 0x00, 50, 51]);

        assert_eq!(encode_machine_status(&ControlRequest::RequestControl), None);
        assert_eq!(
            encode_machine_status(&ControlRequest::SpinDownControl(1)),
            None
        );
    }

    // ---- Fuzz / adversarial tests ----

    #[test]
    fn test_parse_every_single_byte_opcode() {
        // Every possible single-byte input must return Some or None, never panic
        for byte in 0u8..=255 {
            let _ = parse_control_point(&[byte]);
        }
    }

    #[test]
    fn test_parse_all_opcodes_with_garbage_trailing() {
        // Valid opcodes followed by excessive trailing bytes — should still parse
        let garbage: Vec<u8> = (0..255).collect();

        // Request Control (0x00) ignores trailing data
        let mut buf = vec![0x00];
        buf.extend_from_slice(&garbage);
        assert_eq!(parse_control_point(&buf), Some(ControlRequest::RequestControl));

        // Set Target Power (0x05) reads 2 bytes, ignores rest
        let mut buf = vec![0x05, 0x00, 0x00];
        buf.extend_from_slice(&garbage);
        assert_eq!(parse_control_point(&buf), Some(ControlRequest::SetTargetPower(0)));

        // Start (0x07) ignores trailing data
        let mut buf = vec![0x07];
        buf.extend_from_slice(&garbage);
        assert_eq!(parse_control_point(&buf), Some(ControlRequest::StartOrResume));
    }

    #[test]
    fn test_parse_control_every_two_byte_combo() {
        // All 65536 two-byte inputs — must not panic
        for b0 in 0u8..=255 {
            for b1 in 0u8..=255 {
                let _ = parse_control_point(&[b0, b1]);
            }
        }
    }

    #[test]
    fn test_parse_control_max_values() {
        // Power = i16::MAX / i16::MIN
        let cmd = parse_control_point(&[0x05, 0xFF, 0x7F]);
        assert_eq!(cmd, Some(ControlRequest::SetTargetPower(i16::MAX)));
        let cmd = parse_control_point(&[0x05, 0x00, 0x80]);
        assert_eq!(cmd, Some(ControlRequest::SetTargetPower(i16::MIN)));

        // Stop with param = 255
        let cmd = parse_control_point(&[0x08, 0xFF]);
        assert_eq!(cmd, Some(ControlRequest::StopOrPause(255)));

        // Simulation with every field saturated
        let cmd = parse_control_point(&[0x11, 0xFF, 0x7F, 0x00, 0x80, 0xFF, 0xFF]);
        assert_eq!(
            cmd,
            Some(ControlRequest::SetSimulation {
                wind_mms: i16::MAX,
                grade_hundredths: i16::MIN,
                crr_ten_thousandths: 255,
                cw_hundredths: 255,
            })
        );
    }

    #[test]
    fn test_parse_control_unsupported_opcodes() {
        // All opcodes we don't handle should return None
        for opcode in [0x02, 0x03, 0x06, 0x09, 0x0A, 0x10, 0x12, 0x14, 0x7F, 0x80, 0xFE] {
            assert_eq!(
                parse_control_point(&[opcode, 0, 0, 0, 0, 0, 0]),
                None,
                "opcode 0x{:02x} should return None",
                opcode
            );
        }
    }

    #[test]
    fn test_encode_indoor_bike_data_max_values() {
        let data = encode_indoor_bike_data(u16::MAX, u16::MAX, u32::MAX, i16::MAX, Some(255), u16::MAX);
        assert_eq!(data.len(), 14, "always 14 bytes with heart rate present");

        assert_eq!(u16::from_le_bytes([data[2], data[3]]), u16::MAX);
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), u16::MAX);

        // Distance is uint24 — only bottom 3 bytes of u32
        let dist = u32::from_le_bytes([data[6], data[7], data[8], 0]);
        assert_eq!(dist, 0x00FFFFFF, "uint24 should truncate to 3 bytes");

        assert_eq!(i16::from_le_bytes([data[9], data[10]]), i16::MAX);
        assert_eq!(data[11], 255);
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), u16::MAX);
    }

    #[test]
    fn test_encode_control_response_all_combos() {
        // Every opcode + result combo should produce exactly 3 bytes
        for opcode in [0x00, 0x01, 0x05, 0x07, 0x08, 0x11, 0xFF] {
            for result in [
                RESULT_SUCCESS,
                RESULT_NOT_SUPPORTED,
                RESULT_INVALID_PARAM,
                RESULT_FAILED,
                RESULT_NOT_PERMITTED,
            ] {
                let resp = encode_control_response(opcode, result);
                assert_eq!(resp.len(), 3);
                assert_eq!(resp[0], RESPONSE_CODE);
                assert_eq!(resp[1], opcode);
                assert_eq!(resp[2], result);
            }
        }
    }
}
