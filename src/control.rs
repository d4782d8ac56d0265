//! Control point arbitration.
//!
//! Exactly one controller may own the bike at a time. The first
//! RequestControl wins; everyone else gets ControlNotPermitted until the
//! owner releases (Reset) or disconnects. Stop is the exception: any
//! controller may stop the bike, owner or not.
//!
//! Domain refusals are result codes in the response indication, never
//! `Err` — the write itself always succeeds at the GATT layer.

use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::bike::BikeState;
use crate::kettler::{BikeCommand, SAFE_IDLE_POWER_WATTS};
use crate::physics::SimParams;
use crate::protocol::{
    ControlRequest, RESULT_FAILED, RESULT_NOT_PERMITTED, RESULT_NOT_SUPPORTED, RESULT_SUCCESS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Ble,
    Dashboard,
}

pub struct ControlPoint {
    owner: Option<Controller>,
    commands: UnboundedSender<BikeCommand>,
}

impl ControlPoint {
    pub fn new(commands: UnboundedSender<BikeCommand>) -> Self {
        Self {
            owner: None,
            commands,
        }
    }

    pub fn owner(&self) -> Option<Controller> {
        self.owner
    }

    fn owns(&self, origin: Controller) -> bool {
        self.owner == Some(origin)
    }

    fn send(&self, command: BikeCommand) {
        // The receiver only drops during shutdown; nothing to do then.
        let _ = self.commands.send(command);
    }

    /// Process one control request and return the FTMS result code.
    ///
    /// Lock order everywhere: control point first, then bike state.
    pub fn handle(
        &mut self,
        origin: Controller,
        request: &ControlRequest,
        state: &mut BikeState,
    ) -> u8 {
        match *request {
            ControlRequest::RequestControl => {
                if self.owner.is_none() || self.owns(origin) {
                    info!("control granted to {:?}", origin);
                    self.owner = Some(origin);
                    state.set_owner_connected(true);
                    RESULT_SUCCESS
                } else {
                    warn!(
                        "control requested by {:?} but owned by {:?}",
                        origin, self.owner
                    );
                    RESULT_NOT_PERMITTED
                }
            }
            ControlRequest::Reset => {
                if self.owns(origin) {
                    info!("reset: {:?} released control", origin);
                    self.release(state);
                    self.send(BikeCommand::Reset);
                    RESULT_SUCCESS
                } else {
                    RESULT_NOT_PERMITTED
                }
            }
            ControlRequest::SetTargetPower(watts) => {
                if !self.owns(origin) {
                    return RESULT_FAILED;
                }
                // Negative ERG targets clamp to zero, like over-range ones
                // clamp to the hardware maximum.
                let requested = watts.max(0) as u16;
                match state.set_target_power(requested) {
                    Ok(clamped) => {
                        self.send(BikeCommand::TargetPower(clamped));
                        RESULT_SUCCESS
                    }
                    Err(_) => RESULT_FAILED,
                }
            }
            ControlRequest::SetSimulation {
                wind_mms,
                grade_hundredths,
                crr_ten_thousandths,
                cw_hundredths,
            } => {
                if !self.owns(origin) {
                    return RESULT_FAILED;
                }
                let params = SimParams {
                    wind_speed_ms: wind_mms as f64 * 0.001,
                    grade_percent: grade_hundredths as f64 * 0.01,
                    crr: crr_ten_thousandths as f64 * 0.0001,
                    cda: cw_hundredths as f64 * 0.01,
                };
                match state.set_simulation(params) {
                    // The brake target follows on the next telemetry frame.
                    Ok(()) => RESULT_SUCCESS,
                    Err(_) => RESULT_FAILED,
                }
            }
            ControlRequest::StartOrResume => {
                if self.owns(origin) {
                    RESULT_SUCCESS
                } else {
                    RESULT_NOT_PERMITTED
                }
            }
            ControlRequest::StopOrPause(_) => {
                // Anyone may stop the bike. The brake is released right away.
                state.stop();
                self.send(BikeCommand::TargetPower(SAFE_IDLE_POWER_WATTS));
                RESULT_SUCCESS
            }
            // The brake is power-only; these aren't advertised in the
            // feature characteristic.
            ControlRequest::SetTargetResistance(_) | ControlRequest::SpinDownControl(_) => {
                RESULT_NOT_SUPPORTED
            }
        }
    }

    /// The given controller went away. If it owned the bike, release and
    /// drop the brake to the fail-safe target.
    pub fn disconnect(&mut self, origin: Controller, state: &mut BikeState) {
        if self.owns(origin) {
            info!("{:?} disconnected while owning control", origin);
            self.release(state);
            self.send(BikeCommand::TargetPower(SAFE_IDLE_POWER_WATTS));
        }
    }

    fn release(&mut self, state: &mut BikeState) {
        self.owner = None;
        state.set_owner_connected(false);
    }
}
