//! Routing of validated frames.
//!
//! Application types go to the application. Control types (0x80 and up)
//! drive the robot's run state, the calibration procedure and the
//! bootloader handover.

use serde::Serialize;
use tracing::{debug, info};

use super::RobotState;
use super::actuators::{Actuators, OFF};
use super::app::Application;
use super::storage::{Eeprom, MotorCalibration, save_motion};
use crate::phy::frame::{CalibMode, CalibPayload, is_application_type};
use crate::phy::{DistanceMeasurement, Message, MessageType};

/// Motion requested while calibrating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Motion {
    #[default]
    Stop,
    Left,
    Right,
    Straight,
}

/// Robot-level state the control messages act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controller {
    pub state: RobotState,
    pub uid: u16,
    pub motors: MotorCalibration,
    pub cur_motion: Motion,
    pub prev_motion: Motion,
}

impl Controller {
    pub fn new(uid: u16, motors: MotorCalibration) -> Self {
        Self {
            state: RobotState::Idle,
            uid,
            motors,
            cur_motion: Motion::Stop,
            prev_motion: Motion::Stop,
        }
    }
}

/// What the runtime has to do after a frame was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the application.
    Delivered,
    /// Control frame applied to the robot state.
    Control(MessageType),
    /// Stop transmitting and hand over to the bootloader.
    EnterBootloader,
    /// Restart the firmware.
    Reset,
    /// Control code with no effect beyond stopping the motors.
    Ignored,
}

pub fn dispatch<App, M, E>(
    ctl: &mut Controller,
    msg: &Message,
    distance: &DistanceMeasurement,
    app: &mut App,
    actuators: &mut M,
    eeprom: &mut E,
) -> Dispatch
where
    App: Application + ?Sized,
    M: Actuators + ?Sized,
    E: Eeprom + ?Sized,
{
    if is_application_type(msg.msg_type) {
        app.receive(msg, distance);
        return Dispatch::Delivered;
    }

    let control = msg.control_type();
    if !matches!(
        control,
        Some(MessageType::ReadUid | MessageType::Run | MessageType::Calib)
    ) {
        actuators.motors_off();
    }

    let Some(control) = control else {
        debug!("Unknown control type {:#04x}", msg.msg_type);
        return Dispatch::Ignored;
    };

    let previous = ctl.state;
    let outcome = match control {
        MessageType::Boot => return Dispatch::EnterBootloader,
        MessageType::Reset => return Dispatch::Reset,
        MessageType::Sleep => {
            ctl.state = RobotState::Sleeping;
            Dispatch::Control(control)
        }
        MessageType::Wakeup => {
            ctl.state = RobotState::Idle;
            Dispatch::Control(control)
        }
        MessageType::Charge => {
            ctl.state = RobotState::Charging;
            Dispatch::Control(control)
        }
        MessageType::Voltage => {
            ctl.state = RobotState::Battery;
            Dispatch::Control(control)
        }
        MessageType::Run => {
            if !matches!(ctl.state, RobotState::Setup | RobotState::Running) {
                actuators.motors_on();
                ctl.state = RobotState::Setup;
            }
            Dispatch::Control(control)
        }
        MessageType::Calib => {
            calibrate(ctl, &CalibPayload::from_data(&msg.data), actuators, eeprom);
            Dispatch::Control(control)
        }
        MessageType::ReadUid => {
            if ctl.state != RobotState::Moving {
                actuators.motors_on();
                actuators.set_color(OFF);
                ctl.prev_motion = Motion::Stop;
                ctl.cur_motion = Motion::Stop;
                ctl.state = RobotState::Moving;
            }
            let bit = 1u16.checked_shl(msg.data[0] as u32).unwrap_or(0);
            ctl.cur_motion = if ctl.uid & bit != 0 {
                Motion::Left
            } else {
                Motion::Stop
            };
            Dispatch::Control(control)
        }
        // page transfer only means something to the bootloader
        MessageType::BootpgmPage | MessageType::BootpgmSize => Dispatch::Ignored,
    };

    if ctl.state != previous {
        info!("State {:?} -> {:?} on {:?}", previous, ctl.state, control);
    }
    outcome
}

fn calibrate<M, E>(ctl: &mut Controller, calib: &CalibPayload, actuators: &mut M, eeprom: &mut E)
where
    M: Actuators + ?Sized,
    E: Eeprom + ?Sized,
{
    let mode = CalibMode::from_u8(calib.mode);
    match mode {
        Some(CalibMode::Save) => {
            if ctl.state == RobotState::Moving {
                save_motion(eeprom, ctl.uid, &ctl.motors);
                info!("Saved calibration for uid {}", ctl.uid);
                actuators.motors_off();
                ctl.state = RobotState::Idle;
            }
        }
        Some(CalibMode::Uid) => {
            ctl.uid = calib.uid;
            ctl.cur_motion = Motion::Stop;
        }
        Some(CalibMode::TurnLeft) => {
            if ctl.cur_motion != Motion::Left || ctl.motors.turn_left != calib.turn_left {
                ctl.prev_motion = Motion::Stop;
                ctl.cur_motion = Motion::Left;
                ctl.motors.turn_left = calib.turn_left;
            }
        }
        Some(CalibMode::TurnRight) => {
            if ctl.cur_motion != Motion::Right || ctl.motors.turn_right != calib.turn_right {
                ctl.prev_motion = Motion::Stop;
                ctl.cur_motion = Motion::Right;
                ctl.motors.turn_right = calib.turn_right;
            }
        }
        Some(CalibMode::Straight) => {
            if ctl.cur_motion != Motion::Straight
                || ctl.motors.straight_left != calib.straight_left
                || ctl.motors.straight_right != calib.straight_right
            {
                ctl.prev_motion = Motion::Stop;
                ctl.cur_motion = Motion::Straight;
                ctl.motors.straight_left = calib.straight_left;
                ctl.motors.straight_right = calib.straight_right;
            }
        }
        None => debug!("Unknown calibration mode {}", calib.mode),
    }

    if mode != Some(CalibMode::Save) && ctl.state != RobotState::Moving {
        actuators.motors_on();
        ctl.state = RobotState::Moving;
    }
}
