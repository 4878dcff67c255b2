use serde::Serialize;

/// Pack 2-bit red, green and blue intensities into an LED colour.
pub const fn rgb(r: u8, g: u8, b: u8) -> u8 {
    (r & 3) | ((g & 3) << 2) | ((b & 3) << 4)
}

pub const OFF: u8 = rgb(0, 0, 0);
pub const RED: u8 = rgb(1, 0, 0);
pub const GREEN: u8 = rgb(0, 1, 0);
pub const BLUE: u8 = rgb(0, 0, 1);
pub const YELLOW: u8 = rgb(1, 1, 0);
pub const WHITE: u8 = rgb(1, 1, 1);

/// LEDs, motors and charger of one robot.
pub trait Actuators {
    fn set_color(&mut self, color: u8);
    /// Drive the counter-clockwise (left) and clockwise (right) motors.
    fn set_motors(&mut self, ccw: u8, cw: u8);
    fn motors_on(&mut self);
    fn motors_off(&mut self);
    fn is_charging(&self) -> bool;
    fn delay_ms(&mut self, ms: u16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActuatorEvent {
    Color(u8),
    Motors(u8, u8),
    MotorsOn,
    MotorsOff,
    Delay(u16),
}

/// Actuators that remember every command, for tests and simulation.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuators {
    events: Vec<ActuatorEvent>,
    color: u8,
    motors: (u8, u8),
    powered: bool,
    charging: bool,
    delayed_ms: u64,
    keep_history: bool,
}

impl RecordingActuators {
    pub fn new() -> Self {
        Self {
            keep_history: true,
            ..Self::default()
        }
    }

    /// Track the current outputs only; long simulations would otherwise
    /// keep every blink.
    pub fn without_history() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ActuatorEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn color(&self) -> u8 {
        self.color
    }

    pub fn motors(&self) -> (u8, u8) {
        self.motors
    }

    pub fn motors_powered(&self) -> bool {
        self.powered
    }

    pub fn set_charging(&mut self, charging: bool) {
        self.charging = charging;
    }

    /// Total time spent in `delay_ms`.
    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms
    }

    fn record(&mut self, event: ActuatorEvent) {
        if self.keep_history {
            self.events.push(event);
        }
    }
}

impl Actuators for RecordingActuators {
    fn set_color(&mut self, color: u8) {
        self.color = color;
        self.record(ActuatorEvent::Color(color));
    }

    fn set_motors(&mut self, ccw: u8, cw: u8) {
        self.motors = (ccw, cw);
        self.record(ActuatorEvent::Motors(ccw, cw));
    }

    fn motors_on(&mut self) {
        self.powered = true;
        self.record(ActuatorEvent::MotorsOn);
    }

    fn motors_off(&mut self) {
        self.powered = false;
        self.motors = (0, 0);
        self.record(ActuatorEvent::MotorsOff);
    }

    fn is_charging(&self) -> bool {
        self.charging
    }

    fn delay_ms(&mut self, ms: u16) {
        self.delayed_ms += ms as u64;
        self.record(ActuatorEvent::Delay(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_packing() {
        assert_eq!(rgb(3, 0, 0), 0b00_00_11);
        assert_eq!(rgb(0, 3, 0), 0b00_11_00);
        assert_eq!(rgb(0, 0, 3), 0b11_00_00);
        assert_eq!(rgb(7, 7, 7), 0b11_11_11);
        assert_eq!(WHITE, 0b01_01_01);
    }

    #[test]
    fn test_recording() {
        let mut act = RecordingActuators::new();
        act.motors_on();
        act.set_motors(0xFF, 0);
        act.delay_ms(15);
        act.motors_off();
        assert_eq!(
            act.events(),
            &[
                ActuatorEvent::MotorsOn,
                ActuatorEvent::Motors(0xFF, 0),
                ActuatorEvent::Delay(15),
                ActuatorEvent::MotorsOff,
            ]
        );
        assert_eq!(act.motors(), (0, 0));
        assert_eq!(act.delayed_ms(), 15);
    }

    #[test]
    fn test_without_history_tracks_state_only() {
        let mut act = RecordingActuators::without_history();
        act.set_color(GREEN);
        assert!(act.events().is_empty());
        assert_eq!(act.color(), GREEN);
    }
}
