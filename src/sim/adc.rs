use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::phy::{AdcChannel, AnalogFrontEnd};

/// Front-end of a simulated robot. The medium sets the light levels the
/// photodiodes see before each pulse; conversions return those levels (or
/// the fixed supply, light and temperature readings) plus one LSB of noise.
#[derive(Debug, Clone)]
pub struct SimAdc {
    light: (u16, u16),
    voltage: u16,
    ambient: u16,
    temperature: u16,
    armed: Option<AdcChannel>,
    converting: Option<AdcChannel>,
    result: u16,
    rng: StdRng,
}

impl SimAdc {
    pub fn new(seed: u64) -> Self {
        Self {
            light: (0, 0),
            voltage: 700,
            ambient: 300,
            temperature: 280,
            armed: None,
            converting: None,
            result: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Light currently falling on the high- and low-gain photodiodes.
    pub fn set_light(&mut self, high_gain: u16, low_gain: u16) {
        self.light = (high_gain.min(0x3FF), low_gain.min(0x3FF));
    }

    pub fn set_voltage(&mut self, voltage: u16) {
        self.voltage = voltage.min(0x3FF);
    }

    pub fn armed(&self) -> Option<AdcChannel> {
        self.armed
    }

    fn sample(&mut self, channel: AdcChannel) -> u16 {
        let level = match channel {
            AdcChannel::HighGain => self.light.0,
            AdcChannel::LowGain => self.light.1,
            AdcChannel::Voltage => self.voltage,
            AdcChannel::AmbientLight => self.ambient,
            AdcChannel::Temperature => self.temperature,
        };
        let noise: bool = self.rng.random();
        (level ^ noise as u16).min(0x3FF)
    }
}

impl AnalogFrontEnd for SimAdc {
    fn trigger_high_gain(&mut self) {
        self.armed = Some(AdcChannel::HighGain);
        self.converting = self.armed;
    }

    fn trigger_low_gain(&mut self) {
        self.armed = Some(AdcChannel::LowGain);
        self.converting = self.armed;
    }

    fn start_conversion(&mut self, channel: AdcChannel) {
        self.armed = None;
        self.converting = Some(channel);
    }

    fn conversion_done(&mut self) -> bool {
        if let Some(channel) = self.converting.take() {
            self.result = self.sample(channel);
        }
        true
    }

    fn result(&self) -> u16 {
        self.result
    }
}
