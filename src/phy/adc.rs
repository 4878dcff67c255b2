// Analog front-end: one ADC shared by distance sensing and the foreground
// sensors. Whoever uses it for a one-shot conversion must re-arm high-gain
// triggering afterwards so the next incoming start bit is sampled.

use tracing::warn;

use super::decoder::RxBusy;
use crate::utils::consts::{ADC_POLL_LIMIT, RAND_HARD_TRIES};

/// ADC multiplexer inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    HighGain,
    LowGain,
    Voltage,
    AmbientLight,
    Temperature,
}

impl AdcChannel {
    /// Multiplexer selection for the channel
    pub fn mux(self) -> u8 {
        match self {
            AdcChannel::HighGain => 0,
            AdcChannel::LowGain => 1,
            AdcChannel::Voltage => 6,
            AdcChannel::AmbientLight => 7,
            AdcChannel::Temperature => 8,
        }
    }
}

pub trait AnalogFrontEnd {
    /// Convert the high-gain photodiode channel on the next comparator edge.
    fn trigger_high_gain(&mut self);

    /// Convert the low-gain photodiode channel on the next comparator edge.
    fn trigger_low_gain(&mut self);

    /// Start a one-shot conversion on `channel`.
    fn start_conversion(&mut self, channel: AdcChannel);

    /// Whether the current conversion has completed.
    fn conversion_done(&mut self) -> bool;

    /// Result register of the last conversion (10 bits).
    fn result(&self) -> u16;
}

/// Busy-wait for the running conversion and return its result.
///
/// Polling is bounded; a front-end that never completes yields whatever
/// the result register holds.
pub fn finish_conversion<A: AnalogFrontEnd + ?Sized>(adc: &mut A) -> u16 {
    for _ in 0..ADC_POLL_LIMIT {
        if adc.conversion_done() {
            return adc.result() & 0x3FF;
        }
        std::hint::spin_loop();
    }
    warn!("ADC conversion did not complete after {} polls", ADC_POLL_LIMIT);
    adc.result() & 0x3FF
}

fn one_shot<A: AnalogFrontEnd + ?Sized>(adc: &mut A, channel: AdcChannel) -> u16 {
    adc.start_conversion(channel);
    finish_conversion(adc)
}

/// Ambient light level, or None while a frame is being received.
pub fn ambient_light<A: AnalogFrontEnd + ?Sized>(adc: &mut A, busy: &RxBusy) -> Option<u16> {
    if busy.is_set() {
        return None;
    }
    let light = one_shot(adc, AdcChannel::AmbientLight);
    adc.trigger_high_gain();
    Some(light)
}

/// Raw temperature sensor reading, or None while a frame is being received.
pub fn temperature<A: AnalogFrontEnd + ?Sized>(adc: &mut A, busy: &RxBusy) -> Option<u16> {
    if busy.is_set() {
        return None;
    }
    let temp = one_shot(adc, AdcChannel::Temperature);
    adc.trigger_high_gain();
    Some(temp)
}

/// Raw battery voltage reading, or None while a frame is being received.
///
/// Leaves the ADC on the voltage channel; the next reception's watchdog or
/// a later sensor call restores high-gain triggering.
pub fn voltage<A: AnalogFrontEnd + ?Sized>(adc: &mut A, busy: &RxBusy) -> Option<u16> {
    if busy.is_set() {
        return None;
    }
    Some(one_shot(adc, AdcChannel::Voltage))
}

/// 8-bit random number from ADC noise.
///
/// Each bit compares the LSBs of two back-to-back conversions and retries
/// while they agree (von Neumann debiasing), up to 128 tries per bit.
pub fn rand_hard<A: AnalogFrontEnd + ?Sized>(adc: &mut A) -> u8 {
    let mut num = 0u8;
    for i in 0..8 {
        let mut tries = 0u8;
        let mut a;
        loop {
            a = one_shot(adc, AdcChannel::Voltage) & 1;
            let b = one_shot(adc, AdcChannel::Voltage) & 1;
            adc.trigger_high_gain();
            tries += 1;
            if a != b || tries >= RAND_HARD_TRIES {
                break;
            }
        }
        if a != 0 {
            num |= 1 << i;
        }
    }
    num
}
