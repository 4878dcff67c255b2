use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, trace};

use super::adc::{AnalogFrontEnd, finish_conversion};
use super::frame::{DistanceMeasurement, Message};
use super::timer::RxTimer;
use crate::utils::consts::{MSG_BYTES, RX_BIT_CYCLES};

const HALF_BIT: u16 = RX_BIT_CYCLES / 2;

/// Latest instant (exclusive) a pulse may arrive after its start bit.
const WINDOW_END: u16 = RX_BIT_CYCLES * 9 + HALF_BIT;

/// ceil(2^16 / RX_BIT_CYCLES). Multiplying by this and shifting right by 16
/// stands in for the division by the bit period, which is too slow for
/// the pulse interrupt on the robot.
const BIT_RECIPROCAL: u32 = ((1 << 16) + RX_BIT_CYCLES as u32 - 1) / RX_BIT_CYCLES as u32;

/// "A frame is being received" flag, shared between the receive path
/// (writer) and the transmit scheduler and foreground sensors (readers).
#[derive(Debug, Clone, Default)]
pub struct RxBusy(Arc<AtomicBool>);

impl RxBusy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, busy: bool) {
        self.0.store(busy, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a pulse means, judged by its distance from the byte's start bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseClass {
    /// Outside the bit window: noise or a foreign transmission.
    Stray,
    /// Data bit with the given index (LSB first).
    Data(u8),
    Stop,
}

pub fn classify_pulse(timer: u16) -> PulseClass {
    if timer <= HALF_BIT || timer >= WINDOW_END {
        return PulseClass::Stray;
    }
    let bit_index = (((timer - HALF_BIT) as u32 * BIT_RECIPROCAL) >> 16) as u8;
    if bit_index <= 7 {
        PulseClass::Data(bit_index)
    } else {
        PulseClass::Stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    AwaitingStart,
    InBitField,
}

/// A validated frame together with the light readings of its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception {
    pub message: Message,
    pub distance: DistanceMeasurement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RxStats {
    pub frames: u32,
    pub crc_errors: u32,
    pub collisions: u32,
    pub stray_pulses: u32,
    pub timeouts: u32,
}

/// Pulse-driven frame decoder.
///
/// `on_pulse` is the comparator edge handler and `on_watchdog` the
/// compare-match handler of the receive timer; both run to completion and
/// leave the analog front-end armed on the high-gain channel whenever the
/// receiver is back to waiting for a new frame.
pub struct IrReceiver {
    state: RxState,
    leading_byte: bool,
    byte_index: usize,
    byte_value: u8,
    buffer: [u8; MSG_BYTES],
    distance: DistanceMeasurement,
    timer: RxTimer,
    busy: RxBusy,
    stats: RxStats,
}

impl Default for IrReceiver {
    fn default() -> Self {
        Self::new(RxBusy::new())
    }
}

impl IrReceiver {
    pub fn new(busy: RxBusy) -> Self {
        busy.set(false);
        Self {
            state: RxState::AwaitingStart,
            leading_byte: true,
            byte_index: 0,
            byte_value: 0,
            buffer: [0; MSG_BYTES],
            distance: DistanceMeasurement::default(),
            timer: RxTimer::new(),
            busy,
            stats: RxStats::default(),
        }
    }

    pub fn busy_flag(&self) -> RxBusy {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_set()
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Instant at which the watchdog will abort the current byte.
    pub fn deadline(&self) -> Option<u64> {
        self.timer.deadline()
    }

    /// Handle one pulse edge seen at CPU cycle `now`.
    pub fn on_pulse<A: AnalogFrontEnd + ?Sized>(
        &mut self,
        now: u64,
        adc: &mut A,
    ) -> Option<Reception> {
        let timer = self.timer.count(now);
        self.busy.set(true);

        if self.state == RxState::AwaitingStart {
            self.timer.start(now);
            self.byte_value = 0;
            self.state = RxState::InBitField;
            if self.leading_byte {
                self.distance.high_gain = finish_conversion(adc) as i16;
                adc.trigger_low_gain();
            }
            return None;
        }

        match classify_pulse(timer) {
            PulseClass::Stray => {
                trace!("Stray pulse {} cycles after start bit, resetting", timer);
                self.stats.stray_pulses += 1;
                self.reset(adc);
                None
            }
            PulseClass::Data(bit) => {
                self.byte_value |= 1 << bit;
                None
            }
            PulseClass::Stop => self.on_stop_bit(adc),
        }
    }

    fn on_stop_bit<A: AnalogFrontEnd + ?Sized>(&mut self, adc: &mut A) -> Option<Reception> {
        self.state = RxState::AwaitingStart;

        if self.leading_byte {
            self.distance.low_gain = finish_conversion(adc) as i16;
            adc.trigger_high_gain();
            if self.byte_value != 0 {
                debug!(
                    "Collision: leading byte {:#04x}, dropping frame",
                    self.byte_value
                );
                self.stats.collisions += 1;
                self.timer.stop();
                self.busy.set(false);
            } else {
                self.leading_byte = false;
                self.byte_index = 0;
            }
            return None;
        }

        self.buffer[self.byte_index] = self.byte_value;
        self.byte_index += 1;
        if self.byte_index < MSG_BYTES {
            return None;
        }

        self.timer.stop();
        self.leading_byte = true;
        self.busy.set(false);

        match Message::from_wire(&self.buffer) {
            Some(message) => {
                self.stats.frames += 1;
                debug!(
                    "Frame received: type={:#04x} high={} low={}",
                    message.msg_type, self.distance.high_gain, self.distance.low_gain
                );
                Some(Reception {
                    message,
                    distance: self.distance,
                })
            }
            None => {
                self.stats.crc_errors += 1;
                None
            }
        }
    }

    /// Receive watchdog: no stop bit arrived in time.
    pub fn on_watchdog<A: AnalogFrontEnd + ?Sized>(&mut self, adc: &mut A) {
        if self.timer.is_running() {
            trace!("Receive watchdog expired at byte {}", self.byte_index);
            self.stats.timeouts += 1;
        }
        self.reset(adc);
    }

    /// Fire the watchdog if its deadline has passed. Returns true if it fired.
    pub fn poll_watchdog<A: AnalogFrontEnd + ?Sized>(&mut self, now: u64, adc: &mut A) -> bool {
        if self.timer.expired(now) {
            self.on_watchdog(adc);
            true
        } else {
            false
        }
    }

    fn reset<A: AnalogFrontEnd + ?Sized>(&mut self, adc: &mut A) {
        self.timer.stop();
        self.state = RxState::AwaitingStart;
        self.leading_byte = true;
        self.busy.set(false);
        adc.trigger_high_gain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::adc::AdcChannel;
    use crate::phy::adc::tests::ScriptedAdc;
    use crate::phy::encoder::PulseEncoder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const BIT: u64 = RX_BIT_CYCLES as u64;

    fn feed(
        receiver: &mut IrReceiver,
        adc: &mut ScriptedAdc,
        start: u64,
        pulses: &[u64],
    ) -> Vec<Reception> {
        pulses
            .iter()
            .filter_map(|&t| receiver.on_pulse(start + t, adc))
            .collect()
    }

    #[test]
    fn test_reciprocal_constant() {
        assert_eq!(BIT_RECIPROCAL, 244);
        assert_eq!(HALF_BIT, 134);
        assert_eq!(WINDOW_END, 2555);
    }

    #[test]
    fn test_window_edges() {
        assert_eq!(classify_pulse(HALF_BIT), PulseClass::Stray);
        assert_eq!(classify_pulse(HALF_BIT + 1), PulseClass::Data(0));
        assert_eq!(classify_pulse(WINDOW_END - 1), PulseClass::Stop);
        assert_eq!(classify_pulse(WINDOW_END), PulseClass::Stray);
        assert_eq!(classify_pulse(0), PulseClass::Stray);
    }

    #[test]
    fn test_nominal_bit_positions() {
        for i in 0..8u16 {
            assert_eq!(
                classify_pulse((i + 1) * RX_BIT_CYCLES),
                PulseClass::Data(i as u8)
            );
        }
        assert_eq!(classify_pulse(9 * RX_BIT_CYCLES), PulseClass::Stop);
    }

    #[test]
    fn test_early_pulse_aborts_and_late_pulse_is_kept() {
        let mut adc = ScriptedAdc::default();
        let mut receiver = IrReceiver::default();

        receiver.on_pulse(1_000, &mut adc);
        assert!(receiver.is_busy());
        receiver.on_pulse(1_000 + HALF_BIT as u64, &mut adc);
        assert!(!receiver.is_busy());
        assert_eq!(receiver.stats().stray_pulses, 1);
        assert_eq!(adc.armed, Some(AdcChannel::HighGain));

        receiver.on_pulse(5_000, &mut adc);
        receiver.on_pulse(5_000 + HALF_BIT as u64 + 1, &mut adc);
        assert!(receiver.is_busy());
        assert_eq!(receiver.stats().stray_pulses, 1);
    }

    #[test]
    fn test_decodes_scenario_frame_with_distance() {
        let mut data = [0u8; 9];
        data[0] = 1;
        let msg = Message::new(0x00, data);
        let pulses = PulseEncoder::default().encode(&msg);

        let mut adc = ScriptedAdc::with_readings(&[812, 431]);
        let mut receiver = IrReceiver::default();
        let received = feed(&mut receiver, &mut adc, 10_000, &pulses);

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message.to_bytes(), msg.to_bytes());
        assert_eq!(
            received[0].distance,
            DistanceMeasurement::new(812, 431)
        );
        assert!(!receiver.is_busy());
        assert_eq!(adc.armed, Some(AdcChannel::HighGain));
    }

    #[test]
    fn test_round_trip_random_frames() {
        let encoder = PulseEncoder::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut receiver = IrReceiver::default();
        let mut adc = ScriptedAdc::default();
        let mut start = 0;

        for _ in 0..300 {
            let mut data = [0u8; 9];
            rng.fill(&mut data);
            let msg = Message::new(rng.random(), data);

            let received = feed(&mut receiver, &mut adc, start, &encoder.encode(&msg));
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].message, msg);
            start += encoder.frame_cycles() + 5 * BIT;
        }
        assert_eq!(receiver.stats().frames, 300);
    }

    #[test]
    fn test_round_trip_every_type_code() {
        let encoder = PulseEncoder::default();
        let mut receiver = IrReceiver::default();
        let mut adc = ScriptedAdc::default();
        let mut start = 0;

        for msg_type in 0..=255u8 {
            let msg = Message::new(msg_type, [msg_type; 9]);
            let received = feed(&mut receiver, &mut adc, start, &encoder.encode(&msg));
            assert_eq!(received.len(), 1, "type {msg_type:#04x}");
            assert_eq!(received[0].message.msg_type, msg_type);
            start += encoder.frame_cycles();
        }
    }

    #[test]
    fn test_corrupted_crc_is_dropped() {
        let encoder = PulseEncoder::default();
        let msg = Message::new(0x10, [9, 8, 7, 6, 5, 4, 3, 2, 1]);
        let mut wire = vec![0u8];
        wire.extend_from_slice(&msg.to_bytes());
        wire[12] ^= 0x04;

        let mut adc = ScriptedAdc::default();
        let mut receiver = IrReceiver::default();
        let received = feed(&mut receiver, &mut adc, 0, &encoder.encode_bytes(&wire));

        assert!(received.is_empty());
        assert_eq!(receiver.stats().crc_errors, 1);
        assert!(!receiver.is_busy());
    }

    #[test]
    fn test_overlapping_start_bits_collide() {
        let encoder = PulseEncoder::default();
        let a = Message::new(0x01, [0x11; 9]);
        let b = Message::new(0x02, [0x22; 9]);

        let mut pulses = encoder.encode(&a);
        pulses.extend(
            encoder
                .encode(&b)
                .into_iter()
                .map(|t| t + 3 * BIT),
        );
        pulses.sort_unstable();
        pulses.dedup();

        let mut adc = ScriptedAdc::default();
        let mut receiver = IrReceiver::default();

        // The leading byte of A ends at 9 bit periods; B's start bit lands
        // inside it as data, so the collision is flagged before any payload.
        let (lead, rest): (Vec<u64>, Vec<u64>) = pulses
            .iter()
            .partition(|&&t| t <= 9 * BIT);
        assert!(feed(&mut receiver, &mut adc, 0, &lead).is_empty());
        assert_eq!(receiver.stats().collisions, 1);
        assert!(!receiver.is_busy());

        assert!(feed(&mut receiver, &mut adc, 0, &rest).is_empty());
        assert_eq!(receiver.stats().frames, 0);
    }

    #[test]
    fn test_watchdog_resets_truncated_frame() {
        let encoder = PulseEncoder::default();
        let msg = Message::new(0x05, [0; 9]);
        let pulses = encoder.encode(&msg);

        let mut adc = ScriptedAdc::default();
        let mut receiver = IrReceiver::default();
        let truncated = &pulses[..pulses.len() / 2];
        feed(&mut receiver, &mut adc, 0, truncated);
        assert!(receiver.is_busy());

        let last = *truncated.last().unwrap();
        let deadline = receiver.deadline().unwrap();
        assert!(deadline > last);
        assert!(!receiver.poll_watchdog(deadline - 1, &mut adc));
        assert!(receiver.poll_watchdog(deadline, &mut adc));
        assert!(!receiver.is_busy());
        assert_eq!(receiver.stats().timeouts, 1);

        // A fresh, complete frame decodes afterwards.
        let received = feed(&mut receiver, &mut adc, deadline + 1_000, &pulses);
        assert_eq!(received.len(), 1);
    }

    #[test]
    fn test_busy_flag_is_shared() {
        let busy = RxBusy::new();
        let mut receiver = IrReceiver::new(busy.clone());
        let mut adc = ScriptedAdc::default();
        receiver.on_pulse(0, &mut adc);
        assert!(busy.is_set());
        receiver.on_watchdog(&mut adc);
        assert!(!busy.is_set());
    }
}
