use super::crc::byte_to_bits;
use super::frame::Message;
use crate::utils::consts::{MSG_BYTES, RX_BIT_CYCLES};
use tracing::trace;

/// Leading byte sent ahead of every frame. Receivers treat any other value
/// as two start bits colliding.
pub const LEADING_BYTE: u8 = 0x00;

/// Serializes frames into IR pulse instants.
///
/// Each byte is a start pulse, one pulse per set bit `i` (LSB first) at
/// `(i + 1)` bit periods, and a stop pulse at 9 bit periods. The next byte
/// begins one bit period after the stop pulse, well inside the receive
/// watchdog window.
#[derive(Debug, Clone, Copy)]
pub struct PulseEncoder {
    bit_cycles: u64,
}

impl Default for PulseEncoder {
    fn default() -> Self {
        Self::new(RX_BIT_CYCLES)
    }
}

impl PulseEncoder {
    pub fn new(bit_cycles: u16) -> Self {
        Self {
            bit_cycles: bit_cycles as u64,
        }
    }

    /// Cycles from one start pulse to the next.
    pub fn byte_cycles(&self) -> u64 {
        10 * self.bit_cycles
    }

    /// Cycles from the first to one past the last pulse of a frame.
    pub fn frame_cycles(&self) -> u64 {
        (MSG_BYTES as u64 + 1) * self.byte_cycles()
    }

    /// Pulse offsets of a single byte, relative to its start pulse.
    pub fn encode_byte(&self, byte: u8) -> Vec<u64> {
        let mut pulses = Vec::with_capacity(10);
        pulses.push(0);
        for (i, bit) in byte_to_bits(byte)
            .iter()
            .enumerate()
        {
            if *bit {
                pulses.push((i as u64 + 1) * self.bit_cycles);
            }
        }
        pulses.push(9 * self.bit_cycles);
        pulses
    }

    /// Encode raw bytes, returning pulse offsets from the first start bit.
    pub fn encode_bytes(&self, bytes: &[u8]) -> Vec<u64> {
        let mut pulses = Vec::with_capacity(bytes.len() * 10);
        for (n, &byte) in bytes.iter().enumerate() {
            let base = n as u64 * self.byte_cycles();
            pulses.extend(
                self.encode_byte(byte)
                    .into_iter()
                    .map(|offset| base + offset),
            );
        }
        pulses
    }

    /// Encode a frame: leading byte followed by the 12 wire bytes.
    pub fn encode(&self, msg: &Message) -> Vec<u64> {
        let mut bytes = Vec::with_capacity(MSG_BYTES + 1);
        bytes.push(LEADING_BYTE);
        bytes.extend_from_slice(&msg.to_bytes());
        let pulses = self.encode_bytes(&bytes);
        trace!(
            "Encoded frame type={:#04x} into {} pulses over {} cycles",
            msg.msg_type,
            pulses.len(),
            self.frame_cycles()
        );
        pulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_layout() {
        let encoder = PulseEncoder::default();
        assert_eq!(encoder.encode_byte(0x00), vec![0, 9 * 269]);
        assert_eq!(
            encoder.encode_byte(0b1000_0001),
            vec![0, 269, 8 * 269, 9 * 269]
        );
    }

    #[test]
    fn test_frame_pulse_count() {
        let encoder = PulseEncoder::default();
        let msg = Message::new(0, [0xFF; 9]);
        let pulses = encoder.encode(&msg);

        let set_bits: u32 = msg
            .to_bytes()
            .iter()
            .map(|b| b.count_ones())
            .sum();
        assert_eq!(pulses.len() as u32, 13 * 2 + set_bits);
        assert!(pulses.windows(2).all(|w| w[0] < w[1]));
        assert!(*pulses.last().unwrap() < encoder.frame_cycles());
    }
}
