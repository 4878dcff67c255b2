// Frame format: [Data:9] [Type:1] [CRC:2, little-endian]

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::crc::{calculate_crc16, crc_ccitt_update};
use crate::error::{KiloError, Result};
use crate::utils::consts::{
    CONTROL_TYPE_BASE, CRC_SEED, MSG_BYTES, MSG_CRC_SPAN, MSG_DATA_BYTES,
};

/// Control message codes. Everything below 0x80 belongs to applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Boot = 0x80,
    BootpgmPage = 0x81,
    BootpgmSize = 0x82,
    Reset = 0x83,
    Sleep = 0x84,
    Wakeup = 0x85,
    Charge = 0x86,
    Voltage = 0x87,
    Run = 0x88,
    ReadUid = 0x89,
    Calib = 0x8A,
}

impl MessageType {
    /// Plain application message
    pub const NORMAL: u8 = 0;
    /// Position broadcast from an overhead tracker
    pub const GPS: u8 = 1;

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x80 => Some(MessageType::Boot),
            0x81 => Some(MessageType::BootpgmPage),
            0x82 => Some(MessageType::BootpgmSize),
            0x83 => Some(MessageType::Reset),
            0x84 => Some(MessageType::Sleep),
            0x85 => Some(MessageType::Wakeup),
            0x86 => Some(MessageType::Charge),
            0x87 => Some(MessageType::Voltage),
            0x88 => Some(MessageType::Run),
            0x89 => Some(MessageType::ReadUid),
            0x8A => Some(MessageType::Calib),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// True for type codes handed to the application receive callback.
pub fn is_application_type(msg_type: u8) -> bool {
    msg_type < CONTROL_TYPE_BASE
}

/// One IR frame.
///
/// The sender must finalize `data` and `msg_type` and then recompute `crc`
/// (see [`Message::seal`]) before handing the frame to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub data: [u8; MSG_DATA_BYTES],
    pub msg_type: u8,
    pub crc: u16,
}

impl Message {
    /// Build a frame with a valid CRC.
    pub fn new(msg_type: u8, data: [u8; MSG_DATA_BYTES]) -> Self {
        let mut msg = Self {
            data,
            msg_type,
            crc: 0,
        };
        msg.seal();
        msg
    }

    pub fn new_control(msg_type: MessageType, data: [u8; MSG_DATA_BYTES]) -> Self {
        Self::new(msg_type.to_u8(), data)
    }

    /// Recompute and store the CRC after the payload has been finalized.
    pub fn seal(&mut self) {
        self.crc = message_crc(self);
    }

    pub fn is_valid(&self) -> bool {
        self.crc == message_crc(self)
    }

    /// Control code of this frame, if it is a known one.
    pub fn control_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.msg_type)
    }

    /// Serialize to the 12 wire bytes.
    pub fn to_bytes(&self) -> [u8; MSG_BYTES] {
        let mut bytes = [0u8; MSG_BYTES];
        bytes[..MSG_DATA_BYTES].copy_from_slice(&self.data);
        bytes[MSG_DATA_BYTES] = self.msg_type;
        LittleEndian::write_u16(&mut bytes[MSG_CRC_SPAN..], self.crc);
        bytes
    }

    /// Deserialize from wire bytes. The CRC is carried over as received,
    /// not checked; use [`Message::is_valid`] for that.
    pub fn from_bytes(bytes: &[u8; MSG_BYTES]) -> Self {
        let mut data = [0u8; MSG_DATA_BYTES];
        data.copy_from_slice(&bytes[..MSG_DATA_BYTES]);
        Self {
            data,
            msg_type: bytes[MSG_DATA_BYTES],
            crc: LittleEndian::read_u16(&bytes[MSG_CRC_SPAN..]),
        }
    }

    /// Deserialize and validate. Returns None on a CRC mismatch.
    pub fn from_wire(bytes: &[u8; MSG_BYTES]) -> Option<Self> {
        let msg = Self::from_bytes(bytes);
        if msg.is_valid() {
            Some(msg)
        } else {
            debug!(
                "CRC check failed: stored={:#06x} computed={:#06x}",
                msg.crc,
                message_crc(&msg)
            );
            None
        }
    }

    /// Parse a frame from a hex string, either the full 12 wire bytes or
    /// the 10 payload+type bytes (the CRC is then computed).
    pub fn parse_hex(input: &str) -> Result<Self> {
        let bytes = parse_hex_bytes(input)?;
        match bytes.len() {
            MSG_BYTES => {
                let mut raw = [0u8; MSG_BYTES];
                raw.copy_from_slice(&bytes);
                Ok(Self::from_bytes(&raw))
            }
            MSG_CRC_SPAN => {
                let mut data = [0u8; MSG_DATA_BYTES];
                data.copy_from_slice(&bytes[..MSG_DATA_BYTES]);
                Ok(Self::new(bytes[MSG_DATA_BYTES], data))
            }
            actual => Err(KiloError::FrameLength {
                expected: MSG_BYTES,
                actual,
            }),
        }
    }
}

/// CRC over payload and type, excluding the CRC field itself.
pub fn message_crc(msg: &Message) -> u16 {
    let crc = msg
        .data
        .iter()
        .fold(CRC_SEED, |crc, &byte| crc_ccitt_update(crc, byte));
    crc_ccitt_update(crc, msg.msg_type)
}

/// Check raw wire bytes without building a [`Message`].
pub fn check_wire(bytes: &[u8; MSG_BYTES]) -> bool {
    calculate_crc16(&bytes[..MSG_CRC_SPAN]) == LittleEndian::read_u16(&bytes[MSG_CRC_SPAN..])
}

pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .unwrap_or(&digits);
    if !digits.is_ascii() {
        return Err(KiloError::InvalidHex(format!("non-ascii input '{input}'")));
    }
    if digits.len() % 2 != 0 {
        return Err(KiloError::InvalidHex(format!(
            "odd number of digits in '{input}'"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| KiloError::InvalidHex(format!("'{}': {e}", &digits[i..i + 2])))
        })
        .collect()
}

/// Raw light readings captured while the leading byte of a frame arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DistanceMeasurement {
    pub low_gain: i16,
    pub high_gain: i16,
}

impl DistanceMeasurement {
    pub fn new(high_gain: i16, low_gain: i16) -> Self {
        Self {
            low_gain,
            high_gain,
        }
    }
}

// ============================================================================
// Payload views
// ============================================================================

/// Calibration sub-commands carried in a `Calib` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibMode {
    Save = 0,
    Uid = 1,
    TurnLeft = 2,
    TurnRight = 3,
    Straight = 4,
}

impl CalibMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CalibMode::Save),
            1 => Some(CalibMode::Uid),
            2 => Some(CalibMode::TurnLeft),
            3 => Some(CalibMode::TurnRight),
            4 => Some(CalibMode::Straight),
            _ => None,
        }
    }
}

/// Layout: [mode:1] [uid:2 LE] [turn_left:1] [turn_right:1]
/// [straight_left:1] [straight_right:1] [unused:2]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibPayload {
    pub mode: u8,
    pub uid: u16,
    pub turn_left: u8,
    pub turn_right: u8,
    pub straight_left: u8,
    pub straight_right: u8,
}

impl CalibPayload {
    pub fn from_data(data: &[u8; MSG_DATA_BYTES]) -> Self {
        Self {
            mode: data[0],
            uid: LittleEndian::read_u16(&data[1..3]),
            turn_left: data[3],
            turn_right: data[4],
            straight_left: data[5],
            straight_right: data[6],
        }
    }

    pub fn to_data(&self) -> [u8; MSG_DATA_BYTES] {
        let mut data = [0u8; MSG_DATA_BYTES];
        data[0] = self.mode;
        LittleEndian::write_u16(&mut data[1..3], self.uid);
        data[3] = self.turn_left;
        data[4] = self.turn_right;
        data[5] = self.straight_left;
        data[6] = self.straight_right;
        data
    }
}

/// Layout: [page_address:1] [page_offset:1] [word1:2] [word2:2] [word3:2]
/// [unused:1]; `page_offset` counts 16-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootPayload {
    pub page_address: u8,
    pub page_offset: u8,
    pub words: [u16; 3],
}

impl BootPayload {
    pub fn from_data(data: &[u8; MSG_DATA_BYTES]) -> Self {
        Self {
            page_address: data[0],
            page_offset: data[1],
            words: [
                LittleEndian::read_u16(&data[2..4]),
                LittleEndian::read_u16(&data[4..6]),
                LittleEndian::read_u16(&data[6..8]),
            ],
        }
    }

    pub fn to_data(&self) -> [u8; MSG_DATA_BYTES] {
        let mut data = [0u8; MSG_DATA_BYTES];
        data[0] = self.page_address;
        data[1] = self.page_offset;
        for (i, word) in self.words.iter().enumerate() {
            LittleEndian::write_u16(&mut data[2 + 2 * i..4 + 2 * i], *word);
        }
        data
    }
}

/// Layout: [id:2] [x:2] [y:2] [theta:1] [unused:2], all little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpsPayload {
    pub id: u16,
    pub x: i16,
    pub y: i16,
    pub theta: i8,
}

impl GpsPayload {
    pub fn from_data(data: &[u8; MSG_DATA_BYTES]) -> Self {
        Self {
            id: LittleEndian::read_u16(&data[0..2]),
            x: LittleEndian::read_i16(&data[2..4]),
            y: LittleEndian::read_i16(&data[4..6]),
            theta: data[6] as i8,
        }
    }

    pub fn to_data(&self) -> [u8; MSG_DATA_BYTES] {
        let mut data = [0u8; MSG_DATA_BYTES];
        LittleEndian::write_u16(&mut data[0..2], self.id);
        LittleEndian::write_i16(&mut data[2..4], self.x);
        LittleEndian::write_i16(&mut data[4..6], self.y);
        data[6] = self.theta as u8;
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message::new(0x07, [1, 2, 3, 4, 5, 6, 7, 8, 9])
    }

    #[test]
    fn test_sealed_frame_validates() {
        let msg = sample_message();
        assert!(msg.is_valid());
        assert!(check_wire(&msg.to_bytes()));
        assert_eq!(msg.crc, calculate_crc16(&msg.to_bytes()[..MSG_CRC_SPAN]));
    }

    #[test]
    fn test_every_single_bit_flip_is_detected() {
        let bytes = sample_message().to_bytes();
        for byte in 0..MSG_BYTES {
            for bit in 0..8 {
                let mut corrupted = bytes;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    Message::from_wire(&corrupted).is_none(),
                    "flip of byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn test_crc_is_little_endian_on_the_wire() {
        let msg = sample_message();
        let bytes = msg.to_bytes();
        assert_eq!(bytes[10], (msg.crc & 0xFF) as u8);
        assert_eq!(bytes[11], (msg.crc >> 8) as u8);
        assert_eq!(bytes[9], 0x07);
    }

    #[test]
    fn test_mutated_payload_needs_reseal() {
        let mut msg = sample_message();
        msg.data[0] = 42;
        assert!(!msg.is_valid());
        msg.seal();
        assert!(msg.is_valid());
    }

    #[test]
    fn test_type_ranges() {
        assert!(is_application_type(0x00));
        assert!(is_application_type(0x7F));
        assert!(!is_application_type(0x80));
        assert_eq!(MessageType::from_u8(0x8A), Some(MessageType::Calib));
        assert_eq!(MessageType::from_u8(0x8B), None);
        assert_eq!(MessageType::Run.to_u8(), 0x88);
    }

    #[test]
    fn test_parse_hex() {
        let msg = Message::parse_hex("01 00 00 00 00 00 00 00 00 00").unwrap();
        assert_eq!(msg.data[0], 1);
        assert_eq!(msg.msg_type, 0);
        assert!(msg.is_valid());

        let wire = hex_of(&msg.to_bytes());
        assert_eq!(Message::parse_hex(&wire).unwrap(), msg);

        assert!(matches!(
            Message::parse_hex("0102"),
            Err(KiloError::FrameLength { actual: 2, .. })
        ));
        assert!(matches!(
            Message::parse_hex("0g"),
            Err(KiloError::InvalidHex(_))
        ));
    }

    fn hex_of(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_calib_payload_layout() {
        let payload = CalibPayload {
            mode: CalibMode::Uid as u8,
            uid: 0x1234,
            turn_left: 70,
            turn_right: 71,
            straight_left: 72,
            straight_right: 73,
        };
        let data = payload.to_data();
        assert_eq!(&data[..7], &[1, 0x34, 0x12, 70, 71, 72, 73]);
        assert_eq!(CalibPayload::from_data(&data), payload);
    }

    #[test]
    fn test_boot_payload_layout() {
        let data = [3, 6, 0xCD, 0xAB, 0x01, 0x00, 0xFF, 0xEE, 0];
        let payload = BootPayload::from_data(&data);
        assert_eq!(payload.page_address, 3);
        assert_eq!(payload.page_offset, 6);
        assert_eq!(payload.words, [0xABCD, 0x0001, 0xEEFF]);
    }

    #[test]
    fn test_gps_payload_signed_fields() {
        let gps = GpsPayload {
            id: 9,
            x: -120,
            y: 300,
            theta: -5,
        };
        assert_eq!(GpsPayload::from_data(&gps.to_data()), gps);
    }
}
