// CRC-16/CCITT frame checksum
// Reflected polynomial x^16 + x^12 + x^5 + 1 (0x8408), seed 0xFFFF, no final XOR

use crate::utils::consts::CRC_SEED;

const CRC16_POLYNOMIAL_REFLECTED: u16 = 0x8408;

/// Fold one byte into the running CRC.
///
/// Shift-free byte step of the reflected CCITT CRC, bit-identical to the
/// AVR libc `_crc_ccitt_update` the robots were flashed with.
#[inline]
pub fn crc_ccitt_update(crc: u16, byte: u8) -> u16 {
    let mut data = byte ^ (crc & 0xFF) as u8;
    data ^= data << 4;
    let data = data as u16;
    ((data << 8) | (crc >> 8)) ^ (data >> 4) ^ (data << 3)
}

/// Calculate the CRC-16 checksum for given data
pub fn calculate_crc16(data: &[u8]) -> u16 {
    data.iter()
        .fold(CRC_SEED, |crc, &byte| crc_ccitt_update(crc, byte))
}

/// Verify CRC-16 checksum
pub fn verify_crc16(data: &[u8], expected_crc: u16) -> bool {
    calculate_crc16(data) == expected_crc
}

/// Convert byte to bit array (LSB first, the order bits go on the wire)
pub fn byte_to_bits(byte: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> i) & 1 != 0;
    }
    bits
}
