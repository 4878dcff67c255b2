//! Non-volatile calibration storage.
//!
//! The robot keeps its identity, motor calibration, transmit LED mask and
//! IR calibration tables in a small EEPROM. `CalibrationProfile` is the
//! host-side view of that data: it can be loaded from JSON, flashed into an
//! image and read back the way the robot reads it at boot.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::distance::CalibrationTable;
use crate::error::{KiloError, Result};
use crate::utils::consts::{
    CALIB_TABLE_LEN, EEPROM_IRHIGH, EEPROM_IRLOW, EEPROM_LEFT_ROTATE, EEPROM_LEFT_STRAIGHT,
    EEPROM_OSCCAL, EEPROM_RIGHT_ROTATE, EEPROM_RIGHT_STRAIGHT, EEPROM_SIZE, EEPROM_TXMASK,
    EEPROM_UID, TX_MASK_MAX,
};
use crate::utils::dump;

/// Byte-addressed persistent storage.
pub trait Eeprom {
    fn read_byte(&self, addr: usize) -> u8;
    fn write_byte(&mut self, addr: usize, value: u8);
}

/// EEPROM image held in memory. Starts erased (all `0xFF`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEeprom {
    bytes: Vec<u8>,
    writes: usize,
}

impl Default for MemoryEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEeprom {
    pub fn new() -> Self {
        Self {
            bytes: vec![0xFF; EEPROM_SIZE],
            writes: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte writes since creation; EEPROM cells wear out.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Eeprom for MemoryEeprom {
    fn read_byte(&self, addr: usize) -> u8 {
        self.bytes.get(addr).copied().unwrap_or(0xFF)
    }

    fn write_byte(&mut self, addr: usize, value: u8) {
        match self.bytes.get_mut(addr) {
            Some(cell) => {
                *cell = value;
                self.writes += 1;
            }
            None => warn!("EEPROM write past end: {:#06x}", addr),
        }
    }
}

fn read_u16_be(eeprom: &dyn Eeprom, addr: usize) -> u16 {
    ((eeprom.read_byte(addr) as u16) << 8) | eeprom.read_byte(addr + 1) as u16
}

fn write_u16_be(eeprom: &mut dyn Eeprom, addr: usize, value: u16) {
    eeprom.write_byte(addr, (value >> 8) as u8);
    eeprom.write_byte(addr + 1, value as u8);
}

/// Motor duty values found by calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCalibration {
    pub turn_left: u8,
    pub turn_right: u8,
    pub straight_left: u8,
    pub straight_right: u8,
}

/// Store the identity and motor values, as the calibration save command
/// does.
pub fn save_motion<E: Eeprom + ?Sized>(eeprom: &mut E, uid: u16, motors: &MotorCalibration) {
    eeprom.write_byte(EEPROM_UID, uid as u8);
    eeprom.write_byte(EEPROM_UID + 1, (uid >> 8) as u8);
    eeprom.write_byte(EEPROM_LEFT_ROTATE, motors.turn_left);
    eeprom.write_byte(EEPROM_RIGHT_ROTATE, motors.turn_right);
    eeprom.write_byte(EEPROM_LEFT_STRAIGHT, motors.straight_left);
    eeprom.write_byte(EEPROM_RIGHT_STRAIGHT, motors.straight_right);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub uid: u16,
    /// Oscillator trim; `0xFF` leaves the factory value.
    #[serde(default = "uncalibrated")]
    pub osccal: u8,
    pub tx_mask: u8,
    pub motors: MotorCalibration,
    pub ir_high: [u16; CALIB_TABLE_LEN],
    pub ir_low: [u16; CALIB_TABLE_LEN],
}

fn uncalibrated() -> u8 {
    0xFF
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::default_profile(0)
    }
}

impl CalibrationProfile {
    /// Profile with the synthetic IR tables and typical motor values.
    pub fn default_profile(uid: u16) -> Self {
        let table = CalibrationTable::synthetic();
        Self {
            uid,
            osccal: uncalibrated(),
            tx_mask: TX_MASK_MAX,
            motors: MotorCalibration {
                turn_left: 70,
                turn_right: 70,
                straight_left: 60,
                straight_right: 60,
            },
            ir_high: table.high,
            ir_low: table.low,
        }
    }

    pub fn table(&self) -> CalibrationTable {
        CalibrationTable::new(self.ir_high, self.ir_low)
    }

    /// Reject values the hardware cannot produce. A non-monotonic table is
    /// only warned about.
    pub fn validate(&self) -> Result<()> {
        if self.tx_mask & !TX_MASK_MAX != 0 {
            return Err(KiloError::InvalidProfile(format!(
                "tx_mask {:#04x} selects LEDs outside {:#04x}",
                self.tx_mask, TX_MASK_MAX
            )));
        }
        if let Some(value) = self.ir_high.iter().chain(&self.ir_low).find(|&&v| v > 0x3FF) {
            return Err(KiloError::InvalidProfile(format!(
                "IR table entry {value} exceeds the 10-bit ADC range"
            )));
        }
        if !self.table().is_monotonic() {
            warn!("Profile {} has a non-decreasing IR table", self.uid);
        }
        Ok(())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let profile: Self = dump::read_json(&path)?;
        profile.validate()?;
        info!(
            "Loaded calibration profile uid={} from {}",
            profile.uid,
            path.as_ref().display()
        );
        Ok(profile)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(text)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn flash(&self, eeprom: &mut dyn Eeprom) {
        eeprom.write_byte(EEPROM_OSCCAL, self.osccal);
        eeprom.write_byte(EEPROM_TXMASK, self.tx_mask);
        save_motion(eeprom, self.uid, &self.motors);
        for i in 0..CALIB_TABLE_LEN {
            write_u16_be(eeprom, EEPROM_IRLOW + i * 2, self.ir_low[i]);
            write_u16_be(eeprom, EEPROM_IRHIGH + i * 2, self.ir_high[i]);
        }
    }

    /// Read back an image, unsanitised.
    pub fn read(eeprom: &dyn Eeprom) -> Self {
        let mut ir_high = [0u16; CALIB_TABLE_LEN];
        let mut ir_low = [0u16; CALIB_TABLE_LEN];
        for i in 0..CALIB_TABLE_LEN {
            ir_low[i] = read_u16_be(eeprom, EEPROM_IRLOW + i * 2);
            ir_high[i] = read_u16_be(eeprom, EEPROM_IRHIGH + i * 2);
        }
        Self {
            uid: eeprom.read_byte(EEPROM_UID) as u16 | (eeprom.read_byte(EEPROM_UID + 1) as u16) << 8,
            osccal: eeprom.read_byte(EEPROM_OSCCAL),
            tx_mask: eeprom.read_byte(EEPROM_TXMASK),
            motors: MotorCalibration {
                turn_left: eeprom.read_byte(EEPROM_LEFT_ROTATE),
                turn_right: eeprom.read_byte(EEPROM_RIGHT_ROTATE),
                straight_left: eeprom.read_byte(EEPROM_LEFT_STRAIGHT),
                straight_right: eeprom.read_byte(EEPROM_RIGHT_STRAIGHT),
            },
            ir_high,
            ir_low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_and_read_back() {
        let mut profile = CalibrationProfile::default_profile(0x1234);
        profile.osccal = 0x9C;
        let mut eeprom = MemoryEeprom::new();
        profile.flash(&mut eeprom);
        assert_eq!(CalibrationProfile::read(&eeprom), profile);
    }

    #[test]
    fn test_image_layout() {
        let profile = CalibrationProfile::default_profile(0xBEEF);
        let mut eeprom = MemoryEeprom::new();
        profile.flash(&mut eeprom);
        let bytes = eeprom.as_bytes();

        // uid little-endian, tables big-endian
        assert_eq!(bytes[EEPROM_UID], 0xEF);
        assert_eq!(bytes[EEPROM_UID + 1], 0xBE);
        assert_eq!(bytes[EEPROM_IRHIGH], (profile.ir_high[0] >> 8) as u8);
        assert_eq!(bytes[EEPROM_IRHIGH + 1], profile.ir_high[0] as u8);
        assert_eq!(bytes[EEPROM_IRLOW + 26], (profile.ir_low[13] >> 8) as u8);
        assert_eq!(bytes[EEPROM_TXMASK], TX_MASK_MAX);
        assert_eq!(bytes[0x00], 0xFF);
    }

    #[test]
    fn test_erased_image_reads_as_ones() {
        let profile = CalibrationProfile::read(&MemoryEeprom::new());
        assert_eq!(profile.uid, 0xFFFF);
        assert_eq!(profile.tx_mask, 0xFF);
        assert!(profile.ir_high.iter().all(|&v| v == 0xFFFF));
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let profile = CalibrationProfile::default_profile(7);
        let json = profile.to_json().unwrap();
        assert_eq!(CalibrationProfile::from_json(&json).unwrap(), profile);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().remove("osccal");
        let parsed = CalibrationProfile::from_json(&value.to_string()).unwrap();
        assert_eq!(parsed.osccal, 0xFF);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut profile = CalibrationProfile::default_profile(1);
        profile.tx_mask = 0x08;
        assert!(matches!(profile.validate(), Err(KiloError::InvalidProfile(_))));

        let mut profile = CalibrationProfile::default_profile(1);
        profile.ir_low[3] = 2000;
        assert!(matches!(profile.validate(), Err(KiloError::InvalidProfile(_))));
    }

    #[test]
    fn test_out_of_range_write_is_ignored() {
        let mut eeprom = MemoryEeprom::new();
        eeprom.write_byte(EEPROM_SIZE, 0);
        assert_eq!(eeprom.writes(), 0);
        assert_eq!(eeprom.read_byte(EEPROM_SIZE + 10), 0xFF);
    }
}
