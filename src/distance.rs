//! Distance estimation from the dual-gain light readings of a frame.
//!
//! Each robot carries two 14-entry calibration tables holding the ADC
//! reading expected at bucket `i`, i.e. `i * 0.5` distance units beyond the
//! closest separation. Readings fall as distance grows. The high-gain
//! channel saturates at close range, where the low-gain channel takes
//! over; in between the two estimates are cross-faded.
//!
//! Intermediate values use `f32` (the robot's `double` is 32 bits wide)
//! and are truncated to integers at the same points as the robot firmware,
//! so estimates match the numbers existing calibration data was tuned on.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::phy::frame::DistanceMeasurement;
use crate::utils::consts::{
    CALIB_TABLE_LEN, DISTANCE_BASELINE, DISTANCE_NONE, HIGH_GAIN_SATURATION, LOW_GAIN_FAR,
    LOW_GAIN_THRESHOLD,
};

/// Spacing of calibration buckets, in distance units.
const BUCKET_SPACING: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub high: [u16; CALIB_TABLE_LEN],
    pub low: [u16; CALIB_TABLE_LEN],
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::synthetic()
    }
}

impl CalibrationTable {
    pub fn new(high: [u16; CALIB_TABLE_LEN], low: [u16; CALIB_TABLE_LEN]) -> Self {
        Self { high, low }
    }

    /// Representative factory calibration, used when a robot has none.
    pub fn synthetic() -> Self {
        Self {
            high: [
                1020, 980, 920, 860, 790, 720, 650, 580, 510, 450, 390, 340, 290, 250,
            ],
            low: [
                900, 820, 740, 660, 590, 520, 460, 400, 350, 300, 260, 220, 190, 160,
            ],
        }
    }

    /// Both tables strictly decreasing, which the bucket search assumes.
    pub fn is_monotonic(&self) -> bool {
        let decreasing = |t: &[u16]| t.windows(2).all(|w| w[0] > w[1]);
        decreasing(&self.high) && decreasing(&self.low)
    }
}

/// Index of the first bucket (from 1) whose calibrated reading is below
/// `sample`.
fn find_bucket(table: &[u16; CALIB_TABLE_LEN], sample: i16) -> Option<usize> {
    (1..CALIB_TABLE_LEN).find(|&i| sample as i32 > table[i] as i32)
}

/// Linear interpolation inside bucket `index`, in tenths of a distance
/// unit.
fn interpolate(table: &[u16; CALIB_TABLE_LEN], index: usize, sample: i16) -> u8 {
    let slope = (table[index] as i32 - table[index - 1] as i32) as f32 / BUCKET_SPACING;
    let intercept = table[index] as f32 - slope * (index as f32 * BUCKET_SPACING + 0.0);
    let scaled = (sample as f32 - intercept) * 10.0;

    let slope = slope as i32;
    if slope == 0 {
        // flat tail of the table: report the bucket itself
        return (index * 5).min(DISTANCE_NONE as usize - 1) as u8;
    }
    let tenths = scaled as i32 / slope;
    tenths.clamp(0, DISTANCE_NONE as i32 - 1) as u8
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceEstimator {
    table: CalibrationTable,
}

impl DistanceEstimator {
    pub fn new(table: CalibrationTable) -> Self {
        if !table.is_monotonic() {
            warn!("Calibration table is not strictly decreasing; estimates may jump");
        }
        Self { table }
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    /// Estimate from the high-gain channel alone. None when saturated.
    pub fn high_gain_estimate(&self, high_gain: i16) -> Option<u8> {
        if high_gain >= HIGH_GAIN_SATURATION {
            return None;
        }
        if high_gain as i32 > self.table.high[0] as i32 {
            return Some(0);
        }
        let index = find_bucket(&self.table.high, high_gain).unwrap_or(CALIB_TABLE_LEN - 1);
        Some(interpolate(&self.table.high, index, high_gain))
    }

    /// Estimate from the low-gain channel. None unless the high-gain
    /// reading says the sender is close enough for it to be meaningful.
    pub fn low_gain_estimate(&self, measurement: &DistanceMeasurement) -> Option<u8> {
        if measurement.high_gain <= LOW_GAIN_THRESHOLD {
            return None;
        }
        let low_gain = measurement.low_gain;
        if low_gain as i32 > self.table.low[0] as i32 {
            return Some(0);
        }
        Some(match find_bucket(&self.table.low, low_gain) {
            Some(index) => interpolate(&self.table.low, index, low_gain),
            None => LOW_GAIN_FAR,
        })
    }

    /// Approximate distance to the sender, baseline included.
    pub fn estimate(&self, measurement: &DistanceMeasurement) -> u8 {
        let high_gain = measurement.high_gain;
        let dist_high = self.high_gain_estimate(high_gain);
        let dist_low = self.low_gain_estimate(measurement);

        match (dist_high, dist_low) {
            (Some(high), Some(low)) => {
                let hg = high_gain as f32;
                let blended = (high as f32 * (HIGH_GAIN_SATURATION as f32 - hg)
                    + low as f32 * (hg - LOW_GAIN_THRESHOLD as f32))
                    / (HIGH_GAIN_SATURATION - LOW_GAIN_THRESHOLD) as f32;
                (DISTANCE_BASELINE as f32 + blended) as u8
            }
            // 8-bit result: far readings wrap around
            (_, Some(low)) => DISTANCE_BASELINE.wrapping_add(low),
            (high, None) => DISTANCE_BASELINE.wrapping_add(high.unwrap_or(DISTANCE_NONE)),
        }
    }
}
