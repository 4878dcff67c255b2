/// Log level (can be overridden by RUST_LOG)
pub const LOG_LEVEL: &str = "info";

/// Progress update interval (ms)
pub const PROGRESS_UPDATE_INTERVAL_MS: u64 = 50;

// ============================================================================
// Clock
// ============================================================================

/// CPU clock of the robot (Hz)
pub const CPU_HZ: u64 = 8_000_000;

/// CPU cycles per receive bit
pub const RX_BIT_CYCLES: u16 = 269;

/// Receive watchdog compare value, in CPU cycles
pub const RX_MSG_CYCLES: u16 = 11 * RX_BIT_CYCLES;

/// Prescaler of the transmit timer: CPU cycles per scheduler tick
pub const TX_TICK_CYCLES: u64 = 1024;

/// Default compare increment of the transmit timer (ticks)
pub const TX_INCREMENT: u16 = 0xFF;

/// Default transmit period in scheduler ticks (~0.5 s)
pub const TX_PERIOD: u16 = 3906;

// ============================================================================
// Frame
// ============================================================================

/// Application payload bytes per frame
pub const MSG_DATA_BYTES: usize = 9;

/// Wire size of a frame: payload (9) + type (1) + CRC (2)
pub const MSG_BYTES: usize = MSG_DATA_BYTES + 3;

/// Bytes covered by the CRC
pub const MSG_CRC_SPAN: usize = MSG_DATA_BYTES + 1;

/// Seed of the CRC-16/CCITT
pub const CRC_SEED: u16 = 0xFFFF;

/// First type code reserved for control messages
pub const CONTROL_TYPE_BASE: u8 = 0x80;

// ============================================================================
// Analog front-end / distance estimation
// ============================================================================

/// Entries per calibration table
pub const CALIB_TABLE_LEN: usize = 14;

/// High-gain readings at or above this value are saturated
pub const HIGH_GAIN_SATURATION: i16 = 900;

/// Low-gain channel is consulted above this high-gain reading
pub const LOW_GAIN_THRESHOLD: i16 = 700;

/// Minimum physical separation added to every estimate
pub const DISTANCE_BASELINE: u8 = 33;

/// Low-gain estimate when the sample is below every bucket
pub const LOW_GAIN_FAR: u8 = 90;

/// Marker for "no estimate from this channel"
pub const DISTANCE_NONE: u8 = 255;

/// Upper bound on ADC conversion polls before giving up
pub const ADC_POLL_LIMIT: u32 = 10_000;

/// Attempts per bit in the hardware random generator
pub const RAND_HARD_TRIES: u8 = 128;

// ============================================================================
// EEPROM layout
// ============================================================================

pub const EEPROM_SIZE: usize = 1024;
pub const EEPROM_OSCCAL: usize = 0x01;
pub const EEPROM_LEFT_ROTATE: usize = 0x05;
pub const EEPROM_RIGHT_ROTATE: usize = 0x09;
pub const EEPROM_LEFT_STRAIGHT: usize = 0x0C;
pub const EEPROM_RIGHT_STRAIGHT: usize = 0x14;
pub const EEPROM_IRLOW: usize = 0x20;
pub const EEPROM_IRHIGH: usize = 0x50;
pub const EEPROM_TXMASK: usize = 0x90;
pub const EEPROM_UID: usize = 0xB0;

/// All IR LEDs the transmitter may drive
pub const TX_MASK_MAX: u8 = (1 << 0) | (1 << 1) | (1 << 2) | (1 << 6) | (1 << 7);

/// Fallback when the stored mask is out of range
pub const TX_MASK_MIN: u8 = 1 << 0;

// ============================================================================
// Buffered messaging / bootloader
// ============================================================================

pub const RXBUFFER_SIZE: usize = 16;
pub const TXBUFFER_SIZE: usize = 4;

/// Flash page size of the bootloader (bytes)
pub const PAGE_SIZE: usize = 128;

/// Pages tracked by the bootloader
pub const PAGE_TABLE_LEN: usize = 224;

/// Page count assumed until a size message arrives
pub const DEFAULT_PAGE_TOTAL: u8 = 220;

// ============================================================================
// Simulation
// ============================================================================

/// Maximum IR range between two robots (mm)
pub const IR_RANGE_MM: f64 = 100.0;

/// Main loop period of a simulated robot (CPU cycles, 1 ms)
pub const MAIN_LOOP_CYCLES: u64 = CPU_HZ / 1000;

/// Default spacing between simulated robots (mm)
pub const DEFAULT_SPACING_MM: f64 = 50.0;

/// Default simulated duration (s)
pub const DEFAULT_SIM_SECONDS: u64 = 5;
