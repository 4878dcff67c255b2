/// 8-bit software random generator: a xorshift stirred with a counter so
/// that a zero seed cannot lock it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftRng {
    seed: u8,
    accumulator: u8,
}

impl Default for SoftRng {
    fn default() -> Self {
        Self::new(0xAA)
    }
}

impl SoftRng {
    pub fn new(seed: u8) -> Self {
        Self {
            seed,
            accumulator: 0,
        }
    }

    pub fn seed(&mut self, seed: u8) {
        self.seed = seed;
    }

    pub fn next_u8(&mut self) -> u8 {
        self.seed ^= self.seed << 3;
        self.seed ^= self.seed >> 5;
        self.seed ^= self.accumulator >> 2;
        self.accumulator = self.accumulator.wrapping_add(1);
        self.seed
    }
}
