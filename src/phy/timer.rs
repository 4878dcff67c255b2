// Bit-timing clocks
//
// RxTimer stands in for the 16-bit receive counter that runs at CPU speed
// from each start bit and fires the frame watchdog on compare match.
// TxTimer stands in for the prescaled 8-bit counter that paces the
// transmit scheduler.

use crate::utils::consts::{RX_MSG_CYCLES, TX_INCREMENT, TX_TICK_CYCLES};

#[derive(Debug, Clone, Copy, Default)]
pub struct RxTimer {
    started_at: Option<u64>,
}

impl RxTimer {
    pub fn new() -> Self {
        Self { started_at: None }
    }

    /// Reset the count to zero and start counting at `now`.
    pub fn start(&mut self, now: u64) {
        self.started_at = Some(now);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Cycles elapsed since `start`, saturating at the counter width.
    /// A stopped counter reads zero.
    pub fn count(&self, now: u64) -> u16 {
        match self.started_at {
            Some(start) => now
                .saturating_sub(start)
                .min(u16::MAX as u64) as u16,
            None => 0,
        }
    }

    /// Instant at which the watchdog compare matches.
    pub fn deadline(&self) -> Option<u64> {
        self.started_at
            .map(|start| start + RX_MSG_CYCLES as u64)
    }

    pub fn expired(&self, now: u64) -> bool {
        self.deadline()
            .is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TxTimer {
    compare: u16,
    enabled: bool,
}

impl Default for TxTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TxTimer {
    pub fn new() -> Self {
        Self {
            compare: TX_INCREMENT,
            enabled: true,
        }
    }

    pub fn arm(&mut self, increment: u16) {
        self.compare = increment;
    }

    pub fn on(&mut self) {
        self.enabled = true;
    }

    pub fn off(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ticks until the next compare interrupt. A zero compare value only
    /// matches again after the 8-bit counter wraps.
    pub fn next_delay_ticks(&self) -> u16 {
        if self.compare == 0 { 256 } else { self.compare }
    }

    pub fn next_delay_cycles(&self) -> u64 {
        self.next_delay_ticks() as u64 * TX_TICK_CYCLES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rx_timer_counts_from_start() {
        let mut timer = RxTimer::new();
        assert_eq!(timer.count(500), 0);
        assert_eq!(timer.deadline(), None);

        timer.start(1_000);
        assert_eq!(timer.count(1_269), 269);
        assert_eq!(timer.deadline(), Some(1_000 + RX_MSG_CYCLES as u64));
        assert!(!timer.expired(1_000 + RX_MSG_CYCLES as u64 - 1));
        assert!(timer.expired(1_000 + RX_MSG_CYCLES as u64));

        timer.stop();
        assert!(!timer.is_running());
        assert!(!timer.expired(u64::MAX));
    }

    #[test]
    fn test_rx_timer_saturates() {
        let mut timer = RxTimer::new();
        timer.start(0);
        assert_eq!(timer.count(1 << 20), u16::MAX);
    }

    #[test]
    fn test_tx_timer_delay() {
        let mut timer = TxTimer::new();
        assert_eq!(timer.next_delay_ticks(), 0xFF);
        timer.arm(17);
        assert_eq!(timer.next_delay_cycles(), 17 * TX_TICK_CYCLES);
        timer.arm(0);
        assert_eq!(timer.next_delay_ticks(), 256);
    }
}
