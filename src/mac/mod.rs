pub mod scheduler;

use crate::phy::Message;

pub use scheduler::TxScheduler;

/// Physical transmit path: bit-serializes one frame onto the IR LEDs.
pub trait IrTransmitter {
    /// Send `msg` on the LEDs selected by `tx_mask`. Returns false when
    /// the medium was found busy and nothing (or only part) went out.
    fn send(&mut self, msg: &Message, tx_mask: u8) -> bool;
}

/// Result of one transmit scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Transmit timer disabled.
    Disabled,
    /// Receiver busy; half duplex, try again on a later tick.
    Skipped,
    /// Period not yet elapsed or robot not running.
    Waiting,
    /// The application had nothing to send.
    NoMessage,
    Sent,
    /// Contention; next tick delayed by the given number of timer ticks.
    BackedOff(u8),
}
