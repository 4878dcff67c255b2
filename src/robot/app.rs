use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::debug;

use crate::distance::DistanceEstimator;
use crate::phy::{DistanceMeasurement, Message};
use crate::utils::consts::{RXBUFFER_SIZE, TXBUFFER_SIZE};

/// What the main loop can see of the robot it runs on.
#[derive(Debug, Clone, Copy)]
pub struct RobotInfo {
    pub uid: u16,
    pub ticks: u32,
    pub estimator: DistanceEstimator,
}

/// Capabilities an application gives the transport.
///
/// `receive`, `produce_outbound` and `on_sent` are called from the
/// interrupt-equivalent handlers and must return quickly. `setup` and
/// `run_loop` are the cooperative main loop.
pub trait Application {
    /// Called once when the robot enters the running state.
    fn setup(&mut self, _robot: &RobotInfo) {}

    /// Called repeatedly while the robot is running.
    fn run_loop(&mut self, _robot: &RobotInfo) {}

    /// A validated application frame arrived.
    fn receive(&mut self, msg: &Message, distance: &DistanceMeasurement);

    /// The frame to offer on this transmit opportunity, if any. It must
    /// already carry a valid CRC.
    fn produce_outbound(&mut self) -> Option<Message>;

    /// The frame last returned by `produce_outbound` went out.
    fn on_sent(&mut self) {}
}

/// Application that never sends and ignores everything it hears.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Application for Silent {
    fn receive(&mut self, _msg: &Message, _distance: &DistanceMeasurement) {}

    fn produce_outbound(&mut self) -> Option<Message> {
        None
    }
}

/// Transport side of a buffered link: queues received frames for the main
/// loop and drains frames the main loop queued for sending.
pub struct BufferedLink {
    rx: Sender<(Message, DistanceMeasurement)>,
    tx: Receiver<Message>,
    pending: Option<Message>,
    dropped: u32,
}

/// Main-loop side of a buffered link.
#[derive(Clone)]
pub struct LinkHandle {
    rx: Receiver<(Message, DistanceMeasurement)>,
    tx: Sender<Message>,
}

/// Create a link with room for 16 received and 4 outgoing frames.
pub fn buffered_link() -> (BufferedLink, LinkHandle) {
    buffered_link_with(RXBUFFER_SIZE, TXBUFFER_SIZE)
}

pub fn buffered_link_with(rx_size: usize, tx_size: usize) -> (BufferedLink, LinkHandle) {
    let (rx_in, rx_out) = bounded(rx_size);
    let (tx_in, tx_out) = bounded(tx_size);
    (
        BufferedLink {
            rx: rx_in,
            tx: tx_out,
            pending: None,
            dropped: 0,
        },
        LinkHandle {
            rx: rx_out,
            tx: tx_in,
        },
    )
}

impl BufferedLink {
    /// Received frames lost because the main loop fell behind.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Application for BufferedLink {
    fn receive(&mut self, msg: &Message, distance: &DistanceMeasurement) {
        match self.rx.try_send((*msg, *distance)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                debug!("Receive buffer full, dropping frame type={:#04x}", msg.msg_type);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn produce_outbound(&mut self) -> Option<Message> {
        if self.pending.is_none() {
            self.pending = self.tx.try_recv().ok();
        }
        self.pending
    }

    fn on_sent(&mut self) {
        self.pending = None;
    }
}

impl LinkHandle {
    /// Queue a frame for sending. Returns false when the queue is full.
    pub fn push_tx(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    pub fn pop_rx(&self) -> Option<(Message, DistanceMeasurement)> {
        self.rx.try_recv().ok()
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }
}
