//! Shared IR medium.
//!
//! A frame sent by one robot becomes a train of pulse events at every robot
//! within range. Nothing stops two trains from overlapping at a receiver;
//! the receiver state machine sorts that out. A sender that can already see
//! someone else's frame on the medium gives up, as the comparator check of
//! the real transmitter does.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tracing::trace;

use crate::distance::CalibrationTable;
use crate::mac::IrTransmitter;
use crate::phy::{Message, PulseEncoder};
use crate::utils::consts::{CALIB_TABLE_LEN, DISTANCE_BASELINE};

/// Millimetres per calibration bucket.
const MM_PER_BUCKET: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum EventKind {
    Pulse { robot: usize, from: usize },
    Watchdog { robot: usize },
    TxTick { robot: usize },
    MainLoop { robot: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Event {
    pub at: u64,
    seq: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy)]
struct Transmission {
    sender: usize,
    start: u64,
    end: u64,
}

/// Photodiode readings expected at `center_mm` between two robots, read off
/// the calibration table (bucket `i` sits at `33 + 5i` mm) and extended
/// linearly past both ends.
pub fn light_for_distance(table: &CalibrationTable, center_mm: f64) -> (u16, u16) {
    let x = (center_mm - DISTANCE_BASELINE as f64) / MM_PER_BUCKET;
    (lookup(&table.high, x), lookup(&table.low, x))
}

fn lookup(table: &[u16; CALIB_TABLE_LEN], x: f64) -> u16 {
    let last = CALIB_TABLE_LEN - 1;
    let at = |i: usize| table[i] as f64;
    let value = if x <= 0.0 {
        at(0) + (at(0) - at(1)) * -x
    } else if x >= last as f64 {
        at(last) - (at(last - 1) - at(last)) * (x - last as f64)
    } else {
        let i = x.floor() as usize;
        let frac = x - i as f64;
        at(i) + (at(i + 1) - at(i)) * frac
    };
    value.round().clamp(0.0, 1023.0) as u16
}

pub struct Medium {
    positions: Vec<(f64, f64)>,
    range_mm: f64,
    encoder: PulseEncoder,
    transmissions: Vec<Transmission>,
    queue: BinaryHeap<Reverse<Event>>,
    seq: u64,
    sent: Vec<u32>,
    refused: Vec<u32>,
}

impl Medium {
    pub fn new(positions: Vec<(f64, f64)>, range_mm: f64) -> Self {
        let n = positions.len();
        Self {
            positions,
            range_mm,
            encoder: PulseEncoder::default(),
            transmissions: Vec::new(),
            queue: BinaryHeap::new(),
            seq: 0,
            sent: vec![0; n],
            refused: vec![0; n],
        }
    }

    pub fn position(&self, robot: usize) -> (f64, f64) {
        self.positions[robot]
    }

    pub fn distance_mm(&self, a: usize, b: usize) -> f64 {
        let (ax, ay) = self.positions[a];
        let (bx, by) = self.positions[b];
        (ax - bx).hypot(ay - by)
    }

    pub fn in_range(&self, a: usize, b: usize) -> bool {
        a != b && self.distance_mm(a, b) <= self.range_mm
    }

    /// Frames put on the medium by `robot`.
    pub fn sent(&self, robot: usize) -> u32 {
        self.sent[robot]
    }

    /// Send attempts by `robot` refused because the medium was busy.
    pub fn refused(&self, robot: usize) -> u32 {
        self.refused[robot]
    }

    pub(crate) fn schedule(&mut self, at: u64, kind: EventKind) {
        self.seq += 1;
        self.queue.push(Reverse(Event {
            at,
            seq: self.seq,
            kind,
        }));
    }

    pub(crate) fn next_event_before(&mut self, end: u64) -> Option<Event> {
        let due = self
            .queue
            .peek()
            .is_some_and(|Reverse(event)| event.at <= end);
        if due {
            self.queue.pop().map(|Reverse(event)| event)
        } else {
            None
        }
    }

    /// Whether `robot` is itself sending at `now` and so cannot listen.
    pub fn is_transmitting(&self, robot: usize, now: u64) -> bool {
        self.transmissions
            .iter()
            .any(|t| t.sender == robot && t.start <= now && now < t.end)
    }

    fn carrier_sensed(&self, robot: usize, now: u64) -> bool {
        self.transmissions.iter().any(|t| {
            t.sender != robot && t.start <= now && now < t.end && self.in_range(t.sender, robot)
        })
    }

    fn transmit(&mut self, sender: usize, now: u64, msg: &Message) -> bool {
        self.transmissions.retain(|t| t.end > now);
        if self.carrier_sensed(sender, now) || self.is_transmitting(sender, now) {
            self.refused[sender] += 1;
            return false;
        }

        let pulses = self.encoder.encode(msg);
        for robot in 0..self.positions.len() {
            if !self.in_range(sender, robot) {
                continue;
            }
            for &offset in &pulses {
                self.schedule(now + offset, EventKind::Pulse { robot, from: sender });
            }
        }
        self.transmissions.push(Transmission {
            sender,
            start: now,
            end: now + self.encoder.frame_cycles(),
        });
        self.sent[sender] += 1;
        trace!("Robot {} sent type={:#04x} at {}", sender, msg.msg_type, now);
        true
    }

    /// Transmit path of one robot at one instant.
    pub fn transmitter(&mut self, sender: usize, now: u64) -> MediumTx<'_> {
        MediumTx {
            medium: self,
            sender,
            now,
        }
    }
}

pub struct MediumTx<'a> {
    medium: &'a mut Medium,
    sender: usize,
    now: u64,
}

impl IrTransmitter for MediumTx<'_> {
    fn send(&mut self, msg: &Message, _tx_mask: u8) -> bool {
        self.medium.transmit(self.sender, self.now, msg)
    }
}
