use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::distance::DistanceEstimator;
use crate::phy::{DistanceMeasurement, Message, MessageType};
use crate::robot::{Application, RobotInfo};

/// What one robot has heard from one neighbour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Neighbor {
    pub frames: u32,
    pub last_estimate_mm: u8,
    pub mean_estimate_mm: f64,
    /// Highest sequence number seen; gaps show lost frames.
    pub last_seq: u8,
}

/// Demo application: broadcasts its uid with a sequence number and keeps
/// a distance estimate for every robot it hears.
#[derive(Debug, Clone)]
pub struct Beacon {
    uid: u16,
    seq: u8,
    sent: u32,
    estimator: DistanceEstimator,
    neighbors: BTreeMap<u16, Neighbor>,
}

impl Beacon {
    pub fn new(uid: u16, estimator: DistanceEstimator) -> Self {
        Self {
            uid,
            seq: 0,
            sent: 0,
            estimator,
            neighbors: BTreeMap::new(),
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn neighbors(&self) -> &BTreeMap<u16, Neighbor> {
        &self.neighbors
    }

    fn frame(&self) -> Message {
        let mut data = [0u8; 9];
        LittleEndian::write_u16(&mut data[0..2], self.uid);
        data[2] = self.seq;
        Message::new(MessageType::NORMAL, data)
    }
}

impl Application for Beacon {
    fn setup(&mut self, robot: &RobotInfo) {
        self.uid = robot.uid;
        self.estimator = robot.estimator;
    }

    fn receive(&mut self, msg: &Message, distance: &DistanceMeasurement) {
        if msg.msg_type != MessageType::NORMAL {
            return;
        }
        let from = LittleEndian::read_u16(&msg.data[0..2]);
        let estimate = self.estimator.estimate(distance);
        let entry = self.neighbors.entry(from).or_default();
        entry.frames += 1;
        entry.last_estimate_mm = estimate;
        entry.mean_estimate_mm += (estimate as f64 - entry.mean_estimate_mm) / entry.frames as f64;
        entry.last_seq = msg.data[2];
    }

    fn produce_outbound(&mut self) -> Option<Message> {
        Some(self.frame())
    }

    fn on_sent(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        self.sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::CalibrationTable;

    #[test]
    fn test_frame_carries_uid_and_sequence() {
        let mut beacon = Beacon::new(0x0203, DistanceEstimator::default());
        let first = beacon.produce_outbound().unwrap();
        assert!(first.is_valid());
        assert_eq!(&first.data[..3], &[0x03, 0x02, 0]);
        // unchanged until sent
        assert_eq!(beacon.produce_outbound(), Some(first));
        beacon.on_sent();
        assert_eq!(beacon.produce_outbound().unwrap().data[2], 1);
    }

    #[test]
    fn test_tracks_neighbors() {
        let estimator = DistanceEstimator::new(CalibrationTable::synthetic());
        let mut listener = Beacon::new(1, estimator);
        let talker = Beacon::new(9, estimator);
        let (high, low) = crate::sim::medium::light_for_distance(estimator.table(), 50.0);
        let distance = DistanceMeasurement::new(high as i16, low as i16);

        listener.receive(&talker.frame(), &distance);
        listener.receive(&talker.frame(), &distance);
        let neighbor = listener.neighbors()[&9];
        assert_eq!(neighbor.frames, 2);
        assert_eq!(neighbor.last_estimate_mm, 50);
        assert!((neighbor.mean_estimate_mm - 50.0).abs() < 1e-9);

        listener.receive(&Message::new(0x07, [0; 9]), &distance);
        assert_eq!(listener.neighbors().len(), 1);
    }
}
