use std::path::Path;

use serde::Serialize;

use super::Swarm;
use crate::error::Result;
use crate::phy::RxStats;
use crate::robot::{LinkStats, RobotState};
use crate::utils::dump;

#[derive(Debug, Clone, Serialize)]
pub struct NeighborReport {
    pub uid: u16,
    pub true_distance_mm: f64,
    pub frames: u32,
    pub mean_estimate_mm: f64,
    pub last_estimate_mm: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct RobotReport {
    pub uid: u16,
    pub x_mm: f64,
    pub y_mm: f64,
    pub state: RobotState,
    pub ticks: u32,
    pub sent: u32,
    pub refused: u32,
    pub rx: RxStats,
    pub link: LinkStats,
    pub neighbors: Vec<NeighborReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub seed: u64,
    pub seconds: f64,
    pub spacing_mm: f64,
    pub range_mm: f64,
    pub robots: Vec<RobotReport>,
}

impl SimReport {
    pub fn from_swarm(swarm: &Swarm) -> Self {
        let medium = swarm.medium();
        let robots = (0..swarm.len())
            .map(|i| {
                let robot = swarm.robot(i);
                let (x_mm, y_mm) = medium.position(i);
                let neighbors = swarm
                    .app(i)
                    .neighbors()
                    .iter()
                    .map(|(&uid, seen)| NeighborReport {
                        uid,
                        // uids are assigned as index + 1
                        true_distance_mm: uid
                            .checked_sub(1)
                            .map(|j| j as usize)
                            .filter(|&j| j < swarm.len())
                            .map_or(f64::NAN, |j| medium.distance_mm(i, j)),
                        frames: seen.frames,
                        mean_estimate_mm: seen.mean_estimate_mm,
                        last_estimate_mm: seen.last_estimate_mm,
                    })
                    .collect();
                RobotReport {
                    uid: robot.uid(),
                    x_mm,
                    y_mm,
                    state: robot.state(),
                    ticks: robot.ticks(),
                    sent: medium.sent(i),
                    refused: medium.refused(i),
                    rx: robot.rx_stats(),
                    link: robot.link_stats(),
                    neighbors,
                }
            })
            .collect();

        Self {
            seed: swarm.config.seed,
            seconds: swarm.seconds(),
            spacing_mm: swarm.config.spacing_mm,
            range_mm: swarm.config.range_mm,
            robots,
        }
    }

    pub fn frames_sent(&self) -> u32 {
        self.robots.iter().map(|r| r.sent).sum()
    }

    pub fn frames_received(&self) -> u32 {
        self.robots.iter().map(|r| r.rx.frames).sum()
    }

    pub fn collisions(&self) -> u32 {
        self.robots.iter().map(|r| r.rx.collisions).sum()
    }

    /// Mean absolute error of all neighbour distance estimates.
    pub fn mean_distance_error_mm(&self) -> Option<f64> {
        let errors: Vec<f64> = self
            .robots
            .iter()
            .flat_map(|r| &r.neighbors)
            .filter(|n| n.true_distance_mm.is_finite())
            .map(|n| (n.mean_estimate_mm - n.true_distance_mm).abs())
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.iter().sum::<f64>() / errors.len() as f64)
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        dump::write_json(path, self)
    }
}
