//! Deterministic swarm simulator.
//!
//! Time is counted in robot CPU cycles. Every robot's interrupts (pulse
//! edges, receive watchdog, transmit timer) and main-loop passes are events
//! in one priority queue, handled strictly in time order. Runs with the
//! same configuration and seed produce the same report.

pub mod adc;
pub mod beacon;
pub mod medium;
pub mod report;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

pub use adc::SimAdc;
pub use beacon::{Beacon, Neighbor};
pub use medium::{Medium, light_for_distance};
pub use report::{NeighborReport, RobotReport, SimReport};

use crate::distance::{CalibrationTable, DistanceEstimator};
use crate::phy::{DistanceMeasurement, Message, MessageType};
use crate::robot::{CalibrationProfile, Kilobot, MemoryEeprom, RecordingActuators};
use crate::utils::consts::{CPU_HZ, DEFAULT_SPACING_MM, IR_RANGE_MM, MAIN_LOOP_CYCLES};
use medium::{Event, EventKind};

pub type SimRobot = Kilobot<SimAdc, RecordingActuators, MemoryEeprom>;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub robots: usize,
    /// Grid spacing between neighbouring robots (centre to centre).
    pub spacing_mm: f64,
    pub range_mm: f64,
    pub seed: u64,
    /// Flashed into every robot; the uid is replaced by `index + 1`.
    pub profile: CalibrationProfile,
    /// Send the run command to every robot at time zero.
    pub start_running: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            robots: 4,
            spacing_mm: DEFAULT_SPACING_MM,
            range_mm: IR_RANGE_MM,
            seed: 1,
            profile: CalibrationProfile::default(),
            start_running: true,
        }
    }
}

/// Robots laid out row by row on a square grid.
pub fn grid_positions(count: usize, spacing_mm: f64) -> Vec<(f64, f64)> {
    let cols = (count as f64).sqrt().ceil().max(1.0) as usize;
    (0..count)
        .map(|i| ((i % cols) as f64 * spacing_mm, (i / cols) as f64 * spacing_mm))
        .collect()
}

struct Node {
    robot: SimRobot,
    app: Beacon,
    watchdog_at: Option<u64>,
    /// Pulses landing on the same cycle are one comparator edge.
    last_pulse_at: Option<u64>,
}

pub struct Swarm {
    nodes: Vec<Node>,
    medium: Medium,
    table: CalibrationTable,
    config: SimConfig,
    now: u64,
}

impl Swarm {
    pub fn new(config: SimConfig) -> Self {
        Self::with_positions(grid_positions(config.robots, config.spacing_mm), config)
    }

    pub fn with_positions(positions: Vec<(f64, f64)>, mut config: SimConfig) -> Self {
        config.robots = positions.len();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let table = config.profile.table();
        let estimator = DistanceEstimator::new(table);

        let mut medium = Medium::new(positions, config.range_mm);
        let mut nodes = Vec::with_capacity(config.robots);
        for i in 0..config.robots {
            let mut profile = config.profile;
            profile.uid = i as u16 + 1;
            let mut eeprom = MemoryEeprom::new();
            profile.flash(&mut eeprom);

            let robot = Kilobot::init(
                SimAdc::new(config.seed.wrapping_add(i as u64)),
                RecordingActuators::without_history(),
                eeprom,
                config.seed ^ ((i as u64) << 32),
            );

            // robots are switched on at slightly different times
            let first_tick = rng.random_range(0..robot.next_tx_tick_cycles() * 16);
            medium.schedule(first_tick, EventKind::TxTick { robot: i });
            let first_loop = rng.random_range(0..MAIN_LOOP_CYCLES);
            medium.schedule(first_loop, EventKind::MainLoop { robot: i });

            nodes.push(Node {
                robot,
                app: Beacon::new(profile.uid, estimator),
                watchdog_at: None,
                last_pulse_at: None,
            });
        }

        let mut swarm = Self {
            nodes,
            medium,
            table,
            config,
            now: 0,
        };
        if swarm.config.start_running {
            swarm.broadcast(&Message::new_control(MessageType::Run, [0; 9]));
        }
        info!(
            "Swarm of {} robots, spacing {} mm, seed {}",
            swarm.nodes.len(),
            swarm.config.spacing_mm,
            swarm.config.seed
        );
        swarm
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current simulated time in CPU cycles.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn seconds(&self) -> f64 {
        self.now as f64 / CPU_HZ as f64
    }

    pub fn robot(&self, index: usize) -> &SimRobot {
        &self.nodes[index].robot
    }

    pub fn robot_mut(&mut self, index: usize) -> &mut SimRobot {
        &mut self.nodes[index].robot
    }

    pub fn app(&self, index: usize) -> &Beacon {
        &self.nodes[index].app
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Deliver a frame to every robot directly, the way the overhead
    /// controller reaches the whole swarm at once.
    pub fn broadcast(&mut self, msg: &Message) {
        for node in &mut self.nodes {
            node.robot
                .deliver(msg, &DistanceMeasurement::default(), &mut node.app);
        }
    }

    /// Process every event up to and including cycle `end`.
    pub fn run_until(&mut self, end: u64) {
        while let Some(event) = self.medium.next_event_before(end) {
            self.now = event.at;
            self.handle(event);
        }
        self.now = self.now.max(end);
    }

    pub fn run_for_seconds(&mut self, seconds: f64) {
        let end = self.now + (seconds * CPU_HZ as f64) as u64;
        self.run_until(end);
    }

    fn handle(&mut self, event: Event) {
        let now = event.at;
        match event.kind {
            EventKind::Pulse { robot, from } => {
                if self.medium.is_transmitting(robot, now) {
                    return;
                }
                let node = &mut self.nodes[robot];
                if node.last_pulse_at == Some(now) {
                    return;
                }
                node.last_pulse_at = Some(now);
                let mm = self.medium.distance_mm(robot, from);
                let (high, low) = light_for_distance(&self.table, mm);
                node.robot.adc_mut().set_light(high, low);
                if let Some(outcome) = node.robot.on_pulse(now, &mut node.app) {
                    debug!("Robot {} dispatched {:?} from {}", robot, outcome, from);
                }
                if let Some(deadline) = node.robot.rx_deadline() {
                    if node.watchdog_at != Some(deadline) {
                        node.watchdog_at = Some(deadline);
                        self.medium.schedule(deadline, EventKind::Watchdog { robot });
                    }
                }
            }
            EventKind::Watchdog { robot } => {
                self.nodes[robot].robot.poll_watchdog(now);
            }
            EventKind::TxTick { robot } => {
                let node = &mut self.nodes[robot];
                {
                    let mut tx = self.medium.transmitter(robot, now);
                    node.robot.on_tx_tick(&mut node.app, &mut tx);
                }
                let next = now + node.robot.next_tx_tick_cycles();
                self.medium.schedule(next, EventKind::TxTick { robot });
            }
            EventKind::MainLoop { robot } => {
                let node = &mut self.nodes[robot];
                let elapsed_ms = node.robot.run_once(&mut node.app) as u64;
                let next = now + (elapsed_ms * CPU_HZ / 1000).max(MAIN_LOOP_CYCLES);
                self.medium.schedule(next, EventKind::MainLoop { robot });
            }
        }
    }

    pub fn report(&self) -> SimReport {
        SimReport::from_swarm(self)
    }
}
