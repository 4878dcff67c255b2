//! One robot: the transport context that owns the receiver, transmit
//! scheduler and dispatch state, plus the firmware main loop.
//!
//! The interrupt handlers of the firmware become methods taking
//! `&mut self` (`on_pulse`, `poll_watchdog`, `on_tx_tick`). Whoever drives
//! the robot (the swarm simulator, a test) calls them in time order, so
//! exclusive access replaces interrupt masking.

pub mod actuators;
pub mod app;
pub mod bootloader;
pub mod dispatch;
pub mod rng;
pub mod storage;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info};

pub use actuators::{Actuators, RecordingActuators, rgb};
pub use app::{Application, BufferedLink, LinkHandle, RobotInfo, buffered_link};
pub use bootloader::{BootAction, Bootloader, Flash, MemoryFlash};
pub use dispatch::{Controller, Dispatch, Motion};
pub use rng::SoftRng;
pub use storage::{CalibrationProfile, Eeprom, MemoryEeprom, MotorCalibration};

use crate::distance::DistanceEstimator;
use crate::mac::{IrTransmitter, TickOutcome, TxScheduler};
use crate::phy::adc;
use crate::phy::{AnalogFrontEnd, DistanceMeasurement, IrReceiver, Message, RxBusy, RxStats};
use crate::utils::consts::{TX_MASK_MAX, TX_MASK_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RobotState {
    Sleeping,
    Idle,
    Battery,
    Setup,
    Running,
    Charging,
    Moving,
}

/// Battery thresholds (raw ADC) for the green, blue and yellow indications.
const BATTERY_LEVELS: [(u16, u8); 3] = [
    (682, rgb(0, 3, 0)),
    (648, rgb(0, 0, 3)),
    (614, rgb(3, 3, 0)),
];

/// Power-down time of a sleeping robot before it listens again.
const SLEEP_MS: u16 = 8000;

/// Time motors run at full power to overcome static friction.
const SPINUP_MS: u16 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SleepPhase {
    Awake,
    Asleep,
    Waking,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub delivered: u32,
    pub control: u32,
    pub sent: u32,
    pub backoffs: u32,
    pub skipped: u32,
}

pub struct Kilobot<A, M = RecordingActuators, E = MemoryEeprom> {
    adc: A,
    actuators: M,
    eeprom: E,
    receiver: IrReceiver,
    scheduler: TxScheduler,
    ctl: Controller,
    estimator: DistanceEstimator,
    tx_mask: u8,
    osccal: u8,
    rng: StdRng,
    soft_rng: SoftRng,
    bootloader: Option<Bootloader>,
    flash: MemoryFlash,
    has_setup: bool,
    sleep: SleepPhase,
    stats: LinkStats,
}

impl<A, M, E> Kilobot<A, M, E>
where
    A: AnalogFrontEnd,
    M: Actuators,
    E: Eeprom,
{
    /// Bring up a robot from its EEPROM image. `seed` drives the random
    /// transmit backoff.
    pub fn init(mut adc: A, actuators: M, eeprom: E, seed: u64) -> Self {
        adc.trigger_high_gain();
        let profile = CalibrationProfile::read(&eeprom);
        let mut robot = Self {
            adc,
            actuators,
            eeprom,
            receiver: IrReceiver::new(RxBusy::new()),
            scheduler: TxScheduler::new(),
            ctl: Controller::new(profile.uid, profile.motors),
            estimator: DistanceEstimator::new(profile.table()),
            tx_mask: TX_MASK_MIN,
            osccal: profile.osccal,
            rng: StdRng::seed_from_u64(seed),
            soft_rng: SoftRng::default(),
            bootloader: None,
            flash: MemoryFlash::new(),
            has_setup: false,
            sleep: SleepPhase::Awake,
            stats: LinkStats::default(),
        };
        robot.load_profile(&profile);
        robot
    }

    fn load_profile(&mut self, profile: &CalibrationProfile) {
        self.tx_mask = if profile.tx_mask & !TX_MASK_MAX != 0 {
            TX_MASK_MIN
        } else {
            profile.tx_mask
        };
        self.osccal = profile.osccal;
        self.ctl = Controller::new(profile.uid, profile.motors);
        self.estimator = DistanceEstimator::new(profile.table());
        self.scheduler = TxScheduler::new();
        self.bootloader = None;
        self.has_setup = false;
        self.sleep = SleepPhase::Awake;
        self.soft_rng = SoftRng::default();
        debug!(
            "Robot {} initialised, tx_mask={:#04x}",
            self.ctl.uid, self.tx_mask
        );
    }

    /// Restart the firmware: everything is reloaded from EEPROM.
    pub fn reset(&mut self) {
        info!("Robot {} resetting", self.ctl.uid);
        let profile = CalibrationProfile::read(&self.eeprom);
        self.receiver.on_watchdog(&mut self.adc);
        self.load_profile(&profile);
    }

    // ------------------------------------------------------------------
    // Interrupt-equivalent handlers
    // ------------------------------------------------------------------

    /// Comparator edge at CPU cycle `now`.
    pub fn on_pulse<App>(&mut self, now: u64, app: &mut App) -> Option<Dispatch>
    where
        App: Application + ?Sized,
    {
        if self.sleep == SleepPhase::Asleep {
            return None;
        }
        let reception = self.receiver.on_pulse(now, &mut self.adc)?;
        self.deliver(&reception.message, &reception.distance, app)
    }

    /// Receive watchdog compare match.
    pub fn on_watchdog(&mut self) {
        self.receiver.on_watchdog(&mut self.adc);
    }

    /// Fire the receive watchdog if it is due at `now`.
    pub fn poll_watchdog(&mut self, now: u64) -> bool {
        self.receiver.poll_watchdog(now, &mut self.adc)
    }

    pub fn rx_deadline(&self) -> Option<u64> {
        self.receiver.deadline()
    }

    /// Transmit timer compare match.
    pub fn on_tx_tick<App, T>(&mut self, app: &mut App, transmitter: &mut T) -> TickOutcome
    where
        App: Application + ?Sized,
        T: IrTransmitter + ?Sized,
    {
        let outcome = self.scheduler.on_tick(
            self.receiver.is_busy(),
            self.ctl.state,
            app,
            transmitter,
            self.tx_mask,
            &mut self.rng,
        );
        match outcome {
            TickOutcome::Sent => self.stats.sent += 1,
            TickOutcome::BackedOff(_) => self.stats.backoffs += 1,
            TickOutcome::Skipped => self.stats.skipped += 1,
            _ => {}
        }
        outcome
    }

    /// CPU cycles until the transmit timer fires again.
    pub fn next_tx_tick_cycles(&self) -> u64 {
        self.scheduler.next_tick_cycles()
    }

    /// Route a frame that passed the CRC check. Returns what happened to it,
    /// or None when the bootloader consumed it.
    pub fn deliver<App>(
        &mut self,
        msg: &Message,
        distance: &DistanceMeasurement,
        app: &mut App,
    ) -> Option<Dispatch>
    where
        App: Application + ?Sized,
    {
        if let Some(boot) = self.bootloader.as_mut() {
            let action = boot.handle(msg, &mut self.flash);
            self.on_boot_action(action);
            return None;
        }

        let outcome = dispatch::dispatch(
            &mut self.ctl,
            msg,
            distance,
            app,
            &mut self.actuators,
            &mut self.eeprom,
        );
        match outcome {
            Dispatch::Delivered => self.stats.delivered += 1,
            Dispatch::Control(_) => self.stats.control += 1,
            Dispatch::EnterBootloader => {
                info!("Robot {} entering bootloader", self.ctl.uid);
                self.scheduler.timer_off();
                self.bootloader = Some(Bootloader::new());
            }
            Dispatch::Reset => self.reset(),
            Dispatch::Ignored => {}
        }
        Some(outcome)
    }

    fn on_boot_action(&mut self, action: BootAction) {
        match action {
            BootAction::Buffered => self.actuators.set_color(rgb(0, 0, 1)),
            BootAction::PageWritten(_) => self.actuators.set_color(rgb(0, 3, 0)),
            BootAction::Ignored => {}
            BootAction::StartProgram => {
                info!("Robot {} starting loaded program", self.ctl.uid);
                self.reset();
            }
            BootAction::Restart => self.bootloader = Some(Bootloader::new()),
        }
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    fn delay(&mut self, ms: u16) -> u32 {
        self.actuators.delay_ms(ms);
        ms as u32
    }

    fn blink(&mut self, color: u8, on_ms: u16, off_ms: u16) -> u32 {
        self.actuators.set_color(color);
        let on = self.delay(on_ms);
        self.actuators.set_color(actuators::OFF);
        on + self.delay(off_ms)
    }

    /// One pass of the main loop. Returns the milliseconds it spent in
    /// blocking delays.
    pub fn run_once<App>(&mut self, app: &mut App) -> u32
    where
        App: Application + ?Sized,
    {
        if self.bootloader.is_some() {
            return self.blink(rgb(0, 0, 3), 5, 1000);
        }
        if self.ctl.state != RobotState::Sleeping {
            self.sleep = SleepPhase::Awake;
        }

        match self.ctl.state {
            RobotState::Sleeping => self.sleep_step(),
            RobotState::Idle => self.blink(rgb(0, 3, 0), 1, 200),
            RobotState::Battery => {
                if let Some(level) = self.voltage() {
                    let color = BATTERY_LEVELS
                        .iter()
                        .find(|(threshold, _)| level > *threshold)
                        .map_or(rgb(3, 0, 0), |&(_, color)| color);
                    self.actuators.set_color(color);
                }
                0
            }
            RobotState::Charging => {
                if self.actuators.is_charging() {
                    self.blink(rgb(1, 0, 0), 1, 200)
                } else {
                    self.actuators.set_color(actuators::OFF);
                    0
                }
            }
            RobotState::Setup => {
                if !self.has_setup {
                    app.setup(&self.info());
                    self.has_setup = true;
                }
                self.ctl.state = RobotState::Running;
                app.run_loop(&self.info());
                0
            }
            RobotState::Running => {
                app.run_loop(&self.info());
                0
            }
            RobotState::Moving => self.motion_step(),
        }
    }

    fn sleep_step(&mut self) -> u32 {
        match self.sleep {
            SleepPhase::Awake => {
                // comparator off: anything in flight is lost
                self.receiver.on_watchdog(&mut self.adc);
                self.sleep = SleepPhase::Asleep;
                self.delay(SLEEP_MS)
            }
            SleepPhase::Asleep => {
                self.receiver.busy_flag().set(false);
                self.sleep = SleepPhase::Waking;
                self.actuators.set_color(rgb(3, 3, 3));
                self.delay(10)
            }
            SleepPhase::Waking => {
                let mut elapsed = 0;
                if self.receiver.is_busy() {
                    self.actuators.set_color(rgb(3, 0, 0));
                    elapsed = self.delay(100);
                }
                self.actuators.set_color(actuators::OFF);
                self.sleep = SleepPhase::Awake;
                elapsed
            }
        }
    }

    fn motion_step(&mut self) -> u32 {
        let ctl = &mut self.ctl;
        if ctl.cur_motion == Motion::Stop {
            self.actuators.set_motors(0, 0);
            ctl.prev_motion = Motion::Stop;
            return 0;
        }
        if ctl.cur_motion == ctl.prev_motion {
            return 0;
        }
        ctl.prev_motion = ctl.cur_motion;
        let motors = ctl.motors;
        match ctl.cur_motion {
            Motion::Left => {
                self.actuators.set_motors(0xFF, 0);
                self.actuators.delay_ms(SPINUP_MS);
                self.actuators.set_motors(motors.turn_left, 0);
            }
            Motion::Right => {
                self.actuators.set_motors(0, 0xFF);
                self.actuators.delay_ms(SPINUP_MS);
                self.actuators.set_motors(0, motors.turn_right);
            }
            Motion::Straight => {
                self.actuators.set_motors(0, 0xFF);
                self.actuators.set_motors(0xFF, 0xFF);
                self.actuators.delay_ms(SPINUP_MS);
                self.actuators
                    .set_motors(motors.straight_left, motors.straight_right);
            }
            Motion::Stop => {}
        }
        SPINUP_MS as u32
    }

    // ------------------------------------------------------------------
    // Robot API
    // ------------------------------------------------------------------

    pub fn info(&self) -> RobotInfo {
        RobotInfo {
            uid: self.ctl.uid,
            ticks: self.scheduler.ticks(),
            estimator: self.estimator,
        }
    }

    pub fn uid(&self) -> u16 {
        self.ctl.uid
    }

    pub fn state(&self) -> RobotState {
        self.ctl.state
    }

    pub fn ticks(&self) -> u32 {
        self.scheduler.ticks()
    }

    pub fn tx_mask(&self) -> u8 {
        self.tx_mask
    }

    /// Oscillator trim read at boot; `0xFF` means factory default.
    pub fn osccal(&self) -> u8 {
        self.osccal
    }

    pub fn motion(&self) -> Motion {
        self.ctl.cur_motion
    }

    pub fn motor_calibration(&self) -> MotorCalibration {
        self.ctl.motors
    }

    pub fn in_bootloader(&self) -> bool {
        self.bootloader.is_some()
    }

    pub fn flash(&self) -> &MemoryFlash {
        &self.flash
    }

    pub fn is_busy(&self) -> bool {
        self.receiver.is_busy()
    }

    pub fn busy_flag(&self) -> RxBusy {
        self.receiver.busy_flag()
    }

    pub fn rx_stats(&self) -> RxStats {
        self.receiver.stats()
    }

    pub fn link_stats(&self) -> LinkStats {
        self.stats
    }

    pub fn estimate_distance(&self, distance: &DistanceMeasurement) -> u8 {
        self.estimator.estimate(distance)
    }

    pub fn set_tx_period(&mut self, period: u16) {
        self.scheduler.set_period(period);
    }

    pub fn set_color(&mut self, color: u8) {
        self.actuators.set_color(color);
    }

    pub fn set_motors(&mut self, ccw: u8, cw: u8) {
        self.actuators.set_motors(ccw, cw);
    }

    pub fn spinup_motors(&mut self) {
        self.actuators.set_motors(0xFF, 0xFF);
        self.actuators.delay_ms(SPINUP_MS);
    }

    pub fn ambient_light(&mut self) -> Option<u16> {
        adc::ambient_light(&mut self.adc, &self.receiver.busy_flag())
    }

    pub fn temperature(&mut self) -> Option<u16> {
        adc::temperature(&mut self.adc, &self.receiver.busy_flag())
    }

    pub fn voltage(&mut self) -> Option<u16> {
        adc::voltage(&mut self.adc, &self.receiver.busy_flag())
    }

    pub fn rand_hard(&mut self) -> u8 {
        adc::rand_hard(&mut self.adc)
    }

    pub fn rand_soft(&mut self) -> u8 {
        self.soft_rng.next_u8()
    }

    pub fn rand_seed(&mut self, seed: u8) {
        self.soft_rng.seed(seed);
    }

    pub fn actuators(&self) -> &M {
        &self.actuators
    }

    pub fn actuators_mut(&mut self) -> &mut M {
        &mut self.actuators
    }

    pub fn eeprom(&self) -> &E {
        &self.eeprom
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }
}
