//! Periodic transmit scheduler.
//!
//! Runs on every compare match of the transmit timer. A virtual clock
//! accumulates timer ticks; once it passes the period and the robot is
//! running, the application is asked for a frame. A failed send (the
//! medium was busy) reschedules the next tick after a random number of
//! timer ticks, so robots that collided drift apart.

use rand::Rng;
use tracing::trace;

use super::{IrTransmitter, TickOutcome};
use crate::phy::timer::TxTimer;
use crate::robot::{Application, RobotState};
use crate::utils::consts::{TX_INCREMENT, TX_PERIOD, TX_TICK_CYCLES};

#[derive(Debug, Clone)]
pub struct TxScheduler {
    tx_clock: u16,
    tx_increment: u16,
    period: u16,
    ticks: u32,
    timer: TxTimer,
}

impl Default for TxScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TxScheduler {
    pub fn new() -> Self {
        Self {
            tx_clock: 0,
            tx_increment: TX_INCREMENT,
            period: TX_PERIOD,
            ticks: 0,
            timer: TxTimer::new(),
        }
    }

    /// Transmit period in timer ticks.
    pub fn period(&self) -> u16 {
        self.period
    }

    pub fn set_period(&mut self, period: u16) {
        self.period = period;
    }

    /// Number of scheduler ticks since start (the robot's coarse clock).
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn timer_off(&mut self) {
        self.timer.off();
    }

    pub fn timer_on(&mut self) {
        self.timer.on();
    }

    pub fn is_enabled(&self) -> bool {
        self.timer.is_enabled()
    }

    /// CPU cycles until the next tick should be delivered.
    pub fn next_tick_cycles(&self) -> u64 {
        self.timer.next_delay_cycles()
    }

    /// Nominal interval between frames, in CPU cycles.
    pub fn period_cycles(&self) -> u64 {
        self.period as u64 * TX_TICK_CYCLES
    }

    pub fn on_tick<A, T, R>(
        &mut self,
        busy: bool,
        state: RobotState,
        app: &mut A,
        transmitter: &mut T,
        tx_mask: u8,
        rng: &mut R,
    ) -> TickOutcome
    where
        A: Application + ?Sized,
        T: IrTransmitter + ?Sized,
        R: Rng,
    {
        if !self.timer.is_enabled() {
            return TickOutcome::Disabled;
        }

        self.tx_clock = self.tx_clock.wrapping_add(self.tx_increment);
        self.tx_increment = TX_INCREMENT;
        self.ticks = self.ticks.wrapping_add(1);
        self.timer.arm(self.tx_increment);

        if busy {
            trace!("Receiver busy, transmit skipped at tick {}", self.ticks);
            return TickOutcome::Skipped;
        }
        if self.tx_clock <= self.period || state != RobotState::Running {
            return TickOutcome::Waiting;
        }

        let Some(msg) = app.produce_outbound() else {
            return TickOutcome::NoMessage;
        };

        if transmitter.send(&msg, tx_mask) {
            app.on_sent();
            self.tx_clock = 0;
            TickOutcome::Sent
        } else {
            let backoff: u8 = rng.random();
            self.tx_increment = backoff as u16;
            self.timer.arm(self.tx_increment);
            trace!("Transmit contention, backing off {} ticks", backoff);
            TickOutcome::BackedOff(backoff)
        }
    }
}
