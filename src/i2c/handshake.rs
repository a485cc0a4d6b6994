// Licensed under the Apache-2.0 license

//! Bus ownership and readiness handshake.
//!
//! Every wait here is a bounded poll: the delay before poll `n` is
//! `1 + n / 5` microseconds, and the wait fails with [`Error::Timeout`] once
//! the channel timeout has elapsed since the wait began. Each poll loop gets
//! a fresh deadline and a fresh attempt counter.

use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MicrosDurationU64};

use super::common::{ChannelId, Error};
use super::i2c_controller::ChannelState;
use super::registers::{Reg, RegisterWindow};
use super::traits::RegisterIo;
use crate::common::{Clock, Instant, Logger};

const BACKOFF_MIN_US: u32 = 1;
const BACKOFF_STEP: u32 = 5;

/// Deadline and growing delay of one poll loop.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Backoff {
    deadline: Instant,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn start(now: Instant, timeout: MicrosDurationU32) -> Self {
        Self {
            deadline: now + MicrosDurationU64::from_ticks(u64::from(timeout.ticks())),
            attempt: 0,
        }
    }

    /// Delay to wait before the next poll, in microseconds.
    pub(crate) fn next_delay_us(&mut self) -> u32 {
        let delay = BACKOFF_MIN_US + self.attempt / BACKOFF_STEP;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub(crate) fn expired(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

/// A channel with its lock held: register window, time source and the
/// mutable per-channel state (delay provider, logger).
pub(crate) struct Session<'s, R, C, D, L> {
    pub(crate) regs: RegisterWindow<'s, R>,
    pub(crate) clock: &'s C,
    pub(crate) timeout: MicrosDurationU32,
    pub(crate) id: ChannelId,
    pub(crate) state: &'s mut ChannelState<D, L>,
}

impl<R, C, D, L> Session<'_, R, C, D, L>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
{
    /// Poll `reg` until `done` accepts its value. Returns the accepted value.
    pub(crate) fn poll(&mut self, reg: Reg, done: impl Fn(u8) -> bool) -> Result<u8, Error> {
        let mut backoff = Backoff::start(self.clock.now(), self.timeout);
        loop {
            self.state.delay.delay_us(backoff.next_delay_us());
            if backoff.expired(self.clock.now()) {
                return Err(Error::Timeout);
            }
            let value = self.regs.read(reg)?;
            if done(value) {
                return Ok(value);
            }
        }
    }

    /// Wait for any pending reset to finish, then take the semaphore.
    pub(crate) fn wait_free(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        if let Err(err) = self.poll(Reg::ExtControl, |v| v & map.reset == 0) {
            self.state
                .logger
                .debug(format_args!("{}: wait bus reset: {err}", self.id.name()));
            return Err(err);
        }
        // Reading the semaphore clear also claims it.
        if let Err(err) = self.poll(Reg::Semaphore, |v| v & map.in_use == 0) {
            self.state
                .logger
                .error(format_args!("{}: bus in use: {err}", self.id.name()));
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn wait_not_busy(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        self.poll(Reg::Status, |v| v & map.busy == 0)
            .map(drop)
            .inspect_err(|err| {
                self.state
                    .logger
                    .debug(format_args!("{}: wait bus idle: {err}", self.id.name()));
            })
    }

    /// Pulse the controller reset and wait for the bus to settle.
    pub(crate) fn reset_bus(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        self.state
            .logger
            .debug(format_args!("{}: bus reset", self.id.name()));
        self.regs
            .apply(Reg::ExtControl, map.reset_write, map.reset)?;
        if let Err(err) = self.poll(Reg::ExtControl, |v| v & map.reset == 0) {
            self.state
                .logger
                .error(format_args!("{}: bus reset: {err}", self.id.name()));
            return Err(err);
        }
        self.wait_not_busy()
    }

    /// Own the channel and see it idle. A busy bus gets one reset and one
    /// more idle wait.
    pub(crate) fn wait_ready(&mut self) -> Result<(), Error> {
        self.wait_free()?;
        if self.wait_not_busy().is_ok() {
            return Ok(());
        }
        if let Err(err) = self.reset_bus() {
            self.state
                .logger
                .debug(format_args!("{}: reset while waiting ready: {err}", self.id.name()));
        }
        self.wait_not_busy()
    }

    /// Arm a stop condition after the current byte.
    pub(crate) fn let_stop(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        self.regs.or(Reg::Control, map.stop)
    }

    pub(crate) fn wait_stop_complete(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        self.poll(Reg::Control, |v| v & map.stop == 0)
            .map(drop)
            .inspect_err(|err| {
                self.state
                    .logger
                    .error(format_args!("{}: wait bus stop: {err}", self.id.name()));
            })
    }

    pub(crate) fn bus_stop(&mut self) -> Result<(), Error> {
        self.let_stop()?;
        self.wait_stop_complete()
    }

    /// Release the semaphore.
    pub(crate) fn clear_in_use(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        self.regs.apply(Reg::Semaphore, map.release, map.in_use)
    }

    /// Clear every status register of the persona. Each register is
    /// written even when an earlier one failed; the first error is returned.
    pub(crate) fn clear_status(&mut self) -> Result<(), Error> {
        let map = self.regs.map();
        map.clear.iter().fold(Ok(()), |result, &(reg, how, mask)| {
            let cleared = self.regs.apply(reg, how, mask);
            result.and(cleared)
        })
    }

    /// Switch a persona with a raw-I2C compatibility mode in or out of it.
    /// No-op for the native raw-I2C persona.
    pub(crate) fn set_raw_mode(&mut self, on: bool) -> Result<(), Error> {
        let Some(compat) = self.regs.map().compat else {
            return Ok(());
        };
        let value = self.regs.read(Reg::ExtControl)?;
        let value = if on {
            value | compat.enable | compat.reset
        } else {
            value & !compat.enable
        };
        self.regs.write(Reg::ExtControl, value)
    }
}
