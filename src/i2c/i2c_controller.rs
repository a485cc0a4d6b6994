// Licensed under the Apache-2.0 license

//! Per-channel bus controller.
//!
//! A [`Channel`] owns one register window of the EIO-IS200 and serializes
//! the operations issued on it. Different channels share only the
//! [`RegisterIo`] and [`Clock`] collaborators and never block each other.
//! The channel implements the embedded-hal `I2c` trait for 7-bit and 10-bit
//! addresses on top of [`Channel::raw_transfer`].
//!
//! The channel lock is any [`lock_api::RawMutex`]. [`Channel::new`] uses a
//! spin lock; an RTOS port passes its own priority-inheriting mutex through
//! [`Channel::with_raw_mutex`].

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};
use lock_api::{Mutex, RawMutex};

use crate::common::{Clock, Logger, NoOpLogger};
use crate::i2c::common::{ChannelId, Error, Functionality, I2cConfig, Persona};
use crate::i2c::handshake::Session;
use crate::i2c::registers::RegisterWindow;
use crate::i2c::traits::RegisterIo;
use crate::i2c::transfer::{Message, MessageFlags};

/// Most operations accepted in one embedded-hal transaction.
pub const MAX_TRANSACTION_OPS: usize = 16;

/// Mutable state guarded by the channel lock.
pub(crate) struct ChannelState<D, L> {
    pub(crate) delay: D,
    pub(crate) logger: L,
    pub(crate) frequency_khz: u32,
}

/// Channel lock used by [`Channel::new`].
pub type SpinLock = spin::Mutex<()>;

pub struct Channel<'a, R, C, D, L = NoOpLogger, M = SpinLock> {
    io: &'a R,
    clock: &'a C,
    id: ChannelId,
    base: u16,
    config: I2cConfig,
    state: Mutex<M, ChannelState<D, L>>,
}

impl<'a, R, C, D, L> Channel<'a, R, C, D, L>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
{
    /// Bind a channel to its register window and apply `config`.
    ///
    /// Programs the configured bus frequency, if any, and caches the rate
    /// the hardware reports.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an out-of-range frequency, `Io` if the window
    /// cannot be accessed.
    pub fn new(
        io: &'a R,
        clock: &'a C,
        delay: D,
        logger: L,
        id: ChannelId,
        base: u16,
        config: &I2cConfig,
    ) -> Result<Self, Error> {
        Self::with_raw_mutex(io, clock, delay, logger, id, base, config)
    }
}

impl<'a, R, C, D, L, M> Channel<'a, R, C, D, L, M>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    M: RawMutex,
{
    /// Like [`Channel::new`], serialized by the lock type `M`.
    ///
    /// # Errors
    ///
    /// Same as [`Channel::new`].
    pub fn with_raw_mutex(
        io: &'a R,
        clock: &'a C,
        delay: D,
        logger: L,
        id: ChannelId,
        base: u16,
        config: &I2cConfig,
    ) -> Result<Self, Error> {
        let channel = Self {
            io,
            clock,
            id,
            base,
            config: *config,
            state: Mutex::new(ChannelState {
                delay,
                logger,
                frequency_khz: 0,
            }),
        };

        channel.with_session(|s| -> Result<(), Error> {
            if let Some(khz) = config.frequency_khz {
                s.regs.set_frequency(khz)?;
            }
            let khz = s.regs.frequency()?;
            s.state.frequency_khz = khz;
            s.state.logger.debug(format_args!(
                "{}: base {:#06x}, {} kHz",
                id.name(),
                base,
                khz
            ));
            Ok(())
        })?;

        Ok(channel)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn persona(&self) -> Persona {
        self.id.persona()
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    pub fn functionality(&self) -> Functionality {
        Functionality::for_persona(self.persona())
    }

    /// Bus rate cached at the last configuration change, in kHz.
    pub fn frequency_khz(&self) -> u32 {
        self.state.lock().frequency_khz
    }

    /// Reprogram the bus clock.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` outside 8..=400 kHz; nothing is written then.
    pub fn set_frequency(&self, khz: u32) -> Result<(), Error> {
        self.with_session(|s| {
            s.regs.set_frequency(khz)?;
            let actual = s.regs.frequency()?;
            s.state.frequency_khz = actual;
            s.state.logger.debug(format_args!(
                "{}: frequency {} kHz requested, {} kHz set",
                s.id.name(),
                khz,
                actual
            ));
            Ok(())
        })
    }

    /// Bus rate read back from the prescalers, in kHz.
    ///
    /// # Errors
    ///
    /// `Io` if the window cannot be accessed.
    pub fn read_frequency(&self) -> Result<u32, Error> {
        self.with_session(|s| s.regs.frequency())
    }

    /// Hand back the delay provider and logger.
    pub fn release(self) -> (D, L) {
        let state = self.state.into_inner();
        (state.delay, state.logger)
    }

    /// Run `f` with the channel lock held.
    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&mut Session<'_, R, C, D, L>) -> T) -> T {
        let mut guard = self.state.lock();
        let mut session = Session {
            regs: RegisterWindow::new(self.io, self.base, self.id.persona()),
            clock: self.clock,
            timeout: self.config.timeout,
            id: self.id,
            state: &mut *guard,
        };
        f(&mut session)
    }

    fn run_operations(
        &self,
        address: u16,
        flags: MessageFlags,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Error> {
        let mut msgs: heapless::Vec<Message<'_>, MAX_TRANSACTION_OPS> = heapless::Vec::new();
        for op in operations.iter_mut() {
            let msg = match op {
                Operation::Read(buf) => Message::read(address, buf),
                Operation::Write(bytes) => Message::write(address, bytes),
            };
            msgs.push(msg.with_flags(flags))
                .map_err(|_| Error::InvalidArgument)?;
        }
        self.raw_transfer(&mut msgs).map(drop)
    }
}

impl<R, C, D, L, M> embedded_hal::i2c::ErrorType for Channel<'_, R, C, D, L, M> {
    type Error = Error;
}

impl<R, C, D, L, M> embedded_hal::i2c::I2c<SevenBitAddress> for Channel<'_, R, C, D, L, M>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    M: RawMutex,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(u16::from(address), MessageFlags::empty(), operations)
    }
}

impl<R, C, D, L, M> embedded_hal::i2c::I2c<TenBitAddress> for Channel<'_, R, C, D, L, M>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    M: RawMutex,
{
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_operations(address, MessageFlags::TEN_BIT, operations)
    }
}
