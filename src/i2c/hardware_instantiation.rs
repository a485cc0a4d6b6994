// Licensed under the Apache-2.0 license

//! # Channel Array Instantiation for the EIO-IS200
//!
//! The controller exposes four bus channels behind one register access
//! path. Two channels use the raw-I2C register layout and two the SMBus-host
//! layout, but both layouts are selected at run time through the channel's
//! register map, so every channel has the same Rust type and the whole set
//! fits in one array indexed by [`ChannelId::index`].
//!
//! ## Base Addresses
//!
//! The parent device reports one I/O base per channel. A base of `0x0000` or
//! `0xFFFF` means the channel is not wired out on this board; its slot stays
//! `None` and nothing is written to it.
//!
//! ## Per-Channel Resources
//!
//! The register access collaborator and the clock are shared by reference.
//! The delay provider and the logger live inside each channel's lock, so the
//! caller supplies a fresh pair per channel through a factory closure.
//!
//! ## Channel Lock
//!
//! [`instantiate_channels`] guards each channel with a spin lock. Ports with
//! a scheduler use [`instantiate_channels_with_raw_mutex`] and name their
//! own [`lock_api::RawMutex`], typically a priority-inheriting one.
//!
//! # Examples
//!
//! ```rust,ignore
//! let configs = [I2cConfig::default(); CHANNEL_COUNT];
//! let channels = instantiate_channels(&io, &clock, [0x0A00, 0x0A20, 0x0A40, 0xFFFF], &configs, |_| {
//!     (Delay::new(), NoOpLogger)
//! })?;
//!
//! if let Some(smb0) = &channels[ChannelId::Smb0.index()] {
//!     let mut data = SmbusData::new();
//!     smb0.smbus_operation(0x50, MessageFlags::empty(), ReadWrite::Read, 0x00,
//!                          SmbusProtocol::ByteData, &mut data)?;
//! }
//! ```

use embedded_hal::delay::DelayNs;
use lock_api::RawMutex;

use crate::common::{Clock, Logger, NoOpLogger};
use crate::i2c::common::{ChannelId, Error, I2cConfig, CHANNEL_COUNT};
use crate::i2c::i2c_controller::{Channel, SpinLock};
use crate::i2c::traits::RegisterIo;

/// One optional channel per [`ChannelId`], in `ChannelId::ALL` order.
pub type Channels<'a, R, C, D, L = NoOpLogger, M = SpinLock> =
    [Option<Channel<'a, R, C, D, L, M>>; CHANNEL_COUNT];

/// Base address values the parent device uses for an absent channel.
const UNUSED_BASES: [u16; 2] = [0x0000, 0xFFFF];

/// Whether a reported base address points at a usable register window.
#[must_use]
pub fn is_usable_base(base: u16) -> bool {
    !UNUSED_BASES.contains(&base)
}

/// Create the channel set of one controller.
///
/// `bases` and `configs` are indexed like [`ChannelId::ALL`]. `parts` is
/// called once per channel, skipped ones included, and returns that
/// channel's delay provider and logger.
///
/// # Errors
///
/// Propagates the first [`Channel::new`] failure.
pub fn instantiate_channels<'a, R, C, D, L, F>(
    io: &'a R,
    clock: &'a C,
    bases: [u16; CHANNEL_COUNT],
    configs: &[I2cConfig; CHANNEL_COUNT],
    parts: F,
) -> Result<Channels<'a, R, C, D, L>, Error>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    F: FnMut(ChannelId) -> (D, L),
{
    instantiate_channels_with_raw_mutex(io, clock, bases, configs, parts)
}

/// [`instantiate_channels`] with every channel serialized by the lock type `M`.
///
/// # Errors
///
/// Propagates the first [`Channel::with_raw_mutex`] failure.
pub fn instantiate_channels_with_raw_mutex<'a, R, C, D, L, M, F>(
    io: &'a R,
    clock: &'a C,
    bases: [u16; CHANNEL_COUNT],
    configs: &[I2cConfig; CHANNEL_COUNT],
    mut parts: F,
) -> Result<Channels<'a, R, C, D, L, M>, Error>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    M: RawMutex,
    F: FnMut(ChannelId) -> (D, L),
{
    let mut channels: Channels<'a, R, C, D, L, M> = [None, None, None, None];

    for ((slot, id), (base, config)) in channels
        .iter_mut()
        .zip(ChannelId::ALL)
        .zip(bases.into_iter().zip(configs.iter()))
    {
        let (delay, mut logger) = parts(id);
        if !is_usable_base(base) {
            logger.debug(format_args!("{}: base {:#06x}, not present", id.name(), base));
            continue;
        }
        *slot = Some(Channel::with_raw_mutex(io, clock, delay, logger, id, base, config)?);
    }

    Ok(channels)
}
