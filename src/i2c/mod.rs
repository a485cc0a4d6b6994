// Licensed under the Apache-2.0 license

//! EIO-IS200 I2C/SMBus bus driver.
//!
//! The embedded controller exposes four bus channels: two with a byte-level
//! raw-I2C register layout and two with an SMBus-host layout. Each channel
//! is a [`Channel`] that serializes its own operations, drives the
//! hardware's ownership semaphore and recovers a stuck bus with a reset. The
//! driver is `no_std` and reaches the hardware only through [`RegisterIo`],
//! a [`crate::common::Clock`] and an `embedded-hal` delay.

pub mod common;
mod handshake;
pub mod hardware_instantiation;
pub mod i2c_controller;
pub mod registers;
pub mod smbus;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;
pub mod transfer;

pub use common::{
    BusFault, ChannelId, ConfigurationError, Error, Functionality, I2cConfig, I2cConfigBuilder,
    Persona,
};
pub use hardware_instantiation::{instantiate_channels, instantiate_channels_with_raw_mutex, Channels};
pub use i2c_controller::{Channel, SpinLock};
pub use smbus::{ReadWrite, SmbusData, SmbusProtocol};
pub use traits::RegisterIo;
pub use transfer::{Message, MessageFlags, Payload};
