// Licensed under the Apache-2.0 license

//! Common types and constants for the EIO-IS200 I2C/SMBus driver modules.
//!
//! This module provides shared definitions for error handling, channel
//! identity, configuration and address encoding used across the driver.

use fugit::MicrosDurationU32;

/// Number of bus channels exposed by the controller.
pub const CHANNEL_COUNT: usize = 4;

/// Largest SMBus block payload.
pub const BLOCK_MAX: usize = 32;

pub const FREQ_MIN_KHZ: u32 = 8;
pub const FREQ_MAX_KHZ: u32 = 400;

pub const DEFAULT_TIMEOUT: MicrosDurationU32 = MicrosDurationU32::from_ticks(10_000);
pub const TIMEOUT_MIN: MicrosDurationU32 = MicrosDurationU32::from_ticks(100);
pub const TIMEOUT_MAX: MicrosDurationU32 = MicrosDurationU32::from_ticks(1_000_000);

/// Register layout style implemented by a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Persona {
    /// Byte-level I2C controller: address/data registers, software stop.
    I2c,
    /// SMBus host controller with protocol-class acceleration.
    Smbus,
}

/// Logical channel of the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelId {
    I2c0 = 0,
    I2c1 = 1,
    Smb0 = 2,
    Smb1 = 3,
}

impl ChannelId {
    pub const ALL: [ChannelId; CHANNEL_COUNT] = [
        ChannelId::I2c0,
        ChannelId::I2c1,
        ChannelId::Smb0,
        ChannelId::Smb1,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn persona(self) -> Persona {
        match self {
            ChannelId::I2c0 | ChannelId::I2c1 => Persona::I2c,
            ChannelId::Smb0 | ChannelId::Smb1 => Persona::Smbus,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ChannelId::I2c0 => "i2c0",
            ChannelId::I2c1 => "i2c1",
            ChannelId::Smb0 => "smb0",
            ChannelId::Smb1 => "smb1",
        }
    }
}

/// Hardware-detected bus failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusFault {
    /// Target did not acknowledge.
    Nack,
    /// Another master won arbitration.
    ArbitrationLost,
    /// SMBus host flagged the transaction as failed.
    HostFailed,
    /// Packet error code mismatch reported by the SMBus host.
    PecMismatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Argument outside what the channel accepts.
    InvalidArgument,
    /// A bounded wait expired.
    Timeout,
    /// The bus or target reported a failure.
    Bus(BusFault),
    /// Operation shape unavailable on this channel's persona.
    NotSupported,
    /// The register access collaborator failed.
    Io,
}

impl Error {
    /// Negative result code for callers speaking the classic
    /// `count | -errno` convention.
    #[must_use]
    pub const fn to_errno(self) -> i32 {
        const EIO: i32 = 5;
        const EINVAL: i32 = 22;
        const ETIME: i32 = 62;
        const EOPNOTSUPP: i32 = 95;

        match self {
            Error::InvalidArgument => -EINVAL,
            Error::Timeout => -ETIME,
            Error::Bus(_) | Error::Io => -EIO,
            Error::NotSupported => -EOPNOTSUPP,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::Timeout => f.write_str("timeout"),
            Error::Bus(BusFault::Nack) => f.write_str("bus error: nack"),
            Error::Bus(BusFault::ArbitrationLost) => f.write_str("bus error: arbitration lost"),
            Error::Bus(BusFault::HostFailed) => f.write_str("bus error: host failed"),
            Error::Bus(BusFault::PecMismatch) => f.write_str("bus error: pec mismatch"),
            Error::NotSupported => f.write_str("not supported"),
            Error::Io => f.write_str("register access failed"),
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            Error::Bus(BusFault::Nack) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Error::Bus(BusFault::ArbitrationLost) => ErrorKind::ArbitrationLoss,
            Error::Bus(_) => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    TimeoutOutOfRange,
    FrequencyOutOfRange,
}

impl From<ConfigurationError> for Error {
    fn from(_: ConfigurationError) -> Self {
        Error::InvalidArgument
    }
}

bitflags::bitflags! {
    /// Capabilities a channel advertises to bus clients.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Functionality: u32 {
        const I2C = 0x0000_0001;
        const TEN_BIT_ADDR = 0x0000_0002;
        const SMBUS_BLOCK_PROC_CALL = 0x0000_8000;
        const SMBUS_QUICK = 0x0001_0000;
        const SMBUS_BYTE = 0x0006_0000;
        const SMBUS_BYTE_DATA = 0x0018_0000;
        const SMBUS_WORD_DATA = 0x0060_0000;
        const SMBUS_PROC_CALL = 0x0080_0000;
        const SMBUS_BLOCK_DATA = 0x0300_0000;
        const SMBUS_I2C_BLOCK = 0x0C00_0000;
    }
}

impl Functionality {
    /// Capability set for a persona.
    #[must_use]
    pub fn for_persona(persona: Persona) -> Self {
        let common = Functionality::I2C
            | Functionality::SMBUS_QUICK
            | Functionality::SMBUS_BYTE
            | Functionality::SMBUS_BYTE_DATA
            | Functionality::SMBUS_WORD_DATA
            | Functionality::SMBUS_PROC_CALL
            | Functionality::SMBUS_I2C_BLOCK;

        match persona {
            Persona::I2c => common | Functionality::TEN_BIT_ADDR,
            Persona::Smbus => {
                common | Functionality::SMBUS_BLOCK_DATA | Functionality::SMBUS_BLOCK_PROC_CALL
            }
        }
    }
}

/// 7-bit address in bits [7:1], direction bit left clear.
#[must_use]
pub const fn encode_7bit(addr: u8) -> u8 {
    (addr & 0x7F) << 1
}

#[must_use]
pub const fn decode_7bit(byte: u8) -> u8 {
    (byte >> 1) & 0x7F
}

/// 10-bit address as the two address-phase bytes, high byte first:
/// `11110 A9 A8 0` followed by `A7..A0`.
#[must_use]
pub const fn encode_10bit(addr: u16) -> u16 {
    0xF000 | (addr & 0xFF) | ((addr & 0x300) << 1)
}

#[must_use]
pub const fn decode_10bit(code: u16) -> u16 {
    (code & 0xFF) | ((code >> 1) & 0x300)
}

#[must_use]
pub const fn is_10bit_code(code: u16) -> bool {
    code & 0xF800 == 0xF000
}

/// Per-channel configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    /// Bound for every hardware wait on the channel.
    pub timeout: MicrosDurationU32,
    /// Bus clock to program at setup; `None` keeps the current hardware
    /// setting.
    pub frequency_khz: Option<u32>,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            frequency_khz: None,
        }
    }
}

pub struct I2cConfigBuilder {
    timeout: MicrosDurationU32,
    frequency_khz: Option<u32>,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            frequency_khz: None,
        }
    }
    #[must_use]
    pub fn timeout(mut self, timeout: MicrosDurationU32) -> Self {
        self.timeout = timeout;
        self
    }
    #[must_use]
    pub fn frequency_khz(mut self, khz: u32) -> Self {
        self.frequency_khz = Some(khz);
        self
    }
    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// `TimeoutOutOfRange` outside 100 µs..=1 s, `FrequencyOutOfRange`
    /// outside 8..=400 kHz.
    pub fn build(self) -> Result<I2cConfig, ConfigurationError> {
        if self.timeout < TIMEOUT_MIN || self.timeout > TIMEOUT_MAX {
            return Err(ConfigurationError::TimeoutOutOfRange);
        }
        if let Some(khz) = self.frequency_khz {
            if !(FREQ_MIN_KHZ..=FREQ_MAX_KHZ).contains(&khz) {
                return Err(ConfigurationError::FrequencyOutOfRange);
            }
        }
        Ok(I2cConfig {
            timeout: self.timeout,
            frequency_khz: self.frequency_khz,
        })
    }
}
