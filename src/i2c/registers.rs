// Licensed under the Apache-2.0 license

//! Register model for the two controller personas.
//!
//! Each channel exposes a small byte-wide register window at its I/O base.
//! The raw-I2C and SMBus-host personas place the same logical registers at
//! different offsets and signal the same conditions with different bits, so
//! the engines address registers by logical name ([`Reg`]) and look up the
//! concrete offset and bit masks in the channel's [`RegisterMap`], which is
//! picked once when the channel is created.

use super::common::{Error, Persona, FREQ_MAX_KHZ, FREQ_MIN_KHZ};
use super::traits::RegisterIo;

// Raw-I2C persona register offsets.
pub const I2C_REG_CTRL: u8 = 0x00;
pub const I2C_REG_STAT: u8 = 0x01;
pub const I2C_REG_MYADDR: u8 = 0x02;
pub const I2C_REG_ADDR: u8 = 0x03;
pub const I2C_REG_DATA: u8 = 0x04;
pub const I2C_REG_PRESCALE1: u8 = 0x05;
pub const I2C_REG_PRESCALE2: u8 = 0x06;
pub const I2C_REG_ECTRL: u8 = 0x07;
pub const I2C_REG_SEM: u8 = 0x08;

pub const I2C_CTRL_STOP: u8 = 1 << 1;

pub const I2C_STAT_RX_READY: u8 = 1 << 6;
pub const I2C_STAT_TX_DONE: u8 = 1 << 5;
pub const I2C_STAT_NACK: u8 = 1 << 4;
pub const I2C_STAT_ARB_LOST: u8 = 1 << 3;
pub const I2C_STAT_SLAVE_STOP: u8 = 1 << 2;
pub const I2C_STAT_BUSY: u8 = 1 << 1;
pub const I2C_STAT_MASTER: u8 = 1 << 0;

pub const I2C_ECTRL_RESET: u8 = 1 << 7;
pub const I2C_SEM_IN_USE: u8 = 1 << 1;

// SMBus-host persona register offsets.
pub const SMB_REG_HS: u8 = 0x00;
pub const SMB_REG_HS2: u8 = 0x01;
pub const SMB_REG_HC: u8 = 0x02;
pub const SMB_REG_HCMD: u8 = 0x03;
pub const SMB_REG_HADDR: u8 = 0x04;
pub const SMB_REG_HD0: u8 = 0x05;
pub const SMB_REG_HD1: u8 = 0x06;
pub const SMB_REG_HBLOCK: u8 = 0x07;
pub const SMB_REG_HPEC: u8 = 0x08;
pub const SMB_REG_HC2: u8 = 0x0C;
pub const SMB_REG_HPRESCALE1: u8 = 0x13;
pub const SMB_REG_HPRESCALE2: u8 = 0x14;

pub const SMB_HS_BUSY: u8 = 1 << 0;
pub const SMB_HS_FINISH: u8 = 1 << 1;
pub const SMB_HS_ARB_LOST: u8 = 1 << 3;
pub const SMB_HS_FAILED: u8 = 1 << 4;
pub const SMB_HS_RX_READY: u8 = 1 << 5;
pub const SMB_HS_IN_USE: u8 = 1 << 6;
pub const SMB_HS_TX_DONE: u8 = 1 << 7;

pub const SMB_HS2_HOST_NOTIFY: u8 = 1 << 0;
pub const SMB_HS2_PEC_ERROR: u8 = 1 << 1;
pub const SMB_HS2_NACK: u8 = 1 << 2;
pub const SMB_HS2_ALERT: u8 = 1 << 3;
pub const SMB_HS2_TIMEOUT: u8 = 1 << 4;
pub const SMB_HS2_SLAVE_STOP: u8 = 1 << 5;
pub const SMB_HS2_SLAVE_TX_REQUEST: u8 = 1 << 6;
pub const SMB_HS2_SLAVE_MODE: u8 = 1 << 7;

pub const SMB_HC_NACK_ENABLE: u8 = 1 << 0;
pub const SMB_HC_KILL: u8 = 1 << 1;
pub const SMB_HC_CLASS_SHIFT: u8 = 2;
pub const SMB_HC_CLASS_MASK: u8 = 0x07 << SMB_HC_CLASS_SHIFT;
pub const SMB_HC_LAST_BYTE: u8 = 1 << 5;
pub const SMB_HC_START: u8 = 1 << 6;
pub const SMB_HC_PEC_ENABLE: u8 = 1 << 7;

pub const SMB_HC2_HOST_NOTIFY_DISABLE: u8 = 1 << 0;
pub const SMB_HC2_I2C_ENABLE: u8 = 1 << 1;
pub const SMB_HC2_AUTO_PEC: u8 = 1 << 2;
pub const SMB_HC2_BLOCK_INDEX: u8 = 1 << 3;
pub const SMB_HC2_RESET: u8 = 1 << 7;

/// Status bits cleared after a transfer: TX_DONE, RX_READY, ARB_LOST, BUSY.
const SMB_HS_CLEAR: u8 = 0xA9;
/// Status-2 bits cleared after a transfer: SLAVE_TX_REQUEST, ALERT, NACK.
const SMB_HS2_CLEAR: u8 = 0x4C;

/// Reference clock of the bus prescalers, in kHz.
pub const CHIP_CLOCK_KHZ: u32 = 50_000;
pub const SCL_REF_LOW_KHZ: u32 = 1_000;
pub const SCL_REF_HIGH_KHZ: u32 = 2_500;
pub const SCL_FAST_MODE: u8 = 0x80;
/// Above this rate the high reference and fast mode are used.
pub const SCL_THRESHOLD_KHZ: u32 = 30;

/// Logical register names shared by both personas.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reg {
    Status,
    Status2,
    Control,
    Command,
    Address,
    Data0,
    Data1,
    Block,
    ExtControl,
    Semaphore,
    Prescaler1,
    Prescaler2,
}

/// How a mask is driven into a write-one-to-act register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitWrite {
    /// Write the mask alone.
    Store,
    /// Read the register and write it back with the mask ORed in.
    Merge,
}

/// Where the persona reports a missing acknowledge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NackSource {
    Status(u8),
    Status2(u8),
}

/// Raw-I2C compatibility switch of a persona that is not natively raw-I2C.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompatMode {
    pub enable: u8,
    pub reset: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Offsets {
    status: u8,
    status2: Option<u8>,
    control: u8,
    command: Option<u8>,
    address: u8,
    data0: u8,
    data1: Option<u8>,
    block: Option<u8>,
    ext_control: u8,
    semaphore: u8,
    prescaler1: u8,
    prescaler2: u8,
}

/// Offsets, bit masks and write conventions of one persona.
#[derive(Debug, PartialEq, Eq)]
pub struct RegisterMap {
    pub persona: Persona,
    offsets: Offsets,
    /// Transfer in progress, in `Status`.
    pub busy: u8,
    /// Semaphore bit, in `Semaphore`.
    pub in_use: u8,
    /// Self-clearing bus reset, in `ExtControl`.
    pub reset: u8,
    /// Stop after the current byte, in `Control`.
    pub stop: u8,
    /// Received byte available, in `Status`.
    pub rx_ready: u8,
    /// Transmitted byte complete, in `Status`.
    pub tx_done: u8,
    pub nack: NackSource,
    pub release: BitWrite,
    pub reset_write: BitWrite,
    /// Status clear sequence after a transfer.
    pub clear: &'static [(Reg, BitWrite, u8)],
    pub compat: Option<CompatMode>,
}

pub static I2C_MAP: RegisterMap = RegisterMap {
    persona: Persona::I2c,
    offsets: Offsets {
        status: I2C_REG_STAT,
        status2: None,
        control: I2C_REG_CTRL,
        command: None,
        address: I2C_REG_ADDR,
        data0: I2C_REG_DATA,
        data1: None,
        block: None,
        ext_control: I2C_REG_ECTRL,
        semaphore: I2C_REG_SEM,
        prescaler1: I2C_REG_PRESCALE1,
        prescaler2: I2C_REG_PRESCALE2,
    },
    busy: I2C_STAT_BUSY,
    in_use: I2C_SEM_IN_USE,
    reset: I2C_ECTRL_RESET,
    stop: I2C_CTRL_STOP,
    rx_ready: I2C_STAT_RX_READY,
    tx_done: I2C_STAT_TX_DONE,
    nack: NackSource::Status(I2C_STAT_NACK),
    release: BitWrite::Store,
    reset_write: BitWrite::Store,
    clear: &[(Reg::Status, BitWrite::Store, 0xFF)],
    compat: None,
};

pub static SMBUS_MAP: RegisterMap = RegisterMap {
    persona: Persona::Smbus,
    offsets: Offsets {
        status: SMB_REG_HS,
        status2: Some(SMB_REG_HS2),
        control: SMB_REG_HC,
        command: Some(SMB_REG_HCMD),
        address: SMB_REG_HADDR,
        data0: SMB_REG_HD0,
        data1: Some(SMB_REG_HD1),
        block: Some(SMB_REG_HBLOCK),
        ext_control: SMB_REG_HC2,
        semaphore: SMB_REG_HS,
        prescaler1: SMB_REG_HPRESCALE1,
        prescaler2: SMB_REG_HPRESCALE2,
    },
    busy: SMB_HS_BUSY,
    in_use: SMB_HS_IN_USE,
    reset: SMB_HC2_RESET,
    stop: SMB_HC_LAST_BYTE,
    rx_ready: SMB_HS_RX_READY,
    tx_done: SMB_HS_TX_DONE,
    nack: NackSource::Status2(SMB_HS2_NACK),
    release: BitWrite::Merge,
    reset_write: BitWrite::Merge,
    clear: &[
        (Reg::Status, BitWrite::Merge, SMB_HS_CLEAR),
        (Reg::Status2, BitWrite::Merge, SMB_HS2_CLEAR),
    ],
    compat: Some(CompatMode {
        enable: SMB_HC2_I2C_ENABLE,
        reset: SMB_HC2_RESET,
    }),
};

impl RegisterMap {
    #[must_use]
    pub fn for_persona(persona: Persona) -> &'static RegisterMap {
        match persona {
            Persona::I2c => &I2C_MAP,
            Persona::Smbus => &SMBUS_MAP,
        }
    }

    /// Offset of `reg` inside the window, `None` if the persona lacks it.
    #[must_use]
    pub fn offset(&self, reg: Reg) -> Option<u8> {
        let o = &self.offsets;
        match reg {
            Reg::Status => Some(o.status),
            Reg::Status2 => o.status2,
            Reg::Control => Some(o.control),
            Reg::Command => o.command,
            Reg::Address => Some(o.address),
            Reg::Data0 => Some(o.data0),
            Reg::Data1 => o.data1,
            Reg::Block => o.block,
            Reg::ExtControl => Some(o.ext_control),
            Reg::Semaphore => Some(o.semaphore),
            Reg::Prescaler1 => Some(o.prescaler1),
            Reg::Prescaler2 => Some(o.prescaler2),
        }
    }

    #[must_use]
    pub fn has(&self, reg: Reg) -> bool {
        self.offset(reg).is_some()
    }
}

/// Prescaler pair for a bus rate.
///
/// # Errors
///
/// `InvalidArgument` outside 8..=400 kHz.
pub fn prescalers_for(khz: u32) -> Result<(u8, u8), Error> {
    if !(FREQ_MIN_KHZ..=FREQ_MAX_KHZ).contains(&khz) {
        return Err(Error::InvalidArgument);
    }

    let fast = khz > SCL_THRESHOLD_KHZ;
    let reference = if fast {
        SCL_REF_HIGH_KHZ
    } else {
        SCL_REF_LOW_KHZ
    };

    let pre1 = u8::try_from(CHIP_CLOCK_KHZ / reference).map_err(|_| Error::InvalidArgument)?;
    let mut pre2 = u8::try_from(reference / khz - 1).map_err(|_| Error::InvalidArgument)?;
    if fast {
        pre2 |= SCL_FAST_MODE;
    }
    Ok((pre1, pre2))
}

/// Bus rate encoded by a `prescaler2` value. Lossy: integer division.
#[must_use]
pub fn frequency_from(pre2: u8) -> u32 {
    let reference = if pre2 & SCL_FAST_MODE != 0 {
        SCL_REF_HIGH_KHZ
    } else {
        SCL_REF_LOW_KHZ
    };
    reference / (u32::from(pre2 & !SCL_FAST_MODE) + 1)
}

/// One channel's register window.
pub struct RegisterWindow<'a, R> {
    io: &'a R,
    base: u16,
    map: &'static RegisterMap,
}

impl<'a, R: RegisterIo> RegisterWindow<'a, R> {
    pub fn new(io: &'a R, base: u16, persona: Persona) -> Self {
        Self {
            io,
            base,
            map: RegisterMap::for_persona(persona),
        }
    }

    #[must_use]
    pub fn map(&self) -> &'static RegisterMap {
        self.map
    }

    #[must_use]
    pub fn base(&self) -> u16 {
        self.base
    }

    fn port(&self, reg: Reg) -> Result<u16, Error> {
        let offset = self.map.offset(reg).ok_or(Error::NotSupported)?;
        Ok(self.base.wrapping_add(u16::from(offset)))
    }

    /// # Errors
    ///
    /// `NotSupported` if the persona lacks `reg`, `Io` on transport failure.
    pub fn read(&self, reg: Reg) -> Result<u8, Error> {
        let port = self.port(reg)?;
        self.io.read(port).map_err(|_| Error::Io)
    }

    /// # Errors
    ///
    /// `NotSupported` if the persona lacks `reg`, `Io` on transport failure.
    pub fn write(&self, reg: Reg, value: u8) -> Result<(), Error> {
        let port = self.port(reg)?;
        self.io.write(port, value).map_err(|_| Error::Io)
    }

    /// Read-modify-write setting `mask`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn or(&self, reg: Reg, mask: u8) -> Result<(), Error> {
        let value = self.read(reg)?;
        self.write(reg, value | mask)
    }

    /// Read-modify-write keeping only `mask`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn and(&self, reg: Reg, mask: u8) -> Result<(), Error> {
        let value = self.read(reg)?;
        self.write(reg, value & mask)
    }

    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn apply(&self, reg: Reg, how: BitWrite, mask: u8) -> Result<(), Error> {
        match how {
            BitWrite::Store => self.write(reg, mask),
            BitWrite::Merge => self.or(reg, mask),
        }
    }

    /// Program both prescalers for `khz`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` outside 8..=400 kHz, with no register written.
    pub fn set_frequency(&self, khz: u32) -> Result<(), Error> {
        let (pre1, pre2) = prescalers_for(khz)?;
        self.write(Reg::Prescaler1, pre1)?;
        self.write(Reg::Prescaler2, pre2)
    }

    /// Bus rate currently programmed, in kHz.
    ///
    /// # Errors
    ///
    /// `Io` on transport failure.
    pub fn frequency(&self) -> Result<u32, Error> {
        let pre2 = self.read(Reg::Prescaler2)?;
        Ok(frequency_from(pre2))
    }
}
