// Licensed under the Apache-2.0 license

//! SMBus protocol operations.
//!
//! The SMBus-host persona executes the protocol classes in hardware: the
//! driver loads address, command and data registers, starts the class and
//! waits for the host to finish. I2C-block transfers, and every protocol
//! on the raw-I2C persona, are emulated as one or two raw messages.

use embedded_hal::delay::DelayNs;
use lock_api::RawMutex;

use crate::common::{Clock, Logger};
use crate::i2c::common::{encode_7bit, BusFault, Error, Persona, BLOCK_MAX};
use crate::i2c::handshake::Session;
use crate::i2c::i2c_controller::Channel;
use crate::i2c::registers::{
    Reg, SMB_HC2_BLOCK_INDEX, SMB_HC_CLASS_MASK, SMB_HC_CLASS_SHIFT, SMB_HC_KILL,
    SMB_HC_NACK_ENABLE, SMB_HC_PEC_ENABLE, SMB_HC_START, SMB_HS2_NACK, SMB_HS2_PEC_ERROR,
    SMB_HS2_TIMEOUT, SMB_HS_ARB_LOST, SMB_HS_FAILED,
};
use crate::i2c::traits::RegisterIo;
use crate::i2c::transfer::{Message, MessageFlags};

const BLOCK_LIMIT: u8 = BLOCK_MAX as u8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadWrite {
    Read,
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmbusProtocol {
    Quick,
    Byte,
    ByteData,
    WordData,
    ProcCall,
    BlockData,
    BlockProcCall,
    I2cBlockData,
}

impl SmbusProtocol {
    /// Class code the SMBus host executes, `None` if the host has no
    /// native class for the protocol.
    #[must_use]
    pub const fn host_class(self) -> Option<u8> {
        match self {
            SmbusProtocol::Quick => Some(0),
            SmbusProtocol::Byte => Some(1),
            SmbusProtocol::ByteData => Some(2),
            SmbusProtocol::WordData => Some(3),
            SmbusProtocol::ProcCall => Some(4),
            SmbusProtocol::BlockData => Some(5),
            SmbusProtocol::BlockProcCall => Some(7),
            SmbusProtocol::I2cBlockData => None,
        }
    }
}

/// Data exchanged by an SMBus operation.
///
/// The same 34 bytes hold a byte, a little-endian word, or a block: byte 0
/// is the block length and bytes 1..=32 the block payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmbusData {
    raw: [u8; BLOCK_MAX + 2],
}

impl Default for SmbusData {
    fn default() -> Self {
        Self::new()
    }
}

impl SmbusData {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: [0; BLOCK_MAX + 2],
        }
    }

    #[must_use]
    pub fn from_byte(value: u8) -> Self {
        let mut data = Self::new();
        data.set_byte(value);
        data
    }

    #[must_use]
    pub fn from_word(value: u16) -> Self {
        let mut data = Self::new();
        data.set_word(value);
        data
    }

    /// # Errors
    ///
    /// `InvalidArgument` for more than 32 bytes.
    pub fn from_block(block: &[u8]) -> Result<Self, Error> {
        let mut data = Self::new();
        data.set_block(block)?;
        Ok(data)
    }

    #[must_use]
    pub fn byte(&self) -> u8 {
        let [byte, ..] = self.raw;
        byte
    }

    pub fn set_byte(&mut self, value: u8) {
        let [byte, ..] = &mut self.raw;
        *byte = value;
    }

    #[must_use]
    pub fn word(&self) -> u16 {
        let [lo, hi, ..] = self.raw;
        u16::from_le_bytes([lo, hi])
    }

    pub fn set_word(&mut self, value: u16) {
        let [lo, hi, ..] = &mut self.raw;
        [*lo, *hi] = value.to_le_bytes();
    }

    /// Length byte as stored, possibly above 32.
    #[must_use]
    pub fn block_len(&self) -> usize {
        usize::from(self.byte())
    }

    /// Block payload, at most 32 bytes.
    #[must_use]
    pub fn block(&self) -> &[u8] {
        let [len, payload @ ..] = &self.raw;
        let len = usize::from(*len).min(BLOCK_MAX);
        payload.get(..len).unwrap_or(&[])
    }

    /// # Errors
    ///
    /// `InvalidArgument` for more than 32 bytes.
    pub fn set_block(&mut self, block: &[u8]) -> Result<(), Error> {
        let count = u8::try_from(block.len())
            .ok()
            .filter(|&n| n <= BLOCK_LIMIT)
            .ok_or(Error::InvalidArgument)?;
        let [len, payload @ ..] = &mut self.raw;
        *len = count;
        payload
            .get_mut(..block.len())
            .ok_or(Error::InvalidArgument)?
            .copy_from_slice(block);
        Ok(())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_MAX + 2] {
        &self.raw
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_MAX + 2] {
        &mut self.raw
    }
}

/// Reject block requests the hardware cannot carry, before touching the bus.
fn check_request(
    rw: ReadWrite,
    protocol: SmbusProtocol,
    data: &SmbusData,
) -> Result<(), Error> {
    let len = data.block_len();
    match protocol {
        SmbusProtocol::BlockData if rw == ReadWrite::Write && len > BLOCK_MAX => {
            Err(Error::InvalidArgument)
        }
        SmbusProtocol::BlockProcCall if len > BLOCK_MAX => Err(Error::InvalidArgument),
        SmbusProtocol::I2cBlockData if len == 0 || len > BLOCK_MAX => Err(Error::InvalidArgument),
        _ => Ok(()),
    }
}

impl<R, C, D, L, M> Channel<'_, R, C, D, L, M>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
    M: RawMutex,
{
    /// Run one SMBus protocol operation.
    ///
    /// Reads leave their result in `data`; block reads store the length in
    /// byte 0, clamped to 32.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a block longer than 32 bytes (checked before
    ///   any register access) or an address out of range.
    /// - `NotSupported` for SMBus block protocols on the raw-I2C persona and
    ///   10-bit addresses on the SMBus-host persona.
    /// - `Bus`/`Timeout` as reported by the hardware.
    pub fn smbus_operation(
        &self,
        address: u16,
        flags: MessageFlags,
        rw: ReadWrite,
        command: u8,
        protocol: SmbusProtocol,
        data: &mut SmbusData,
    ) -> Result<(), Error> {
        check_request(rw, protocol, data)?;

        match (self.persona(), protocol.host_class()) {
            (Persona::Smbus, Some(class)) => {
                if flags.contains(MessageFlags::TEN_BIT) {
                    return Err(Error::NotSupported);
                }
                let address = u8::try_from(address)
                    .ok()
                    .filter(|&a| a <= 0x7F)
                    .ok_or(Error::InvalidArgument)?;
                self.with_session(|s| s.run_host_operation(address, rw, command, protocol, class, data))
            }
            (Persona::I2c, _) if matches!(protocol, SmbusProtocol::BlockData | SmbusProtocol::BlockProcCall) => {
                Err(Error::NotSupported)
            }
            _ => self.emulate_smbus(address, flags, rw, command, protocol, data),
        }
    }

    /// Express an SMBus operation as raw messages.
    fn emulate_smbus(
        &self,
        address: u16,
        flags: MessageFlags,
        rw: ReadWrite,
        command: u8,
        protocol: SmbusProtocol,
        data: &mut SmbusData,
    ) -> Result<(), Error> {
        let is_read = rw == ReadWrite::Read;

        if protocol == SmbusProtocol::Quick {
            let mut msg = if is_read {
                [Message::read(address, &mut []).with_flags(flags)]
            } else {
                [Message::write(address, &[]).with_flags(flags)]
            };
            return self.raw_transfer(&mut msg).map(drop);
        }

        let mut out: heapless::Vec<u8, { BLOCK_MAX + 1 }> = heapless::Vec::new();
        let reply = match (protocol, is_read) {
            (SmbusProtocol::Byte, true) => Some(0..1),
            (SmbusProtocol::Byte, false) => {
                push_bytes(&mut out, &[command])?;
                None
            }
            (SmbusProtocol::ByteData, true) => {
                push_bytes(&mut out, &[command])?;
                Some(0..1)
            }
            (SmbusProtocol::ByteData, false) => {
                push_bytes(&mut out, &[command, data.byte()])?;
                None
            }
            (SmbusProtocol::WordData, true) => {
                push_bytes(&mut out, &[command])?;
                Some(0..2)
            }
            (SmbusProtocol::WordData, false) | (SmbusProtocol::ProcCall, _) => {
                let [lo, hi] = data.word().to_le_bytes();
                push_bytes(&mut out, &[command, lo, hi])?;
                (protocol == SmbusProtocol::ProcCall).then_some(0..2)
            }
            (SmbusProtocol::I2cBlockData, true) => {
                push_bytes(&mut out, &[command])?;
                Some(1..data.block_len() + 1)
            }
            (SmbusProtocol::I2cBlockData, false) => {
                push_bytes(&mut out, &[command])?;
                push_bytes(&mut out, data.block())?;
                None
            }
            _ => return Err(Error::NotSupported),
        };

        let mut msgs: heapless::Vec<Message<'_>, 2> = heapless::Vec::new();
        if !out.is_empty() {
            msgs.push(Message::write(address, &out).with_flags(flags))
                .map_err(|_| Error::InvalidArgument)?;
        }
        if let Some(range) = reply {
            let buf = data
                .as_bytes_mut()
                .get_mut(range)
                .ok_or(Error::InvalidArgument)?;
            msgs.push(Message::read(address, buf).with_flags(flags))
                .map_err(|_| Error::InvalidArgument)?;
        }
        self.raw_transfer(&mut msgs).map(drop)
    }
}

fn push_bytes<const N: usize>(out: &mut heapless::Vec<u8, N>, bytes: &[u8]) -> Result<(), Error> {
    out.extend_from_slice(bytes)
        .map_err(|()| Error::InvalidArgument)
}

impl<R, C, D, L> Session<'_, R, C, D, L>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
{
    pub(crate) fn run_host_operation(
        &mut self,
        address: u8,
        rw: ReadWrite,
        command: u8,
        protocol: SmbusProtocol,
        class: u8,
        data: &mut SmbusData,
    ) -> Result<(), Error> {
        let result = self.host_operation(address, rw, command, protocol, class, data);
        if let Err(err) = result {
            self.state
                .logger
                .debug(format_args!("{}: smbus {:?} failed: {err}", self.id.name(), protocol));
        }

        // Both status registers are cleared whatever happened.
        let status = self.regs.write(Reg::Status, 0xFF);
        let status2 = self.regs.write(Reg::Status2, 0xFF);
        result.and(status).and(status2)
    }

    fn host_operation(
        &mut self,
        address: u8,
        rw: ReadWrite,
        command: u8,
        protocol: SmbusProtocol,
        class: u8,
        data: &mut SmbusData,
    ) -> Result<(), Error> {
        let is_read = rw == ReadWrite::Read;

        self.wait_ready()?;
        self.set_raw_mode(false)?;

        self.regs
            .write(Reg::Address, encode_7bit(address) | u8::from(is_read))?;
        self.regs.write(Reg::Command, command)?;
        self.state.logger.debug(format_args!(
            "{}: smbus {:?} {} addr {:#04x} cmd {:#04x}",
            self.id.name(),
            protocol,
            if is_read { "rd" } else { "wr" },
            address,
            command
        ));

        let [b0, b1, ..] = *data.as_bytes();
        match protocol {
            SmbusProtocol::ByteData if !is_read => self.regs.write(Reg::Data0, b0)?,
            SmbusProtocol::WordData if !is_read => {
                self.regs.write(Reg::Data0, b0)?;
                self.regs.write(Reg::Data1, b1)?;
            }
            SmbusProtocol::ProcCall => {
                self.regs.write(Reg::Data0, b0)?;
                self.regs.write(Reg::Data1, b1)?;
            }
            SmbusProtocol::BlockData | SmbusProtocol::BlockProcCall => {
                // The class must be latched before the block buffer is
                // loaded.
                self.program_class(class, false)?;
                self.reset_block_index()?;
                if !is_read || protocol == SmbusProtocol::BlockProcCall {
                    self.load_block(data.block())?;
                }
            }
            _ => {}
        }

        self.program_class(class, true)?;
        self.wait_not_busy()?;

        let status = self.regs.read(Reg::Status)?;
        let status2 = self.regs.read(Reg::Status2)?;
        host_result(status, status2)?;

        let out = data.as_bytes_mut();
        match protocol {
            SmbusProtocol::Byte | SmbusProtocol::ByteData if is_read => {
                let [byte, ..] = out;
                *byte = self.regs.read(Reg::Data0)?;
            }
            SmbusProtocol::WordData if is_read => {
                let [lo, hi, ..] = out;
                *lo = self.regs.read(Reg::Data0)?;
                *hi = self.regs.read(Reg::Data1)?;
            }
            SmbusProtocol::ProcCall => {
                let [lo, hi, ..] = out;
                *lo = self.regs.read(Reg::Data0)?;
                *hi = self.regs.read(Reg::Data1)?;
            }
            SmbusProtocol::BlockData if is_read => self.read_block(data)?,
            SmbusProtocol::BlockProcCall => self.read_block(data)?,
            _ => {}
        }
        Ok(())
    }

    /// Write the class field; with `start`, also start the host with kill,
    /// no-ack and PEC cleared.
    fn program_class(&mut self, class: u8, start: bool) -> Result<(), Error> {
        let mut control = self.regs.read(Reg::Control)?;
        control = (control & !SMB_HC_CLASS_MASK) | ((class << SMB_HC_CLASS_SHIFT) & SMB_HC_CLASS_MASK);
        if start {
            control &= !(SMB_HC_KILL | SMB_HC_NACK_ENABLE | SMB_HC_PEC_ENABLE);
            control |= SMB_HC_START;
        }
        self.regs.write(Reg::Control, control)
    }

    /// Toggle the block index bit, rewinding the block buffer.
    fn reset_block_index(&mut self) -> Result<(), Error> {
        self.regs.and(Reg::ExtControl, !SMB_HC2_BLOCK_INDEX)?;
        self.regs.or(Reg::ExtControl, SMB_HC2_BLOCK_INDEX)
    }

    fn load_block(&mut self, block: &[u8]) -> Result<(), Error> {
        let len = u8::try_from(block.len()).map_err(|_| Error::InvalidArgument)?;
        self.regs.write(Reg::Data0, len)?;
        for &byte in block {
            self.regs.write(Reg::Block, byte)?;
        }
        Ok(())
    }

    fn read_block(&mut self, data: &mut SmbusData) -> Result<(), Error> {
        let reported = self.regs.read(Reg::Data0)?;
        let len = reported.min(BLOCK_LIMIT);
        if reported > BLOCK_LIMIT {
            self.state.logger.error(format_args!(
                "{}: block length {} truncated to {}",
                self.id.name(),
                reported,
                BLOCK_LIMIT
            ));
        }

        let [count, payload @ ..] = data.as_bytes_mut();
        *count = len;
        for slot in payload.iter_mut().take(usize::from(len)) {
            *slot = self.regs.read(Reg::Block)?;
        }
        Ok(())
    }
}

/// Map host status to the first error it reports.
fn host_result(status: u8, status2: u8) -> Result<(), Error> {
    if status & SMB_HS_FAILED != 0 {
        Err(Error::Bus(BusFault::HostFailed))
    } else if status & SMB_HS_ARB_LOST != 0 {
        Err(Error::Bus(BusFault::ArbitrationLost))
    } else if status2 & SMB_HS2_TIMEOUT != 0 {
        Err(Error::Timeout)
    } else if status2 & SMB_HS2_NACK != 0 {
        Err(Error::Bus(BusFault::Nack))
    } else if status2 & SMB_HS2_PEC_ERROR != 0 {
        Err(Error::Bus(BusFault::PecMismatch))
    } else {
        Ok(())
    }
}
