// Licensed under the Apache-2.0 license

//! Byte-level transfer engine.
//!
//! Drives an ordered list of [`Message`]s through the address and data
//! registers: one start per message, software-armed stop at the end. The
//! SMBus-host persona runs the same engine after switching into its raw-I2C
//! compatibility mode.

use embedded_hal::delay::DelayNs;
use lock_api::RawMutex;

use crate::common::{Clock, Logger};
use crate::i2c::common::{encode_10bit, encode_7bit, BusFault, Error, Persona};
use crate::i2c::handshake::Session;
use crate::i2c::i2c_controller::Channel;
use crate::i2c::registers::{NackSource, Reg};
use crate::i2c::traits::RegisterIo;

bitflags::bitflags! {
    /// Per-message options.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        /// `address` is a 10-bit address.
        const TEN_BIT = 1 << 0;
        /// Missing acknowledges are not errors for this message.
        const IGNORE_NAK = 1 << 1;
    }
}

#[derive(Debug)]
pub enum Payload<'b> {
    Read(&'b mut [u8]),
    Write(&'b [u8]),
}

/// One start-address-data segment of a transfer.
#[derive(Debug)]
pub struct Message<'b> {
    pub address: u16,
    pub flags: MessageFlags,
    pub payload: Payload<'b>,
}

impl<'b> Message<'b> {
    pub fn read(address: u16, buf: &'b mut [u8]) -> Self {
        Self {
            address,
            flags: MessageFlags::empty(),
            payload: Payload::Read(buf),
        }
    }

    pub fn write(address: u16, bytes: &'b [u8]) -> Self {
        Self {
            address,
            flags: MessageFlags::empty(),
            payload: Payload::Write(bytes),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_read(&self) -> bool {
        matches!(self.payload, Payload::Read(_))
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Read(buf) => buf.len(),
            Payload::Write(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_address(&self, persona: Persona) -> Result<(), Error> {
        if self.flags.contains(MessageFlags::TEN_BIT) {
            if persona == Persona::Smbus {
                return Err(Error::NotSupported);
            }
            if self.address > 0x3FF {
                return Err(Error::InvalidArgument);
            }
        } else if self.address > 0x7F {
            return Err(Error::InvalidArgument);
        }
        Ok(())
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
    /// Run `msgs` as one bus transaction and return how many messages
    /// completed.
    ///
    /// On failure the bus is reset; in every case status is cleared and the
    /// semaphore released before returning.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an address out of range.
    /// - `NotSupported` for 10-bit addresses on the SMBus-host persona.
    /// - `Timeout` if the channel never became ready or a byte never
    ///   completed.
    /// - `Bus(Nack)` when the target does not acknowledge and the message
    ///   does not ignore it.
    pub fn raw_transfer(&self, msgs: &mut [Message<'_>]) -> Result<usize, Error> {
        for msg in msgs.iter() {
            msg.check_address(self.persona())?;
        }
        if msgs.is_empty() {
            return Ok(0);
        }
        self.with_session(|s| s.run_transfer(msgs))
    }
}

impl<R, C, D, L> Session<'_, R, C, D, L>
where
    R: RegisterIo,
    C: Clock,
    D: DelayNs,
    L: Logger,
{
    pub(crate) fn run_transfer(&mut self, msgs: &mut [Message<'_>]) -> Result<usize, Error> {
        let result = self.transfer_messages(msgs);

        if let Err(err) = result {
            self.state
                .logger
                .debug(format_args!("{}: transfer failed: {err}", self.id.name()));
            if let Err(reset) = self.reset_bus() {
                self.state
                    .logger
                    .error(format_args!("{}: recovery reset: {reset}", self.id.name()));
            }
        }

        // The semaphore is released even if clearing status failed.
        let cleared = self.clear_status();
        let released = self.clear_in_use();
        if let Err(err) = cleared.and(released) {
            self.state
                .logger
                .error(format_args!("{}: transfer cleanup: {err}", self.id.name()));
        }
        result.and(cleared).and(released).map(|()| msgs.len())
    }

    fn transfer_messages(&mut self, msgs: &mut [Message<'_>]) -> Result<(), Error> {
        self.wait_ready()?;
        self.set_raw_mode(true)?;

        let last = msgs.len().saturating_sub(1);
        let mut stop_armed = false;

        for (index, msg) in msgs.iter_mut().enumerate() {
            let ten_bit = msg.flags.contains(MessageFlags::TEN_BIT);
            let no_ack = msg.flags.contains(MessageFlags::IGNORE_NAK);
            let is_read = msg.is_read();
            let empty = msg.is_empty();

            self.state.logger.debug(format_args!(
                "{}: msg {} addr {:#05x} {} len {}",
                self.id.name(),
                index,
                msg.address,
                if is_read { "rd" } else { "wr" },
                msg.len()
            ));

            // A zero-length message is an address probe: stop follows the
            // address byte.
            if empty {
                self.let_stop()?;
            }
            self.address_phase(msg.address, ten_bit, is_read, no_ack)?;
            if empty {
                continue;
            }

            match &mut msg.payload {
                Payload::Write(bytes) => {
                    for &byte in bytes.iter() {
                        self.write_byte(Reg::Data0, byte, no_ack)?;
                    }
                }
                Payload::Read(buf) => {
                    // Dummy read clocks in the first byte.
                    self.regs.read(Reg::Data0)?;
                    let count = buf.len();
                    for (pos, slot) in buf.iter_mut().enumerate() {
                        if index == last && pos + 1 == count {
                            self.let_stop()?;
                            stop_armed = true;
                        }
                        *slot = self.read_byte()?;
                    }
                }
            }
        }

        if stop_armed {
            self.wait_stop_complete()
        } else {
            self.bus_stop()
        }
    }

    fn address_phase(
        &mut self,
        address: u16,
        ten_bit: bool,
        is_read: bool,
        no_ack: bool,
    ) -> Result<(), Error> {
        let rw = u8::from(is_read);
        if ten_bit {
            let [high, low] = encode_10bit(address).to_be_bytes();
            self.write_byte(Reg::Address, high | rw, no_ack)?;
            self.write_byte(Reg::Data0, low, no_ack)
        } else {
            let address = u8::try_from(address).map_err(|_| Error::InvalidArgument)?;
            self.write_byte(Reg::Address, encode_7bit(address) | rw, no_ack)
        }
    }

    fn write_byte(&mut self, reg: Reg, byte: u8, no_ack: bool) -> Result<(), Error> {
        self.state
            .logger
            .debug(format_args!("{}: {:?} <- {:#04x}", self.id.name(), reg, byte));
        self.regs.write(reg, byte)?;
        self.wait_write_done(no_ack)
    }

    /// Wait for the byte to leave, acknowledge the status and check for a
    /// missing acknowledge.
    fn wait_write_done(&mut self, no_ack: bool) -> Result<(), Error> {
        let map = self.regs.map();
        let status = match self.poll(Reg::Status, |v| v & map.tx_done != 0) {
            Ok(status) => status,
            Err(err) => {
                self.state
                    .logger
                    .error(format_args!("{}: wait write done: {err}", self.id.name()));
                self.ack_after_timeout();
                return Err(err);
            }
        };
        self.regs.or(Reg::Status, 0)?;

        let nacked = match map.nack {
            NackSource::Status(bit) => status & bit != 0,
            NackSource::Status2(bit) => {
                let status2 = self.regs.read(Reg::Status2)?;
                self.regs.write(Reg::Status2, status2)?;
                status2 & bit != 0
            }
        };

        if nacked && !no_ack {
            self.state
                .logger
                .debug(format_args!("{}: no ack", self.id.name()));
            return Err(Error::Bus(BusFault::Nack));
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Error> {
        let map = self.regs.map();
        let status = match self.poll(Reg::Status, |v| v & map.rx_ready != 0) {
            Ok(status) => status,
            Err(err) => {
                self.state
                    .logger
                    .error(format_args!("{}: wait read ready: {err}", self.id.name()));
                self.ack_after_timeout();
                return Err(err);
            }
        };
        self.regs.write(Reg::Status, status)?;
        let byte = self.regs.read(Reg::Data0)?;
        self.state
            .logger
            .debug(format_args!("{}: data -> {:#04x}", self.id.name(), byte));
        Ok(byte)
    }

    /// Acknowledge status after a timed-out wait. The timeout stays the
    /// reported error; a failed acknowledge is only logged.
    fn ack_after_timeout(&mut self) {
        if let Err(err) = self.ack_status() {
            self.state
                .logger
                .error(format_args!("{}: status acknowledge: {err}", self.id.name()));
        }
    }

    /// Write back whatever status bits are set.
    fn ack_status(&mut self) -> Result<(), Error> {
        self.regs.or(Reg::Status, 0)?;
        if self.regs.map().has(Reg::Status2) {
            self.regs.or(Reg::Status2, 0)?;
        }
        Ok(())
    }
}
