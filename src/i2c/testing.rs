// Licensed under the Apache-2.0 license

//! Register-level model of the EIO-IS200 bus channels for unit tests.
//!
//! [`SimController`] answers port accesses for all four channel windows and
//! records every access. Targets are modelled as 256-byte register files
//! with an auto-incrementing pointer set by the first written byte.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use embedded_hal::delay::DelayNs;

use crate::common::{Clock, Instant, Logger};
use crate::i2c::common::{ChannelId, I2cConfig, Persona, CHANNEL_COUNT};
use crate::i2c::i2c_controller::Channel;
use crate::i2c::registers::*;
use crate::i2c::traits::RegisterIo;

pub(crate) const WINDOW: u16 = 0x20;
pub(crate) const BASES: [u16; CHANNEL_COUNT] = [0x0A00, 0x0A20, 0x0A40, 0x0A60];

/// Status reads that report BUSY after a host class is started.
const HOST_LATENCY: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Access {
    Read(u16, u8),
    Write(u16, u8),
}

impl Access {
    pub(crate) fn port(&self) -> u16 {
        match *self {
            Access::Read(port, _) | Access::Write(port, _) => port,
        }
    }
}

/// Port outside every channel window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Unmapped(pub(crate) u16);

#[derive(Clone, Debug)]
struct SimDevice {
    mem: [u8; 256],
    ptr: u8,
    pointer_set: bool,
    sent: Vec<u8>,
    block_reply: Vec<u8>,
    received_block: Vec<u8>,
    proc_reply: u16,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            mem: [0; 256],
            ptr: 0,
            pointer_set: false,
            sent: Vec::new(),
            block_reply: Vec::new(),
            received_block: Vec::new(),
            proc_reply: 0,
        }
    }

    fn write(&mut self, value: u8) {
        self.sent.push(value);
        if self.pointer_set {
            self.mem[usize::from(self.ptr)] = value;
            self.ptr = self.ptr.wrapping_add(1);
        } else {
            self.ptr = value;
            self.pointer_set = true;
        }
    }

    fn read(&mut self) -> u8 {
        let value = self.mem[usize::from(self.ptr)];
        self.ptr = self.ptr.wrapping_add(1);
        value
    }
}

struct RawBits {
    status: usize,
    tx_done: u8,
    rx_ready: u8,
    nack_reg: usize,
    nack: u8,
}

struct SimChannel {
    persona: Persona,
    regs: [u8; WINDOW as usize],
    busy_reads: u32,
    busy_stuck: bool,
    tx_stalled: bool,
    reset_fixes_busy: bool,
    reset_stuck: bool,
    resets: u32,
    in_use: bool,
    foreign_owner_reads: u32,
    releases: u32,
    target: Option<(u16, bool)>,
    reading: bool,
    ten_bit_high: Option<u8>,
    rx_latch: u8,
    stop_armed: bool,
    stops: u32,
    devices: BTreeMap<(u16, bool), SimDevice>,
    block_out: Vec<u8>,
    block_in: VecDeque<u8>,
    host_busy_reads: u32,
    injected: Option<(u8, u8)>,
}

impl SimChannel {
    fn new(persona: Persona) -> Self {
        Self {
            persona,
            regs: [0; WINDOW as usize],
            busy_reads: 0,
            busy_stuck: false,
            tx_stalled: false,
            reset_fixes_busy: true,
            reset_stuck: false,
            resets: 0,
            in_use: false,
            foreign_owner_reads: 0,
            releases: 0,
            target: None,
            reading: false,
            ten_bit_high: None,
            rx_latch: 0,
            stop_armed: false,
            stops: 0,
            devices: BTreeMap::new(),
            block_out: Vec::new(),
            block_in: VecDeque::new(),
            host_busy_reads: 0,
            injected: None,
        }
    }

    fn raw_bits(&self) -> RawBits {
        match self.persona {
            Persona::I2c => RawBits {
                status: usize::from(I2C_REG_STAT),
                tx_done: I2C_STAT_TX_DONE,
                rx_ready: I2C_STAT_RX_READY,
                nack_reg: usize::from(I2C_REG_STAT),
                nack: I2C_STAT_NACK,
            },
            Persona::Smbus => RawBits {
                status: usize::from(SMB_REG_HS),
                tx_done: SMB_HS_TX_DONE,
                rx_ready: SMB_HS_RX_READY,
                nack_reg: usize::from(SMB_REG_HS2),
                nack: SMB_HS2_NACK,
            },
        }
    }

    fn reg(&self, offset: u8) -> u8 {
        self.regs[usize::from(offset)]
    }

    fn set_reg(&mut self, offset: u8, value: u8) {
        self.regs[usize::from(offset)] = value;
    }

    fn raw_mode(&self) -> bool {
        self.reg(SMB_REG_HC2) & SMB_HC2_I2C_ENABLE != 0
    }

    fn bus_busy(&mut self) -> bool {
        if self.busy_stuck {
            return true;
        }
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
            return true;
        }
        false
    }

    fn host_busy(&mut self) -> bool {
        if self.host_busy_reads > 0 {
            self.host_busy_reads -= 1;
            return true;
        }
        false
    }

    /// Reading the semaphore clear claims it.
    fn claim(&mut self, bit: u8) -> u8 {
        if self.foreign_owner_reads > 0 {
            self.foreign_owner_reads -= 1;
            return bit;
        }
        let held = self.in_use;
        self.in_use = true;
        if held {
            bit
        } else {
            0
        }
    }

    fn release(&mut self) {
        self.in_use = false;
        self.releases += 1;
    }

    /// The reset bit clears on the first read after it was set.
    fn read_reset(&mut self, offset: u8, bit: u8) -> u8 {
        if !self.reset_stuck {
            self.regs[usize::from(offset)] &= !bit;
        }
        self.reg(offset)
    }

    fn reset(&mut self) {
        self.resets += 1;
        if self.reset_fixes_busy {
            self.busy_stuck = false;
        }
        self.busy_reads = 0;
        self.target = None;
        self.ten_bit_high = None;
        self.stop_armed = false;
    }

    fn arm_stop(&mut self) {
        self.stops += 1;
        self.stop_armed = true;
    }

    fn flag_tx(&mut self, nack: bool) {
        if self.tx_stalled {
            return;
        }
        let bits = self.raw_bits();
        self.regs[bits.status] |= bits.tx_done;
        if nack {
            self.regs[bits.nack_reg] |= bits.nack;
        }
    }

    fn select(&mut self, key: (u16, bool)) {
        let acked = match self.devices.get_mut(&key) {
            Some(dev) => {
                dev.pointer_set = false;
                true
            }
            None => false,
        };
        self.target = acked.then_some(key);
        self.flag_tx(!acked);
    }

    fn raw_address(&mut self, value: u8) {
        self.stop_armed = false;
        self.reading = value & 1 != 0;
        if value & 0xF8 == 0xF0 {
            self.ten_bit_high = Some(value);
            self.target = None;
            self.flag_tx(false);
            return;
        }
        self.ten_bit_high = None;
        self.select((u16::from(value >> 1), false));
    }

    fn raw_write(&mut self, value: u8) {
        if let Some(high) = self.ten_bit_high.take() {
            let address = (u16::from(high >> 1) & 0x3) << 8 | u16::from(value);
            self.select((address, true));
            return;
        }
        let acked = match self.target.and_then(|key| self.devices.get_mut(&key)) {
            Some(dev) => {
                dev.write(value);
                true
            }
            None => false,
        };
        self.flag_tx(!acked);
    }

    fn raw_read(&mut self) -> u8 {
        let out = self.rx_latch;
        if self.reading && !self.stop_armed {
            if let Some(dev) = self.target.and_then(|key| self.devices.get_mut(&key)) {
                self.rx_latch = dev.read();
                let bits = self.raw_bits();
                self.regs[bits.status] |= bits.rx_ready;
            }
        }
        out
    }

    fn host_execute(&mut self) {
        const HS: usize = SMB_REG_HS as usize;
        const HS2: usize = SMB_REG_HS2 as usize;
        const HD0: usize = SMB_REG_HD0 as usize;
        const HD1: usize = SMB_REG_HD1 as usize;

        self.host_busy_reads = HOST_LATENCY;
        if let Some((hs, hs2)) = self.injected.take() {
            self.regs[HS] |= hs;
            self.regs[HS2] |= hs2;
            return;
        }

        let address = self.reg(SMB_REG_HADDR);
        let read = address & 1 != 0;
        let command = self.reg(SMB_REG_HCMD);
        let class = (self.reg(SMB_REG_HC) & SMB_HC_CLASS_MASK) >> SMB_HC_CLASS_SHIFT;
        let (d0, d1) = (self.regs[HD0], self.regs[HD1]);
        let cmd = usize::from(command);
        let next = usize::from(command.wrapping_add(1));

        let Some(dev) = self.devices.get_mut(&(u16::from(address >> 1), false)) else {
            self.regs[HS2] |= SMB_HS2_NACK;
            return;
        };

        let mut reply = None;
        match class {
            0 => {}
            1 if read => self.regs[HD0] = dev.read(),
            1 => {
                dev.sent.push(command);
                dev.ptr = command;
            }
            2 if read => self.regs[HD0] = dev.mem[cmd],
            2 => dev.mem[cmd] = d0,
            3 if read => {
                self.regs[HD0] = dev.mem[cmd];
                self.regs[HD1] = dev.mem[next];
            }
            3 => {
                dev.mem[cmd] = d0;
                dev.mem[next] = d1;
            }
            4 => {
                dev.sent.extend([d0, d1]);
                [self.regs[HD0], self.regs[HD1]] = dev.proc_reply.to_le_bytes();
            }
            5 if read => reply = Some(dev.block_reply.clone()),
            5 => dev.received_block = self.block_out.iter().copied().take(usize::from(d0)).collect(),
            7 => {
                dev.received_block = self.block_out.iter().copied().take(usize::from(d0)).collect();
                reply = Some(dev.block_reply.clone());
            }
            _ => self.regs[HS] |= SMB_HS_FAILED,
        }

        if let Some(reply) = reply {
            self.regs[HD0] = u8::try_from(reply.len()).unwrap();
            self.block_in = reply.into();
        }
        self.regs[HS] |= SMB_HS_FINISH;
    }

    fn read(&mut self, offset: u8) -> u8 {
        match (self.persona, offset) {
            (Persona::I2c, I2C_REG_CTRL) => self.reg(offset) & !I2C_CTRL_STOP,
            (Persona::I2c, I2C_REG_STAT) => {
                let busy = if self.bus_busy() { I2C_STAT_BUSY } else { 0 };
                self.reg(offset) | busy
            }
            (Persona::I2c, I2C_REG_DATA) => self.raw_read(),
            (Persona::I2c, I2C_REG_ECTRL) => self.read_reset(offset, I2C_ECTRL_RESET),
            (Persona::I2c, I2C_REG_SEM) => self.claim(I2C_SEM_IN_USE),
            (Persona::Smbus, SMB_REG_HS) => {
                let bus = self.bus_busy();
                let host = self.host_busy();
                let busy = if bus || host { SMB_HS_BUSY } else { 0 };
                let in_use = self.claim(SMB_HS_IN_USE);
                (self.reg(offset) & !(SMB_HS_BUSY | SMB_HS_IN_USE)) | busy | in_use
            }
            (Persona::Smbus, SMB_REG_HC) => {
                self.reg(offset) & !(SMB_HC_START | SMB_HC_LAST_BYTE | SMB_HC_KILL)
            }
            (Persona::Smbus, SMB_REG_HD0) if self.raw_mode() => self.raw_read(),
            (Persona::Smbus, SMB_REG_HBLOCK) => self.block_in.pop_front().unwrap_or(0),
            (Persona::Smbus, SMB_REG_HC2) => self.read_reset(offset, SMB_HC2_RESET),
            _ => self.reg(offset),
        }
    }

    fn write(&mut self, offset: u8, value: u8) {
        let index = usize::from(offset);
        match (self.persona, offset) {
            (Persona::I2c, I2C_REG_CTRL) => {
                self.set_reg(offset, value & !I2C_CTRL_STOP);
                if value & I2C_CTRL_STOP != 0 {
                    self.arm_stop();
                }
            }
            (Persona::I2c, I2C_REG_STAT) => self.regs[index] &= !value,
            (Persona::I2c, I2C_REG_ADDR) => {
                self.set_reg(offset, value);
                self.raw_address(value);
            }
            (Persona::I2c, I2C_REG_DATA) => {
                self.set_reg(offset, value);
                self.raw_write(value);
            }
            (Persona::I2c, I2C_REG_ECTRL) => {
                self.set_reg(offset, value);
                if value & I2C_ECTRL_RESET != 0 {
                    self.reset();
                }
            }
            (Persona::I2c, I2C_REG_SEM) => {
                if value & I2C_SEM_IN_USE != 0 {
                    self.release();
                }
            }
            (Persona::Smbus, SMB_REG_HS) => {
                self.regs[index] &= !value;
                if value & SMB_HS_IN_USE != 0 {
                    self.release();
                }
            }
            (Persona::Smbus, SMB_REG_HS2) => self.regs[index] &= !value,
            (Persona::Smbus, SMB_REG_HC) => {
                self.set_reg(offset, value & !(SMB_HC_START | SMB_HC_LAST_BYTE));
                if value & SMB_HC_LAST_BYTE != 0 {
                    self.arm_stop();
                }
                if value & SMB_HC_START != 0 {
                    self.host_execute();
                }
            }
            (Persona::Smbus, SMB_REG_HADDR) => {
                self.set_reg(offset, value);
                if self.raw_mode() {
                    self.raw_address(value);
                }
            }
            (Persona::Smbus, SMB_REG_HD0) => {
                self.set_reg(offset, value);
                if self.raw_mode() {
                    self.raw_write(value);
                }
            }
            (Persona::Smbus, SMB_REG_HBLOCK) => self.block_out.push(value),
            (Persona::Smbus, SMB_REG_HC2) => {
                let old = self.reg(offset);
                self.set_reg(offset, value);
                if (old ^ value) & SMB_HC2_BLOCK_INDEX != 0 {
                    self.block_out.clear();
                }
                if value & SMB_HC2_RESET != 0 {
                    self.reset();
                }
            }
            _ => self.set_reg(offset, value),
        }
    }
}

struct SimState {
    channels: Vec<SimChannel>,
    log: Vec<Access>,
}

/// All four channel windows behind one port space.
pub(crate) struct SimController {
    state: Mutex<SimState>,
}

impl SimController {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                channels: ChannelId::ALL
                    .iter()
                    .map(|id| SimChannel::new(id.persona()))
                    .collect(),
                log: Vec::new(),
            }),
        }
    }

    pub(crate) fn base(&self, id: ChannelId) -> u16 {
        BASES[id.index()]
    }

    fn locate(port: u16) -> Option<(usize, u8)> {
        BASES
            .iter()
            .position(|&base| (base..base + WINDOW).contains(&port))
            .map(|index| (index, u8::try_from(port - BASES[index]).unwrap()))
    }

    fn with<T>(&self, id: ChannelId, f: impl FnOnce(&mut SimChannel) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state.channels[id.index()])
    }

    fn with_device<T>(
        &self,
        id: ChannelId,
        address: u16,
        ten_bit: bool,
        f: impl FnOnce(&mut SimDevice) -> T,
    ) -> T {
        self.with(id, |ch| f(ch.devices.get_mut(&(address, ten_bit)).unwrap()))
    }

    pub(crate) fn add_device(&self, id: ChannelId, address: u16, ten_bit: bool) {
        self.with(id, |ch| {
            ch.devices.insert((address, ten_bit), SimDevice::new());
        });
    }

    pub(crate) fn load_device(&self, id: ChannelId, address: u16, ten_bit: bool, offset: u8, bytes: &[u8]) {
        self.with_device(id, address, ten_bit, |dev| {
            let start = usize::from(offset);
            dev.mem[start..start + bytes.len()].copy_from_slice(bytes);
            dev.ptr = offset;
        });
    }

    pub(crate) fn device_mem(&self, id: ChannelId, address: u16, ten_bit: bool, offset: u8, len: usize) -> Vec<u8> {
        self.with_device(id, address, ten_bit, |dev| {
            let start = usize::from(offset);
            dev.mem[start..start + len].to_vec()
        })
    }

    pub(crate) fn device_sent(&self, id: ChannelId, address: u16, ten_bit: bool) -> Vec<u8> {
        self.with_device(id, address, ten_bit, |dev| dev.sent.clone())
    }

    pub(crate) fn device_block(&self, id: ChannelId, address: u16) -> Vec<u8> {
        self.with_device(id, address, false, |dev| dev.received_block.clone())
    }

    pub(crate) fn set_block_reply(&self, id: ChannelId, address: u16, bytes: &[u8]) {
        self.with_device(id, address, false, |dev| dev.block_reply = bytes.to_vec());
    }

    pub(crate) fn set_proc_reply(&self, id: ChannelId, address: u16, reply: u16) {
        self.with_device(id, address, false, |dev| dev.proc_reply = reply);
    }

    /// Status bits the next started host class ends with.
    pub(crate) fn inject_host_status(&self, id: ChannelId, hs: u8, hs2: u8) {
        self.with(id, |ch| ch.injected = Some((hs, hs2)));
    }

    pub(crate) fn set_busy_reads(&self, id: ChannelId, reads: u32) {
        self.with(id, |ch| ch.busy_reads = reads);
    }

    pub(crate) fn set_busy_stuck(&self, id: ChannelId, stuck: bool, reset_fixes: bool) {
        self.with(id, |ch| {
            ch.busy_stuck = stuck;
            ch.reset_fixes_busy = reset_fixes;
        });
    }

    /// Never report transmit completion on `id`.
    pub(crate) fn set_tx_stalled(&self, id: ChannelId, stalled: bool) {
        self.with(id, |ch| ch.tx_stalled = stalled);
    }

    pub(crate) fn set_reset_stuck(&self, id: ChannelId, stuck: bool) {
        self.with(id, |ch| ch.reset_stuck = stuck);
    }

    pub(crate) fn set_foreign_owner(&self, id: ChannelId, reads: u32) {
        self.with(id, |ch| ch.foreign_owner_reads = reads);
    }

    pub(crate) fn in_use(&self, id: ChannelId) -> bool {
        self.with(id, |ch| ch.in_use)
    }

    pub(crate) fn releases(&self, id: ChannelId) -> u32 {
        self.with(id, |ch| ch.releases)
    }

    pub(crate) fn resets(&self, id: ChannelId) -> u32 {
        self.with(id, |ch| ch.resets)
    }

    pub(crate) fn stops(&self, id: ChannelId) -> u32 {
        self.with(id, |ch| ch.stops)
    }

    /// Register value without side effects.
    pub(crate) fn peek(&self, port: u16) -> u8 {
        let (index, offset) = Self::locate(port).unwrap();
        self.state.lock().unwrap().channels[index].reg(offset)
    }

    pub(crate) fn log(&self) -> Vec<Access> {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn writes(&self) -> Vec<(u16, u8)> {
        self.log()
            .into_iter()
            .filter_map(|access| match access {
                Access::Write(port, value) => Some((port, value)),
                Access::Read(..) => None,
            })
            .collect()
    }

    pub(crate) fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }
}

impl RegisterIo for SimController {
    type Error = Unmapped;

    fn read(&self, port: u16) -> Result<u8, Unmapped> {
        let (index, offset) = Self::locate(port).ok_or(Unmapped(port))?;
        let mut state = self.state.lock().unwrap();
        let value = state.channels[index].read(offset);
        state.log.push(Access::Read(port, value));
        Ok(value)
    }

    fn write(&self, port: u16, value: u8) -> Result<(), Unmapped> {
        let (index, offset) = Self::locate(port).ok_or(Unmapped(port))?;
        let mut state = self.state.lock().unwrap();
        state.channels[index].write(offset, value);
        state.log.push(Access::Write(port, value));
        Ok(())
    }
}

/// Simulator access that rejects the first `count` writes to one port,
/// optionally only those carrying `value`. Rejected writes never reach the
/// simulator and are not logged.
pub(crate) struct FailingWrite<'a> {
    sim: &'a SimController,
    port: u16,
    value: Option<u8>,
    remaining: AtomicU32,
}

impl<'a> FailingWrite<'a> {
    pub(crate) fn new(sim: &'a SimController, port: u16, value: Option<u8>, count: u32) -> Self {
        Self {
            sim,
            port,
            value,
            remaining: AtomicU32::new(count),
        }
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

impl RegisterIo for FailingWrite<'_> {
    type Error = Unmapped;

    fn read(&self, port: u16) -> Result<u8, Unmapped> {
        self.sim.read(port)
    }

    fn write(&self, port: u16, value: u8) -> Result<(), Unmapped> {
        let selected = port == self.port && self.value.map_or(true, |v| v == value);
        if selected
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Unmapped(port));
        }
        self.sim.write(port, value)
    }
}

/// Clock advanced only by [`SimDelay`].
#[derive(Default)]
pub(crate) struct SimClock {
    micros: AtomicU64,
}

impl SimClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.micros())
    }
}

pub(crate) struct SimDelay<'a> {
    clock: &'a SimClock,
}

impl<'a> SimDelay<'a> {
    pub(crate) fn new(clock: &'a SimClock) -> Self {
        Self { clock }
    }
}

impl DelayNs for SimDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.clock
            .micros
            .fetch_add(u64::from(ns.div_ceil(1_000)), Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingLogger {
    pub(crate) lines: Vec<String>,
}

impl RecordingLogger {
    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl Logger for RecordingLogger {
    fn debug(&mut self, args: core::fmt::Arguments<'_>) {
        self.lines.push(format!("debug: {args}"));
    }

    fn error(&mut self, args: core::fmt::Arguments<'_>) {
        self.lines.push(format!("error: {args}"));
    }
}

pub(crate) type SimChannelHandle<'a> = Channel<'a, SimController, SimClock, SimDelay<'a>, RecordingLogger>;

/// Channel on the simulator with default configuration.
pub(crate) fn channel<'a>(sim: &'a SimController, clock: &'a SimClock, id: ChannelId) -> SimChannelHandle<'a> {
    Channel::new(
        sim,
        clock,
        SimDelay::new(clock),
        RecordingLogger::default(),
        id,
        sim.base(id),
        &I2cConfig::default(),
    )
    .unwrap()
}
