// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated FPGA register file
//!
//! Implements [`RegisterBackend`] entirely in memory, following the same
//! register contract as the hardware bridge:
//!
//! - control registers and the shadow-memory windows live in one
//!   byte-addressed store, laid out exactly as in the resource window;
//! - writing a port group's command register with the action bit set runs
//!   the encoded I2C transaction against a simulated transceiver selected by
//!   (group, channel, slave address);
//! - reads copy `block_rw_len` bytes into the group's shadow window at the
//!   register address, writes take up to four bytes from the data registers;
//! - the group's interrupt-status register reports the outcome.
//!
//! Device 0x50 of CMIS and SFF-8636 modules is paged: byte 0x7F selects the
//! 128-byte bank visible at 0x80..0xFF.
//!
//! Fault injection (missing ACK, stuck bus, engine never idle, slow engine,
//! registers that need several pulses to latch) and an instrumented write
//! log make it the test double for everything above the backend seam. The
//! write log and transaction history keep only the most recent
//! [`DEFAULT_HISTORY_LIMIT`] entries unless told otherwise.
//!
//! The handle is cheap to clone; clones share one register file, so a test
//! can keep a handle for assertions while the bridge owns another.

#![allow(clippy::cast_possible_truncation)]

use crate::backend::{BackendType, RegisterBackend};
use crate::error::{BridgeError, Result};
use sfp_fpga_chip::bar::{ctrl_register_offset, shadow_offset};
use sfp_fpga_chip::ports::{self, PortGroup, PortKind, PORT_GROUPS};
use sfp_fpga_chip::regs::{
    self, BlockConfig, Command, DataHigh, DataLow, Direction, InterruptStatus,
};
use sfp_fpga_chip::sff::{self, cmis, PAGE_SELECT, UPPER_PAGE_START};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use tracing::debug;

const BANK: usize = sff::PAGE_SIZE;

/// Entries kept in the write log and in the transaction history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1 << 16;

/// One I2C device of a simulated module.
#[derive(Debug, Clone)]
pub struct SimDevice {
    lower: [u8; BANK],
    pages: BTreeMap<u8, [u8; BANK]>,
    paged: bool,
}

impl SimDevice {
    /// Flat 256-byte device; byte 0x7F is ordinary memory.
    pub fn flat() -> Self {
        Self {
            lower: [0; BANK],
            pages: BTreeMap::new(),
            paged: false,
        }
    }

    /// Paged device; byte 0x7F selects the upper bank.
    pub fn paged() -> Self {
        Self {
            paged: true,
            ..Self::flat()
        }
    }

    /// Currently selected upper page.
    pub fn selected_page(&self) -> u8 {
        if self.paged {
            self.lower[usize::from(PAGE_SELECT)]
        } else {
            0
        }
    }

    /// Byte at `offset` as the I2C master sees it now.
    pub fn read(&self, offset: u8) -> u8 {
        self.peek(self.selected_page(), offset)
    }

    /// I2C write at `offset` (writing 0x7F of a paged device switches page).
    pub fn write(&mut self, offset: u8, value: u8) {
        let page = self.selected_page();
        self.poke(page, offset, value);
    }

    /// Byte at `offset`, taking the upper half from `page` regardless of selection.
    pub fn peek(&self, page: u8, offset: u8) -> u8 {
        if offset < UPPER_PAGE_START {
            self.lower[usize::from(offset)]
        } else {
            self.pages
                .get(&page)
                .map_or(0, |bank| bank[usize::from(offset - UPPER_PAGE_START)])
        }
    }

    /// Store `value` at `offset`, the upper half going to `page`.
    pub fn poke(&mut self, page: u8, offset: u8, value: u8) {
        if offset < UPPER_PAGE_START {
            self.lower[usize::from(offset)] = value;
        } else {
            self.pages.entry(page).or_insert([0; BANK])[usize::from(offset - UPPER_PAGE_START)] =
                value;
        }
    }

    /// Fill from offset 0 through the current view (at most 256 bytes).
    pub fn load(&mut self, data: &[u8]) {
        let page = self.selected_page();
        for (offset, &byte) in (0..=u8::MAX).zip(data) {
            if self.paged && offset == PAGE_SELECT {
                continue;
            }
            self.poke(page, offset, byte);
        }
    }

    /// The 256 bytes currently visible to the I2C master.
    pub fn contents(&self) -> Vec<u8> {
        (0..=u8::MAX).map(|offset| self.read(offset)).collect()
    }
}

/// A simulated transceiver: a set of I2C devices behind one channel.
#[derive(Debug, Clone, Default)]
pub struct SimModule {
    devices: BTreeMap<u8, SimDevice>,
}

impl SimModule {
    /// Module with no devices (every transaction is not acknowledged).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device.
    #[must_use]
    pub fn with_device(mut self, addr: u8, device: SimDevice) -> Self {
        self.devices.insert(addr, device);
        self
    }

    /// CMIS module (QSFP-DD) with TX disable advertised on page 0x01.
    pub fn cmis() -> Self {
        let mut eeprom = SimDevice::paged();
        eeprom.poke(0, sff::IDENTIFIER, 0x18);
        eeprom.poke(0, cmis::REVISION, 0x50);
        eeprom.poke(0, cmis::MEMORY_MODEL, 0);
        eeprom.poke(
            cmis::ADVERTISING_PAGE,
            cmis::TX_DISABLE_ADV,
            cmis::TX_DISABLE_ADV_MASK,
        );
        eeprom.poke(cmis::LANE_CONTROL_PAGE, cmis::TX_DISABLE, cmis::TX_ENABLE_ALL);
        Self::new().with_device(sff::EEPROM_ADDR, eeprom)
    }

    /// SFF-8636 module (QSFP28).
    pub fn sff8636() -> Self {
        let mut eeprom = SimDevice::paged();
        eeprom.poke(0, sff::IDENTIFIER, 0x11);
        Self::new().with_device(sff::EEPROM_ADDR, eeprom)
    }

    /// SFP module with EEPROM at 0x50 and diagnostics at 0x51.
    pub fn sfp() -> Self {
        let mut eeprom = SimDevice::flat();
        eeprom.poke(0, sff::IDENTIFIER, 0x03);
        Self::new()
            .with_device(sff::EEPROM_ADDR, eeprom)
            .with_device(sff::DOM_ADDR, SimDevice::flat())
    }

    /// Device at `addr`.
    pub fn device(&self, addr: u8) -> Option<&SimDevice> {
        self.devices.get(&addr)
    }

    /// Mutable device at `addr`.
    pub fn device_mut(&mut self, addr: u8) -> Option<&mut SimDevice> {
        self.devices.get_mut(&addr)
    }
}

/// Fault injected on a whole port group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Every transaction completes without ACK.
    NoAck,
    /// Bus stuck until the group's reset register is pulsed.
    BusStuck,
    /// Engine never reports idle.
    NeverIdle,
}

/// One register write as seen by the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Writing thread.
    pub thread: ThreadId,
    /// Byte offset.
    pub offset: u64,
    /// Value written.
    pub value: u32,
}

/// One executed I2C transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTransaction {
    /// Control page of the group.
    pub ctrl_addr: u32,
    /// Command that started it.
    pub command: Command,
    /// Block length from the config register.
    pub len: u32,
    /// Resulting status.
    pub status: InterruptStatus,
}

#[derive(Debug)]
struct SimState {
    memory: HashMap<u64, u8>,
    modules: HashMap<(u32, u8), SimModule>,
    faults: HashMap<u32, SimFault>,
    busy_polls: u32,
    busy_remaining: HashMap<u32, u32>,
    latch_pulses: u32,
    pending_pulses: HashMap<u64, u32>,
    history_limit: usize,
    write_log: VecDeque<WriteRecord>,
    transactions: VecDeque<SimTransaction>,
}

fn record<T>(history: &mut VecDeque<T>, limit: usize, entry: T) {
    if limit == 0 {
        return;
    }
    while history.len() >= limit {
        history.pop_front();
    }
    history.push_back(entry);
}

fn group_at(offset: u64, reg: u32) -> Option<&'static PortGroup> {
    PORT_GROUPS
        .iter()
        .find(|g| ctrl_register_offset(g.ctrl_addr, reg) == offset)
}

impl SimState {
    fn new() -> Self {
        let mut state = Self {
            memory: HashMap::new(),
            modules: HashMap::new(),
            faults: HashMap::new(),
            busy_polls: 0,
            busy_remaining: HashMap::new(),
            latch_pulses: 1,
            pending_pulses: HashMap::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            write_log: VecDeque::new(),
            transactions: VecDeque::new(),
        };
        for group in &PORT_GROUPS {
            state.store_status(group.ctrl_addr, InterruptStatus::CLEAN);
        }
        state
    }

    fn load(&self, offset: u64) -> u32 {
        (0..4u64).fold(0, |word, i| {
            word | (u32::from(self.memory.get(&(offset + i)).copied().unwrap_or(0)) << (8 * i))
        })
    }

    fn store(&mut self, offset: u64, value: u32) {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.memory.insert(offset + i as u64, byte);
        }
    }

    fn store_status(&mut self, ctrl_addr: u32, status: InterruptStatus) {
        self.store(
            ctrl_register_offset(ctrl_addr, regs::INTERRUPT_STATUS),
            status.0,
        );
    }

    fn read(&mut self, offset: u64) -> u32 {
        let value = self.load(offset);
        if let Some(group) = group_at(offset, regs::INTERRUPT_STATUS) {
            if let Some(remaining) = self.busy_remaining.get_mut(&group.ctrl_addr) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return value & !1;
                }
            }
        }
        value
    }

    fn write(&mut self, offset: u64, value: u32) {
        let entry = WriteRecord {
            thread: std::thread::current().id(),
            offset,
            value,
        };
        record(&mut self.write_log, self.history_limit, entry);

        if self.latch_pulses > 1 {
            let pulses = self.pending_pulses.entry(offset).or_insert(0);
            *pulses += 1;
            if *pulses < self.latch_pulses {
                return;
            }
            self.pending_pulses.remove(&offset);
        }

        self.store(offset, value);

        if let Some(group) = group_at(offset, regs::COMMAND) {
            let command = Command::from_word(value);
            if command.activate {
                self.execute(group, command);
            }
        } else if let Some(group) = group_at(offset, regs::RESET_CONTROL) {
            if value & 1 == 1 && self.faults.get(&group.ctrl_addr) == Some(&SimFault::BusStuck) {
                debug!("sim: reset clears stuck bus on ctrl {:#06x}", group.ctrl_addr);
                self.faults.remove(&group.ctrl_addr);
                self.store_status(group.ctrl_addr, InterruptStatus::CLEAN);
            }
        }
    }

    fn execute(&mut self, group: &PortGroup, command: Command) {
        let ctrl = group.ctrl_addr;
        let len = BlockConfig::from_word(self.load(ctrl_register_offset(ctrl, regs::BLOCK_CONFIG)))
            .block_rw_len;

        let status = match self.faults.get(&ctrl) {
            Some(SimFault::NeverIdle) => InterruptStatus::from_conditions(false, false, false),
            Some(SimFault::BusStuck) => InterruptStatus::from_conditions(true, true, false),
            Some(SimFault::NoAck) => InterruptStatus::from_conditions(true, false, true),
            None => self.transfer(group, command, len),
        };

        self.store_status(ctrl, status);
        self.busy_remaining.insert(ctrl, self.busy_polls);
        let entry = SimTransaction {
            ctrl_addr: ctrl,
            command,
            len,
            status,
        };
        record(&mut self.transactions, self.history_limit, entry);
    }

    fn transfer(&mut self, group: &PortGroup, command: Command, len: u32) -> InterruptStatus {
        let no_ack = InterruptStatus::from_conditions(true, false, true);
        let data = {
            let lo = DataLow::from_word(self.load(ctrl_register_offset(group.ctrl_addr, regs::DATA_LOW)));
            let hi = DataHigh::from_word(self.load(ctrl_register_offset(group.ctrl_addr, regs::DATA_HIGH)));
            [lo.byte_0, lo.byte_1, hi.byte_2, hi.byte_3]
        };

        let Some(device) = self
            .modules
            .get_mut(&(group.ctrl_addr, command.channel))
            .and_then(|m| m.device_mut(command.slave_addr))
        else {
            return no_ack;
        };

        match command.direction {
            Direction::Read => {
                let bytes: Vec<u8> = (0..len)
                    .map(|k| device.read((command.reg_addr + k) as u8))
                    .collect();
                for (k, byte) in (0..len).zip(bytes) {
                    self.memory
                        .insert(shadow_offset(group.mem_addr, command.reg_addr + k), byte);
                }
            }
            Direction::Write => {
                for (k, &byte) in (0..len.min(4)).zip(data.iter()) {
                    device.write((command.reg_addr + k) as u8, byte);
                }
            }
        }
        InterruptStatus::CLEAN
    }
}

/// In-memory FPGA implementing the bridge register contract.
#[derive(Debug, Clone)]
pub struct SimulatedFpga {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedFpga {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFpga {
    /// Empty FPGA: every group idle, no modules plugged.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// FPGA with a CMIS module in every QSFP-DD cage and an SFP in both
    /// management ports, each carrying a recognisable vendor string.
    pub fn populated() -> Self {
        let fpga = Self::new();
        for desc in &ports::PORT_TABLE {
            let mut module = match desc.kind {
                PortKind::QsfpDd => SimModule::cmis(),
                PortKind::Sfp => SimModule::sfp(),
            };
            if let Some(eeprom) = module.device_mut(sff::EEPROM_ADDR) {
                // vendor name: upper page 0 for CMIS, lower half for SFF-8472
                let start = match desc.kind {
                    PortKind::QsfpDd => 129,
                    PortKind::Sfp => 20,
                };
                let vendor = format!("SIM-FPGA P{:<6}", desc.port);
                for (offset, byte) in (start..).zip(vendor.bytes()) {
                    eeprom.poke(0, offset, byte);
                }
            }
            fpga.lock().modules.insert((desc.ctrl_addr, desc.channel), module);
        }
        fpga
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Plug `module` into `port`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownPort`] for ports outside the table.
    pub fn insert_module(&self, port: usize, module: SimModule) -> Result<()> {
        let desc = ports::port(port).ok_or(BridgeError::UnknownPort { port })?;
        self.lock()
            .modules
            .insert((desc.ctrl_addr, desc.channel), module);
        Ok(())
    }

    /// Unplug the module in `port`.
    pub fn remove_module(&self, port: usize) -> Option<SimModule> {
        let desc = ports::port(port)?;
        self.lock().modules.remove(&(desc.ctrl_addr, desc.channel))
    }

    /// Run `f` on the module in `port`.
    pub fn with_module<T>(&self, port: usize, f: impl FnOnce(&mut SimModule) -> T) -> Option<T> {
        let desc = ports::port(port)?;
        self.lock()
            .modules
            .get_mut(&(desc.ctrl_addr, desc.channel))
            .map(f)
    }

    /// Inject (or clear) a fault on the group that owns `port`.
    pub fn set_fault(&self, port: usize, fault: Option<SimFault>) {
        let Some(desc) = ports::port(port) else {
            return;
        };
        let mut state = self.lock();
        match fault {
            Some(fault) => {
                state.faults.insert(desc.ctrl_addr, fault);
            }
            None => {
                state.faults.remove(&desc.ctrl_addr);
            }
        }
    }

    /// Status reads that report busy after each transaction.
    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls = polls;
    }

    /// Write pulses needed before a register latches (`u32::MAX`: never).
    pub fn set_latch_pulses(&self, pulses: u32) {
        self.lock().latch_pulses = pulses.max(1);
    }

    /// Entries kept per history; `0` turns recording off.
    ///
    /// Older entries are dropped first.
    pub fn set_history_limit(&self, limit: usize) {
        let mut state = self.lock();
        state.history_limit = limit;
        let excess = state.write_log.len().saturating_sub(limit);
        state.write_log.drain(..excess);
        let excess = state.transactions.len().saturating_sub(limit);
        state.transactions.drain(..excess);
    }

    /// Recent register writes, oldest first.
    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.lock().write_log.iter().copied().collect()
    }

    /// Recent executed transactions, oldest first.
    pub fn transactions(&self) -> Vec<SimTransaction> {
        self.lock().transactions.iter().copied().collect()
    }

    /// Forget the write log and transaction history.
    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.write_log.clear();
        state.transactions.clear();
    }
}

impl RegisterBackend for SimulatedFpga {
    fn read_dword(&mut self, offset: u64) -> Result<u32> {
        Ok(self.lock().read(offset))
    }

    fn write_dword(&mut self, offset: u64, value: u32) -> Result<()> {
        self.lock().write(offset, value);
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfp_fpga_chip::regs::ControlRegister;

    fn command(reg_addr: u32, slave_addr: u8, channel: u8, direction: Direction) -> Command {
        Command {
            reg_addr,
            slave_addr,
            page_set_enable: false,
            channel,
            direction,
            activate: true,
        }
    }

    #[test]
    fn groups_start_idle() {
        let mut fpga = SimulatedFpga::new();
        for g in &PORT_GROUPS {
            let status = fpga
                .read_dword(ctrl_register_offset(g.ctrl_addr, regs::INTERRUPT_STATUS))
                .unwrap();
            assert_eq!(InterruptStatus(status), InterruptStatus::CLEAN);
        }
    }

    #[test]
    fn read_command_fills_shadow_window() {
        let mut fpga = SimulatedFpga::new();
        let mut module = SimModule::sfp();
        module
            .device_mut(sff::EEPROM_ADDR)
            .unwrap()
            .load(&(0..=255).collect::<Vec<u8>>());
        fpga.insert_module(64, module).unwrap();

        fpga.write_dword(ctrl_register_offset(0x5000, regs::BLOCK_CONFIG), BlockConfig::transfer(4).word())
            .unwrap();
        fpga.write_dword(
            ctrl_register_offset(0x5000, regs::COMMAND),
            command(0x10, 0x50, 0, Direction::Read).word(),
        )
        .unwrap();

        for k in 0..4u32 {
            let off = shadow_offset(0x400, 0x10 + k);
            assert_eq!(crate::mmio::read_u8(&mut fpga, off).unwrap(), 0x10 + k as u8);
        }
        assert_eq!(fpga.transactions().len(), 1);
    }

    #[test]
    fn missing_module_is_not_acknowledged() {
        let mut fpga = SimulatedFpga::new();
        fpga.write_dword(
            ctrl_register_offset(0x1000, regs::COMMAND),
            command(0, 0x50, 1, Direction::Read).word(),
        )
        .unwrap();
        let status = InterruptStatus(
            fpga.read_dword(ctrl_register_offset(0x1000, regs::INTERRUPT_STATUS))
                .unwrap(),
        );
        assert!(status.idle() && status.no_ack() && !status.stuck());
    }

    #[test]
    fn paged_device_switches_bank() {
        let mut dev = SimDevice::paged();
        dev.poke(1, 155, 0xAA);
        dev.poke(16, 155, 0xBB);
        assert_eq!(dev.read(155), 0);
        dev.write(PAGE_SELECT, 1);
        assert_eq!(dev.read(155), 0xAA);
        dev.write(PAGE_SELECT, 16);
        assert_eq!(dev.read(155), 0xBB);
        assert_eq!(dev.read(PAGE_SELECT), 16);
        assert_eq!(dev.contents().len(), 256);
    }

    #[test]
    fn reset_clears_stuck_bus() {
        let mut fpga = SimulatedFpga::new();
        fpga.set_fault(0, Some(SimFault::BusStuck));
        fpga.write_dword(ctrl_register_offset(0x1000, regs::COMMAND), command(0, 0x50, 1, Direction::Read).word())
            .unwrap();
        let st = fpga.read_dword(ctrl_register_offset(0x1000, regs::INTERRUPT_STATUS)).unwrap();
        assert!(InterruptStatus(st).stuck());

        fpga.write_dword(ctrl_register_offset(0x1000, regs::RESET_CONTROL), 1).unwrap();
        let st = fpga.read_dword(ctrl_register_offset(0x1000, regs::INTERRUPT_STATUS)).unwrap();
        assert!(!InterruptStatus(st).stuck());
    }

    #[test]
    fn busy_polls_delay_idle() {
        let mut fpga = SimulatedFpga::populated();
        fpga.set_busy_polls(2);
        fpga.write_dword(ctrl_register_offset(0x1000, regs::COMMAND), command(0, 0x50, 1, Direction::Read).word())
            .unwrap();
        let status = ctrl_register_offset(0x1000, regs::INTERRUPT_STATUS);
        assert!(!InterruptStatus(fpga.read_dword(status).unwrap()).idle());
        assert!(!InterruptStatus(fpga.read_dword(status).unwrap()).idle());
        assert!(InterruptStatus(fpga.read_dword(status).unwrap()).idle());
    }

    #[test]
    fn history_keeps_most_recent_entries() {
        let mut fpga = SimulatedFpga::populated();
        fpga.set_history_limit(4);
        let cmd = ctrl_register_offset(0x1000, regs::COMMAND);
        for reg in 0..10u32 {
            fpga.write_dword(cmd, command(reg, 0x50, 1, Direction::Read).word())
                .unwrap();
        }

        let log = fpga.write_log();
        assert_eq!(log.len(), 4);
        assert_eq!(Command::from_word(log[0].value).reg_addr, 6);
        let tx = fpga.transactions();
        assert_eq!(tx.iter().map(|t| t.command.reg_addr).collect::<Vec<_>>(), vec![6, 7, 8, 9]);

        fpga.set_history_limit(0);
        fpga.write_dword(cmd, command(0, 0x50, 1, Direction::Read).word())
            .unwrap();
        assert!(fpga.write_log().is_empty());
        assert!(fpga.transactions().is_empty());
    }
}
