// SPDX-License-Identifier: AGPL-3.0-only

//! FPGA I2C bridge handle
//!
//! [`FpgaBridge`] owns a register backend behind the [`FpgaLock`] and exposes
//! byte-stream access to the transceiver EEPROMs. Every public operation
//! takes the lock exactly once, validates its arguments before touching a
//! register, and runs its whole register sequence under that one guard:
//!
//! ```text
//! read_eeprom   lock -> [config, command, wait] x ceil(len/16) -> shadow -> unlock
//! write_eeprom  lock -> [config, data.., command, wait] x chunks        -> unlock
//! read_page     lock -> write 0x7F <- page -> read offset               -> unlock
//! ```
//!
//! The page select and the data transaction of the paged operations can
//! therefore never be split by another caller selecting a different page.

use crate::backend::{BackendType, RegisterBackend};
use crate::backends::mmap::MmapBackend;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::lock::FpgaLock;
use crate::mmio;
use crate::transaction::{self, ControlBlock, TransactionPolicy};
use sfp_fpga_chip::bar::shadow_offset;
use sfp_fpga_chip::sff::{EEPROM_ADDR, PAGE_SELECT, PAGE_SIZE, UPPER_PAGE_START};
use std::sync::{Arc, OnceLock};

/// Process-wide hardware bridge.
static HARDWARE: OnceLock<Arc<FpgaBridge<MmapBackend>>> = OnceLock::new();

/// Transceiver EEPROM access through the FPGA I2C bridge.
#[derive(Debug)]
pub struct FpgaBridge<A: RegisterBackend> {
    regs: FpgaLock<A>,
    policy: TransactionPolicy,
    backend_type: BackendType,
}

impl<A: RegisterBackend> FpgaBridge<A> {
    /// Wrap `backend` using the lock and bounds of `config`.
    pub fn new(backend: A, config: &BridgeConfig) -> Self {
        let backend_type = backend.backend_type();
        tracing::debug!("FPGA bridge on {backend_type}");
        Self {
            regs: FpgaLock::new(backend, config.lock_path.clone()),
            policy: TransactionPolicy::from(config),
            backend_type,
        }
    }

    /// Backend the bridge drives.
    pub const fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    /// Bounds applied to every transaction.
    pub const fn policy(&self) -> &TransactionPolicy {
        &self.policy
    }

    /// Run `f` on the port's control block with the FPGA held.
    fn transact<T>(
        &self,
        port: usize,
        f: impl FnOnce(&mut A, &ControlBlock, &TransactionPolicy) -> Result<T>,
    ) -> Result<T> {
        let block = ControlBlock::for_port(port)?;
        let mut regs = self.regs.acquire()?;
        f(&mut regs, &block, &self.policy)
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or the transaction fails.
    pub fn read_byte(&self, port: usize, devaddr: u8, addr: u8) -> Result<u8> {
        let mut byte = [0u8];
        self.read_into(port, devaddr, usize::from(addr), &mut byte)?;
        Ok(byte[0])
    }

    /// Read a little-endian 16-bit word at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OffsetOutOfRange`] for `addr == 0xFF`, or any
    /// transaction error.
    pub fn read_word(&self, port: usize, devaddr: u8, addr: u8) -> Result<u16> {
        transaction::validate_range(usize::from(addr), 2)?;
        self.transact(port, |regs, block, policy| {
            transaction::execute_read(regs, block, devaddr, usize::from(addr), 2, policy)?;
            mmio::read_u16(regs, shadow_offset(block.mem_addr, u32::from(addr)))
        })
    }

    /// Read `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OffsetOutOfRange`] if the range leaves the
    /// 256-byte device window, or any transaction error.
    pub fn read_eeprom(&self, port: usize, devaddr: u8, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(port, devaddr, offset, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read_eeprom`].
    pub fn read_into(&self, port: usize, devaddr: u8, offset: usize, buf: &mut [u8]) -> Result<()> {
        transaction::validate_range(offset, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        tracing::debug!("port {port}: read {devaddr:#04x}@{offset:#04x} len {}", buf.len());
        self.transact(port, |regs, block, policy| {
            transaction::read(regs, block, devaddr, offset, buf, policy)
        })
    }

    /// Write one byte.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or the transaction fails.
    pub fn write_byte(&self, port: usize, devaddr: u8, addr: u8, value: u8) -> Result<()> {
        self.write_eeprom(port, devaddr, usize::from(addr), &[value])
    }

    /// Write a little-endian 16-bit word at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OffsetOutOfRange`] for `addr == 0xFF`, or any
    /// transaction error.
    pub fn write_word(&self, port: usize, devaddr: u8, addr: u8, value: u16) -> Result<()> {
        self.write_eeprom(port, devaddr, usize::from(addr), &value.to_le_bytes())
    }

    /// Write `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OffsetOutOfRange`] if the range leaves the
    /// 256-byte device window, or any transaction error.
    pub fn write_eeprom(&self, port: usize, devaddr: u8, offset: usize, data: &[u8]) -> Result<()> {
        transaction::validate_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        tracing::debug!("port {port}: write {devaddr:#04x}@{offset:#04x} len {}", data.len());
        self.transact(port, |regs, block, policy| {
            transaction::execute_write(regs, block, devaddr, offset, data, policy)
        })
    }

    /// Read `offset` of CMIS page `page` at device 0x50.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or either transaction fails.
    pub fn read_page(&self, port: usize, page: u8, offset: u8) -> Result<u8> {
        let mut byte = [0u8];
        self.paged(port, page, usize::from(offset), &mut byte)?;
        Ok(byte[0])
    }

    /// Read `len` bytes from `offset` of CMIS page `page` at device 0x50.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::OffsetOutOfRange`] if the range leaves the
    /// device window, or any transaction error.
    pub fn read_paged(&self, port: usize, page: u8, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.paged(port, page, offset, &mut buf)?;
        Ok(buf)
    }

    /// Read the full upper half (0x80..=0xFF) of CMIS page `page`.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or a transaction fails.
    pub fn read_upper_page(&self, port: usize, page: u8) -> Result<Vec<u8>> {
        self.read_paged(port, page, usize::from(UPPER_PAGE_START), PAGE_SIZE)
    }

    fn paged(&self, port: usize, page: u8, offset: usize, buf: &mut [u8]) -> Result<()> {
        transaction::validate_range(offset, buf.len())?;
        tracing::debug!("port {port}: page {page:#04x} read @{offset:#04x} len {}", buf.len());
        self.transact(port, |regs, block, policy| {
            transaction::execute_write(regs, block, EEPROM_ADDR, usize::from(PAGE_SELECT), &[page], policy)?;
            if buf.is_empty() {
                return Ok(());
            }
            transaction::read(regs, block, EEPROM_ADDR, offset, buf, policy)
        })
    }

    /// Write `value` at `offset` of CMIS page `page` at device 0x50.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or either transaction fails.
    pub fn write_page(&self, port: usize, page: u8, offset: u8, value: u8) -> Result<()> {
        tracing::debug!("port {port}: page {page:#04x} write @{offset:#04x} = {value:#04x}");
        self.transact(port, |regs, block, policy| {
            transaction::execute_write(regs, block, EEPROM_ADDR, usize::from(PAGE_SELECT), &[page], policy)?;
            transaction::execute_write(regs, block, EEPROM_ADDR, usize::from(offset), &[value], policy)
        })
    }

    /// Pulse the reset register of the port's group.
    ///
    /// # Errors
    ///
    /// Returns error if the port is unknown or the register does not latch.
    pub fn reset_engine(&self, port: usize) -> Result<()> {
        self.transact(port, transaction::reset_engine)
    }
}

impl FpgaBridge<MmapBackend> {
    /// Open a bridge on the resource file named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ResourceUnavailable`] if the resource cannot be
    /// opened.
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        let backend = MmapBackend::open(&config.resource_path)?;
        Ok(Self::new(backend, config))
    }

    /// The process-wide hardware bridge, configured from the environment on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unsupported`] when the FPGA PCIe path is
    /// disabled on this platform, or the error of [`Self::open`].
    pub fn hardware() -> Result<Arc<Self>> {
        if let Some(bridge) = HARDWARE.get() {
            return Ok(Arc::clone(bridge));
        }

        let config = BridgeConfig::from_env();
        if !crate::config::fpga_pci_enabled(&config) {
            return Err(BridgeError::unsupported("FPGA PCIe path is disabled"));
        }
        let bridge = Arc::new(Self::open(&config)?);
        tracing::info!("FPGA bridge ready on {}", config.resource_path.display());
        Ok(Arc::clone(HARDWARE.get_or_init(|| bridge)))
    }
}
