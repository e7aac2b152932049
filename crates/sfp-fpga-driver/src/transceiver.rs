// SPDX-License-Identifier: AGPL-3.0-only

//! Transceiver-facing interface
//!
//! [`Transceivers`] is what a platform SFP driver talks to. It wraps a shared
//! [`FpgaBridge`] with the two collaborators that live outside the bridge:
//!
//! - a [`PresenceCheck`]: operations on an empty cage succeed with `None`
//!   and never touch the FPGA;
//! - a [`BusRecovery`]: called with the port number after any failure that
//!   [`BridgeError::needs_bus_reset`], before the error is returned.
//!
//! On top of raw byte access it carries the module control helpers the
//! platform needs: TX disable for SFF-8636 and CMIS modules and the coarse
//! device class.
//!
//! Return convention: `Ok(Some(_))` done, `Ok(None)` module absent,
//! `Err(_)` failed.

use crate::backend::RegisterBackend;
use crate::bridge::FpgaBridge;
use crate::error::{BridgeError, Result};
use sfp_fpga_chip::ports::{self, PortKind};
use sfp_fpga_chip::sff::{self, cmis, sff8636, DeviceClass, DOM_ADDR, EEPROM_ADDR, EEPROM_SIZE};
use std::sync::Arc;

/// Module presence source (sysfs/GPIO on real platforms).
pub trait PresenceCheck: Send + Sync {
    /// Whether a module is plugged into `port`.
    ///
    /// # Errors
    ///
    /// Returns error if the presence line cannot be read.
    fn is_present(&self, port: usize) -> Result<bool>;
}

impl<F> PresenceCheck for F
where
    F: Fn(usize) -> Result<bool> + Send + Sync,
{
    fn is_present(&self, port: usize) -> Result<bool> {
        self(port)
    }
}

/// Treats every cage as populated.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPresent;

impl PresenceCheck for AlwaysPresent {
    fn is_present(&self, _port: usize) -> Result<bool> {
        Ok(true)
    }
}

/// Downstream I2C bus recovery (mux reset on real platforms).
pub trait BusRecovery: Send + Sync {
    /// Recover the bus behind `port`. Fire-and-forget.
    fn recover(&self, port: usize);
}

impl<F> BusRecovery for F
where
    F: Fn(usize) + Send + Sync,
{
    fn recover(&self, port: usize) {
        self(port);
    }
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecovery;

impl BusRecovery for NoRecovery {
    fn recover(&self, _port: usize) {}
}

/// Transceiver access for a platform driver.
pub struct Transceivers<A: RegisterBackend> {
    bridge: Arc<FpgaBridge<A>>,
    presence: Box<dyn PresenceCheck>,
    recovery: Box<dyn BusRecovery>,
}

impl<A: RegisterBackend> std::fmt::Debug for Transceivers<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transceivers")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl<A: RegisterBackend> Transceivers<A> {
    /// Every cage present, no bus recovery.
    pub fn new(bridge: Arc<FpgaBridge<A>>) -> Self {
        Self {
            bridge,
            presence: Box::new(AlwaysPresent),
            recovery: Box::new(NoRecovery),
        }
    }

    /// Use `presence` to detect empty cages.
    #[must_use]
    pub fn with_presence(mut self, presence: impl PresenceCheck + 'static) -> Self {
        self.presence = Box::new(presence);
        self
    }

    /// Call `recovery` after bus-level failures.
    #[must_use]
    pub fn with_recovery(mut self, recovery: impl BusRecovery + 'static) -> Self {
        self.recovery = Box::new(recovery);
        self
    }

    /// The underlying bridge.
    pub fn bridge(&self) -> &Arc<FpgaBridge<A>> {
        &self.bridge
    }

    fn guarded<T>(&self, port: usize, f: impl FnOnce(&FpgaBridge<A>) -> Result<T>) -> Result<Option<T>> {
        if ports::port(port).is_none() {
            return Err(BridgeError::UnknownPort { port });
        }
        if !self.presence.is_present(port)? {
            tracing::info!("sfp module (port={port}) is absent");
            return Ok(None);
        }

        match f(&self.bridge) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                if e.needs_bus_reset() {
                    tracing::warn!("port {port}: {e}, recovering bus");
                    self.recovery.recover(port);
                }
                Err(e)
            }
        }
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn read_byte(&self, port: usize, devaddr: u8, addr: u8) -> Result<Option<u8>> {
        self.guarded(port, |b| b.read_byte(port, devaddr, addr))
    }

    /// Read a little-endian word.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn read_word(&self, port: usize, devaddr: u8, addr: u8) -> Result<Option<u16>> {
        self.guarded(port, |b| b.read_word(port, devaddr, addr))
    }

    /// Read `len` bytes from `addr`.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn read_block(&self, port: usize, devaddr: u8, addr: u8, len: usize) -> Result<Option<Vec<u8>>> {
        self.guarded(port, |b| b.read_eeprom(port, devaddr, usize::from(addr), len))
    }

    /// Write one byte.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn write_byte(&self, port: usize, devaddr: u8, addr: u8, value: u8) -> Result<Option<()>> {
        self.guarded(port, |b| b.write_byte(port, devaddr, addr, value))
    }

    /// Write a little-endian word.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn write_word(&self, port: usize, devaddr: u8, addr: u8, value: u16) -> Result<Option<()>> {
        self.guarded(port, |b| b.write_word(port, devaddr, addr, value))
    }

    /// Write `data` at `addr`.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn write_block(&self, port: usize, devaddr: u8, addr: u8, data: &[u8]) -> Result<Option<()>> {
        self.guarded(port, |b| b.write_eeprom(port, devaddr, usize::from(addr), data))
    }

    /// Read `offset` of CMIS page `page`.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn read_page(&self, port: usize, page: u8, offset: u8) -> Result<Option<u8>> {
        self.guarded(port, |b| b.read_page(port, page, offset))
    }

    /// Write `value` at `offset` of CMIS page `page`.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn write_page(&self, port: usize, page: u8, offset: u8, value: u8) -> Result<Option<()>> {
        self.guarded(port, |b| b.write_page(port, page, offset, value))
    }

    /// The upper half (0x80..=0xFF) of page `page`.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn read_upper_page(&self, port: usize, page: u8) -> Result<Option<Vec<u8>>> {
        self.guarded(port, |b| b.read_upper_page(port, page))
    }

    /// The 256 bytes of device 0x50.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn eeprom(&self, port: usize) -> Result<Option<Vec<u8>>> {
        self.guarded(port, |b| b.read_eeprom(port, EEPROM_ADDR, 0, EEPROM_SIZE))
    }

    /// The 256 bytes of the SFP diagnostics device (0x51).
    ///
    /// QSFP-type modules keep diagnostics in their paged 0x50 map; only the
    /// SFP management ports have a second device.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unsupported`] on QSFP-DD ports, or bridge errors.
    pub fn dom(&self, port: usize) -> Result<Option<Vec<u8>>> {
        match ports::port(port) {
            None => return Err(BridgeError::UnknownPort { port }),
            Some(desc) if desc.kind != PortKind::Sfp => {
                return Err(BridgeError::unsupported(format!(
                    "port {port} has no SFP diagnostics device"
                )));
            }
            Some(_) => {}
        }
        self.guarded(port, |b| b.read_eeprom(port, DOM_ADDR, 0, EEPROM_SIZE))
    }

    /// Coarse module class from the identifier byte.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unsupported`] for identifiers outside the
    /// table, or bridge errors.
    pub fn dev_class(&self, port: usize) -> Result<Option<DeviceClass>> {
        let Some(id) = self.read_byte(port, EEPROM_ADDR, sff::IDENTIFIER)? else {
            return Ok(None);
        };
        DeviceClass::from_identifier(id)
            .map(Some)
            .ok_or_else(|| BridgeError::unsupported(format!("module identifier {id:#04x}")))
    }

    /// Whether all four SFF-8636 lanes are TX-disabled.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn sff8636_tx_disable(&self, port: usize) -> Result<Option<bool>> {
        self.guarded(port, |b| {
            Ok(b.read_byte(port, EEPROM_ADDR, sff8636::TX_DISABLE)? == sff8636::TX_DISABLE_ALL)
        })
    }

    /// Disable (or enable) all four SFF-8636 lanes and verify.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ReadbackMismatch`] if the module does not keep
    /// the value, or bridge errors.
    pub fn set_sff8636_tx_disable(&self, port: usize, disable: bool) -> Result<Option<()>> {
        let value = if disable {
            sff8636::TX_DISABLE_ALL
        } else {
            sff8636::TX_ENABLE_ALL
        };
        self.guarded(port, |b| {
            b.write_byte(port, EEPROM_ADDR, sff8636::TX_DISABLE, value)?;
            let readback = b.read_byte(port, EEPROM_ADDR, sff8636::TX_DISABLE)?;
            check_readback(port, sff8636::TX_DISABLE, value, readback)
        })
    }

    /// Whether the CMIS module advertises TX disable.
    ///
    /// Requires a CMIS revision in 3.0..=5.F, a paged memory map and the
    /// advertisement bit on page 0x01.
    ///
    /// # Errors
    ///
    /// Bridge or presence errors.
    pub fn cmis_tx_disable_supported(&self, port: usize) -> Result<Option<bool>> {
        self.guarded(port, |b| cmis_tx_disable_supported(b, port))
    }

    /// Whether all CMIS lanes are TX-disabled.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unsupported`] if the module does not advertise
    /// TX disable, or bridge errors.
    pub fn cmis_tx_disable(&self, port: usize) -> Result<Option<bool>> {
        self.guarded(port, |b| {
            require_cmis_tx_disable(b, port)?;
            Ok(b.read_page(port, cmis::LANE_CONTROL_PAGE, cmis::TX_DISABLE)? == cmis::TX_DISABLE_ALL)
        })
    }

    /// Disable (or enable) all CMIS lanes and verify.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Unsupported`] if the module does not advertise
    /// TX disable, [`BridgeError::ReadbackMismatch`] if the module does not
    /// keep the value, or bridge errors.
    pub fn set_cmis_tx_disable(&self, port: usize, disable: bool) -> Result<Option<()>> {
        let value = if disable {
            cmis::TX_DISABLE_ALL
        } else {
            cmis::TX_ENABLE_ALL
        };
        self.guarded(port, |b| {
            require_cmis_tx_disable(b, port)?;
            b.write_page(port, cmis::LANE_CONTROL_PAGE, cmis::TX_DISABLE, value)?;
            let readback = b.read_page(port, cmis::LANE_CONTROL_PAGE, cmis::TX_DISABLE)?;
            check_readback(port, cmis::TX_DISABLE, value, readback)
        })
    }
}

fn cmis_tx_disable_supported<A: RegisterBackend>(bridge: &FpgaBridge<A>, port: usize) -> Result<bool> {
    let revision = bridge.read_byte(port, EEPROM_ADDR, cmis::REVISION)?;
    if !(cmis::REVISION_MIN..=cmis::REVISION_MAX).contains(&revision) {
        tracing::info!(
            "Port[{port}] CMIS version {:x}.{:x} is not supported",
            revision >> 4,
            revision & 0xF
        );
        return Ok(false);
    }

    let model = bridge.read_byte(port, EEPROM_ADDR, cmis::MEMORY_MODEL)?;
    if model & cmis::MEMORY_MODEL_FLAT != 0 {
        return Ok(false);
    }

    let adv = bridge.read_page(port, cmis::ADVERTISING_PAGE, cmis::TX_DISABLE_ADV)?;
    Ok(adv & cmis::TX_DISABLE_ADV_MASK != 0)
}

fn require_cmis_tx_disable<A: RegisterBackend>(bridge: &FpgaBridge<A>, port: usize) -> Result<()> {
    if cmis_tx_disable_supported(bridge, port)? {
        Ok(())
    } else {
        Err(BridgeError::unsupported(format!("port {port}: CMIS TX disable")))
    }
}

fn check_readback(port: usize, offset: u8, wrote: u8, readback: u8) -> Result<()> {
    if wrote == readback {
        return Ok(());
    }
    tracing::error!("port[{port}] tx disable readback failed, write value={wrote}, readback={readback}");
    Err(BridgeError::ReadbackMismatch {
        port,
        offset,
        wrote,
        readback,
    })
}
