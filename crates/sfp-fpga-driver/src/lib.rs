// SPDX-License-Identifier: AGPL-3.0-only

//! Userspace driver for transceiver EEPROMs behind the switch FPGA.
//!
//! On the S9311-64D the front-panel cages are not wired to kernel I2C
//! adapters when the PCIe FPGA path is enabled. Instead the FPGA runs one
//! I2C master per port group, driven through a handful of registers in PCIe
//! BAR 4, and copies read data into a per-group shadow window.
//!
//! # Layers
//!
//! ```text
//! Transceivers   presence short-circuit, bus recovery, TX disable, dev class
//!   FpgaBridge   lock scope, range checks, CMIS page select + transact
//!     transaction  chunking, config/data/command registers
//!     poller       idle / stuck / no-ack
//!     mmio         width-reduced reads, verified writes
//!       RegisterBackend   MmapBackend (resource4) | SimulatedFpga
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use sfp_fpga_driver::{FpgaBridge, Transceivers};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let xcvr = Transceivers::new(FpgaBridge::hardware()?);
//! if let Some(eeprom) = xcvr.eeprom(5)? {
//!     println!("port 5 identifier {:#04x}", eeprom[0]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Every test in this crate runs against [`SimulatedFpga`], which implements
//! the same register contract in memory.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod bridge;
pub mod config;
mod error;
pub mod lock;
pub mod mmio;
pub mod poller;
pub mod transaction;
mod transceiver;

/// Hardware model (re-exported from sfp-fpga-chip).
pub use sfp_fpga_chip as chip;

pub use backend::{select_backend, BackendSelection, BackendType, RegisterBackend};
pub use backends::software::{SimDevice, SimFault, SimModule, SimTransaction, SimulatedFpga, WriteRecord};
pub use backends::MmapBackend;
pub use bridge::FpgaBridge;
pub use config::{fpga_pci_enabled, BridgeConfig};
pub use error::{BridgeError, Result};
pub use transceiver::{AlwaysPresent, BusRecovery, NoRecovery, PresenceCheck, Transceivers};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BackendSelection, BridgeConfig, BridgeError, FpgaBridge, RegisterBackend, Result,
        SimModule, SimulatedFpga, Transceivers,
    };
    pub use sfp_fpga_chip::sff::{DeviceClass, DOM_ADDR, EEPROM_ADDR};
}
