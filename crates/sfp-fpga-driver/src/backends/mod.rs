// SPDX-License-Identifier: AGPL-3.0-only

//! Register backend implementations
//!
//! Two backends available:
//! - **Mmap**: the FPGA's PCIe resource file, mapped page by page (hardware)
//! - **Software**: an in-memory register file with simulated transceivers
//!   (tests, `--simulate`, machines without the FPGA path)

pub mod mmap;
pub mod software;

pub use mmap::MmapBackend;
pub use software::{SimDevice, SimFault, SimModule, SimulatedFpga};
