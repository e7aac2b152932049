// SPDX-License-Identifier: AGPL-3.0-only

//! Register backend abstraction
//!
//! Everything above this layer talks to the FPGA through aligned 32-bit
//! accesses at byte offsets inside the resource window. The hardware backend
//! maps the sysfs resource; the simulated backend implements the same
//! register contract in memory.

use crate::config::BridgeConfig;
use crate::error::Result;
use std::fmt::Debug;

/// Aligned 32-bit access to the FPGA resource window.
///
/// Offsets are byte offsets from the start of the resource file and must be
/// 4-byte aligned; width-reduced and unaligned accesses are layered on top in
/// [`crate::mmio`].
pub trait RegisterBackend: Debug + Send {
    /// Read one dword.
    ///
    /// # Errors
    ///
    /// Returns error if the resource cannot be opened or mapped.
    fn read_dword(&mut self, offset: u64) -> Result<u32>;

    /// Write one dword, without read-back.
    ///
    /// # Errors
    ///
    /// Returns error if the resource cannot be opened or mapped.
    fn write_dword(&mut self, offset: u64, value: u32) -> Result<()>;

    /// Backend type for logs and diagnostics.
    fn backend_type(&self) -> BackendType;
}

impl RegisterBackend for Box<dyn RegisterBackend> {
    fn read_dword(&mut self, offset: u64) -> Result<u32> {
        (**self).read_dword(offset)
    }

    fn write_dword(&mut self, offset: u64, value: u32) -> Result<()> {
        (**self).write_dword(offset, value)
    }

    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Sysfs resource file, mapped page by page
    Mmap,

    /// In-memory register file with simulated transceivers
    Simulated,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mmap => write!(f, "Mmap (PCIe resource)"),
            Self::Simulated => write!(f, "Simulated FPGA"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// Hardware when the FPGA PCIe path is enabled, simulation when it is
    /// disabled
    Auto,

    /// Force the mmap backend
    Mmap,

    /// Force an empty simulated FPGA (no modules plugged)
    Simulated,
}

/// Select a register backend
///
/// # Errors
///
/// Returns [`crate::BridgeError::ResourceUnavailable`] if the resource file cannot
/// be opened while the mmap backend is forced or the FPGA PCIe path is
/// enabled. `Auto` only simulates when the path is disabled.
pub fn select_backend(
    selection: BackendSelection,
    config: &BridgeConfig,
) -> Result<Box<dyn RegisterBackend>> {
    use crate::backends::mmap::MmapBackend;
    use crate::backends::software::SimulatedFpga;

    match selection {
        BackendSelection::Auto => {
            if crate::config::fpga_pci_enabled(config) {
                let backend = MmapBackend::open(&config.resource_path)?;
                tracing::info!("Using mmap backend on {}", config.resource_path.display());
                return Ok(Box::new(backend));
            }

            tracing::info!("FPGA PCIe path disabled, using simulated FPGA");
            Ok(Box::new(SimulatedFpga::new()))
        }

        BackendSelection::Mmap => {
            MmapBackend::open(&config.resource_path).map(|b| Box::new(b) as Box<dyn RegisterBackend>)
        }

        BackendSelection::Simulated => Ok(Box::new(SimulatedFpga::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_simulation() {
        let backend = select_backend(BackendSelection::Simulated, &BridgeConfig::default()).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Simulated);
    }

    #[test]
    fn mmap_on_missing_resource_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::default().with_resource_path(dir.path().join("resource4"));
        let err = select_backend(BackendSelection::Mmap, &config).unwrap_err();
        assert!(matches!(err, crate::BridgeError::ResourceUnavailable { .. }));
    }

    #[test]
    fn auto_falls_back_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let enable = dir.path().join("bsp_fpga_pci_enable");
        std::fs::write(&enable, "0\n").unwrap();
        let config = BridgeConfig::default().with_pci_enable_path(enable);
        let backend = select_backend(BackendSelection::Auto, &config).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Simulated);
    }

    #[test]
    fn auto_with_enabled_path_requires_resource() {
        let dir = tempfile::tempdir().unwrap();
        let enable = dir.path().join("bsp_fpga_pci_enable");
        std::fs::write(&enable, "1\n").unwrap();
        let config = BridgeConfig::default()
            .with_pci_enable_path(enable)
            .with_resource_path(dir.path().join("resource4"));

        let err = select_backend(BackendSelection::Auto, &config).unwrap_err();
        assert!(matches!(err, crate::BridgeError::ResourceUnavailable { .. }), "{err}");
    }
}
