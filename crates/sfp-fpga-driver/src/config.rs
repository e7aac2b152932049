// SPDX-License-Identifier: AGPL-3.0-only

//! Bridge configuration
//!
//! Defaults come from the hardware model; every field can be overridden from
//! the environment so the same binary runs against a relocated resource
//! file or with a different poll budget.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SFP_FPGA_RESOURCE` | `resource_path` |
//! | `SFP_FPGA_PCI_ENABLE` | `pci_enable_path` |
//! | `SFP_FPGA_LOCK` | `lock_path` (empty disables the cross-process lock) |
//! | `SFP_FPGA_POLL_TIMEOUT_US` | `poll_timeout` |
//! | `SFP_FPGA_WRITE_ATTEMPTS` | `write_verify_attempts` |

use sfp_fpga_chip::pcie;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default completion-poll budget.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_micros(1_000_000);

/// Default write pulses before a register write is declared failed.
pub const DEFAULT_WRITE_VERIFY_ATTEMPTS: u32 = 1000;

/// Tunables of one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// FPGA sysfs resource file.
    pub resource_path: PathBuf,
    /// BSP flag saying whether the FPGA PCIe path is in use.
    pub pci_enable_path: PathBuf,
    /// Advisory lock file shared across processes, `None` for in-process only.
    pub lock_path: Option<PathBuf>,
    /// Completion-poll timeout per transaction.
    pub poll_timeout: Duration,
    /// Write pulses per register write before `WriteVerifyFailed`.
    pub write_verify_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            resource_path: PathBuf::from(pcie::FPGA_RESOURCE),
            pci_enable_path: PathBuf::from(pcie::FPGA_PCI_ENABLE),
            lock_path: Some(PathBuf::from(pcie::FPGA_LOCK_FILE)),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            write_verify_attempts: DEFAULT_WRITE_VERIFY_ATTEMPTS,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring malformed {name}={raw:?}");
            None
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = std::env::var_os("SFP_FPGA_RESOURCE") {
            config.resource_path = path.into();
        }
        if let Some(path) = std::env::var_os("SFP_FPGA_PCI_ENABLE") {
            config.pci_enable_path = path.into();
        }
        if let Some(path) = std::env::var_os("SFP_FPGA_LOCK") {
            config.lock_path = if path.is_empty() { None } else { Some(path.into()) };
        }
        if let Some(us) = parse_env::<u64>("SFP_FPGA_POLL_TIMEOUT_US") {
            config.poll_timeout = Duration::from_micros(us);
        }
        if let Some(n) = parse_env::<u32>("SFP_FPGA_WRITE_ATTEMPTS") {
            config.write_verify_attempts = n;
        }

        tracing::debug!("Bridge config: {config:?}");
        config
    }

    /// Set the resource file.
    #[must_use]
    pub fn with_resource_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.resource_path = path.into();
        self
    }

    /// Set the PCIe-enable flag file.
    #[must_use]
    pub fn with_pci_enable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pci_enable_path = path.into();
        self
    }

    /// Set (or clear) the cross-process lock file.
    #[must_use]
    pub fn with_lock_path(mut self, path: Option<PathBuf>) -> Self {
        self.lock_path = path;
        self
    }

    /// Set the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the write-verify bound.
    #[must_use]
    pub const fn with_write_verify_attempts(mut self, attempts: u32) -> Self {
        self.write_verify_attempts = attempts;
        self
    }
}

fn read_flag(path: &Path) -> Option<i64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether transceiver I2C is routed through the PCIe FPGA on this box.
///
/// An unreadable or malformed flag counts as disabled.
pub fn fpga_pci_enabled(config: &BridgeConfig) -> bool {
    let enabled = read_flag(&config.pci_enable_path).is_some_and(|v| v > 0);
    tracing::debug!(
        "FPGA PCIe path {} ({})",
        if enabled { "enabled" } else { "disabled" },
        config.pci_enable_path.display()
    );
    enabled
}
