// SPDX-License-Identifier: AGPL-3.0-only

//! Platform paths for the PCIe-attached FPGA.

/// Sysfs resource file exposing the FPGA BAR (opened `O_RDWR | O_SYNC`).
pub const FPGA_RESOURCE: &str = "/sys/devices/pci0000:15/0000:15:04.0/0000:18:00.0/resource4";

/// BSP flag reporting whether transceiver I2C goes through the PCIe FPGA path.
pub const FPGA_PCI_ENABLE: &str =
    "/sys/devices/platform/x86_64_ufispace_s9311_64d_lpc/bsp/bsp_fpga_pci_enable";

/// Advisory lock file shared by every process that drives the bridge.
pub const FPGA_LOCK_FILE: &str = "/run/lock/sfp-fpga.lock";
