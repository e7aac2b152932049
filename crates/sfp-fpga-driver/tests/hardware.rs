// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware validation tests
//!
//! Run on an S9311-64D with the FPGA PCIe path enabled and modules plugged
//! into ports 0 and 64:
//!
//! ```text
//! cargo test -p sfp-fpga-driver --test hardware -- --ignored
//! ```

use sfp_fpga_driver::chip::sff::{DeviceClass, EEPROM_ADDR};
use sfp_fpga_driver::{
    fpga_pci_enabled, select_backend, BackendSelection, BackendType, BridgeConfig, FpgaBridge,
    Transceivers,
};

#[test]
#[ignore] // Requires hardware
fn test_pci_path_enabled() {
    assert!(fpga_pci_enabled(&BridgeConfig::from_env()));
}

#[test]
#[ignore] // Requires hardware
fn test_hardware_bridge_is_shared() {
    let a = FpgaBridge::hardware().expect("hardware bridge");
    let b = FpgaBridge::hardware().expect("hardware bridge");
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(a.backend_type(), BackendType::Mmap);
}

#[test]
#[ignore] // Requires hardware
fn test_identifier_of_populated_ports() {
    let xcvr = Transceivers::new(FpgaBridge::hardware().expect("hardware bridge"));
    for port in [0, 64] {
        let class = xcvr.dev_class(port).expect("dev class");
        println!("port {port}: {class:?}");
        assert!(class.is_some());
    }
    assert_eq!(xcvr.dev_class(64).unwrap(), Some(DeviceClass::Sfp));
}

#[test]
#[ignore] // Requires hardware
fn test_block_read_matches_byte_reads() {
    let config = BridgeConfig::from_env();
    let backend = select_backend(BackendSelection::Mmap, &config).expect("mmap backend");
    let bridge = FpgaBridge::new(backend, &config);

    let block = bridge.read_eeprom(0, EEPROM_ADDR, 0, 64).expect("block read");
    for (offset, &byte) in block.iter().enumerate().take(32) {
        let single = bridge
            .read_byte(0, EEPROM_ADDR, u8::try_from(offset).unwrap())
            .expect("byte read");
        assert_eq!(single, byte, "offset {offset:#04x}");
    }
}
