// SPDX-License-Identifier: AGPL-3.0-only

//! Transceiver memory-map constants (SFF-8472, SFF-8636, CMIS).
//!
//! Only the bytes the bridge's callers touch are listed here.

/// Main EEPROM device address.
pub const EEPROM_ADDR: u8 = 0x50;

/// SFP diagnostics (DOM) device address.
pub const DOM_ADDR: u8 = 0x51;

/// Bytes addressable per I2C device through one bridge transfer window.
pub const EEPROM_SIZE: usize = 256;

/// Largest read block the engine moves per command.
pub const READ_BLOCK_MAX: usize = 16;

/// Largest write chunk (both data registers).
pub const WRITE_CHUNK_MAX: usize = 4;

/// Page-select byte of paged memory maps.
pub const PAGE_SELECT: u8 = 0x7F;

/// Size of one upper page.
pub const PAGE_SIZE: usize = 128;

/// First byte of the upper page window.
pub const UPPER_PAGE_START: u8 = 0x80;

/// Identifier byte (SFF-8024).
pub const IDENTIFIER: u8 = 0;

/// SFF-8636 constants.
pub mod sff8636 {
    /// TX disable control byte (lanes in bits 0..3).
    pub const TX_DISABLE: u8 = 0x56;
    /// All four lanes disabled.
    pub const TX_DISABLE_ALL: u8 = 0x0F;
    /// All lanes enabled.
    pub const TX_ENABLE_ALL: u8 = 0x00;
}

/// CMIS constants.
pub mod cmis {
    /// Revision compliance byte.
    pub const REVISION: u8 = 1;
    /// Lowest accepted revision (3.0).
    pub const REVISION_MIN: u8 = 0x30;
    /// Highest accepted revision (5.F).
    pub const REVISION_MAX: u8 = 0x5F;

    /// Memory model byte.
    pub const MEMORY_MODEL: u8 = 2;
    /// Flat-memory flag inside [`MEMORY_MODEL`]; clear means paged.
    pub const MEMORY_MODEL_FLAT: u8 = 0b1000_0000;

    /// Page advertising supported controls.
    pub const ADVERTISING_PAGE: u8 = 0x01;
    /// Byte advertising TX disable support.
    pub const TX_DISABLE_ADV: u8 = 155;
    /// TX disable advertisement bit.
    pub const TX_DISABLE_ADV_MASK: u8 = 0b0000_0010;

    /// Lane control page.
    pub const LANE_CONTROL_PAGE: u8 = 0x10;
    /// Per-lane TX disable byte.
    pub const TX_DISABLE: u8 = 130;
    /// All eight lanes disabled.
    pub const TX_DISABLE_ALL: u8 = 0xFF;
    /// All lanes enabled.
    pub const TX_ENABLE_ALL: u8 = 0x00;
}

/// Coarse module class derived from the identifier byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// QSFP / QSFP+ / QSFP28 (SFF-8636).
    Qsfp = 1,
    /// SFP family (SFF-8472).
    Sfp = 2,
    /// CMIS modules (QSFP-DD, OSFP, SFP-DD).
    Cmis = 3,
}

impl DeviceClass {
    /// Class of a module reporting SFF-8024 `identifier`.
    #[must_use]
    pub const fn from_identifier(identifier: u8) -> Option<Self> {
        match identifier {
            0x03 | 0x0B => Some(Self::Sfp),
            0x0C | 0x0D | 0x11 => Some(Self::Qsfp),
            0x18 | 0x19 | 0x1E | 0x1F => Some(Self::Cmis),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qsfp => write!(f, "QSFP (SFF-8636)"),
            Self::Sfp => write!(f, "SFP (SFF-8472)"),
            Self::Cmis => write!(f, "CMIS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_table() {
        assert_eq!(DeviceClass::from_identifier(0x03), Some(DeviceClass::Sfp));
        assert_eq!(DeviceClass::from_identifier(0x11), Some(DeviceClass::Qsfp));
        assert_eq!(DeviceClass::from_identifier(0x18), Some(DeviceClass::Cmis));
        assert_eq!(DeviceClass::from_identifier(0x1F), Some(DeviceClass::Cmis));
        assert_eq!(DeviceClass::from_identifier(0x00), None);
        assert_eq!(DeviceClass::Cmis as u8, 3);
    }

    #[test]
    fn page_window() {
        assert_eq!(usize::from(UPPER_PAGE_START) + PAGE_SIZE, EEPROM_SIZE);
        assert!(PAGE_SELECT < UPPER_PAGE_START);
    }
}
