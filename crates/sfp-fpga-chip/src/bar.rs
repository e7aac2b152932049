// SPDX-License-Identifier: AGPL-3.0-only

//! Resource window layout and address translation.
//!
//! The FPGA is reached through one PCIe resource file. Logical FPGA
//! addresses are 32-bit word indices; the host sees bytes, so every logical
//! address is shifted left by two before being added to a region base.
//!
//! ```text
//! Region          Base          Host byte offset
//! ──────────────  ────────────  ─────────────────────────────────────────
//! control         0x0400_0000   CTRL_BASE + ((ctrl_addr + reg) << 2)
//! shadow memory   0x0400_0000   MEM_BASE  + (mem_addr << 2) + byte
//! ```
//!
//! Both regions share a base; the shadow window is byte addressed.

/// Base of the control-register region inside the resource window.
pub const CTRL_BASE: u64 = 0x0400_0000;

/// Base of the EEPROM shadow-memory region.
pub const MEM_BASE: u64 = CTRL_BASE;

/// Host page size used for every mapping.
pub const PAGE_SIZE: u64 = 4096;

/// Mask selecting the offset within a page.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Word-to-byte translation of a logical FPGA address.
#[must_use]
pub const fn fpga_to_host(addr: u32) -> u64 {
    (addr as u64) << 2
}

/// Byte offset of control register `reg` of the group at `ctrl_addr`.
#[must_use]
pub const fn ctrl_register_offset(ctrl_addr: u32, reg: u32) -> u64 {
    CTRL_BASE + fpga_to_host(ctrl_addr + reg)
}

/// Byte offset of shadow-memory byte `byte` of the group at `mem_addr`.
#[must_use]
pub const fn shadow_offset(mem_addr: u32, byte: u32) -> u64 {
    MEM_BASE + fpga_to_host(mem_addr) + byte as u64
}

/// Page-aligned start of the page containing `offset`.
#[must_use]
pub const fn page_base(offset: u64) -> u64 {
    offset & !PAGE_MASK
}

/// Offset of `offset` within its page.
#[must_use]
pub const fn page_offset(offset: u64) -> u64 {
    offset & PAGE_MASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs;

    #[test]
    fn command_register_of_first_group() {
        // (0x1000 + 0xF3) << 2 = 0x43CC
        assert_eq!(
            ctrl_register_offset(0x1000, regs::COMMAND),
            0x0400_0000 + 0x43CC
        );
    }

    #[test]
    fn shadow_window_is_byte_addressed() {
        assert_eq!(shadow_offset(0x200, 0), 0x0400_0800);
        assert_eq!(shadow_offset(0x200, 0xFF), 0x0400_08FF);
    }

    #[test]
    fn paging() {
        let off = ctrl_register_offset(0x1000, regs::INTERRUPT_STATUS);
        assert_eq!(page_base(off), 0x0400_4000);
        assert_eq!(page_offset(off), 0x40);
        assert_eq!(page_base(off) + page_offset(off), off);
    }
}
