// SPDX-License-Identifier: AGPL-3.0-only

//! Transaction encoder
//!
//! Turns "move these bytes between this port's device and the host" into
//! register writes:
//!
//! ```text
//! derive ControlBlock from the port table
//! for each chunk:
//!     block config  <- chunk length
//!     data low/high <- chunk bytes            (writes only)
//!     command       <- activate | rw | channel | slave | reg_addr
//!     wait_idle
//! read shadow window                           (reads only)
//! ```
//!
//! Reads move up to 16 bytes per command; writes go 4 bytes at a time, then
//! one 2-byte and one 1-byte chunk for the remainder.
//!
//! All functions here take the backend by `&mut`: they run inside one
//! [`crate::lock::FpgaGuard`] scope and never acquire the lock themselves.

#![allow(clippy::cast_possible_truncation)]

use crate::backend::RegisterBackend;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::mmio;
use crate::poller;
use sfp_fpga_chip::bar::{ctrl_register_offset, shadow_offset};
use sfp_fpga_chip::ports;
use sfp_fpga_chip::regs::{
    BlockConfig, Command, ControlRegister, DataHigh, DataLow, Direction, ResetControl,
};
use sfp_fpga_chip::sff::{EEPROM_SIZE, READ_BLOCK_MAX, WRITE_CHUNK_MAX};
use std::time::Duration;

/// Register targets of one transaction, derived from the port table.
///
/// Built fresh for every call and dropped at its end; nothing about the
/// previously addressed port survives between transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Port being addressed.
    pub port: usize,
    /// Control page of the port group.
    pub ctrl_addr: u32,
    /// Shadow window of the port group.
    pub mem_addr: u32,
    /// Channel select.
    pub channel: u8,
}

impl ControlBlock {
    /// Derive the block for `port`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownPort`] if `port` is not in the table.
    pub fn for_port(port: usize) -> Result<Self> {
        let desc = ports::port(port).ok_or(BridgeError::UnknownPort { port })?;
        Ok(Self {
            port,
            ctrl_addr: desc.ctrl_addr,
            mem_addr: desc.mem_addr,
            channel: desc.channel,
        })
    }

    fn register(&self, reg: u32) -> u64 {
        ctrl_register_offset(self.ctrl_addr, reg)
    }

    fn write<R, C>(&self, regs: &mut R, value: &C, policy: &TransactionPolicy) -> Result<()>
    where
        R: RegisterBackend + ?Sized,
        C: ControlRegister,
    {
        mmio::write_u32_verified(regs, self.register(C::OFFSET), value.word(), policy.write_attempts)
    }

    fn command(&self, devaddr: u8, reg_addr: usize, direction: Direction) -> Command {
        Command {
            reg_addr: reg_addr as u32,
            slave_addr: devaddr,
            page_set_enable: false,
            channel: self.channel,
            direction,
            activate: true,
        }
    }
}

/// Bounds applied to every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionPolicy {
    /// Completion-poll timeout.
    pub poll_timeout: Duration,
    /// Write pulses per register write.
    pub write_attempts: u32,
}

impl From<&BridgeConfig> for TransactionPolicy {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout,
            write_attempts: config.write_verify_attempts,
        }
    }
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// A contiguous piece of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Offset from the start of the transfer.
    pub offset: usize,
    /// Bytes in the chunk.
    pub len: usize,
}

/// Split a read of `len` bytes into engine blocks of at most 16 bytes.
pub fn read_chunks(len: usize) -> impl Iterator<Item = Chunk> {
    (0..len).step_by(READ_BLOCK_MAX).map(move |offset| Chunk {
        offset,
        len: READ_BLOCK_MAX.min(len - offset),
    })
}

/// Split a write of `len` bytes into 4-byte words, then a 2-byte and a
/// 1-byte chunk for the remainder, largest first.
pub fn write_chunks(len: usize) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(len / WRITE_CHUNK_MAX + 2);
    let mut offset = 0;
    for size in [4, 2, 1] {
        while len - offset >= size {
            chunks.push(Chunk { offset, len: size });
            offset += size;
            if size != WRITE_CHUNK_MAX {
                break;
            }
        }
    }
    chunks
}

/// Reject transfers that leave the 256-byte device window.
///
/// # Errors
///
/// Returns [`BridgeError::OffsetOutOfRange`] when `offset + len > 256`.
pub fn validate_range(offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= EEPROM_SIZE => Ok(()),
        _ => Err(BridgeError::OffsetOutOfRange { offset, len }),
    }
}

/// Issue read commands for `len` bytes at `addr`, filling the shadow window.
///
/// # Errors
///
/// Register, verify, or poll errors; the first failing chunk aborts.
pub fn execute_read<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    block: &ControlBlock,
    devaddr: u8,
    addr: usize,
    len: usize,
    policy: &TransactionPolicy,
) -> Result<()> {
    for chunk in read_chunks(len) {
        let reg_addr = (addr + chunk.offset) % EEPROM_SIZE;
        tracing::trace!(
            "port {} read {:#04x}@{reg_addr:#04x} len {}",
            block.port,
            devaddr,
            chunk.len
        );
        block.write(regs, &BlockConfig::transfer(chunk.len as u32), policy)?;
        block.write(regs, &block.command(devaddr, reg_addr, Direction::Read), policy)?;
        poller::wait_idle(regs, block.ctrl_addr, policy.poll_timeout)?;
    }
    Ok(())
}

/// Copy `buf.len()` bytes of the shadow window starting at `addr`.
///
/// # Errors
///
/// Propagates backend errors.
pub fn read_shadow<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    block: &ControlBlock,
    addr: usize,
    buf: &mut [u8],
) -> Result<()> {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = mmio::read_u8(regs, shadow_offset(block.mem_addr, (addr + i) as u32))?;
    }
    Ok(())
}

/// Read `buf.len()` bytes at `addr` of device `devaddr`.
///
/// # Errors
///
/// See [`execute_read`].
pub fn read<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    block: &ControlBlock,
    devaddr: u8,
    addr: usize,
    buf: &mut [u8],
    policy: &TransactionPolicy,
) -> Result<()> {
    execute_read(regs, block, devaddr, addr, buf.len(), policy)?;
    read_shadow(regs, block, addr, buf)
}

/// Write `data` at `addr` of device `devaddr`.
///
/// # Errors
///
/// Register, verify, or poll errors; the first failing chunk aborts, so a
/// prefix of `data` may already have been written.
pub fn execute_write<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    block: &ControlBlock,
    devaddr: u8,
    addr: usize,
    data: &[u8],
    policy: &TransactionPolicy,
) -> Result<()> {
    for chunk in write_chunks(data.len()) {
        let bytes = &data[chunk.offset..chunk.offset + chunk.len];
        let reg_addr = addr + chunk.offset;
        tracing::trace!(
            "port {} write {:#04x}@{reg_addr:#04x} {bytes:02x?}",
            block.port,
            devaddr
        );

        block.write(regs, &BlockConfig::transfer(chunk.len as u32), policy)?;
        block.write(
            regs,
            &DataLow {
                byte_0: bytes[0],
                byte_1: bytes.get(1).copied().unwrap_or(0),
            },
            policy,
        )?;
        if chunk.len == WRITE_CHUNK_MAX {
            block.write(
                regs,
                &DataHigh {
                    byte_2: bytes[2],
                    byte_3: bytes[3],
                },
                policy,
            )?;
        }
        block.write(regs, &block.command(devaddr, reg_addr, Direction::Write), policy)?;
        poller::wait_idle(regs, block.ctrl_addr, policy.poll_timeout)?;
    }
    Ok(())
}

/// Pulse the reset-control register of the port's group.
///
/// # Errors
///
/// Register or verify errors.
pub fn reset_engine<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    block: &ControlBlock,
    policy: &TransactionPolicy,
) -> Result<()> {
    tracing::info!("Resetting I2C engine of ctrl {:#06x} (port {})", block.ctrl_addr, block.port);
    block.write(regs, &ResetControl { data: 1 }, policy)?;
    block.write(regs, &ResetControl { data: 0 }, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{SimModule, SimulatedFpga};
    use proptest::prelude::*;
    use sfp_fpga_chip::regs;

    fn chunks_cover(chunks: &[Chunk], len: usize) -> bool {
        let mut next = 0;
        for c in chunks {
            if c.offset != next || c.len == 0 {
                return false;
            }
            next += c.len;
        }
        next == len
    }

    proptest! {
        #[test]
        fn write_chunks_tile_the_range(len in 0usize..=256) {
            let chunks = write_chunks(len);
            prop_assert!(chunks_cover(&chunks, len));
            prop_assert_eq!(chunks.iter().filter(|c| c.len == 4).count(), len / 4);
            prop_assert!(chunks.iter().filter(|c| c.len == 2).count() <= 1);
            prop_assert!(chunks.iter().filter(|c| c.len == 1).count() <= 1);
            prop_assert!(chunks.windows(2).all(|w| w[0].len >= w[1].len));
        }

        #[test]
        fn read_chunks_tile_the_range(len in 0usize..=256) {
            let chunks: Vec<_> = read_chunks(len).collect();
            prop_assert!(chunks_cover(&chunks, len));
            prop_assert_eq!(chunks.len(), len.div_ceil(16));
            prop_assert!(chunks.iter().all(|c| c.len <= 16));
        }
    }

    #[test]
    fn seven_bytes_is_word_half_byte() {
        assert_eq!(
            write_chunks(7),
            vec![
                Chunk { offset: 0, len: 4 },
                Chunk { offset: 4, len: 2 },
                Chunk { offset: 6, len: 1 },
            ]
        );
        assert!(write_chunks(0).is_empty());
    }

    #[test]
    fn range_validation() {
        assert!(validate_range(0, 256).is_ok());
        assert!(validate_range(255, 1).is_ok());
        assert!(validate_range(256, 0).is_ok());
        assert!(matches!(
            validate_range(250, 7),
            Err(BridgeError::OffsetOutOfRange { offset: 250, len: 7 })
        ));
        assert!(validate_range(usize::MAX, 2).is_err());
    }

    #[test]
    fn control_block_follows_port_table() {
        let a = ControlBlock::for_port(5).unwrap();
        assert_eq!((a.ctrl_addr, a.mem_addr, a.channel), (0x1000, 0x000, 6));
        let b = ControlBlock::for_port(20).unwrap();
        assert_eq!((b.ctrl_addr, b.mem_addr, b.channel), (0x3000, 0x200, 5));
        assert!(matches!(ControlBlock::for_port(66), Err(BridgeError::UnknownPort { port: 66 })));
    }

    #[test]
    fn write_advances_register_address_per_chunk() {
        let mut fpga = SimulatedFpga::new();
        fpga.insert_module(0, SimModule::sfp()).unwrap();
        let block = ControlBlock::for_port(0).unwrap();
        let policy = TransactionPolicy::default();

        execute_write(&mut fpga, &block, 0x51, 0x10, &[1, 2, 3, 4, 5, 6, 7], &policy).unwrap();

        let regs: Vec<u32> = fpga.transactions().iter().map(|t| t.command.reg_addr).collect();
        assert_eq!(regs, vec![0x10, 0x14, 0x16]);
        let lens: Vec<u32> = fpga.transactions().iter().map(|t| t.len).collect();
        assert_eq!(lens, vec![4, 2, 1]);

        let mut back = [0u8; 7];
        read(&mut fpga, &block, 0x51, 0x10, &mut back, &policy).unwrap();
        assert_eq!(back, [1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn write_register_order() {
        let mut fpga = SimulatedFpga::new();
        fpga.insert_module(0, SimModule::sfp()).unwrap();
        let block = ControlBlock::for_port(0).unwrap();

        execute_write(&mut fpga, &block, 0x51, 0, &[9, 8, 7, 6], &TransactionPolicy::default())
            .unwrap();

        let offsets: Vec<u64> = fpga.write_log().iter().map(|w| w.offset).collect();
        let reg = |r| ctrl_register_offset(0x1000, r);
        assert_eq!(
            offsets,
            vec![reg(regs::BLOCK_CONFIG), reg(regs::DATA_LOW), reg(regs::DATA_HIGH), reg(regs::COMMAND)]
        );
    }

    #[test]
    fn multi_block_read_wraps_register_address() {
        let mut fpga = SimulatedFpga::new();
        fpga.insert_module(64, SimModule::sfp()).unwrap();
        let block = ControlBlock::for_port(64).unwrap();

        execute_read(&mut fpga, &block, 0x50, 0xF8, 8, &TransactionPolicy::default()).unwrap();
        execute_read(&mut fpga, &block, 0x50, 0x00, 40, &TransactionPolicy::default()).unwrap();

        let regs: Vec<(u32, u32)> = fpga
            .transactions()
            .iter()
            .map(|t| (t.command.reg_addr, t.len))
            .collect();
        assert_eq!(regs, vec![(0xF8, 8), (0x00, 16), (0x10, 16), (0x20, 8)]);
    }

    #[test]
    fn reset_pulses_register() {
        let mut fpga = SimulatedFpga::new();
        let block = ControlBlock::for_port(33).unwrap();
        reset_engine(&mut fpga, &block, &TransactionPolicy::default()).unwrap();
        let log = fpga.write_log();
        let reset = ctrl_register_offset(0x2000, regs::RESET_CONTROL);
        assert_eq!(
            log.iter().map(|w| (w.offset, w.value)).collect::<Vec<_>>(),
            vec![(reset, 1), (reset, 0)]
        );
    }
}
