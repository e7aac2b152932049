// SPDX-License-Identifier: AGPL-3.0-only

//! Register access on top of a [`RegisterBackend`]
//!
//! Backends only move aligned dwords. This module adds the two things the
//! bridge needs on top:
//!
//! - width-reduced reads (`u16`, `u8`) and reads at unaligned offsets, which
//!   the byte-addressed shadow window requires;
//! - verified writes: the FPGA may need several write pulses before a
//!   control register latches, so every write is read back and re-issued
//!   until it sticks, up to a fixed number of attempts.

#![allow(clippy::cast_possible_truncation)]

use crate::backend::RegisterBackend;
use crate::error::{BridgeError, Result};

const fn split(offset: u64) -> (u64, u32) {
    (offset & !3, ((offset & 3) as u32) * 8)
}

/// Read 32 bits at any byte offset (little-endian composition across dwords).
///
/// # Errors
///
/// Propagates backend errors.
pub fn read_u32<R: RegisterBackend + ?Sized>(regs: &mut R, offset: u64) -> Result<u32> {
    let (aligned, shift) = split(offset);
    let lo = regs.read_dword(aligned)?;
    let value = if shift == 0 {
        lo
    } else {
        let hi = regs.read_dword(aligned + 4)?;
        (((u64::from(hi) << 32) | u64::from(lo)) >> shift) as u32
    };
    tracing::trace!("read u32 @ {offset:#010x} = {value:#010x}");
    Ok(value)
}

/// Read 16 bits at any byte offset.
///
/// # Errors
///
/// Propagates backend errors.
pub fn read_u16<R: RegisterBackend + ?Sized>(regs: &mut R, offset: u64) -> Result<u16> {
    Ok((read_u32(regs, offset)? & 0xFFFF) as u16)
}

/// Read one byte at any byte offset.
///
/// # Errors
///
/// Propagates backend errors.
pub fn read_u8<R: RegisterBackend + ?Sized>(regs: &mut R, offset: u64) -> Result<u8> {
    let (aligned, shift) = split(offset);
    let value = ((regs.read_dword(aligned)? >> shift) & 0xFF) as u8;
    tracing::trace!("read u8 @ {offset:#010x} = {value:#04x}");
    Ok(value)
}

/// Write a control register and re-issue the write until it reads back.
///
/// At most `attempts` write pulses are issued (at least one).
///
/// # Errors
///
/// Returns [`BridgeError::WriteVerifyFailed`] when the register never reads
/// back `value`, or propagates backend errors.
pub fn write_u32_verified<R: RegisterBackend + ?Sized>(
    regs: &mut R,
    offset: u64,
    value: u32,
    attempts: u32,
) -> Result<()> {
    let attempts = attempts.max(1);
    tracing::trace!("write u32 @ {offset:#010x} = {value:#010x}");

    let mut pulses = 0;
    loop {
        regs.write_dword(offset, value)?;
        pulses += 1;

        let readback = regs.read_dword(offset)?;
        if readback == value {
            if pulses > 1 {
                tracing::debug!("{offset:#010x} latched after {pulses} pulses");
            }
            return Ok(());
        }

        if pulses >= attempts {
            tracing::warn!(
                "{offset:#010x} never latched {value:#010x} (last readback {readback:#010x})"
            );
            return Err(BridgeError::WriteVerifyFailed {
                offset,
                wrote: value,
                readback,
                attempts: pulses,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SimulatedFpga;

    const SCRATCH: u64 = 0x0100;

    #[test]
    fn unaligned_reads_compose_little_endian() {
        let mut fpga = SimulatedFpga::new();
        fpga.write_dword(SCRATCH, 0x4433_2211).unwrap();
        fpga.write_dword(SCRATCH + 4, 0x8877_6655).unwrap();

        assert_eq!(read_u32(&mut fpga, SCRATCH).unwrap(), 0x4433_2211);
        assert_eq!(read_u32(&mut fpga, SCRATCH + 1).unwrap(), 0x5544_3322);
        assert_eq!(read_u32(&mut fpga, SCRATCH + 3).unwrap(), 0x7766_5544);
        assert_eq!(read_u16(&mut fpga, SCRATCH + 3).unwrap(), 0x5544);
        assert_eq!(read_u8(&mut fpga, SCRATCH + 2).unwrap(), 0x33);
        assert_eq!(read_u8(&mut fpga, SCRATCH + 5).unwrap(), 0x66);
    }

    #[test]
    fn verified_write_retries_until_latched() {
        let mut fpga = SimulatedFpga::new();
        fpga.set_latch_pulses(3);
        write_u32_verified(&mut fpga, SCRATCH, 0xDEAD_BEEF, 10).unwrap();
        assert_eq!(fpga.read_dword(SCRATCH).unwrap(), 0xDEAD_BEEF);
        assert_eq!(fpga.write_log().len(), 3);
    }

    #[test]
    fn verified_write_is_bounded() {
        let mut fpga = SimulatedFpga::new();
        fpga.set_latch_pulses(u32::MAX);
        let err = write_u32_verified(&mut fpga, SCRATCH, 1, 1000).unwrap_err();
        match err {
            BridgeError::WriteVerifyFailed { offset, wrote, attempts, .. } => {
                assert_eq!(offset, SCRATCH);
                assert_eq!(wrote, 1);
                assert_eq!(attempts, 1000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_attempts_still_writes_once() {
        let mut fpga = SimulatedFpga::new();
        write_u32_verified(&mut fpga, SCRATCH, 7, 0).unwrap();
        assert_eq!(fpga.write_log().len(), 1);
    }
}
