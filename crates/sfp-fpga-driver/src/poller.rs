// SPDX-License-Identifier: AGPL-3.0-only

//! Completion poller
//!
//! After a command is issued the I2C engine of the port group is polled
//! until it reports idle. The poll is a synchronous spin executed while the
//! FPGA lock is held; transactions finish in microseconds to low
//! milliseconds, and the timeout bounds the worst case.

use crate::backend::RegisterBackend;
use crate::error::{BridgeError, Result};
use sfp_fpga_chip::bar::ctrl_register_offset;
use sfp_fpga_chip::regs::{self, InterruptStatus};
use std::time::{Duration, Instant};

/// Read the interrupt-status register of the group at `ctrl_addr`.
///
/// # Errors
///
/// Propagates backend errors.
pub fn read_status<R: RegisterBackend + ?Sized>(backend: &mut R, ctrl_addr: u32) -> Result<InterruptStatus> {
    let offset = ctrl_register_offset(ctrl_addr, regs::INTERRUPT_STATUS);
    backend.read_dword(offset).map(InterruptStatus)
}

/// Classify the status word of an idle engine.
///
/// A stuck bus wins over a missing ACK: a stuck bus cannot ACK, and only the
/// stuck condition tells the caller a bus reset is needed.
///
/// # Errors
///
/// [`BridgeError::BusStuck`] or [`BridgeError::NoAck`].
pub fn check_completion(ctrl_addr: u32, status: InterruptStatus) -> Result<()> {
    if status.stuck() {
        tracing::error!("I2C bus stuck on ctrl {ctrl_addr:#06x}, status={:#x}", status.0);
        return Err(BridgeError::BusStuck {
            ctrl_addr,
            status: status.0,
        });
    }
    if status.no_ack() {
        tracing::debug!("No ACK on ctrl {ctrl_addr:#06x}, status={:#x}", status.0);
        return Err(BridgeError::NoAck {
            ctrl_addr,
            status: status.0,
        });
    }
    Ok(())
}

/// Spin until the engine of the group at `ctrl_addr` is idle, then report
/// how the transaction ended.
///
/// # Errors
///
/// - [`BridgeError::Timeout`] if idle is not reported within `timeout`
/// - [`BridgeError::BusStuck`] / [`BridgeError::NoAck`] from the final status
/// - backend errors
pub fn wait_idle<R: RegisterBackend + ?Sized>(
    backend: &mut R,
    ctrl_addr: u32,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    let mut status = read_status(backend, ctrl_addr)?;

    while !status.idle() {
        let elapsed = start.elapsed();
        if elapsed > timeout {
            tracing::warn!(
                "Timeout waiting for I2C idle on ctrl {ctrl_addr:#06x}, {}us, status={:#x}",
                elapsed.as_micros(),
                status.0
            );
            return Err(BridgeError::Timeout {
                ctrl_addr,
                elapsed_us: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
                status: status.0,
            });
        }
        std::hint::spin_loop();
        status = read_status(backend, ctrl_addr)?;
    }

    check_completion(ctrl_addr, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{SimFault, SimulatedFpga};
    use sfp_fpga_chip::regs::{Command, ControlRegister, Direction};

    fn start_read(fpga: &mut SimulatedFpga) {
        let cmd = Command {
            reg_addr: 0,
            slave_addr: 0x50,
            page_set_enable: false,
            channel: 1,
            direction: Direction::Read,
            activate: true,
        };
        fpga.write_dword(ctrl_register_offset(0x1000, regs::COMMAND), cmd.word())
            .unwrap();
    }

    #[test]
    fn precedence_of_final_status() {
        let no_ack = InterruptStatus::from_conditions(true, false, true);
        assert!(matches!(check_completion(0x1000, no_ack), Err(BridgeError::NoAck { .. })));

        let stuck = InterruptStatus::from_conditions(true, true, false);
        assert!(matches!(check_completion(0x1000, stuck), Err(BridgeError::BusStuck { .. })));

        let both = InterruptStatus::from_conditions(true, true, true);
        assert!(matches!(check_completion(0x1000, both), Err(BridgeError::BusStuck { .. })));

        assert!(check_completion(0x1000, InterruptStatus::CLEAN).is_ok());
    }

    #[test]
    fn idle_group_completes_immediately() {
        let mut fpga = SimulatedFpga::new();
        wait_idle(&mut fpga, 0x1000, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn waits_out_a_busy_engine() {
        let mut fpga = SimulatedFpga::populated();
        fpga.set_busy_polls(25);
        start_read(&mut fpga);
        wait_idle(&mut fpga, 0x1000, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn never_idle_times_out() {
        let mut fpga = SimulatedFpga::new();
        fpga.set_fault(0, Some(SimFault::NeverIdle));
        start_read(&mut fpga);

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let err = wait_idle(&mut fpga, 0x1000, timeout).unwrap_err();
        let took = start.elapsed();

        assert!(matches!(err, BridgeError::Timeout { ctrl_addr: 0x1000, .. }));
        assert!(took >= timeout);
        assert!(took < Duration::from_secs(2));
    }
}
