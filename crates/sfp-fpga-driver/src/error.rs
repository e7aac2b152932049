// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for bridge operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while driving the FPGA I2C bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The FPGA resource file could not be opened
    #[error("FPGA resource unavailable: {path}: {source}")]
    ResourceUnavailable {
        /// Resource file that was opened
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Mapping the page containing a register failed
    #[error("Failed to map page {offset:#010x}: {reason}")]
    MapFailed {
        /// Page-aligned offset that was mapped
        offset: u64,
        /// Reason for failure
        reason: String,
    },

    /// A register write never read back the written value
    #[error(
        "Write to {offset:#010x} did not latch after {attempts} attempts \
         (wrote {wrote:#010x}, read {readback:#010x})"
    )]
    WriteVerifyFailed {
        /// Byte offset of the register
        offset: u64,
        /// Value written
        wrote: u32,
        /// Last value read back
        readback: u32,
        /// Write pulses issued
        attempts: u32,
    },

    /// The I2C engine did not report idle in time
    #[error("I2C engine at ctrl {ctrl_addr:#06x} not idle after {elapsed_us}us (status {status:#x})")]
    Timeout {
        /// Control page of the port group
        ctrl_addr: u32,
        /// Time spent polling in microseconds
        elapsed_us: u64,
        /// Last status word read
        status: u32,
    },

    /// The addressed device did not acknowledge
    #[error("No ACK on ctrl {ctrl_addr:#06x} (status {status:#x})")]
    NoAck {
        /// Control page of the port group
        ctrl_addr: u32,
        /// Status word
        status: u32,
    },

    /// The downstream I2C bus is stuck
    #[error("I2C bus stuck on ctrl {ctrl_addr:#06x} (status {status:#x})")]
    BusStuck {
        /// Control page of the port group
        ctrl_addr: u32,
        /// Status word
        status: u32,
    },

    /// Requested range does not fit in the 256-byte device window
    #[error("Range {offset}+{len} exceeds the 256-byte device window")]
    OffsetOutOfRange {
        /// Start offset
        offset: usize,
        /// Requested length
        len: usize,
    },

    /// Port number is not in the port table
    #[error("Unknown port {port}")]
    UnknownPort {
        /// Requested port
        port: usize,
    },

    /// The cross-process lock file could not be opened or locked
    #[error("FPGA lock unavailable: {path}: {source}")]
    LockUnavailable {
        /// Lock file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The module or port does not support the operation
    #[error("Unsupported: {reason}")]
    Unsupported {
        /// Reason
        reason: String,
    },

    /// A transceiver control byte read back a different value
    #[error("Port {port} byte {offset:#04x}: wrote {wrote:#04x}, read back {readback:#04x}")]
    ReadbackMismatch {
        /// Port
        port: usize,
        /// Byte offset
        offset: u8,
        /// Value written
        wrote: u8,
        /// Value read back
        readback: u8,
    },
}

impl BridgeError {
    /// Create a resource unavailable error
    pub fn resource_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ResourceUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create a map failed error
    pub fn map_failed(offset: u64, reason: impl Into<String>) -> Self {
        Self::MapFailed {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Transient condition; retrying the whole transaction may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoAck { .. })
    }

    /// The port group's downstream bus should be reset before it is used again.
    pub const fn needs_bus_reset(&self) -> bool {
        matches!(self, Self::BusStuck { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let stuck = BridgeError::BusStuck { ctrl_addr: 0x1000, status: 0b101 };
        assert!(stuck.needs_bus_reset());
        assert!(!stuck.is_retryable());

        let no_ack = BridgeError::NoAck { ctrl_addr: 0x1000, status: 0b011 };
        assert!(no_ack.is_retryable());
        assert!(!no_ack.needs_bus_reset());

        let timeout = BridgeError::Timeout { ctrl_addr: 0x1000, elapsed_us: 1_000_001, status: 0 };
        assert!(timeout.is_retryable() && timeout.needs_bus_reset());

        let range = BridgeError::OffsetOutOfRange { offset: 250, len: 10 };
        assert!(!range.is_retryable() && !range.needs_bus_reset());
    }

    #[test]
    fn messages_carry_offsets() {
        let e = BridgeError::WriteVerifyFailed {
            offset: 0x0400_43CC,
            wrote: 1,
            readback: 0,
            attempts: 1000,
        };
        let msg = e.to_string();
        assert!(msg.contains("0x040043cc"), "{msg}");
        assert!(msg.contains("1000"), "{msg}");
    }
}
