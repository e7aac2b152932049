// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware model of the switch FPGA that bridges transceiver I2C buses.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the bridge: control-register layout, resource window
//! address translation, the port routing table and the transceiver memory
//! map bytes the driver touches.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Sysfs resource, enable flag and lock file paths |
//! | [`bar`] | Control / shadow-memory bases, word-to-byte translation, paging |
//! | [`regs`] | Control registers, bit fields, status decoding |
//! | [`ports`] | 66-port routing table (ctrl page, shadow window, channel) |
//! | [`sff`] | SFF-8636 / CMIS offsets and the identifier → class table |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bar;
pub mod pcie;
pub mod ports;
pub mod regs;
pub mod sff;
