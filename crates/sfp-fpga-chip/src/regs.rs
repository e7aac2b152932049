// SPDX-License-Identifier: AGPL-3.0-only

//! I2C bridge control-register map.
//!
//! Every port group owns one control page inside the FPGA control region.
//! Offsets below are *word* offsets relative to that page's `ctrl_addr`; the
//! byte address handed to the resource window is produced by
//! [`crate::bar::ctrl_register_offset`].
//!
//! ```text
//! Offset  Register        Fields (bit shift)
//! ──────  ──────────────  ──────────────────────────────────────────────────────
//! 0x0000  reset control   rst_data(0)
//! 0x0010  int status      i2c_idle(0) i2c_stuck(1) i2c_no_ack(2)
//! 0x00EF  block config    block_rw_len(0) byte_mode(9) reg_addr_len(16)
//!                         page_set(18) auto_mode(31)
//! 0x00F0  data low        byte_0(0) byte_1(16)
//! 0x00F1  data high       byte_2(0) byte_3(16)
//! 0x00F3  command         reg_addr(0) slave_addr(16) page_set_enable(23)
//!                         channel(24) rw(30) action(31)
//! ```
//!
//! The block-config register sits at `0x00EF`, below the data registers.
//! Hardware decodes exactly these offsets; do not "tidy" them.

// ── Register offsets ─────────────────────────────────────────────────────────

/// Reset control register.
pub const RESET_CONTROL: u32 = 0x0000;
/// Interrupt status register (idle / stuck / no-ack).
pub const INTERRUPT_STATUS: u32 = 0x0010;
/// Block configuration register (length, byte mode, paging, auto mode).
pub const BLOCK_CONFIG: u32 = 0x00EF;
/// Data bytes 0 and 1 for write transactions.
pub const DATA_LOW: u32 = 0x00F0;
/// Data bytes 2 and 3 for write transactions.
pub const DATA_HIGH: u32 = 0x00F1;
/// Command register; setting the action bit starts the transaction.
pub const COMMAND: u32 = 0x00F3;

/// Bit shifts of every field, grouped by register.
pub mod shift {
    /// Reset control: reset data.
    pub const RST_DATA: u8 = 0;

    /// Interrupt status: engine idle.
    pub const I2C_IDLE: u8 = 0;
    /// Interrupt status: bus stuck (active low).
    pub const I2C_STUCK: u8 = 1;
    /// Interrupt status: missing ACK (active low).
    pub const I2C_NO_ACK: u8 = 2;

    /// Data low: first byte.
    pub const BYTE_0: u8 = 0;
    /// Data low: second byte.
    pub const BYTE_1: u8 = 16;
    /// Data high: third byte.
    pub const BYTE_2: u8 = 0;
    /// Data high: fourth byte.
    pub const BYTE_3: u8 = 16;

    /// Block config: number of bytes moved by one transaction.
    pub const BLOCK_RW_LEN: u8 = 0;
    /// Block config: byte mode.
    pub const BYTE_MODE: u8 = 9;
    /// Block config: register address length.
    pub const REG_ADDR_LEN: u8 = 16;
    /// Block config: page number.
    pub const PAGE_SET: u8 = 18;
    /// Block config: auto mode.
    pub const AUTO_MODE: u8 = 31;

    /// Command: I2C register address.
    pub const REG_ADDR: u8 = 0;
    /// Command: I2C slave address.
    pub const SLAVE_ADDR: u8 = 16;
    /// Command: honour `PAGE_SET` from block config.
    pub const PAGE_SET_ENABLE: u8 = 23;
    /// Command: downstream channel select.
    pub const CHANNEL: u8 = 24;
    /// Command: direction, see [`super::Direction`].
    pub const RW: u8 = 30;
    /// Command: start the transaction.
    pub const ACTION: u8 = 31;
}

/// Field masks, applied before shifting so one field can never bleed into another.
pub mod mask {
    /// One data byte.
    pub const BYTE: u32 = 0xFF;
    /// Block length (9 bits, below `BYTE_MODE`).
    pub const BLOCK_RW_LEN: u32 = 0x1FF;
    /// Register address length (2 bits).
    pub const REG_ADDR_LEN: u32 = 0x3;
    /// Page number.
    pub const PAGE_SET: u32 = 0xFF;
    /// I2C register address (16 bits).
    pub const REG_ADDR: u32 = 0xFFFF;
    /// 7-bit I2C slave address.
    pub const SLAVE_ADDR: u32 = 0x7F;
    /// Channel select (6 bits, below `RW`).
    pub const CHANNEL: u32 = 0x3F;
    /// Single-bit flag.
    pub const FLAG: u32 = 0x1;
}

// ── Field model ──────────────────────────────────────────────────────────────

/// A named slice of a 32-bit control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    /// Field value, unshifted.
    pub value: u32,
    /// Position of the field's least significant bit.
    pub bit_shift: u8,
}

impl RegisterField {
    /// Build a field.
    #[must_use]
    pub const fn new(value: u32, bit_shift: u8) -> Self {
        Self { value, bit_shift }
    }

    /// `value << bit_shift`.
    #[must_use]
    pub const fn field_value(self) -> u32 {
        self.value << self.bit_shift
    }
}

/// OR-compose several fields into one register word.
#[must_use]
pub fn compose(fields: &[RegisterField]) -> u32 {
    fields.iter().fold(0, |word, f| word | f.field_value())
}

const fn extract(word: u32, bit_shift: u8, mask: u32) -> u32 {
    (word >> bit_shift) & mask
}

/// A control register with a fixed offset inside the port group's page.
pub trait ControlRegister {
    /// Word offset relative to `ctrl_addr`.
    const OFFSET: u32;

    /// Fields that make up the register.
    fn fields(&self) -> Vec<RegisterField>;

    /// Composed 32-bit value to write.
    fn word(&self) -> u32 {
        compose(&self.fields())
    }
}

// ── Registers ────────────────────────────────────────────────────────────────

/// Reset control register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetControl {
    /// Reset data bits.
    pub data: u32,
}

impl ControlRegister for ResetControl {
    const OFFSET: u32 = RESET_CONTROL;

    fn fields(&self) -> Vec<RegisterField> {
        vec![RegisterField::new(self.data, shift::RST_DATA)]
    }
}

/// Decoded interrupt-status word.
///
/// `stuck` and `no_ack` are active low: the condition is asserted when the
/// corresponding bit reads 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptStatus(pub u32);

impl InterruptStatus {
    /// Status word reported by an idle engine after a clean transaction.
    pub const CLEAN: Self = Self(0b111);

    /// Engine finished the transaction.
    #[must_use]
    pub const fn idle(self) -> bool {
        extract(self.0, shift::I2C_IDLE, mask::FLAG) == 1
    }

    /// Bus stuck asserted.
    #[must_use]
    pub const fn stuck(self) -> bool {
        extract(self.0, shift::I2C_STUCK, mask::FLAG) == 0
    }

    /// Missing ACK asserted.
    #[must_use]
    pub const fn no_ack(self) -> bool {
        extract(self.0, shift::I2C_NO_ACK, mask::FLAG) == 0
    }

    /// Build a status word from decoded conditions.
    #[must_use]
    pub const fn from_conditions(idle: bool, stuck: bool, no_ack: bool) -> Self {
        Self(
            ((idle as u32) << shift::I2C_IDLE)
                | ((!stuck as u32) << shift::I2C_STUCK)
                | ((!no_ack as u32) << shift::I2C_NO_ACK),
        )
    }
}

/// Data bytes 0/1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataLow {
    /// Byte 0.
    pub byte_0: u8,
    /// Byte 1.
    pub byte_1: u8,
}

impl ControlRegister for DataLow {
    const OFFSET: u32 = DATA_LOW;

    fn fields(&self) -> Vec<RegisterField> {
        vec![
            RegisterField::new(u32::from(self.byte_0), shift::BYTE_0),
            RegisterField::new(u32::from(self.byte_1), shift::BYTE_1),
        ]
    }
}

impl DataLow {
    /// Decode a written word.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self {
            byte_0: extract(word, shift::BYTE_0, mask::BYTE) as u8,
            byte_1: extract(word, shift::BYTE_1, mask::BYTE) as u8,
        }
    }
}

/// Data bytes 2/3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataHigh {
    /// Byte 2.
    pub byte_2: u8,
    /// Byte 3.
    pub byte_3: u8,
}

impl ControlRegister for DataHigh {
    const OFFSET: u32 = DATA_HIGH;

    fn fields(&self) -> Vec<RegisterField> {
        vec![
            RegisterField::new(u32::from(self.byte_2), shift::BYTE_2),
            RegisterField::new(u32::from(self.byte_3), shift::BYTE_3),
        ]
    }
}

impl DataHigh {
    /// Decode a written word.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self {
            byte_2: extract(word, shift::BYTE_2, mask::BYTE) as u8,
            byte_3: extract(word, shift::BYTE_3, mask::BYTE) as u8,
        }
    }
}

/// Block configuration register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockConfig {
    /// Bytes moved by the next transaction.
    pub block_rw_len: u32,
    /// Byte mode flag.
    pub byte_mode: bool,
    /// Register address length.
    pub reg_addr_len: u32,
    /// Page number (used with `Command::page_set_enable`).
    pub page_set: u32,
    /// Auto mode flag.
    pub auto_mode: bool,
}

impl ControlRegister for BlockConfig {
    const OFFSET: u32 = BLOCK_CONFIG;

    fn fields(&self) -> Vec<RegisterField> {
        vec![
            RegisterField::new(self.block_rw_len & mask::BLOCK_RW_LEN, shift::BLOCK_RW_LEN),
            RegisterField::new(u32::from(self.byte_mode), shift::BYTE_MODE),
            RegisterField::new(self.reg_addr_len & mask::REG_ADDR_LEN, shift::REG_ADDR_LEN),
            RegisterField::new(self.page_set & mask::PAGE_SET, shift::PAGE_SET),
            RegisterField::new(u32::from(self.auto_mode), shift::AUTO_MODE),
        ]
    }
}

impl BlockConfig {
    /// Config for a plain transfer of `len` bytes.
    #[must_use]
    pub const fn transfer(len: u32) -> Self {
        Self {
            block_rw_len: len,
            byte_mode: false,
            reg_addr_len: 0,
            page_set: 0,
            auto_mode: false,
        }
    }

    /// Decode a written word.
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self {
            block_rw_len: extract(word, shift::BLOCK_RW_LEN, mask::BLOCK_RW_LEN),
            byte_mode: extract(word, shift::BYTE_MODE, mask::FLAG) == 1,
            reg_addr_len: extract(word, shift::REG_ADDR_LEN, mask::REG_ADDR_LEN),
            page_set: extract(word, shift::PAGE_SET, mask::PAGE_SET),
            auto_mode: extract(word, shift::AUTO_MODE, mask::FLAG) == 1,
        }
    }
}

/// Transaction direction encoded in the command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to shadow memory.
    Read = 0,
    /// Data registers to device.
    Write = 1,
}

/// Command register. Writing it with `activate` set starts the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// I2C register address.
    pub reg_addr: u32,
    /// 7-bit slave address.
    pub slave_addr: u8,
    /// Use the page from block config.
    pub page_set_enable: bool,
    /// Downstream channel.
    pub channel: u8,
    /// Read or write.
    pub direction: Direction,
    /// Start bit.
    pub activate: bool,
}

impl ControlRegister for Command {
    const OFFSET: u32 = COMMAND;

    fn fields(&self) -> Vec<RegisterField> {
        vec![
            RegisterField::new(self.reg_addr & mask::REG_ADDR, shift::REG_ADDR),
            RegisterField::new(u32::from(self.slave_addr) & mask::SLAVE_ADDR, shift::SLAVE_ADDR),
            RegisterField::new(u32::from(self.page_set_enable), shift::PAGE_SET_ENABLE),
            RegisterField::new(u32::from(self.channel) & mask::CHANNEL, shift::CHANNEL),
            RegisterField::new(self.direction as u32, shift::RW),
            RegisterField::new(u32::from(self.activate), shift::ACTION),
        ]
    }
}

impl Command {
    /// Decode a written word.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self {
            reg_addr: extract(word, shift::REG_ADDR, mask::REG_ADDR),
            slave_addr: extract(word, shift::SLAVE_ADDR, mask::SLAVE_ADDR) as u8,
            page_set_enable: extract(word, shift::PAGE_SET_ENABLE, mask::FLAG) == 1,
            channel: extract(word, shift::CHANNEL, mask::CHANNEL) as u8,
            direction: if extract(word, shift::RW, mask::FLAG) == 1 {
                Direction::Write
            } else {
                Direction::Read
            },
            activate: extract(word, shift::ACTION, mask::FLAG) == 1,
        }
    }
}
