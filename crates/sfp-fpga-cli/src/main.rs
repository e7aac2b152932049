// SPDX-License-Identifier: AGPL-3.0-only

//! `sfp-fpga`: tech-support tool for transceiver EEPROMs behind the FPGA.
//!
//! ```text
//! USAGE:
//!   sfp-fpga ports                              Port table
//!   sfp-fpga dump <port> [--dom]                Hexdump device 0x50 (or 0x51)
//!   sfp-fpga page <port> <page> [--raw]         Hexdump upper page of a paged module
//!   sfp-fpga peek <port> <dev> <addr> [--len N] Read bytes
//!   sfp-fpga poke <port> <dev> <addr> <bytes..> Write bytes
//!   sfp-fpga tx-disable <port> [--set on|off]   Get or set TX disable
//!
//!   --simulate   run against a simulated FPGA with every cage populated
//! ```
//!
//! Numbers accept decimal or `0x` hex.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sfp_fpga_driver::chip::ports::{PortKind, PORT_TABLE};
use sfp_fpga_driver::chip::sff::{DeviceClass, DOM_ADDR, EEPROM_ADDR, UPPER_PAGE_START};
use sfp_fpga_driver::{
    fpga_pci_enabled, select_backend, BackendSelection, BridgeConfig, FpgaBridge,
    RegisterBackend, SimulatedFpga, Transceivers,
};
use std::io::Write;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sfp-fpga", about = "Transceiver EEPROM access through the FPGA I2C bridge", version)]
struct Cli {
    /// Use a simulated FPGA instead of the PCIe resource.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the port table.
    Ports,
    /// Hexdump the 256 bytes of the module EEPROM.
    Dump {
        /// Port number.
        port: usize,
        /// Dump the SFP diagnostics device (0x51) instead.
        #[arg(long)]
        dom: bool,
    },
    /// Hexdump the upper half of a CMIS / SFF-8636 page.
    Page {
        /// Port number.
        port: usize,
        /// Page number.
        #[arg(value_parser = parse_u8)]
        page: u8,
        /// Write the raw 128 bytes to stdout.
        #[arg(long)]
        raw: bool,
    },
    /// Read bytes from a device.
    Peek {
        /// Port number.
        port: usize,
        /// I2C device address (e.g. 0x50).
        #[arg(value_parser = parse_u8)]
        devaddr: u8,
        /// Register address.
        #[arg(value_parser = parse_u8)]
        addr: u8,
        /// Number of bytes.
        #[arg(long, default_value_t = 1)]
        len: usize,
    },
    /// Write bytes to a device.
    Poke {
        /// Port number.
        port: usize,
        /// I2C device address (e.g. 0x50).
        #[arg(value_parser = parse_u8)]
        devaddr: u8,
        /// Register address.
        #[arg(value_parser = parse_u8)]
        addr: u8,
        /// Bytes to write.
        #[arg(required = true, value_parser = parse_u8)]
        bytes: Vec<u8>,
    },
    /// Show or change TX disable of all lanes.
    TxDisable {
        /// Port number.
        port: usize,
        /// Disable (`on`) or enable (`off`) transmitters.
        #[arg(long, value_enum)]
        set: Option<Switch>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

type Xcvr = Transceivers<Box<dyn RegisterBackend>>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Ports => cmd_ports(),
        Cmd::Dump { port, dom } => cmd_dump(&open(cli.simulate)?, port, dom)?,
        Cmd::Page { port, page, raw } => cmd_page(&open(cli.simulate)?, port, page, raw)?,
        Cmd::Peek { port, devaddr, addr, len } => {
            cmd_peek(&open(cli.simulate)?, port, devaddr, addr, len)?;
        }
        Cmd::Poke { port, devaddr, addr, bytes } => {
            cmd_poke(&open(cli.simulate)?, port, devaddr, addr, &bytes)?;
        }
        Cmd::TxDisable { port, set } => cmd_tx_disable(&open(cli.simulate)?, port, set)?,
    }

    Ok(())
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

fn open(simulate: bool) -> Result<Xcvr> {
    let config = BridgeConfig::from_env();

    let (backend, config) = if simulate {
        let backend = Box::new(SimulatedFpga::populated()) as Box<dyn RegisterBackend>;
        (backend, config.with_lock_path(None))
    } else {
        if !fpga_pci_enabled(&config) {
            bail!(
                "FPGA PCIe path is disabled ({}); use --simulate",
                config.pci_enable_path.display()
            );
        }
        let backend = select_backend(BackendSelection::Mmap, &config)
            .with_context(|| format!("opening {}", config.resource_path.display()))?;
        (backend, config)
    };

    debug!(backend = %backend.backend_type(), "bridge opened");
    Ok(Transceivers::new(Arc::new(FpgaBridge::new(backend, &config))))
}

fn present<T>(port: usize, value: Option<T>) -> Result<T> {
    value.with_context(|| format!("port {port}: module absent"))
}

fn cmd_ports() {
    println!("Port  Kind     Ctrl    Mem     Chan  Bus");
    for p in &PORT_TABLE {
        let kind = match p.kind {
            PortKind::QsfpDd => "QSFP-DD",
            PortKind::Sfp => "SFP",
        };
        println!(
            "{:>4}  {kind:<7}  {:#06x}  {:#05x}   {:>4}  {:>3}",
            p.port, p.ctrl_addr, p.mem_addr, p.channel, p.eeprom_bus
        );
    }
}

fn cmd_dump(xcvr: &Xcvr, port: usize, dom: bool) -> Result<()> {
    let (devaddr, data) = if dom {
        (DOM_ADDR, xcvr.dom(port)?)
    } else {
        (EEPROM_ADDR, xcvr.eeprom(port)?)
    };
    let data = present(port, data)?;

    println!("port [{port}] device {devaddr:#04x}");
    print!("{}", hexdump(0, &data));
    Ok(())
}

fn cmd_page(xcvr: &Xcvr, port: usize, page: u8, raw: bool) -> Result<()> {
    let data = xcvr
        .read_upper_page(port, page)
        .with_context(|| format!("reading page {page:#04x} of port {port}"))?;
    let data = present(port, data)?;

    if raw {
        std::io::stdout().write_all(&data)?;
    } else {
        println!("port[{port:02}] page[{page:#04X}]");
        print!("{}", hexdump(usize::from(UPPER_PAGE_START), &data));
    }
    Ok(())
}

fn cmd_peek(xcvr: &Xcvr, port: usize, devaddr: u8, addr: u8, len: usize) -> Result<()> {
    let data = present(port, xcvr.read_block(port, devaddr, addr, len)?)?;
    if len == 1 {
        println!("{:#04x}", data[0]);
    } else {
        print!("{}", hexdump(usize::from(addr), &data));
    }
    Ok(())
}

fn cmd_poke(xcvr: &Xcvr, port: usize, devaddr: u8, addr: u8, bytes: &[u8]) -> Result<()> {
    present(port, xcvr.write_block(port, devaddr, addr, bytes)?)?;
    println!("port {port}: wrote {} byte(s) at {devaddr:#04x}@{addr:#04x}", bytes.len());
    Ok(())
}

fn cmd_tx_disable(xcvr: &Xcvr, port: usize, set: Option<Switch>) -> Result<()> {
    let class = present(port, xcvr.dev_class(port)?)?;

    if let Some(switch) = set {
        let disable = matches!(switch, Switch::On);
        match class {
            DeviceClass::Cmis => present(port, xcvr.set_cmis_tx_disable(port, disable)?)?,
            DeviceClass::Qsfp => present(port, xcvr.set_sff8636_tx_disable(port, disable)?)?,
            DeviceClass::Sfp => bail!("port {port}: SFP TX disable is a CPLD pin, not an EEPROM byte"),
        }
    }

    let disabled = match class {
        DeviceClass::Cmis => xcvr.cmis_tx_disable(port)?,
        DeviceClass::Qsfp => xcvr.sff8636_tx_disable(port)?,
        DeviceClass::Sfp => bail!("port {port}: SFP TX disable is a CPLD pin, not an EEPROM byte"),
    };
    let disabled = present(port, disabled)?;
    println!("port {port} ({class}): tx disable {}", if disabled { "on" } else { "off" });
    Ok(())
}

const fn printable(byte: u8) -> char {
    if matches!(byte, 0x20..=0x7E) {
        byte as char
    } else {
        '.'
    }
}

/// Classic 16-column dump; row labels start at `base`.
fn hexdump(base: usize, data: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::from("     0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f    0123456789abcdef\n");
    for (row, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:02x}:", base + row * 16);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push_str("    ");
        out.extend(chunk.iter().copied().map(printable));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_in_hex_or_decimal() {
        assert_eq!(parse_u8("0x50"), Ok(0x50));
        assert_eq!(parse_u8("0X7f"), Ok(0x7F));
        assert_eq!(parse_u8("130"), Ok(130));
        assert!(parse_u8("0x100").is_err());
        assert!(parse_u8("fifty").is_err());
    }

    #[test]
    fn hexdump_rows() {
        let data: Vec<u8> = (0x40..0x60).collect();
        let dump = hexdump(0, &data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("0123456789abcdef"));
        assert_eq!(
            lines[1],
            "00: 40 41 42 43 44 45 46 47 48 49 4a 4b 4c 4d 4e 4f    @ABCDEFGHIJKLMNO"
        );
        assert!(lines[2].starts_with("10: 50 51"));
        assert!(lines[2].ends_with("PQRSTUVWXYZ[\\]^_"));
    }

    #[test]
    fn hexdump_masks_control_bytes_and_pads() {
        let dump = hexdump(0x80, &[0x00, b'A', 0xFF]);
        let row = dump.lines().nth(1).unwrap();
        assert!(row.starts_with("80: 00 41 ff"));
        assert!(row.ends_with("    .A."));
        assert_eq!(row.len(), "80:".len() + 16 * 3 + 4 + 3);
    }

    #[test]
    fn simulated_session() {
        let xcvr = open(true).unwrap();
        cmd_dump(&xcvr, 5, false).unwrap();
        cmd_page(&xcvr, 5, 1, false).unwrap();
        cmd_poke(&xcvr, 64, DOM_ADDR, 0x10, &[1, 2]).unwrap();
        assert_eq!(
            xcvr.read_block(64, DOM_ADDR, 0x10, 2).unwrap(),
            Some(vec![1, 2])
        );
        cmd_tx_disable(&xcvr, 5, Some(Switch::On)).unwrap();
        assert_eq!(xcvr.cmis_tx_disable(5).unwrap(), Some(true));
        assert!(cmd_dump(&xcvr, 5, true).is_err());
    }
}
