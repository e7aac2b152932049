// SPDX-License-Identifier: AGPL-3.0-only

//! Front-panel port table.
//!
//! 64 QSFP-DD ports in four groups of sixteen plus two SFP management ports.
//! Each group has its own control page and shadow window; within a group the
//! port is picked by the channel field of the command register.
//!
//! ```text
//! Ports   ctrl_addr  mem_addr  channel  EEPROM bus
//! ──────  ─────────  ────────  ───────  ──────────
//!  0-15   0x1000     0x000     1-16     18-33
//! 16-31   0x3000     0x200     1-16     52-67
//! 32-47   0x2000     0x100     1-16     34-49
//! 48-63   0x4000     0x300     1-16     68-83
//!  64     0x5000     0x400     0        50
//!  65     0x6000     0x500     0        51
//! ```

/// Number of ports behind the bridge.
pub const PORT_COUNT: usize = 66;

/// Module form factor of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// QSFP-DD cage (paged memory map at 0x50).
    QsfpDd,
    /// SFP management port (EEPROM at 0x50, diagnostics at 0x51).
    Sfp,
}

/// Static routing of one port through the FPGA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Front-panel port number.
    pub port: u16,
    /// Control page of the port group (logical word address).
    pub ctrl_addr: u32,
    /// Shadow-memory window of the port group (logical word address).
    pub mem_addr: u32,
    /// Channel select inside the group.
    pub channel: u8,
    /// Kernel I2C bus number of the same EEPROM when the FPGA path is off.
    pub eeprom_bus: u16,
    /// Form factor.
    pub kind: PortKind,
}

/// Control page and shadow window of one group of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortGroup {
    /// First port of the group.
    pub first_port: u16,
    /// Number of ports.
    pub ports: u16,
    /// Control page.
    pub ctrl_addr: u32,
    /// Shadow window.
    pub mem_addr: u32,
    /// Channel of the first port.
    pub first_channel: u8,
    /// I2C bus of the first port.
    pub first_bus: u16,
    /// Form factor.
    pub kind: PortKind,
}

/// Port groups in port order.
pub const PORT_GROUPS: [PortGroup; 6] = [
    PortGroup { first_port: 0, ports: 16, ctrl_addr: 0x1000, mem_addr: 0x000, first_channel: 1, first_bus: 18, kind: PortKind::QsfpDd },
    PortGroup { first_port: 16, ports: 16, ctrl_addr: 0x3000, mem_addr: 0x200, first_channel: 1, first_bus: 52, kind: PortKind::QsfpDd },
    PortGroup { first_port: 32, ports: 16, ctrl_addr: 0x2000, mem_addr: 0x100, first_channel: 1, first_bus: 34, kind: PortKind::QsfpDd },
    PortGroup { first_port: 48, ports: 16, ctrl_addr: 0x4000, mem_addr: 0x300, first_channel: 1, first_bus: 68, kind: PortKind::QsfpDd },
    PortGroup { first_port: 64, ports: 1, ctrl_addr: 0x5000, mem_addr: 0x400, first_channel: 0, first_bus: 50, kind: PortKind::Sfp },
    PortGroup { first_port: 65, ports: 1, ctrl_addr: 0x6000, mem_addr: 0x500, first_channel: 0, first_bus: 51, kind: PortKind::Sfp },
];

const fn build_table() -> [PortDescriptor; PORT_COUNT] {
    let mut table = [PortDescriptor {
        port: 0,
        ctrl_addr: 0,
        mem_addr: 0,
        channel: 0,
        eeprom_bus: 0,
        kind: PortKind::QsfpDd,
    }; PORT_COUNT];

    let mut g = 0;
    while g < PORT_GROUPS.len() {
        let group = PORT_GROUPS[g];
        let mut i = 0;
        while i < group.ports {
            let port = group.first_port + i;
            #[allow(clippy::cast_possible_truncation)]
            let channel = group.first_channel + i as u8;
            table[port as usize] = PortDescriptor {
                port,
                ctrl_addr: group.ctrl_addr,
                mem_addr: group.mem_addr,
                channel,
                eeprom_bus: group.first_bus + i,
                kind: group.kind,
            };
            i += 1;
        }
        g += 1;
    }
    table
}

/// Every port, indexed by port number.
pub static PORT_TABLE: [PortDescriptor; PORT_COUNT] = build_table();

/// Look up a port.
#[must_use]
pub fn port(port: usize) -> Option<&'static PortDescriptor> {
    PORT_TABLE.get(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_cover_every_port_once() {
        let total: u16 = PORT_GROUPS.iter().map(|g| g.ports).sum();
        assert_eq!(usize::from(total), PORT_COUNT);
        for (i, p) in PORT_TABLE.iter().enumerate() {
            assert_eq!(usize::from(p.port), i);
        }
    }

    #[test]
    fn known_rows() {
        let p5 = port(5).unwrap();
        assert_eq!((p5.ctrl_addr, p5.mem_addr, p5.channel, p5.eeprom_bus), (0x1000, 0x000, 6, 23));

        let p16 = port(16).unwrap();
        assert_eq!((p16.ctrl_addr, p16.mem_addr, p16.channel, p16.eeprom_bus), (0x3000, 0x200, 1, 52));

        let p47 = port(47).unwrap();
        assert_eq!((p47.ctrl_addr, p47.mem_addr, p47.channel, p47.eeprom_bus), (0x2000, 0x100, 16, 49));

        let p65 = port(65).unwrap();
        assert_eq!((p65.ctrl_addr, p65.mem_addr, p65.channel, p65.kind), (0x6000, 0x500, 0, PortKind::Sfp));

        assert!(port(PORT_COUNT).is_none());
    }

    #[test]
    fn channels_are_unique_per_group() {
        let mut seen: Vec<(u32, u8)> = PORT_TABLE.iter().map(|p| (p.ctrl_addr, p.channel)).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), PORT_COUNT);
    }
}
