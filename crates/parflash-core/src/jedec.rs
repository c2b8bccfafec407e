//! Legacy (pre-CFI) device table
//!
//! Chips that answer the autoselect ID sequence but carry no query block
//! are matched here by manufacturer and device ID. All listed parts have
//! uniform sector layouts; timing falls back to conservative defaults
//! since there is no parameter block to derive it from.

use crate::bank::{CmdSet, CmdSetCaps};

/// Fallback block erase budget for table-matched chips
pub(crate) const DEFAULT_ERASE_TIMEOUT_MS: u64 = 16_000;
/// Fallback word program budget for table-matched chips
pub(crate) const DEFAULT_WRITE_TIMEOUT_MS: u64 = 500;
/// Fallback buffered program budget for table-matched chips
pub(crate) const DEFAULT_BUFFER_TIMEOUT_MS: u64 = 1_000;

/// One known pre-CFI chip
#[derive(Debug, Clone, Copy)]
pub(crate) struct JedecChip {
    pub manufacturer_id: u16,
    pub device_id: u16,
    pub name: &'static str,
    pub cmd_set: CmdSet,
    pub caps: CmdSetCaps,
    pub sector_size: u32,
    pub sector_count: u32,
    pub buffer_size: u32,
}

/// Known devices, matched against the masked 16-bit ID pair
pub(crate) const CHIPS: &[JedecChip] = &[
    // Intel StrataFlash J3 family. Unprotecting one block clears the
    // whole lock register, and the erase handshake wants a trailing
    // resume opcode.
    JedecChip {
        manufacturer_id: 0x89,
        device_id: 0x16,
        name: "28F320J3",
        cmd_set: CmdSet::Intel,
        caps: CmdSetCaps::BUFFERED
            .union(CmdSetCaps::ERASE_RESUME)
            .union(CmdSetCaps::LEGACY_UNLOCK),
        sector_size: 0x20000,
        sector_count: 32,
        buffer_size: 32,
    },
    JedecChip {
        manufacturer_id: 0x89,
        device_id: 0x17,
        name: "28F640J3",
        cmd_set: CmdSet::Intel,
        caps: CmdSetCaps::BUFFERED
            .union(CmdSetCaps::ERASE_RESUME)
            .union(CmdSetCaps::LEGACY_UNLOCK),
        sector_size: 0x20000,
        sector_count: 64,
        buffer_size: 32,
    },
    JedecChip {
        manufacturer_id: 0x89,
        device_id: 0x18,
        name: "28F128J3",
        cmd_set: CmdSet::Intel,
        caps: CmdSetCaps::BUFFERED
            .union(CmdSetCaps::ERASE_RESUME)
            .union(CmdSetCaps::LEGACY_UNLOCK),
        sector_size: 0x20000,
        sector_count: 128,
        buffer_size: 32,
    },
    JedecChip {
        manufacturer_id: 0xB0,
        device_id: 0xAA,
        name: "LH28F016SC",
        cmd_set: CmdSet::Intel,
        caps: CmdSetCaps::empty(),
        sector_size: 0x10000,
        sector_count: 32,
        buffer_size: 1,
    },
    JedecChip {
        manufacturer_id: 0x01,
        device_id: 0xA4,
        name: "AM29F040",
        cmd_set: CmdSet::Amd,
        caps: CmdSetCaps::empty(),
        sector_size: 0x10000,
        sector_count: 8,
        buffer_size: 1,
    },
    JedecChip {
        manufacturer_id: 0x01,
        device_id: 0x4F,
        name: "AM29LV040B",
        cmd_set: CmdSet::Amd,
        caps: CmdSetCaps::empty(),
        sector_size: 0x10000,
        sector_count: 8,
        buffer_size: 1,
    },
    JedecChip {
        manufacturer_id: 0x04,
        device_id: 0xA4,
        name: "MBM29F040",
        cmd_set: CmdSet::Amd,
        caps: CmdSetCaps::empty(),
        sector_size: 0x10000,
        sector_count: 8,
        buffer_size: 1,
    },
];

/// Look up a chip by its masked ID pair
pub(crate) fn find(manufacturer_id: u16, device_id: u16) -> Option<&'static JedecChip> {
    CHIPS
        .iter()
        .find(|chip| chip.manufacturer_id == manufacturer_id && chip.device_id == device_id)
}
