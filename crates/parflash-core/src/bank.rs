//! Flash bank data model
//!
//! A [`FlashBank`] describes one physical chip bank behind a base address:
//! detected widths, command-set variant, sector table, and the timing
//! constants derived from the device's parameter block. It is constructed
//! once at identification time and never resized afterwards; the per-sector
//! protection flags are the only state that changes later.

use core::fmt;

use bitflags::bitflags;
use heapless::Vec;

use crate::bus::{ChipWidth, FlashBus, PortWidth};
use crate::cmd::{self, opcodes};

/// Hard cap on the number of sectors a bank can describe
pub const MAX_SECTORS: usize = 512;

/// One erase sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    /// Absolute start address
    pub start: u32,
    /// Hardware lock bit state
    pub protected: bool,
}

/// Vendor family the bank's chip belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// Identification failed; the bank is unusable
    Unknown,
    /// Intel
    Intel,
    /// Sharp (Intel command set)
    Sharp,
    /// AMD
    Amd,
    /// Fujitsu (AMD command set)
    Fujitsu,
}

/// Command-set dialect selected at identification time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdSet {
    /// Intel/Sharp style: status register, ready bit polling
    Intel,
    /// AMD/Fujitsu style: unlock sequences, toggle-bit polling
    Amd,
}

bitflags! {
    /// Per-variant capabilities and quirks
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdSetCaps: u8 {
        /// Buffered block programming is usable
        const BUFFERED = 1 << 0;
        /// Issue the erase resume opcode after erase confirm (errata on
        /// one legacy Intel family)
        const ERASE_RESUME = 1 << 1;
        /// Clearing one sector's lock bit clears the whole bank's lock
        /// register; other sectors must be re-locked afterwards
        const LEGACY_UNLOCK = 1 << 2;
    }
}

impl Vendor {
    /// Classify from the selected command set and the manufacturer ID
    pub fn classify(cmd_set: CmdSet, manufacturer_id: u16) -> Vendor {
        match (cmd_set, manufacturer_id) {
            (CmdSet::Intel, 0xB0) => Vendor::Sharp,
            (CmdSet::Intel, _) => Vendor::Intel,
            (CmdSet::Amd, 0x04) => Vendor::Fujitsu,
            (CmdSet::Amd, _) => Vendor::Amd,
        }
    }

    /// Human-readable vendor name
    pub fn name(self) -> &'static str {
        match self {
            Vendor::Unknown => "Unknown",
            Vendor::Intel => "Intel",
            Vendor::Sharp => "Sharp",
            Vendor::Amd => "AMD",
            Vendor::Fujitsu => "Fujitsu",
        }
    }
}

impl CmdSet {
    /// Reset-to-read-array opcode for this dialect
    pub fn reset_cmd(self) -> u8 {
        match self {
            CmdSet::Intel => opcodes::INTEL_RESET,
            CmdSet::Amd => opcodes::AMD_RESET,
        }
    }

    /// Command set name as printed by diagnostics
    pub fn name(self) -> &'static str {
        match self {
            CmdSet::Intel => "Intel Standard",
            CmdSet::Amd => "AMD Standard",
        }
    }
}

/// One detected flash bank
#[derive(Debug)]
pub struct FlashBank {
    /// Base address of the bank's memory window
    pub base: u32,
    /// Detected port width
    pub port_width: PortWidth,
    /// Detected per-chip width
    pub chip_width: ChipWidth,
    /// Byte order of identification/status reads is reversed
    pub byte_swap: bool,
    /// Vendor family, `Unknown` when identification failed
    pub vendor: Vendor,
    /// Command-set dialect used for every operation on this bank
    pub cmd_set: CmdSet,
    /// Variant capabilities
    pub caps: CmdSetCaps,
    /// Manufacturer ID as read from the device
    pub manufacturer_id: u16,
    /// Device ID as read from the device
    pub device_id: u16,
    /// Device name ("CFI conformant" unless matched in the legacy table)
    pub name: &'static str,
    /// Sector table in ascending address order
    pub sectors: Vec<Sector, MAX_SECTORS>,
    /// Total size in bytes
    pub size: u32,
    /// Write buffer size in bytes per chip, 1 when buffered writes are
    /// unsupported
    pub buffer_size: u32,
    /// Block erase timeout budget in milliseconds
    pub erase_timeout_ms: u64,
    /// Single-word program timeout budget in milliseconds
    pub write_timeout_ms: u64,
    /// Buffered program timeout budget in milliseconds
    pub buffer_write_timeout_ms: u64,
    /// First unlock cycle word offset (AMD dialect)
    pub addr_unlock1: u32,
    /// Second unlock cycle word offset (AMD dialect)
    pub addr_unlock2: u32,
}

impl FlashBank {
    /// Placeholder for a bank that failed identification
    pub fn unknown(base: u32) -> Self {
        FlashBank {
            base,
            port_width: PortWidth::X8,
            chip_width: ChipWidth::X8,
            byte_swap: false,
            vendor: Vendor::Unknown,
            cmd_set: CmdSet::Intel,
            caps: CmdSetCaps::empty(),
            manufacturer_id: 0,
            device_id: 0,
            name: "unknown",
            sectors: Vec::new(),
            size: 0,
            buffer_size: 1,
            erase_timeout_ms: 0,
            write_timeout_ms: 0,
            buffer_write_timeout_ms: 0,
            addr_unlock1: opcodes::UNLOCK1,
            addr_unlock2: opcodes::UNLOCK2,
        }
    }

    /// Whether identification succeeded
    pub fn is_detected(&self) -> bool {
        self.vendor != Vendor::Unknown
    }

    /// Number of sectors
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Size in bytes of the given sector
    pub fn sector_size(&self, sector: usize) -> u32 {
        if sector + 1 < self.sectors.len() {
            self.sectors[sector + 1].start - self.sectors[sector].start
        } else {
            self.base + self.size - self.sectors[sector].start
        }
    }

    /// Index of the sector containing `addr`
    ///
    /// Scans from the highest sector down; `addr` must lie within the bank.
    pub fn find_sector(&self, addr: u32) -> usize {
        self.sectors
            .iter()
            .rposition(|s| addr >= s.start)
            .unwrap_or(0)
    }

    /// Number of chip lanes muxed onto the port
    pub fn lanes(&self) -> u32 {
        self.port_width.bytes() / self.chip_width.bytes()
    }

    /// Address of word `offset` within `sector`
    ///
    /// Falls back to the bank base when the sector table is empty.
    pub fn word_addr(&self, sector: usize, offset: u32) -> u32 {
        let start = self.sectors.get(sector).map_or(self.base, |s| s.start);
        start + offset * self.port_width.bytes()
    }

    pub(crate) fn write_cmd<B: FlashBus + ?Sized>(
        &self,
        bus: &mut B,
        sector: usize,
        offset: u32,
        op: u8,
    ) {
        cmd::write_cmd(
            bus,
            self.word_addr(sector, offset),
            self.port_width,
            self.chip_width,
            op,
        );
    }

    pub(crate) fn is_equal<B: FlashBus + ?Sized>(
        &self,
        bus: &mut B,
        sector: usize,
        offset: u32,
        op: u8,
    ) -> bool {
        cmd::is_equal(
            bus,
            self.word_addr(sector, offset),
            self.port_width,
            self.chip_width,
            self.byte_swap,
            op,
        )
    }

    pub(crate) fn is_set<B: FlashBus + ?Sized>(
        &self,
        bus: &mut B,
        sector: usize,
        offset: u32,
        mask: u8,
    ) -> bool {
        cmd::is_set(
            bus,
            self.word_addr(sector, offset),
            self.port_width,
            self.chip_width,
            self.byte_swap,
            mask,
        )
    }

    pub(crate) fn toggled<B: FlashBus + ?Sized>(
        &self,
        bus: &mut B,
        sector: usize,
        offset: u32,
        mask: u8,
    ) -> bool {
        cmd::toggled(
            bus,
            self.word_addr(sector, offset),
            self.port_width,
            self.chip_width,
            mask,
        )
    }

    /// AMD unlock cycle pair, addressed within `sector`
    pub(crate) fn unlock_seq<B: FlashBus + ?Sized>(&self, bus: &mut B, sector: usize) {
        self.write_cmd(bus, sector, self.addr_unlock1, opcodes::AMD_UNLOCK_START);
        self.write_cmd(bus, sector, self.addr_unlock2, opcodes::AMD_UNLOCK_ACK);
    }

    /// Put the bank back into read-array mode
    pub(crate) fn reset<B: FlashBus + ?Sized>(&self, bus: &mut B, sector: usize) {
        self.write_cmd(bus, sector, 0, self.cmd_set.reset_cmd());
    }

    /// Read-only diagnostic view of the bank
    pub fn info(&self) -> BankInfo<'_> {
        BankInfo { bank: self }
    }
}

/// Displayable diagnostic report for a bank
///
/// Pure presentation; rendering it performs no bus access and changes no
/// state.
pub struct BankInfo<'a> {
    bank: &'a FlashBank,
}

impl fmt::Display for BankInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bank = self.bank;
        if !bank.is_detected() {
            return writeln!(f, "missing or unknown FLASH type");
        }

        writeln!(
            f,
            "{} FLASH ({} x {})",
            bank.name,
            bank.port_width.bits(),
            bank.chip_width.bits()
        )?;
        if bank.size < 1024 * 1024 {
            writeln!(
                f,
                "  Size: {} kB in {} Sectors",
                bank.size >> 10,
                bank.sector_count()
            )?;
        } else {
            writeln!(
                f,
                "  Size: {} MB in {} Sectors",
                bank.size >> 20,
                bank.sector_count()
            )?;
        }
        writeln!(
            f,
            "  {} command set, Manufacturer ID: 0x{:02X}, Device ID: 0x{:02X}",
            bank.cmd_set.name(),
            bank.manufacturer_id,
            bank.device_id
        )?;
        writeln!(
            f,
            "  Erase timeout: {} ms, write timeout: {} ms",
            bank.erase_timeout_ms, bank.write_timeout_ms
        )?;
        if bank.buffer_size > 1 {
            writeln!(
                f,
                "  Buffer write timeout: {} ms, buffer size: {} bytes",
                bank.buffer_write_timeout_ms, bank.buffer_size
            )?;
        }

        write!(f, "  Sector Start Addresses:")?;
        for (i, sector) in bank.sectors.iter().enumerate() {
            if i % 5 == 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "  {:08X} {} ",
                sector.start,
                if sector.protected { "RO" } else { "  " }
            )?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_with_sectors(starts: &[u32], size: u32) -> FlashBank {
        let mut bank = FlashBank::unknown(starts[0]);
        bank.vendor = Vendor::Intel;
        bank.size = size;
        for &start in starts {
            bank.sectors
                .push(Sector {
                    start,
                    protected: false,
                })
                .unwrap();
        }
        bank
    }

    #[test]
    fn sector_lookup_scans_downward() {
        let bank = bank_with_sectors(&[0x0000, 0x1000, 0x2000, 0x3000], 0x4000);
        assert_eq!(bank.find_sector(0x0000), 0);
        assert_eq!(bank.find_sector(0x0FFF), 0);
        assert_eq!(bank.find_sector(0x1000), 1);
        assert_eq!(bank.find_sector(0x2FFF), 2);
        assert_eq!(bank.find_sector(0x3FFF), 3);
    }

    #[test]
    fn sector_size_uses_next_start_or_bank_end() {
        let bank = bank_with_sectors(&[0x0000, 0x1000, 0x3000], 0x4000);
        assert_eq!(bank.sector_size(0), 0x1000);
        assert_eq!(bank.sector_size(1), 0x2000);
        assert_eq!(bank.sector_size(2), 0x1000);
    }

    #[test]
    fn word_addresses_scale_with_port_width() {
        let mut bank = bank_with_sectors(&[0x0000, 0x1000], 0x2000);
        bank.port_width = PortWidth::X16;
        // Strictly increasing, no aliasing between word offsets
        let a0 = bank.word_addr(0, 0);
        let a1 = bank.word_addr(0, 1);
        let a2 = bank.word_addr(0, 2);
        assert_eq!(a1 - a0, 2);
        assert_eq!(a2 - a1, 2);
        bank.port_width = PortWidth::X32;
        assert_eq!(bank.word_addr(1, 3), 0x1000 + 12);
    }

    #[test]
    fn vendor_classification() {
        assert_eq!(Vendor::classify(CmdSet::Intel, 0x89), Vendor::Intel);
        assert_eq!(Vendor::classify(CmdSet::Intel, 0xB0), Vendor::Sharp);
        assert_eq!(Vendor::classify(CmdSet::Amd, 0x01), Vendor::Amd);
        assert_eq!(Vendor::classify(CmdSet::Amd, 0x04), Vendor::Fujitsu);
    }
}
