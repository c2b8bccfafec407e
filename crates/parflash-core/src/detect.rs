//! Chip identification
//!
//! An unprobed bank is just a base address. Identification walks the
//! candidate (port width, chip width) pairs from narrowest up, asking each
//! one first for a CFI query block and then for a legacy autoselect ID,
//! flipping the byte-order assumption once per pair when the response looks
//! populated but inconsistent. Whatever the outcome, every attempt ends
//! with a reset so the bank is back in read-array mode.

use crate::bank::{CmdSet, CmdSetCaps, FlashBank, Sector, Vendor};
use crate::bus::{ChipWidth, FlashBus, PortWidth};
use crate::cfi::{self, CfiQuery, QUERY_LEN};
use crate::cmd::{self, opcodes};
use crate::jedec::{self, JedecChip};

/// One width/byte-order assumption under test
#[derive(Debug, Clone, Copy)]
struct Candidate {
    base: u32,
    port: PortWidth,
    chip: ChipWidth,
    swap: bool,
}

impl Candidate {
    fn addr(&self, offset: u32) -> u32 {
        self.base + offset * self.port.bytes()
    }

    fn write_cmd<B: FlashBus + ?Sized>(&self, bus: &mut B, offset: u32, op: u8) {
        cmd::write_cmd(bus, self.addr(offset), self.port, self.chip, op);
    }

    fn read_byte<B: FlashBus + ?Sized>(&self, bus: &mut B, offset: u32) -> u8 {
        cmd::read_byte(bus, self.addr(offset), self.port, self.swap)
    }

    fn read_word<B: FlashBus + ?Sized>(&self, bus: &mut B, offset: u32) -> u32 {
        let word = cmd::read_word(bus, self.addr(offset), self.port);
        if self.swap {
            cmd::swap_word(word, self.port)
        } else {
            word
        }
    }

    /// Lane value at `offset`, if every chip lane agrees
    fn read_lane<B: FlashBus + ?Sized>(&self, bus: &mut B, offset: u32) -> Option<u32> {
        cmd::lane_value(self.read_word(bus, offset), self.port, self.chip)
    }

    fn is_equal<B: FlashBus + ?Sized>(&self, bus: &mut B, offset: u32, op: u8) -> bool {
        cmd::is_equal(bus, self.addr(offset), self.port, self.chip, self.swap, op)
    }

    /// Reset in both dialects; the wrong one is ignored by the device
    fn reset_both<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        self.write_cmd(bus, 0, opcodes::AMD_RESET);
        self.write_cmd(bus, 0, opcodes::INTEL_RESET);
    }
}

/// Identify the chip bank at `base`
///
/// Returns an `Unknown` bank when nothing answers; the bank is left in
/// read-array mode either way.
pub(crate) fn probe_bank<B: FlashBus>(bus: &mut B, base: u32) -> FlashBank {
    for port in PortWidth::ALL {
        for chip in ChipWidth::ALL {
            if chip.bytes() > port.bytes() {
                continue;
            }
            let mut cand = Candidate {
                base,
                port,
                chip,
                swap: false,
            };
            loop {
                log::trace!(
                    "probing {:#010x} port {} chip {} swap {}",
                    base,
                    cand.port.bits(),
                    cand.chip.bits(),
                    cand.swap
                );
                if let Some((qry, cfi_offset)) = try_cfi(bus, &cand) {
                    return build_cfi_bank(bus, cand, cfi_offset, qry);
                }
                let (matched, first_bytes) = try_legacy(bus, &cand);
                if let Some((chip_entry, mfr, dev)) = matched {
                    return build_legacy_bank(bus, cand, chip_entry, mfr, dev);
                }
                cand.reset_both(bus);
                // A populated but unmatched ID response suggests the byte
                // order is reversed; retry this pair once swapped.
                if !cand.swap && first_bytes.0 != 0 && first_bytes.1 != 0 {
                    cand.swap = true;
                    continue;
                }
                break;
            }
        }
    }

    log::debug!("no flash found at {:#010x}", base);
    FlashBank::unknown(base)
}

/// Ask for a CFI query block at both standard query offsets
fn try_cfi<B: FlashBus>(bus: &mut B, cand: &Candidate) -> Option<(CfiQuery, u32)> {
    cand.reset_both(bus);

    for &cfi_offset in &[opcodes::CFI_QUERY_OFFSET, opcodes::CFI_QUERY_OFFSET_ALT] {
        cand.write_cmd(bus, cfi_offset, opcodes::CFI_QUERY);
        if cand.is_equal(bus, opcodes::CFI_QUERY_RESP, b'Q')
            && cand.is_equal(bus, opcodes::CFI_QUERY_RESP + 1, b'R')
            && cand.is_equal(bus, opcodes::CFI_QUERY_RESP + 2, b'Y')
        {
            let mut raw = [0u8; QUERY_LEN];
            for (i, byte) in raw.iter_mut().enumerate() {
                *byte = cand.read_byte(bus, opcodes::CFI_QUERY_RESP + i as u32);
            }
            log::debug!(
                "CFI query answered at offset {:#x}, port {} chip {}",
                cfi_offset,
                cand.port.bits(),
                cand.chip.bits()
            );
            return Some((CfiQuery::parse(&raw), cfi_offset));
        }
    }
    None
}

/// Probe the legacy autoselect path against the built-in device table
///
/// Also returns the first two response bytes of the autoselect read, which
/// drive the byte-order retry heuristic.
fn try_legacy<B: FlashBus>(
    bus: &mut B,
    cand: &Candidate,
) -> (Option<(&'static JedecChip, u16, u16)>, (u8, u8)) {
    let mut first_bytes = (0u8, 0u8);

    for &cmd_set in &[CmdSet::Amd, CmdSet::Intel] {
        match cmd_set {
            CmdSet::Amd => {
                cand.write_cmd(bus, 0, opcodes::AMD_RESET);
                cand.write_cmd(bus, opcodes::UNLOCK1_LEGACY, opcodes::AMD_UNLOCK_START);
                cand.write_cmd(bus, opcodes::UNLOCK2_LEGACY, opcodes::AMD_UNLOCK_ACK);
                cand.write_cmd(bus, opcodes::UNLOCK1_LEGACY, opcodes::READ_ID);
            }
            CmdSet::Intel => {
                cand.write_cmd(bus, 0, opcodes::INTEL_RESET);
                cand.write_cmd(bus, 0, opcodes::READ_ID);
            }
        }
        bus.delay_us(1000); // some parts are slow to respond

        if first_bytes == (0, 0) {
            first_bytes = (
                cand.read_byte(bus, opcodes::OFFSET_MANUFACTURER_ID),
                cand.read_byte(bus, opcodes::OFFSET_DEVICE_ID),
            );
        }

        let mfr_lane = cand.read_lane(bus, opcodes::OFFSET_MANUFACTURER_ID);
        let dev_lane = cand.read_lane(bus, opcodes::OFFSET_DEVICE_ID);
        cand.write_cmd(bus, 0, cmd_set.reset_cmd());

        // Manufacturer codes are byte-valued; a wider lane value means the
        // width assumption folded two chips into one lane.
        let mfr = match mfr_lane {
            Some(lane) if lane <= 0xFF => lane as u16,
            _ => continue,
        };
        let dev = match dev_lane {
            Some(lane) if lane <= 0xFFFF => lane as u16,
            _ => continue,
        };

        if let Some(chip_entry) = jedec::find(mfr, dev) {
            if chip_entry.cmd_set == cmd_set {
                log::debug!(
                    "legacy id match {:#04x}/{:#06x}: {}",
                    mfr,
                    dev,
                    chip_entry.name
                );
                return (Some((chip_entry, mfr, dev)), first_bytes);
            }
        }
    }

    (None, first_bytes)
}

/// Read the JEDEC IDs with the selected dialect's own sequence
fn read_jedec_ids<B: FlashBus>(
    bus: &mut B,
    cand: &Candidate,
    cmd_set: CmdSet,
    unlock1: u32,
    unlock2: u32,
) -> (u16, u16) {
    match cmd_set {
        CmdSet::Intel => {
            cand.write_cmd(bus, 0, opcodes::INTEL_RESET);
            cand.write_cmd(bus, 0, opcodes::READ_ID);
            bus.delay_us(1000);
            let mfr = cand.read_byte(bus, opcodes::OFFSET_MANUFACTURER_ID) as u16;
            let dev = cand.read_byte(bus, opcodes::OFFSET_DEVICE_ID) as u16;
            cand.write_cmd(bus, 0, opcodes::INTEL_RESET);
            (mfr, dev)
        }
        CmdSet::Amd => {
            cand.write_cmd(bus, 0, opcodes::AMD_RESET);
            cand.write_cmd(bus, unlock1, opcodes::AMD_UNLOCK_START);
            cand.write_cmd(bus, unlock2, opcodes::AMD_UNLOCK_ACK);
            cand.write_cmd(bus, unlock1, opcodes::READ_ID);
            bus.delay_us(1000);
            let mfr = cand.read_byte(bus, opcodes::OFFSET_MANUFACTURER_ID) as u16;
            let dev = match cand.chip {
                ChipWidth::X8 => cand.read_byte(bus, opcodes::OFFSET_DEVICE_ID) as u16,
                ChipWidth::X16 => {
                    (cand.read_word(bus, opcodes::OFFSET_DEVICE_ID) & 0xFFFF) as u16
                }
            };
            cand.write_cmd(bus, 0, opcodes::AMD_RESET);
            (mfr, dev)
        }
    }
}

/// Finish classification of a CFI-conformant bank
fn build_cfi_bank<B: FlashBus>(
    bus: &mut B,
    cand: Candidate,
    _cfi_offset: u32,
    mut qry: CfiQuery,
) -> FlashBank {
    let cmd_set = match qry.cmd_set_id {
        cfi::CMDSET_INTEL_EXTENDED | cfi::CMDSET_INTEL_STANDARD => CmdSet::Intel,
        cfi::CMDSET_AMD_STANDARD | cfi::CMDSET_AMD_EXTENDED => CmdSet::Amd,
        other => {
            // No way to know how to leave whatever mode the part is in;
            // an Intel-style reset is the least bad guess.
            log::warn!("CFI: unknown command set {:#06x}", other);
            cand.write_cmd(bus, 0, opcodes::INTEL_RESET);
            return FlashBank::unknown(cand.base);
        }
    };

    // Extended query bytes, read while the part still answers in query mode
    let ext = qry.ext_table_offset as u32;
    let (cfi_version, ext_legacy_unlock, ext_boot_flag, ext_top_bit) = if ext != 0 {
        (
            (cand.read_byte(bus, ext + 3) as u16) << 8 | cand.read_byte(bus, ext + 4) as u16,
            cand.read_byte(bus, ext + 5) & 0x08 != 0,
            cand.read_byte(bus, ext + 0xF),
            cand.read_byte(bus, ext + 6),
        )
    } else {
        (0, false, 0, 0)
    };

    let (mut unlock1, mut unlock2) = (opcodes::UNLOCK1, opcodes::UNLOCK2);
    let compat_mode = (cand.chip == ChipWidth::X8 && qry.interface_desc == cfi::INTERFACE_X8X16)
        || (cand.chip == ChipWidth::X16 && qry.interface_desc == cfi::INTERFACE_X16X32);
    if compat_mode {
        unlock1 = opcodes::UNLOCK1_COMPAT;
        unlock2 = opcodes::UNLOCK2_COMPAT;
    }

    let (manufacturer_id, device_id) = read_jedec_ids(bus, &cand, cmd_set, unlock1, unlock2);

    match manufacturer_id {
        0x0001 => {
            if cfi::amd_geometry_reversed(&qry, device_id, cfi_version, ext_boot_flag) {
                qry.reverse_regions();
            }
        }
        0x001F => {
            if cfi::atmel_geometry_reversed(&qry, ext_top_bit) {
                qry.reverse_regions();
            }
        }
        _ => {}
    }

    let size_ratio = cand.port.bytes() / cand.chip.bytes();
    let geometry = cfi::decode_geometry(&qry, cand.base, size_ratio);
    let timeouts = cfi::decode_timeouts(&qry);
    let buffer_size = cfi::decode_buffer_size(&qry);

    let mut caps = CmdSetCaps::empty();
    if buffer_size > 1 {
        caps |= CmdSetCaps::BUFFERED;
    }
    if cmd_set == CmdSet::Intel && ext_legacy_unlock {
        caps |= CmdSetCaps::LEGACY_UNLOCK;
    }

    let mut bank = FlashBank {
        base: cand.base,
        port_width: cand.port,
        chip_width: cand.chip,
        byte_swap: cand.swap,
        vendor: Vendor::classify(cmd_set, manufacturer_id),
        cmd_set,
        caps,
        manufacturer_id,
        device_id,
        name: "CFI conformant",
        sectors: geometry.sectors,
        size: geometry.size,
        buffer_size,
        erase_timeout_ms: timeouts.erase_ms,
        write_timeout_ms: timeouts.write_ms,
        buffer_write_timeout_ms: timeouts.buffer_ms,
        addr_unlock1: unlock1,
        addr_unlock2: unlock2,
    };

    probe_protection(bus, &mut bank);
    bank.reset(bus, 0);

    log::debug!(
        "{} {:#04x}/{:#06x}: {} bytes, {} sectors, cfi {:#06x}",
        bank.vendor.name(),
        bank.manufacturer_id,
        bank.device_id,
        bank.size,
        bank.sector_count(),
        cfi_version
    );
    bank
}

/// Finish classification of a table-matched legacy bank
fn build_legacy_bank<B: FlashBus>(
    bus: &mut B,
    cand: Candidate,
    chip_entry: &'static JedecChip,
    manufacturer_id: u16,
    device_id: u16,
) -> FlashBank {
    let size_ratio = cand.port.bytes() / cand.chip.bytes();
    let sector_bytes = chip_entry.sector_size * size_ratio;

    let mut sectors = heapless::Vec::new();
    for i in 0..chip_entry.sector_count {
        if sectors
            .push(Sector {
                start: cand.base + i * sector_bytes,
                protected: false,
            })
            .is_err()
        {
            log::warn!("too many flash sectors, table truncated");
            break;
        }
    }

    let mut caps = chip_entry.caps;
    if chip_entry.buffer_size > 1 {
        caps |= CmdSetCaps::BUFFERED;
    }

    let mut bank = FlashBank {
        base: cand.base,
        port_width: cand.port,
        chip_width: cand.chip,
        byte_swap: cand.swap,
        vendor: Vendor::classify(chip_entry.cmd_set, manufacturer_id),
        cmd_set: chip_entry.cmd_set,
        caps,
        manufacturer_id,
        device_id,
        name: chip_entry.name,
        sectors,
        size: chip_entry.sector_count * sector_bytes,
        buffer_size: chip_entry.buffer_size,
        erase_timeout_ms: jedec::DEFAULT_ERASE_TIMEOUT_MS,
        write_timeout_ms: jedec::DEFAULT_WRITE_TIMEOUT_MS,
        buffer_write_timeout_ms: jedec::DEFAULT_BUFFER_TIMEOUT_MS,
        addr_unlock1: opcodes::UNLOCK1_LEGACY,
        addr_unlock2: opcodes::UNLOCK2_LEGACY,
    };

    probe_protection(bus, &mut bank);
    bank.reset(bus, 0);

    log::debug!(
        "{} {}: {} bytes, {} sectors",
        bank.vendor.name(),
        bank.name,
        bank.size,
        bank.sector_count()
    );
    bank
}

/// Populate the initial per-sector protection flags
///
/// Enters read-ID mode and samples each sector's lock status bit. The
/// caller resets the bank afterwards.
fn probe_protection<B: FlashBus>(bus: &mut B, bank: &mut FlashBank) {
    match bank.cmd_set {
        CmdSet::Intel => bank.write_cmd(bus, 0, 0, opcodes::READ_ID),
        CmdSet::Amd => {
            bank.unlock_seq(bus, 0);
            bank.write_cmd(bus, 0, bank.addr_unlock1, opcodes::READ_ID);
        }
    }
    for sector in 0..bank.sector_count() {
        let protected = bank.is_set(
            bus,
            sector,
            opcodes::OFFSET_PROTECT,
            opcodes::STATUS_PROTECT,
        );
        bank.sectors[sector].protected = protected;
    }
}
