//! Bank facade
//!
//! The registry owns every probed [`FlashBank`] and is the public surface
//! of the driver: callers hold opaque handles and hand in their bus for
//! each operation. Byte-oriented writes are decomposed here into the word
//! and buffer programs the state machine understands.

use heapless::Vec;

use crate::bank::{BankInfo, CmdSetCaps, FlashBank};
use crate::bus::FlashBus;
use crate::cmd;
use crate::detect;
use crate::error::{Error, Result};
use crate::ops::{self, NoProgress, Progress};

/// Hard cap on the number of banks the registry tracks
pub const MAX_BANKS: usize = 4;

/// Opaque reference to one registered bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankHandle(usize);

/// Outcome of an erase over a sector range
///
/// Protected sectors are skipped, not failed; a range that turned out to
/// be fully protected simply reports zero erased.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EraseSummary {
    /// Sectors actually erased
    pub erased: usize,
    /// Protected sectors skipped
    pub skipped: usize,
}

/// Direction of a protect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectOp {
    /// Set the lock bits over the range
    Set,
    /// Clear the lock bits over the range
    Clear,
}

/// Registry of all probed flash banks
pub struct BankRegistry {
    banks: Vec<FlashBank, MAX_BANKS>,
}

impl BankRegistry {
    /// Probe every configured base address
    ///
    /// Returns the registry and the summed size of all detected banks.
    /// Banks that fail identification stay registered (so handles line up
    /// with the configuration) but refuse every operation.
    pub fn init<B: FlashBus>(bus: &mut B, bases: &[u32]) -> (Self, u64) {
        let mut banks: Vec<FlashBank, MAX_BANKS> = Vec::new();
        let mut total = 0u64;

        for &base in bases {
            if banks.is_full() {
                log::warn!("too many flash banks, ignoring {:#010x}", base);
                break;
            }
            let bank = detect::probe_bank(bus, base);
            if bank.is_detected() {
                total += bank.size as u64;
            } else {
                log::warn!("unknown flash on bank at {:#010x}", base);
            }
            let _ = banks.push(bank);
        }

        (BankRegistry { banks }, total)
    }

    /// Number of registered banks, detected or not
    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    /// Handles for every registered bank, in configuration order
    pub fn handles(&self) -> impl Iterator<Item = BankHandle> + '_ {
        (0..self.banks.len()).map(BankHandle)
    }

    /// Access a bank's description
    pub fn bank(&self, handle: BankHandle) -> Option<&FlashBank> {
        self.banks.get(handle.0)
    }

    /// Read-only diagnostic report for a bank
    pub fn bank_info(&self, handle: BankHandle) -> Option<BankInfo<'_>> {
        self.bank(handle).map(FlashBank::info)
    }

    fn detected_bank(&self, handle: BankHandle) -> Result<&FlashBank> {
        match self.banks.get(handle.0) {
            Some(bank) if bank.is_detected() => Ok(bank),
            _ => Err(Error::UnknownDevice),
        }
    }

    fn detected_bank_mut(&mut self, handle: BankHandle) -> Result<&mut FlashBank> {
        match self.banks.get_mut(handle.0) {
            Some(bank) if bank.is_detected() => Ok(bank),
            _ => Err(Error::UnknownDevice),
        }
    }

    /// Erase an inclusive sector range, skipping protected sectors
    pub fn erase<B: FlashBus>(
        &self,
        bus: &mut B,
        handle: BankHandle,
        first: usize,
        last: usize,
    ) -> Result<EraseSummary> {
        self.erase_with(bus, handle, first, last, &mut NoProgress)
    }

    /// [`erase`](BankRegistry::erase) with a progress observer
    pub fn erase_with<B: FlashBus, P: Progress>(
        &self,
        bus: &mut B,
        handle: BankHandle,
        first: usize,
        last: usize,
        progress: &mut P,
    ) -> Result<EraseSummary> {
        let bank = self.detected_bank(handle)?;
        if first > last || last >= bank.sector_count() {
            return Err(Error::InvalidSectorRange);
        }

        let mut summary = EraseSummary::default();
        for sector in first..=last {
            if bank.sectors[sector].protected {
                summary.skipped += 1;
                continue;
            }
            ops::erase_sector(bus, bank, sector, progress)?;
            progress.sector_done(sector);
            summary.erased += 1;
        }

        if summary.skipped > 0 {
            log::warn!(
                "{} of {} sectors protected, not erased",
                summary.skipped,
                summary.skipped + summary.erased
            );
        }
        Ok(summary)
    }

    /// Copy a byte buffer into flash at an arbitrary destination address
    pub fn write_buff<B: FlashBus>(
        &self,
        bus: &mut B,
        handle: BankHandle,
        src: &[u8],
        dest: u32,
    ) -> Result<()> {
        self.write_buff_with(bus, handle, src, dest, &mut NoProgress)
    }

    /// [`write_buff`](BankRegistry::write_buff) with a progress observer
    ///
    /// The range is decomposed into an unaligned head word (merged with
    /// the existing flash contents), an aligned body programmed through
    /// the write buffer where available, and an unaligned tail word. The
    /// first failing step aborts the remainder; already-programmed words
    /// stay programmed.
    pub fn write_buff_with<B: FlashBus, P: Progress>(
        &self,
        bus: &mut B,
        handle: BankHandle,
        src: &[u8],
        dest: u32,
        progress: &mut P,
    ) -> Result<()> {
        let bank = self.detected_bank(handle)?;
        if src.is_empty() {
            return Ok(());
        }
        let bank_end = bank.base as u64 + bank.size as u64;
        if (dest as u64) < bank.base as u64 || dest as u64 + src.len() as u64 > bank_end {
            return Err(Error::InvalidSectorRange);
        }

        let port_bytes = bank.port_width.bytes();
        let mut addr = dest & !(port_bytes - 1);
        let mut src_pos = 0usize;

        // Unaligned head: preserve the bytes below `dest`
        let head = (dest - addr) as usize;
        if head != 0 {
            let mut bytes = cmd::read_word(bus, addr, bank.port_width).to_le_bytes();
            let mut i = head;
            while i < port_bytes as usize && src_pos < src.len() {
                bytes[i] = src[src_pos];
                src_pos += 1;
                i += 1;
            }
            ops::program_word(bus, bank, addr, u32::from_le_bytes(bytes), progress)?;
            addr += port_bytes;
        }

        // Aligned body
        let mut remaining = src.len() - src_pos;
        if bank.caps.contains(CmdSetCaps::BUFFERED) {
            let buffered_bytes = bank.lanes() * bank.buffer_size;
            while remaining >= port_bytes as usize {
                // Stop each chunk at the next buffer-aligned boundary
                let gap = buffered_bytes - (addr - bank.base) % buffered_bytes;
                let mut chunk = gap.min(remaining as u32);
                chunk -= chunk % port_bytes;
                if chunk == 0 {
                    // Boundary closer than one word; program across it
                    let mut bytes = [0u8; 4];
                    bytes[..port_bytes as usize]
                        .copy_from_slice(&src[src_pos..src_pos + port_bytes as usize]);
                    ops::program_word(bus, bank, addr, u32::from_le_bytes(bytes), progress)?;
                    addr += port_bytes;
                    src_pos += port_bytes as usize;
                    remaining -= port_bytes as usize;
                    continue;
                }
                ops::program_buffer(
                    bus,
                    bank,
                    addr,
                    &src[src_pos..src_pos + chunk as usize],
                    progress,
                )?;
                addr += chunk;
                src_pos += chunk as usize;
                remaining -= chunk as usize;
            }
        } else {
            while remaining >= port_bytes as usize {
                let mut bytes = [0u8; 4];
                bytes[..port_bytes as usize]
                    .copy_from_slice(&src[src_pos..src_pos + port_bytes as usize]);
                ops::program_word(bus, bank, addr, u32::from_le_bytes(bytes), progress)?;
                addr += port_bytes;
                src_pos += port_bytes as usize;
                remaining -= port_bytes as usize;
            }
        }

        // Unaligned tail: preserve the bytes past the end of `src`
        if remaining > 0 {
            let mut bytes = cmd::read_word(bus, addr, bank.port_width).to_le_bytes();
            bytes[..remaining].copy_from_slice(&src[src_pos..]);
            ops::program_word(bus, bank, addr, u32::from_le_bytes(bytes), progress)?;
        }

        Ok(())
    }

    /// Set or clear hardware protection over an inclusive address range
    pub fn protect<B: FlashBus>(
        &mut self,
        bus: &mut B,
        handle: BankHandle,
        op: ProtectOp,
        start: u32,
        end: u32,
    ) -> Result<()> {
        self.protect_with(bus, handle, op, start, end, &mut NoProgress)
    }

    /// [`protect`](BankRegistry::protect) with a progress observer
    pub fn protect_with<B: FlashBus, P: Progress>(
        &mut self,
        bus: &mut B,
        handle: BankHandle,
        op: ProtectOp,
        start: u32,
        end: u32,
        progress: &mut P,
    ) -> Result<()> {
        let bank = self.detected_bank_mut(handle)?;
        let bank_end = bank.base as u64 + bank.size as u64;
        if start > end || (start as u64) < bank.base as u64 || end as u64 >= bank_end {
            return Err(Error::InvalidSectorRange);
        }

        let first = bank.find_sector(start);
        let last = bank.find_sector(end);
        let set = matches!(op, ProtectOp::Set);

        for sector in first..=last {
            ops::protect_sector(bus, bank, sector, set, progress)?;
            if !set && bank.caps.contains(CmdSetCaps::LEGACY_UNLOCK) {
                // Clearing one lock bit dropped the whole bank's lock
                // register; re-assert every other sector that was locked.
                for other in 0..bank.sector_count() {
                    if other != sector && bank.sectors[other].protected {
                        ops::protect_sector(bus, bank, other, true, progress)?;
                    }
                }
            }
        }
        Ok(())
    }
}
