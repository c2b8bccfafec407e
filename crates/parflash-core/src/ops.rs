//! Erase, program, and protect command sequences
//!
//! Each operation issues its dialect's command handshake, polls the status
//! word against the bank's timeout budget, decodes vendor error bits, and
//! always puts the device back into read-array mode before returning,
//! whatever the outcome.

use crate::bank::{CmdSet, CmdSetCaps, FlashBank};
use crate::bus::FlashBus;
use crate::cmd::{self, opcodes, opcodes::IntelStatus};
use crate::error::{Error, HardwareError, Operation, Result};

/// Observer for long-running poll loops
///
/// Separates diagnostics from the timing logic; the default implementation
/// does nothing.
pub trait Progress {
    /// Still busy after another full second of polling
    fn still_busy(&mut self, op: Operation, elapsed_ms: u64) {
        let _ = (op, elapsed_ms);
    }

    /// One sector finished erasing
    fn sector_done(&mut self, sector: usize) {
        let _ = sector;
    }
}

/// A no-op progress observer
pub struct NoProgress;

impl Progress for NoProgress {}

/// Whether the device still reports busy for the addressed sector
fn is_busy<B: FlashBus>(bus: &mut B, bank: &FlashBank, sector: usize) -> bool {
    match bank.cmd_set {
        CmdSet::Intel => !bank.is_set(bus, sector, 0, IntelStatus::READY.bits()),
        CmdSet::Amd => bank.toggled(bus, sector, 0, opcodes::AMD_STATUS_TOGGLE),
    }
}

/// Spin until the device reports ready or the budget expires
///
/// Does not reset the device; callers converge on [`finish`] for that.
fn poll_status<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    sector: usize,
    timeout_ms: u64,
    op: Operation,
    progress: &mut P,
) -> Result<()> {
    let start = bus.elapsed_ms();
    let mut reported_s = 0;

    while is_busy(bus, bank, sector) {
        let elapsed = bus.elapsed_ms().saturating_sub(start);
        if elapsed > timeout_ms {
            log::warn!(
                "flash {} timeout at {:#010x} after {} ms",
                op,
                bank.sectors[sector].start,
                elapsed
            );
            return Err(Error::Timeout(op));
        }
        if elapsed / 1000 > reported_s {
            reported_s = elapsed / 1000;
            progress.still_busy(op, elapsed);
        }
        bus.delay_us(1);
    }
    Ok(())
}

/// Decode Intel status error bits after a completed wait
fn intel_error_check<B: FlashBus>(bus: &mut B, bank: &FlashBank, sector: usize) -> Result<()> {
    if bank.is_equal(bus, sector, 0, IntelStatus::READY.bits()) {
        return Ok(());
    }

    log::warn!(
        "flash status error at {:#010x}",
        bank.sectors[sector].start
    );
    let erase_err = bank.is_set(bus, sector, 0, IntelStatus::ERASE_ERROR.bits());
    let program_err = bank.is_set(bus, sector, 0, IntelStatus::PROGRAM_ERROR.bits());

    if bank.is_set(bus, sector, 0, IntelStatus::BLOCK_LOCKED.bits()) {
        return Err(Error::ProtectedSector);
    }
    if bank.is_set(bus, sector, 0, IntelStatus::VPP_LOW.bits()) {
        return Err(Error::Hardware(HardwareError::VppLow));
    }
    if erase_err && program_err {
        return Err(Error::Hardware(HardwareError::CommandSequence));
    }
    if erase_err {
        return Err(Error::Hardware(HardwareError::BlockErase));
    }
    if program_err {
        return Err(Error::Hardware(HardwareError::Locking));
    }
    Err(Error::Hardware(HardwareError::CommandSequence))
}

/// Wait for completion, decode errors, and reset to read-array
///
/// Every command sequence ends here, so the device is never left
/// mid-command regardless of the outcome.
fn finish<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    sector: usize,
    timeout_ms: u64,
    op: Operation,
    progress: &mut P,
) -> Result<()> {
    let mut result = poll_status(bus, bank, sector, timeout_ms, op, progress);
    if result.is_ok() && bank.cmd_set == CmdSet::Intel {
        result = intel_error_check(bus, bank, sector);
    }
    bank.reset(bus, sector);
    result
}

/// Erase one sector
pub(crate) fn erase_sector<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    sector: usize,
    progress: &mut P,
) -> Result<()> {
    match bank.cmd_set {
        CmdSet::Intel => {
            // A set lock bit would make the erase fail silently, so clear
            // it first and wait the clear out.
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_RESET);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_CLEAR_STATUS);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_PROTECT);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_PROTECT_CLEAR);
            if let Err(err) = poll_status(
                bus,
                bank,
                sector,
                bank.erase_timeout_ms,
                Operation::Erase,
                progress,
            ) {
                bank.reset(bus, sector);
                return Err(err);
            }

            bank.write_cmd(bus, sector, 0, opcodes::INTEL_CLEAR_STATUS);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_BLOCK_ERASE);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_ERASE_CONFIRM);
            if bank.caps.contains(CmdSetCaps::ERASE_RESUME) {
                bank.write_cmd(bus, sector, 0, opcodes::INTEL_ERASE_RESUME);
            }
        }
        CmdSet::Amd => {
            bank.unlock_seq(bus, sector);
            bank.write_cmd(bus, sector, bank.addr_unlock1, opcodes::AMD_ERASE_START);
            bank.unlock_seq(bus, sector);
            bank.write_cmd(bus, sector, 0, opcodes::AMD_ERASE_SECTOR);
        }
    }

    finish(
        bus,
        bank,
        sector,
        bank.erase_timeout_ms,
        Operation::Erase,
        progress,
    )
}

/// Program one port-width word
///
/// NOR programming can only clear bits; a target word that is not
/// sufficiently erased fails up front without issuing any command.
pub(crate) fn program_word<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    dest: u32,
    word: u32,
    progress: &mut P,
) -> Result<()> {
    let current = cmd::read_word(bus, dest, bank.port_width);
    if current & word != word {
        return Err(Error::NotErased);
    }

    let sector = bank.find_sector(dest);

    // The device aborts a half-delivered program sequence if the gap
    // between command and data exceeds its acceptance window, so no
    // interrupt may stretch it.
    let irq = bus.disable_interrupts();
    match bank.cmd_set {
        CmdSet::Intel => {
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_CLEAR_STATUS);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_PROGRAM);
        }
        CmdSet::Amd => {
            bank.unlock_seq(bus, 0);
            bank.write_cmd(bus, 0, bank.addr_unlock1, opcodes::AMD_PROGRAM);
        }
    }
    cmd::write_word(bus, dest, bank.port_width, word);
    if irq {
        bus.enable_interrupts();
    }

    finish(
        bus,
        bank,
        sector,
        bank.write_timeout_ms,
        Operation::Program,
        progress,
    )
}

/// Stage a buffered program sequence up to its confirm command
fn stage_buffer<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    sector: usize,
    dest: u32,
    data: &[u8],
    progress: &mut P,
) -> Result<()> {
    let port_bytes = bank.port_width.bytes() as usize;
    let words = data.len() / port_bytes;

    match bank.cmd_set {
        CmdSet::Intel => {
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_CLEAR_STATUS);
            bank.write_cmd(bus, sector, 0, opcodes::INTEL_WRITE_TO_BUFFER);
            // The buffer-available handshake reuses the status ready bit
            poll_status(
                bus,
                bank,
                sector,
                bank.buffer_write_timeout_ms,
                Operation::BufferWrite,
                progress,
            )?;
            bank.write_cmd(bus, sector, 0, (words - 1) as u8);
        }
        CmdSet::Amd => {
            bank.unlock_seq(bus, sector);
            bank.write_cmd(bus, sector, 0, opcodes::AMD_WRITE_TO_BUFFER);
            bank.write_cmd(bus, sector, 0, (words - 1) as u8);
        }
    }

    for (i, chunk) in data.chunks_exact(port_bytes).enumerate() {
        let mut bytes = [0u8; 4];
        bytes[..port_bytes].copy_from_slice(chunk);
        cmd::write_word(
            bus,
            dest + (i * port_bytes) as u32,
            bank.port_width,
            u32::from_le_bytes(bytes),
        );
    }

    match bank.cmd_set {
        CmdSet::Intel => bank.write_cmd(bus, sector, 0, opcodes::INTEL_BUFFER_CONFIRM),
        CmdSet::Amd => bank.write_cmd(bus, sector, 0, opcodes::AMD_BUFFER_CONFIRM),
    }
    Ok(())
}

/// Program a run of whole words through the device's write buffer
///
/// `data` must be non-empty, word-aligned at `dest`, and a multiple of the
/// port width; the facade's chunking guarantees it never crosses a
/// buffer boundary.
pub(crate) fn program_buffer<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &FlashBank,
    dest: u32,
    data: &[u8],
    progress: &mut P,
) -> Result<()> {
    let port_bytes = bank.port_width.bytes() as usize;
    debug_assert!(!data.is_empty() && data.len() % port_bytes == 0);

    // Erased-state precondition over the whole run
    for (i, chunk) in data.chunks_exact(port_bytes).enumerate() {
        let mut bytes = [0u8; 4];
        bytes[..port_bytes].copy_from_slice(chunk);
        let want = u32::from_le_bytes(bytes);
        let current = cmd::read_word(bus, dest + (i * port_bytes) as u32, bank.port_width);
        if current & want != want {
            return Err(Error::NotErased);
        }
    }

    let sector = bank.find_sector(dest);

    let irq = bus.disable_interrupts();
    let staged = stage_buffer(bus, bank, sector, dest, data, progress);
    if irq {
        bus.enable_interrupts();
    }
    if let Err(err) = staged {
        bank.reset(bus, sector);
        return Err(err);
    }

    finish(
        bus,
        bank,
        sector,
        bank.buffer_write_timeout_ms,
        Operation::BufferWrite,
        progress,
    )
}

/// Set or clear one sector's hardware lock bit
///
/// Updates the bank's protection flag on success. Bank-wide unlock side
/// effects of legacy parts are the facade's business.
pub(crate) fn protect_sector<B: FlashBus, P: Progress>(
    bus: &mut B,
    bank: &mut FlashBank,
    sector: usize,
    on: bool,
    progress: &mut P,
) -> Result<()> {
    bank.write_cmd(bus, sector, 0, opcodes::INTEL_CLEAR_STATUS);
    bank.write_cmd(bus, sector, 0, opcodes::INTEL_PROTECT);
    bank.write_cmd(
        bus,
        sector,
        0,
        if on {
            opcodes::INTEL_PROTECT_SET
        } else {
            opcodes::INTEL_PROTECT_CLEAR
        },
    );

    finish(
        bus,
        bank,
        sector,
        bank.erase_timeout_ms,
        Operation::Protect,
        progress,
    )?;

    bank.sectors[sector].protected = on;
    Ok(())
}
