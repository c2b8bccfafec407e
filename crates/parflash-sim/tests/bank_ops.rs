//! Bank-level driver tests against the simulated device
//!
//! These exercise the public surface end to end: identification, geometry,
//! erase, unaligned writes, buffered writes, protection, and the failure
//! paths (timeouts, status errors, range validation).

use parflash_core::bus::FlashBus;
use parflash_core::cmd::CmdWord;
use parflash_core::{
    BankHandle, BankRegistry, ChipWidth, CmdSet, Error, Operation, PortWidth, ProtectOp,
};
use parflash_sim::{SimConfig, SimFlash};

fn init(sim: &mut SimFlash) -> (BankRegistry, BankHandle, u64) {
    let base = sim.config().base;
    let (flash, total) = BankRegistry::init(sim, &[base]);
    let handle = flash.handles().next().unwrap();
    (flash, handle, total)
}

/// Count command writes matching the replicated pattern for `op`
fn count_commands(sim: &SimFlash, op: u8) -> usize {
    let pattern = CmdWord::replicate(op, sim.config().port_width, sim.config().chip_width).raw();
    sim.commands().iter().filter(|&&(_, v)| v == pattern).count()
}

// ============================================================================
// Identification and geometry
// ============================================================================

#[test]
fn cfi_geometry_single_region() {
    // 32 sectors of 0x10000 bytes declared via the CFI region table
    let mut sim = SimFlash::new(SimConfig {
        regions: vec![(32, 0x10000)],
        ..SimConfig::default()
    });
    let (flash, handle, total) = init(&mut sim);

    assert_eq!(total, 32 * 0x10000);
    let bank = flash.bank(handle).unwrap();
    assert_eq!(bank.size, 0x20_0000);
    assert_eq!(bank.sector_count(), 32);
    assert_eq!(bank.sectors[1].start, 0x10000);
    assert_eq!(bank.erase_timeout_ms, 64);
    assert_eq!(bank.buffer_size, 32);
}

#[test]
fn cfi_geometry_boot_sector_part() {
    let mut sim = SimFlash::new(SimConfig {
        cmd_set: CmdSet::Amd,
        manufacturer_id: 0x01,
        device_id: 0x2249,
        regions: vec![(8, 0x2000), (15, 0x10000)],
        buffer_size: 1,
        ..SimConfig::default()
    });
    let (flash, handle, total) = init(&mut sim);

    let bank = flash.bank(handle).unwrap();
    assert_eq!(bank.cmd_set, CmdSet::Amd);
    assert_eq!(bank.sector_count(), 23);
    assert_eq!(bank.sectors[8].start, 8 * 0x2000);
    assert_eq!(total, 8 * 0x2000 + 15 * 0x10000);
}

#[test]
fn probe_finds_wide_port_with_two_chips() {
    let mut sim = SimFlash::new(SimConfig {
        port_width: PortWidth::X32,
        chip_width: ChipWidth::X16,
        ..SimConfig::default()
    });
    let (flash, handle, _) = init(&mut sim);

    let bank = flash.bank(handle).unwrap();
    assert_eq!(bank.port_width, PortWidth::X32);
    assert_eq!(bank.chip_width, ChipWidth::X16);
    assert_eq!(bank.lanes(), 2);
    // Sector spacing doubles with two chips on the port
    assert_eq!(bank.sectors[1].start, 0x20000);
    assert_eq!(bank.size, 2 * 8 * 0x10000);
}

#[test]
fn probe_matches_legacy_amd_part_by_id() {
    let mut sim = SimFlash::new(SimConfig::legacy(0x01, 0xA4, CmdSet::Amd));
    let (flash, handle, total) = init(&mut sim);

    let bank = flash.bank(handle).unwrap();
    assert!(bank.is_detected());
    assert_eq!(bank.name, "AM29F040");
    assert_eq!(bank.sector_count(), 8);
    assert_eq!(total, 8 * 0x10000);
}

#[test]
fn probe_matches_legacy_intel_part_by_id() {
    let mut sim = SimFlash::new(SimConfig::legacy(0x89, 0x16, CmdSet::Intel));
    let (flash, handle, _) = init(&mut sim);

    let bank = flash.bank(handle).unwrap();
    assert_eq!(bank.name, "28F320J3");
    assert_eq!(bank.cmd_set, CmdSet::Intel);
    // The J3 table entry carries the buffered write and lock quirks
    assert!(bank.buffer_size > 1);
}

#[test]
fn unknown_bus_yields_unknown_bank() {
    // Device sits at 0x100000 but the board claims a bank at 0
    let mut sim = SimFlash::new(SimConfig {
        base: 0x10_0000,
        ..SimConfig::default()
    });
    let (flash, total) = BankRegistry::init(&mut sim, &[0]);
    let handle = flash.handles().next().unwrap();

    assert_eq!(total, 0);
    let bank = flash.bank(handle).unwrap();
    assert!(!bank.is_detected());
    assert_eq!(bank.sector_count(), 0);

    // Every operation refuses immediately
    assert_eq!(flash.erase(&mut sim, handle, 0, 0), Err(Error::UnknownDevice));
    assert_eq!(
        flash.write_buff(&mut sim, handle, &[0], 0),
        Err(Error::UnknownDevice)
    );
}

#[test]
fn probe_reads_initial_protection_bits() {
    let mut sim = SimFlash::new_default();
    sim.lock_sector(2, true);
    sim.lock_sector(5, true);
    let (flash, handle, _) = init(&mut sim);

    let bank = flash.bank(handle).unwrap();
    assert!(bank.sectors[2].protected);
    assert!(bank.sectors[5].protected);
    assert!(!bank.sectors[0].protected);
}

#[test]
fn reset_is_idempotent() {
    let mut sim = SimFlash::new_default();
    let (_, _, _) = init(&mut sim);

    let before = sim.read16(0x40);
    // Issue the reset command twice in a row by hand
    sim.write16(0, 0xFFFF);
    let once = sim.read16(0x40);
    sim.write16(0, 0xFFFF);
    sim.write16(0, 0xFFFF);
    let twice = sim.read16(0x40);

    assert_eq!(before, once);
    assert_eq!(once, twice);
}

// ============================================================================
// Erase
// ============================================================================

#[test]
fn erase_clears_every_bit_in_range() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    flash
        .write_buff(&mut sim, handle, &[0x00; 0x40], 0x0000)
        .unwrap();
    flash
        .write_buff(&mut sim, handle, &[0x55; 0x40], 0x10000)
        .unwrap();

    let summary = flash.erase(&mut sim, handle, 0, 1).unwrap();
    assert_eq!(summary.erased, 2);
    assert_eq!(summary.skipped, 0);
    assert!(sim.mem()[..0x20000].iter().all(|&b| b == 0xFF));
}

#[test]
fn erase_skips_protected_sectors() {
    let mut sim = SimFlash::new_default();
    sim.lock_sector(1, true);
    let (flash, handle, _) = init(&mut sim);

    // Pre-existing data in the protected sector must survive
    sim.mem_mut()[0x10000..0x10004].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let summary = flash.erase(&mut sim, handle, 0, 2).unwrap();
    assert_eq!(summary.erased, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(&sim.mem()[0x10000..0x10004], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn erase_of_fully_protected_range_reports_zero_erased() {
    let mut sim = SimFlash::new_default();
    sim.lock_sector(0, true);
    let (flash, handle, _) = init(&mut sim);

    // Not an error: the caller learns 0 of 1 sectors were erasable
    let summary = flash.erase(&mut sim, handle, 0, 0).unwrap();
    assert_eq!(summary.erased, 0);
    assert_eq!(summary.skipped, 1);
}

#[test]
fn erase_validates_sector_range() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    assert_eq!(
        flash.erase(&mut sim, handle, 3, 2),
        Err(Error::InvalidSectorRange)
    );
    assert_eq!(
        flash.erase(&mut sim, handle, 0, 8),
        Err(Error::InvalidSectorRange)
    );
}

#[test]
fn stuck_status_register_times_out_and_resets() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);
    sim.set_stuck_busy(true);

    let start_ms = sim.elapsed_ms();
    let result = flash.erase(&mut sim, handle, 0, 0);
    let elapsed_ms = sim.elapsed_ms() - start_ms;

    assert_eq!(result, Err(Error::Timeout(Operation::Erase)));
    // Bounded by the 64 ms CFI budget, not hanging
    assert!(elapsed_ms <= 70, "poll ran for {} ms", elapsed_ms);
    // The device was put back into read-array mode on the way out
    let reset = CmdWord::replicate(0xFF, PortWidth::X16, ChipWidth::X16).raw();
    assert_eq!(sim.last_command(), Some((0x0000, reset)));
}

#[test]
fn amd_erase_polls_by_toggle() {
    let mut sim = SimFlash::new(SimConfig::amd());
    let (flash, handle, _) = init(&mut sim);

    flash
        .write_buff(&mut sim, handle, &[0x00; 16], 0x10000)
        .unwrap();
    let summary = flash.erase(&mut sim, handle, 1, 1).unwrap();
    assert_eq!(summary.erased, 1);
    assert!(sim.mem()[0x10000..0x20000].iter().all(|&b| b == 0xFF));
}

#[test]
fn amd_stuck_toggle_times_out() {
    let mut sim = SimFlash::new(SimConfig::amd());
    let (flash, handle, _) = init(&mut sim);
    sim.set_stuck_busy(true);

    assert_eq!(
        flash.erase(&mut sim, handle, 0, 0),
        Err(Error::Timeout(Operation::Erase))
    );
    let reset = CmdWord::replicate(0xF0, PortWidth::X16, ChipWidth::X16).raw();
    assert_eq!(sim.last_command(), Some((0x0000, reset)));
}

// ============================================================================
// Programming
// ============================================================================

#[test]
fn unaligned_head_collapses_to_one_word_program() {
    // 32-bit port, destination one byte past a word boundary, three bytes:
    // exactly one word program, no buffered program, no tail
    let mut sim = SimFlash::new(SimConfig {
        port_width: PortWidth::X32,
        chip_width: ChipWidth::X16,
        ..SimConfig::default()
    });
    let (flash, handle, _) = init(&mut sim);
    let baseline = count_commands(&sim, 0x40);

    flash
        .write_buff(&mut sim, handle, &[0xAA, 0xBB, 0xCC], 0x101)
        .unwrap();

    assert_eq!(count_commands(&sim, 0x40) - baseline, 1);
    assert_eq!(count_commands(&sim, 0xE8), 0);
    assert_eq!(sim.mem()[0x100], 0xFF);
    assert_eq!(&sim.mem()[0x101..0x104], &[0xAA, 0xBB, 0xCC]);
}

#[test]
fn unaligned_write_preserves_neighbors() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    // Surrounding bytes programmed first, then an inner unaligned range
    flash
        .write_buff(&mut sim, handle, &[0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5], 0x200)
        .unwrap();
    let summary = flash.erase(&mut sim, handle, 0, 0).unwrap();
    assert_eq!(summary.erased, 1);

    flash
        .write_buff(&mut sim, handle, &[0xB0, 0xB1, 0xB2], 0x201)
        .unwrap();
    assert_eq!(sim.mem()[0x200], 0xFF);
    assert_eq!(&sim.mem()[0x201..0x204], &[0xB0, 0xB1, 0xB2]);
    assert_eq!(sim.mem()[0x204], 0xFF);
}

#[test]
fn large_write_round_trips_through_buffers() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    let data: Vec<u8> = (0..997u32).map(|i| (i % 251) as u8).collect();
    flash.write_buff(&mut sim, handle, &data, 0x1003).unwrap();

    assert_eq!(&sim.mem()[0x1003..0x1003 + 997], &data[..]);
    assert_eq!(sim.mem()[0x1002], 0xFF);
    assert_eq!(sim.mem()[0x1003 + 997], 0xFF);
    // The body went through the write buffer, not word programs
    assert!(count_commands(&sim, 0xE8) > 0);
}

#[test]
fn buffered_chunks_respect_buffer_boundaries() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    // 80 aligned bytes with a 32-byte buffer: 3 buffered programs
    let data = [0x5A; 80];
    flash.write_buff(&mut sim, handle, &data, 0x40).unwrap();

    assert_eq!(count_commands(&sim, 0xE8), 3);
    assert!(sim.mem()[0x40..0x90].iter().all(|&b| b == 0x5A));
}

#[test]
fn word_path_used_when_buffering_unsupported() {
    let mut sim = SimFlash::new(SimConfig {
        buffer_size: 1,
        ..SimConfig::default()
    });
    let (flash, handle, _) = init(&mut sim);

    flash
        .write_buff(&mut sim, handle, &[0x11; 8], 0x80)
        .unwrap();
    assert_eq!(count_commands(&sim, 0xE8), 0);
    assert!(count_commands(&sim, 0x40) >= 4);
    assert!(sim.mem()[0x80..0x88].iter().all(|&b| b == 0x11));
}

#[test]
fn program_refuses_unerased_target() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    flash
        .write_buff(&mut sim, handle, &[0x0F, 0x0F], 0x100)
        .unwrap();
    // Setting bits that are already clear cannot work without an erase
    assert_eq!(
        flash.write_buff(&mut sim, handle, &[0xF0, 0xF0], 0x100),
        Err(Error::NotErased)
    );
    // Re-programming a subset of the set bits is fine
    flash
        .write_buff(&mut sim, handle, &[0x0F, 0x0D], 0x100)
        .unwrap();
    assert_eq!(&sim.mem()[0x100..0x102], &[0x0F, 0x0D]);
}

#[test]
fn program_result_is_monotonic() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    let data = [0xC3, 0x96, 0x0F, 0xF0];
    flash.write_buff(&mut sim, handle, &data, 0x300).unwrap();
    for (i, &d) in data.iter().enumerate() {
        assert_eq!(sim.mem()[0x300 + i] & d, d);
    }
}

#[test]
fn write_validates_address_range() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);
    let size = flash.bank(handle).unwrap().size;

    assert_eq!(
        flash.write_buff(&mut sim, handle, &[0; 4], size - 2),
        Err(Error::InvalidSectorRange)
    );
}

#[test]
fn program_masks_interrupts_around_command_window() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);
    let before = sim.irq_mask_events();

    flash
        .write_buff(&mut sim, handle, &[0x42; 4], 0x500)
        .unwrap();
    assert!(sim.irq_mask_events() > before);
}

#[test]
fn amd_program_and_buffered_write() {
    let mut sim = SimFlash::new(SimConfig {
        buffer_size: 32,
        ..SimConfig::amd()
    });
    let (flash, handle, _) = init(&mut sim);

    let data: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    flash.write_buff(&mut sim, handle, &data, 0x201).unwrap();
    assert_eq!(&sim.mem()[0x201..0x201 + 100], &data[..]);
}

#[test]
fn hardware_status_error_is_decoded() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    sim.inject_status_error(0x08);
    assert_eq!(
        flash.erase(&mut sim, handle, 0, 0),
        Err(Error::Hardware(parflash_core::HardwareError::VppLow))
    );
    // The failure path still leaves the device readable
    assert_eq!(sim.read16(0x40), 0xFFFF);
}

// ============================================================================
// Protection
// ============================================================================

#[test]
fn protect_set_and_clear_sector_range() {
    let mut sim = SimFlash::new_default();
    let (mut flash, handle, _) = init(&mut sim);
    let s1 = sim.sector_start(1);
    let s2 = sim.sector_start(2);

    flash
        .protect(&mut sim, handle, ProtectOp::Set, s1, s2 + 4)
        .unwrap();
    assert!(sim.locked(1));
    assert!(sim.locked(2));
    assert!(!sim.locked(0));
    assert!(flash.bank(handle).unwrap().sectors[1].protected);

    flash
        .protect(&mut sim, handle, ProtectOp::Clear, s1, s1)
        .unwrap();
    assert!(!sim.locked(1));
    assert!(sim.locked(2));
    assert!(!flash.bank(handle).unwrap().sectors[1].protected);
}

#[test]
fn legacy_unlock_relocks_other_sectors() {
    let mut sim = SimFlash::new(SimConfig {
        legacy_unlock: true,
        ..SimConfig::default()
    });
    sim.lock_sector(0, true);
    sim.lock_sector(1, true);
    sim.lock_sector(2, true);
    let (mut flash, handle, _) = init(&mut sim);
    let s2 = sim.sector_start(2);

    flash
        .protect(&mut sim, handle, ProtectOp::Clear, s2, s2)
        .unwrap();

    let bank = flash.bank(handle).unwrap();
    assert!(bank.sectors[0].protected);
    assert!(bank.sectors[1].protected);
    assert!(!bank.sectors[2].protected);
    // The hardware lock bits agree after the re-lock pass
    assert!(sim.locked(0));
    assert!(sim.locked(1));
    assert!(!sim.locked(2));
}

#[test]
fn stale_protection_flags_surface_as_protected_sector() {
    let mut sim = SimFlash::new_default();
    let (flash, handle, _) = init(&mut sim);

    // Lock behind the driver's back: the program status decode catches it
    sim.lock_sector(0, true);
    assert_eq!(
        flash.write_buff(&mut sim, handle, &[0x00; 2], 0x100),
        Err(Error::ProtectedSector)
    );
    assert!(sim.mem()[..0x200].iter().all(|&b| b == 0xFF));
}

#[test]
fn protect_validates_address_range() {
    let mut sim = SimFlash::new_default();
    let (mut flash, handle, _) = init(&mut sim);
    let size = flash.bank(handle).unwrap().size;

    assert_eq!(
        flash.protect(&mut sim, handle, ProtectOp::Set, size, size),
        Err(Error::InvalidSectorRange)
    );
    assert_eq!(
        flash.protect(&mut sim, handle, ProtectOp::Set, 8, 4),
        Err(Error::InvalidSectorRange)
    );
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn bank_info_reports_geometry_and_protection() {
    let mut sim = SimFlash::new_default();
    sim.lock_sector(1, true);
    let (flash, handle, _) = init(&mut sim);

    let report = format!("{}", flash.bank_info(handle).unwrap());
    assert!(report.contains("CFI conformant FLASH (16 x 16)"));
    assert!(report.contains("512 kB in 8 Sectors"));
    assert!(report.contains("Intel Standard command set"));
    assert!(report.contains("Manufacturer ID: 0x89"));
    assert!(report.contains("00010000 RO"));
}

#[test]
fn bank_info_for_unknown_bank() {
    let mut sim = SimFlash::new(SimConfig {
        base: 0x10_0000,
        ..SimConfig::default()
    });
    let (flash, _) = BankRegistry::init(&mut sim, &[0]);
    let handle = flash.handles().next().unwrap();

    let report = format!("{}", flash.bank_info(handle).unwrap());
    assert!(report.contains("missing or unknown FLASH type"));
}
