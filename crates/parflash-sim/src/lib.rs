//! parflash-sim - In-memory parallel NOR flash emulator
//!
//! This crate provides a [`FlashBus`] implementation backed by an in-memory
//! device model: CFI query and autoselect identification, the Intel and AMD
//! command handshakes, per-sector lock bits, and NOR bit semantics (program
//! clears bits, erase sets them). Time is virtual: the clock advances one
//! microsecond per bus cycle and with every `delay_us`, so timeout paths
//! run instantly in tests.
//!
//! Every word write is also appended to a command log, which lets tests
//! assert protocol-level postconditions such as "the device was left in
//! read-array mode".

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use parflash_core::bus::{ChipWidth, FlashBus, PortWidth};
use parflash_core::cmd::CmdWord;
use parflash_core::CmdSet;

/// Word offset of the main query table in query mode
const QUERY_BASE: u32 = 0x10;
/// Word offset of the extended query table in query mode
const EXT_BASE: u32 = 0x40;

/// Configuration for the simulated bank
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Base address of the memory window
    pub base: u32,
    /// Bus width the device decodes commands at
    pub port_width: PortWidth,
    /// Width of one simulated die
    pub chip_width: ChipWidth,
    /// Command-set dialect the device speaks
    pub cmd_set: CmdSet,
    /// Whether the device answers the CFI query command
    pub cfi: bool,
    /// Manufacturer ID
    pub manufacturer_id: u16,
    /// Device ID
    pub device_id: u16,
    /// Erase regions as (sector count, sector size in bytes per chip)
    pub regions: Vec<(u32, u32)>,
    /// Write buffer size in bytes per chip, 1 disables buffered writes
    pub buffer_size: u32,
    /// Clearing any lock bit clears every lock bit, and the extended
    /// query table advertises it
    pub legacy_unlock: bool,
    /// Erase regions are stored top-boot-first in the query table
    pub top_boot: bool,
    /// Device interface code reported in the query table
    pub interface_desc: u16,
    /// Virtual time one word program takes
    pub program_time_us: u64,
    /// Virtual time one block erase takes
    pub erase_time_us: u64,
    /// Virtual time one buffered program takes
    pub buffer_time_us: u64,
    /// Typical/maximum word program exponents reported via CFI (us)
    pub write_timeout_exp: (u8, u8),
    /// Typical/maximum buffered program exponents reported via CFI (us)
    pub buffer_timeout_exp: (u8, u8),
    /// Typical/maximum block erase exponents reported via CFI (ms)
    pub erase_timeout_exp: (u8, u8),
}

impl Default for SimConfig {
    fn default() -> Self {
        // An Intel StrataFlash-like x16 part: 8 x 64 KiB, 32-byte buffer
        SimConfig {
            base: 0,
            port_width: PortWidth::X16,
            chip_width: ChipWidth::X16,
            cmd_set: CmdSet::Intel,
            cfi: true,
            manufacturer_id: 0x89,
            device_id: 0x16,
            regions: vec![(8, 0x10000)],
            buffer_size: 32,
            legacy_unlock: false,
            top_boot: false,
            interface_desc: 0x01,
            program_time_us: 8,
            erase_time_us: 2_000,
            buffer_time_us: 64,
            write_timeout_exp: (4, 4),
            buffer_timeout_exp: (5, 5),
            erase_timeout_exp: (4, 2),
        }
    }
}

impl SimConfig {
    /// An AMD-style part with the same default geometry
    pub fn amd() -> Self {
        SimConfig {
            cmd_set: CmdSet::Amd,
            manufacturer_id: 0x01,
            device_id: 0x22D7,
            buffer_size: 1,
            ..SimConfig::default()
        }
    }

    /// A legacy (non-CFI) part answering only autoselect
    pub fn legacy(manufacturer_id: u16, device_id: u16, cmd_set: CmdSet) -> Self {
        SimConfig {
            cfi: false,
            manufacturer_id,
            device_id,
            cmd_set,
            buffer_size: 1,
            ..SimConfig::default()
        }
    }

    fn lanes(&self) -> u32 {
        self.port_width.bytes() / self.chip_width.bytes()
    }

    /// Total size per chip in bytes
    fn chip_size(&self) -> u32 {
        self.regions.iter().map(|&(count, size)| count * size).sum()
    }
}

/// Device mode reached by the last accepted command
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    ReadArray,
    Query,
    ReadId,
    /// Reads return the status register (Intel)
    Status,
    /// Erase setup seen, confirm expected
    EraseSetup,
    /// Lock-bit setup seen, set/clear sub-opcode expected
    ProtectSetup,
    /// Next word write is program data
    ProgramData,
    /// Buffered program: word count expected
    BufferCount,
    /// Buffered program: data words being collected
    BufferData {
        remaining: u32,
        words: Vec<(u32, u32)>,
    },
    /// Buffered program: confirm expected
    BufferConfirm { words: Vec<(u32, u32)> },
}

/// Effect applied when the current busy window elapses
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    None,
    Erase { sector: usize },
    Program { addr: u32, value: u32 },
    Buffer { words: Vec<(u32, u32)> },
}

/// Simulated flash bank
pub struct SimFlash {
    config: SimConfig,
    mem: Vec<u8>,
    sector_starts: Vec<u32>,
    lock_bits: Vec<bool>,
    query_table: [u8; 47],
    ext_table: [u8; 16],
    mode: Mode,
    status: u8,
    amd_unlock: u8,
    amd_erase_pending: bool,
    toggle_phase: bool,
    busy: bool,
    busy_until_us: u64,
    pending: PendingOp,
    pending_error: u8,
    forced_error: u8,
    stuck_busy: bool,
    clock_us: u64,
    irq_masked: bool,
    irq_mask_events: usize,
    write_log: Vec<(u32, u32)>,
}

impl SimFlash {
    /// Create a simulated bank, erased to all ones
    pub fn new(config: SimConfig) -> Self {
        let lanes = config.lanes();
        let total = config.chip_size() * lanes;
        let mut sector_starts = Vec::new();
        let mut lock_bits = Vec::new();
        let mut addr = config.base;
        for &(count, size) in &config.regions {
            for _ in 0..count {
                sector_starts.push(addr);
                lock_bits.push(false);
                addr += size * lanes;
            }
        }

        let query_table = build_query_table(&config);
        let ext_table = build_ext_table(&config);

        SimFlash {
            mem: vec![0xFF; total as usize],
            sector_starts,
            lock_bits,
            query_table,
            ext_table,
            mode: Mode::ReadArray,
            status: 0x80,
            amd_unlock: 0,
            amd_erase_pending: false,
            toggle_phase: false,
            busy: false,
            busy_until_us: 0,
            pending: PendingOp::None,
            pending_error: 0,
            forced_error: 0,
            stuck_busy: false,
            clock_us: 0,
            irq_masked: false,
            irq_mask_events: 0,
            write_log: Vec::new(),
            config,
        }
    }

    /// Create a simulated bank with default configuration
    pub fn new_default() -> Self {
        Self::new(SimConfig::default())
    }

    /// The raw memory contents
    pub fn mem(&self) -> &[u8] {
        &self.mem
    }

    /// Mutable access to the raw memory contents
    pub fn mem_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    /// The configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Absolute start address of a sector
    pub fn sector_start(&self, sector: usize) -> u32 {
        self.sector_starts[sector]
    }

    /// All word writes observed so far, as (address, value)
    pub fn commands(&self) -> &[(u32, u32)] {
        &self.write_log
    }

    /// The most recent word write
    pub fn last_command(&self) -> Option<(u32, u32)> {
        self.write_log.last().copied()
    }

    /// Pre-set a sector's hardware lock bit
    pub fn lock_sector(&mut self, sector: usize, on: bool) {
        self.lock_bits[sector] = on;
    }

    /// Whether a sector's hardware lock bit is set
    pub fn locked(&self, sector: usize) -> bool {
        self.lock_bits[sector]
    }

    /// Make the status register report busy forever
    pub fn set_stuck_busy(&mut self, on: bool) {
        self.stuck_busy = on;
    }

    /// Force the given status error bits on every completed operation
    /// until cleared with zero
    pub fn inject_status_error(&mut self, bits: u8) {
        self.forced_error = bits;
    }

    /// How many times interrupts were masked around a command window
    pub fn irq_mask_events(&self) -> usize {
        self.irq_mask_events
    }

    fn in_range(&self, addr: u32) -> bool {
        addr >= self.config.base && (addr as u64) < self.config.base as u64 + self.mem.len() as u64
    }

    fn sector_of(&self, addr: u32) -> usize {
        self.sector_starts
            .iter()
            .rposition(|&start| addr >= start)
            .unwrap_or(0)
    }

    fn sector_len(&self, sector: usize) -> usize {
        let start = self.sector_starts[sector];
        let end = if sector + 1 < self.sector_starts.len() {
            self.sector_starts[sector + 1]
        } else {
            self.config.base + self.mem.len() as u32
        };
        (end - start) as usize
    }

    /// Word with `value` repeated on every chip lane
    fn lane_word(&self, value: u16) -> u32 {
        let chip_bits = self.config.chip_width.bits();
        let lanes = self.config.port_width.bits() / chip_bits;
        let mask = (1u64 << chip_bits) - 1;
        let value = value as u32 & mask as u32;
        let mut word = 0u32;
        for lane in 0..lanes {
            word |= value << (lane * chip_bits);
        }
        word
    }

    fn status_word(&self) -> u32 {
        if self.busy {
            0
        } else {
            CmdWord::replicate(self.status, self.config.port_width, self.config.chip_width).raw()
        }
    }

    fn begin_op(&mut self, pending: PendingOp, error: u8, duration_us: u64) {
        self.pending = pending;
        self.pending_error = error | self.forced_error;
        self.busy = true;
        self.busy_until_us = self.clock_us + duration_us;
        if self.config.cmd_set == CmdSet::Intel {
            self.mode = Mode::Status;
        }
    }

    /// Apply the pending effect once its busy window has elapsed
    fn complete_if_done(&mut self) {
        if !self.busy || self.stuck_busy || self.clock_us < self.busy_until_us {
            return;
        }
        self.busy = false;
        self.status = 0x80 | core::mem::take(&mut self.pending_error);
        match core::mem::replace(&mut self.pending, PendingOp::None) {
            PendingOp::None => {}
            PendingOp::Erase { sector } => {
                let start = (self.sector_starts[sector] - self.config.base) as usize;
                let len = self.sector_len(sector);
                for byte in &mut self.mem[start..start + len] {
                    *byte = 0xFF;
                }
            }
            PendingOp::Program { addr, value } => self.apply_program(addr, value),
            PendingOp::Buffer { words } => {
                for (addr, value) in words {
                    self.apply_program(addr, value);
                }
            }
        }
        if self.config.cmd_set == CmdSet::Amd {
            // AMD parts fall back to read-array on their own
            self.mode = Mode::ReadArray;
        }
    }

    /// NOR program: bits can only go from one to zero
    fn apply_program(&mut self, addr: u32, value: u32) {
        if !self.in_range(addr) {
            return;
        }
        let idx = (addr - self.config.base) as usize;
        let bytes = value.to_le_bytes();
        for i in 0..self.config.port_width.bytes() as usize {
            if idx + i < self.mem.len() {
                self.mem[idx + i] &= bytes[i];
            }
        }
    }

    fn start_erase(&mut self, addr: u32) {
        let sector = self.sector_of(addr);
        log::trace!("sim: erase sector {} (locked: {})", sector, self.lock_bits[sector]);
        if self.lock_bits[sector] {
            match self.config.cmd_set {
                // Erase error plus locked-block status
                CmdSet::Intel => self.begin_op(PendingOp::None, 0x22, self.config.erase_time_us),
                CmdSet::Amd => self.begin_op(PendingOp::None, 0, self.config.erase_time_us),
            }
        } else {
            self.begin_op(PendingOp::Erase { sector }, 0, self.config.erase_time_us);
        }
    }

    fn start_program(&mut self, addr: u32, value: u32) {
        let sector = self.sector_of(addr);
        if self.lock_bits[sector] {
            match self.config.cmd_set {
                // Program error plus locked-block status
                CmdSet::Intel => self.begin_op(PendingOp::None, 0x12, self.config.program_time_us),
                CmdSet::Amd => self.begin_op(PendingOp::None, 0, self.config.program_time_us),
            }
        } else {
            self.begin_op(
                PendingOp::Program { addr, value },
                0,
                self.config.program_time_us,
            );
        }
    }

    fn protect_clear(&mut self, sector: usize) {
        if self.config.legacy_unlock {
            for bit in &mut self.lock_bits {
                *bit = false;
            }
        } else {
            self.lock_bits[sector] = false;
        }
    }

    fn write(&mut self, addr: u32, value: u32, width: PortWidth) {
        self.clock_us += 1;
        self.complete_if_done();
        self.write_log.push((addr, value));

        // Commands are only decoded at the device's own bus width;
        // mismatched cycles fall through as inert array accesses.
        if width != self.config.port_width || !self.in_range(addr) {
            return;
        }

        let op = (value & 0xFF) as u8;

        // Data-consuming modes take precedence over command decode
        match core::mem::replace(&mut self.mode, Mode::ReadArray) {
            Mode::ProgramData => {
                self.start_program(addr, value);
                return;
            }
            Mode::BufferCount => {
                self.mode = Mode::BufferData {
                    remaining: (value & 0xFF) + 1,
                    words: Vec::new(),
                };
                return;
            }
            Mode::BufferData {
                mut remaining,
                mut words,
            } => {
                words.push((addr, value));
                remaining -= 1;
                self.mode = if remaining == 0 {
                    Mode::BufferConfirm { words }
                } else {
                    Mode::BufferData { remaining, words }
                };
                return;
            }
            Mode::BufferConfirm { words } => {
                let confirm = match self.config.cmd_set {
                    CmdSet::Intel => 0xD0,
                    CmdSet::Amd => 0x29,
                };
                if op == confirm {
                    let sector = words.first().map(|&(a, _)| self.sector_of(a));
                    if sector.is_some_and(|s| self.lock_bits[s]) {
                        self.begin_op(PendingOp::None, 0x12, self.config.buffer_time_us);
                    } else {
                        self.begin_op(PendingOp::Buffer { words }, 0, self.config.buffer_time_us);
                    }
                } else {
                    // Aborted buffer sequence: command sequence error
                    self.status = 0x80 | 0x30;
                    self.mode = Mode::Status;
                }
                return;
            }
            Mode::EraseSetup => {
                if op == 0xD0 {
                    self.start_erase(addr);
                } else {
                    self.status = 0x80 | 0x30;
                    self.mode = Mode::Status;
                }
                return;
            }
            Mode::ProtectSetup => {
                let sector = self.sector_of(addr);
                match op {
                    0x01 => self.lock_bits[sector] = true,
                    0xD0 => self.protect_clear(sector),
                    _ => {}
                }
                self.begin_op(PendingOp::None, 0, self.config.program_time_us);
                return;
            }
            other => self.mode = other,
        }

        if self.busy {
            // Mid-operation the device only honors reset
            if op == 0xFF || op == 0xF0 {
                self.reset_device();
            }
            return;
        }

        match self.config.cmd_set {
            CmdSet::Intel => self.intel_command(op),
            CmdSet::Amd => self.amd_command(op, addr),
        }
    }

    fn reset_device(&mut self) {
        log::trace!("sim: reset to read-array");
        self.mode = Mode::ReadArray;
        self.amd_unlock = 0;
        self.amd_erase_pending = false;
        self.busy = false;
        self.pending = PendingOp::None;
        self.pending_error = 0;
    }

    fn intel_command(&mut self, op: u8) {
        match op {
            0xFF | 0xF0 => self.reset_device(),
            0x98 if self.config.cfi => self.mode = Mode::Query,
            0x90 => self.mode = Mode::ReadId,
            0x50 => {
                self.status = 0x80;
                self.mode = Mode::Status;
            }
            0x70 => self.mode = Mode::Status,
            0x20 => self.mode = Mode::EraseSetup,
            0x40 | 0x10 => self.mode = Mode::ProgramData,
            0xE8 => {
                // Buffer available is reported through the ready bit
                self.status = 0x80;
                self.mode = Mode::BufferCount;
            }
            0x60 => self.mode = Mode::ProtectSetup,
            _ => {}
        }
    }

    fn amd_command(&mut self, op: u8, addr: u32) {
        match op {
            0xF0 | 0xFF => {
                self.reset_device();
                return;
            }
            0x98 if self.config.cfi => {
                self.mode = Mode::Query;
                return;
            }
            _ => {}
        }

        match self.amd_unlock {
            0 => {
                if op == 0xAA {
                    self.amd_unlock = 1;
                } else if op == 0x90 {
                    // Lenient: autoselect without the unlock dance
                    self.mode = Mode::ReadId;
                } else if self.amd_erase_pending && op == 0x30 {
                    self.amd_erase_pending = false;
                    self.start_erase(addr);
                }
            }
            1 => {
                self.amd_unlock = if op == 0x55 { 2 } else { 0 };
            }
            _ => {
                self.amd_unlock = 0;
                match op {
                    0x90 => self.mode = Mode::ReadId,
                    0xA0 => self.mode = Mode::ProgramData,
                    0x80 => self.amd_erase_pending = true,
                    0x25 => self.mode = Mode::BufferCount,
                    0x30 if self.amd_erase_pending => {
                        self.amd_erase_pending = false;
                        self.start_erase(addr);
                    }
                    _ => {}
                }
            }
        }
    }

    /// Identification data visible in query and read-ID modes
    fn id_byte(&self, addr: u32) -> Option<u32> {
        let sector = self.sector_of(addr);
        let start = self.sector_starts[sector];
        let offset = (addr - start) / self.config.port_width.bytes();
        match offset {
            0 => Some(self.lane_word(self.config.manufacturer_id)),
            1 => Some(self.lane_word(self.config.device_id)),
            2 => Some(self.lane_word(self.lock_bits[sector] as u16)),
            _ => None,
        }
    }

    fn query_read(&self, addr: u32) -> u32 {
        let offset = (addr - self.config.base) / self.config.port_width.bytes();
        let byte = if (QUERY_BASE..QUERY_BASE + 47).contains(&offset) {
            self.query_table[(offset - QUERY_BASE) as usize]
        } else if (EXT_BASE..EXT_BASE + 16).contains(&offset) {
            self.ext_table[(offset - EXT_BASE) as usize]
        } else if let Some(word) = self.id_byte(addr) {
            return word;
        } else {
            0
        };
        self.lane_word(byte as u16)
    }

    fn read_mem(&self, addr: u32, width: PortWidth) -> u32 {
        if !self.in_range(addr) {
            return 0;
        }
        let idx = (addr - self.config.base) as usize;
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate().take(width.bytes() as usize) {
            if idx + i < self.mem.len() {
                *byte = self.mem[idx + i];
            }
        }
        u32::from_le_bytes(bytes)
    }

    fn read(&mut self, addr: u32, width: PortWidth) -> u32 {
        self.clock_us += 1;
        self.complete_if_done();

        if width != self.config.port_width {
            return self.read_mem(addr, width);
        }

        match self.config.cmd_set {
            CmdSet::Intel => match self.mode {
                Mode::ReadArray => self.read_mem(addr, width),
                Mode::Query => self.query_read(addr),
                Mode::ReadId => self.id_byte(addr).unwrap_or(0),
                _ => self.status_word(),
            },
            CmdSet::Amd => {
                if self.busy {
                    // DQ6 toggles on every read while the part is busy
                    self.toggle_phase = !self.toggle_phase;
                    return if self.toggle_phase {
                        self.lane_word(0x40)
                    } else {
                        0
                    };
                }
                match self.mode {
                    Mode::Query => self.query_read(addr),
                    Mode::ReadId => self.id_byte(addr).unwrap_or(0),
                    _ => self.read_mem(addr, width),
                }
            }
        }
    }
}

/// Build the 47-byte query block starting at the "QRY" signature
fn build_query_table(config: &SimConfig) -> [u8; 47] {
    let mut table = [0u8; 47];
    table[0] = b'Q';
    table[1] = b'R';
    table[2] = b'Y';

    let cmd_set_id: u16 = match config.cmd_set {
        CmdSet::Intel => 0x0003,
        CmdSet::Amd => 0x0002,
    };
    table[0x03..0x05].copy_from_slice(&cmd_set_id.to_le_bytes());
    table[0x05..0x07].copy_from_slice(&(EXT_BASE as u16).to_le_bytes());

    table[0x0F] = config.write_timeout_exp.0;
    table[0x10] = config.buffer_timeout_exp.0;
    table[0x11] = config.erase_timeout_exp.0;
    table[0x13] = config.write_timeout_exp.1;
    table[0x14] = config.buffer_timeout_exp.1;
    table[0x15] = config.erase_timeout_exp.1;

    let chip_size = config.chip_size();
    let mut dev_size = 0u8;
    while 1u32 << dev_size < chip_size {
        dev_size += 1;
    }
    table[0x17] = dev_size;
    table[0x18..0x1A].copy_from_slice(&config.interface_desc.to_le_bytes());

    let mut buf_exp = 0u16;
    while 1u32 << buf_exp < config.buffer_size {
        buf_exp += 1;
    }
    table[0x1A..0x1C].copy_from_slice(&buf_exp.to_le_bytes());

    table[0x1C] = config.regions.len() as u8;
    let mut regions: Vec<(u32, u32)> = config.regions.clone();
    if config.top_boot {
        regions.reverse();
    }
    for (i, &(count, size)) in regions.iter().enumerate().take(4) {
        let raw = (count - 1) | ((size / 256) << 16);
        table[0x1D + i * 4..0x21 + i * 4].copy_from_slice(&raw.to_le_bytes());
    }
    table
}

/// Build the 16-byte extended query table
fn build_ext_table(config: &SimConfig) -> [u8; 16] {
    let mut table = [0u8; 16];
    table[0] = b'P';
    table[1] = b'R';
    table[2] = b'I';
    table[3] = b'1';
    table[4] = b'1';
    table[5] = if config.legacy_unlock { 0x08 } else { 0x00 };
    table[6] = 0x01;
    table[0xF] = if config.top_boot { 3 } else { 2 };
    table
}

impl FlashBus for SimFlash {
    fn read8(&mut self, addr: u32) -> u8 {
        self.read(addr, PortWidth::X8) as u8
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.read(addr, PortWidth::X16) as u16
    }

    fn read32(&mut self, addr: u32) -> u32 {
        self.read(addr, PortWidth::X32)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.write(addr, value as u32, PortWidth::X8);
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.write(addr, value as u32, PortWidth::X16);
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.write(addr, value, PortWidth::X32);
    }

    fn elapsed_ms(&mut self) -> u64 {
        self.complete_if_done();
        self.clock_us / 1000
    }

    fn delay_us(&mut self, us: u32) {
        self.clock_us += us as u64;
        self.complete_if_done();
    }

    fn disable_interrupts(&mut self) -> bool {
        let was_enabled = !self.irq_masked;
        self.irq_masked = true;
        self.irq_mask_events += 1;
        was_enabled
    }

    fn enable_interrupts(&mut self) {
        self.irq_masked = false;
    }
}
