//! CFI query block parsing
//!
//! A CFI-conformant chip answers the query command with a self-describing
//! parameter table: command-set ID, device size, write buffer size, timeout
//! exponents, and the erase region table the sector map is built from.
//! This module decodes the raw query bytes; reading them off the bus is the
//! identification layer's job.

use heapless::Vec;

use crate::bank::{Sector, MAX_SECTORS};

/// Query structure length in bytes, signature through the region table
pub(crate) const QUERY_LEN: usize = 47;

/// Maximum number of erase regions decoded from the table
pub(crate) const NUM_ERASE_REGIONS: usize = 4;

/// Primary vendor command-set IDs
pub(crate) const CMDSET_INTEL_EXTENDED: u16 = 0x0001;
pub(crate) const CMDSET_AMD_STANDARD: u16 = 0x0002;
pub(crate) const CMDSET_INTEL_STANDARD: u16 = 0x0003;
pub(crate) const CMDSET_AMD_EXTENDED: u16 = 0x0004;

/// Interface descriptor: x8/x16 capable part
pub(crate) const INTERFACE_X8X16: u16 = 0x0002;
/// Interface descriptor: x16/x32 capable part
pub(crate) const INTERFACE_X16X32: u16 = 0x0005;

/// Decoded CFI query block
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CfiQuery {
    /// Primary vendor command-set ID
    pub cmd_set_id: u16,
    /// Word offset of the extended query table, 0 if absent
    pub ext_table_offset: u16,
    /// Typical single-word program time, as a power-of-two in us
    pub word_write_timeout_typ: u8,
    /// Typical buffer program time, as a power-of-two in us
    pub buf_write_timeout_typ: u8,
    /// Typical block erase time, as a power-of-two in ms
    pub block_erase_timeout_typ: u8,
    /// Maximum word program multiplier, as a power-of-two
    pub word_write_timeout_max: u8,
    /// Maximum buffer program multiplier, as a power-of-two
    pub buf_write_timeout_max: u8,
    /// Maximum block erase multiplier, as a power-of-two
    pub block_erase_timeout_max: u8,
    /// Device size per chip, as a power-of-two in bytes
    pub dev_size: u8,
    /// Device interface code
    pub interface_desc: u16,
    /// Write buffer size per chip, as a power-of-two in bytes
    pub max_buf_write_size: u16,
    /// Number of erase regions that follow
    pub num_erase_regions: u8,
    /// Packed region descriptors: low half sector count minus one, high
    /// half block size in 256-byte units (0 means 128 bytes)
    pub erase_regions: [u32; NUM_ERASE_REGIONS],
}

impl CfiQuery {
    /// Decode the raw query bytes, starting at the "QRY" signature
    pub(crate) fn parse(buf: &[u8; QUERY_LEN]) -> CfiQuery {
        let get_u16 = |offset: usize| -> u16 { u16::from_le_bytes([buf[offset], buf[offset + 1]]) };
        let get_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ])
        };

        let num_erase_regions = buf[0x1C];
        let mut erase_regions = [0u32; NUM_ERASE_REGIONS];
        for (i, region) in erase_regions.iter_mut().enumerate() {
            if i < num_erase_regions as usize {
                *region = get_u32(0x1D + i * 4);
            }
        }

        CfiQuery {
            cmd_set_id: get_u16(0x03),
            ext_table_offset: get_u16(0x05),
            word_write_timeout_typ: buf[0x0F],
            buf_write_timeout_typ: buf[0x10],
            block_erase_timeout_typ: buf[0x11],
            word_write_timeout_max: buf[0x13],
            buf_write_timeout_max: buf[0x14],
            block_erase_timeout_max: buf[0x15],
            dev_size: buf[0x17],
            interface_desc: get_u16(0x18),
            max_buf_write_size: get_u16(0x1A),
            num_erase_regions,
            erase_regions,
        }
    }

    /// Reverse the stored erase region order
    ///
    /// Needed for parts that describe their geometry top-boot-first.
    pub(crate) fn reverse_regions(&mut self) {
        let n = self.num_erase_regions as usize;
        if n > 1 {
            self.erase_regions[..n.min(NUM_ERASE_REGIONS)].reverse();
        }
    }
}

/// Sector table and total size decoded from a query block
#[derive(Debug)]
pub(crate) struct Geometry {
    pub sectors: Vec<Sector, MAX_SECTORS>,
    pub size: u32,
}

/// Timeout budgets normalized to milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timeouts {
    pub erase_ms: u64,
    pub write_ms: u64,
    pub buffer_ms: u64,
}

/// Walk the erase region table into a sector start-address table
///
/// Block sizes scale with the port/chip mux ratio. A region table that
/// implies more sectors than [`MAX_SECTORS`] is truncated with a warning
/// rather than rejected.
pub(crate) fn decode_geometry(qry: &CfiQuery, base: u32, size_ratio: u32) -> Geometry {
    let mut sectors: Vec<Sector, MAX_SECTORS> = Vec::new();
    let mut addr = base;

    'regions: for i in 0..qry.num_erase_regions as usize {
        if i >= NUM_ERASE_REGIONS {
            log::warn!(
                "{} erase regions found, only {} used",
                qry.num_erase_regions,
                NUM_ERASE_REGIONS
            );
            break;
        }

        let raw = qry.erase_regions[i];
        let count = (raw & 0xFFFF) + 1;
        let size_code = (raw >> 16) & 0xFFFF;
        let block_size = if size_code == 0 { 128 } else { size_code * 256 };
        log::debug!(
            "erase region {}: {} sectors of {} bytes",
            i,
            count,
            block_size
        );

        for _ in 0..count {
            if sectors
                .push(Sector {
                    start: addr,
                    protected: false,
                })
                .is_err()
            {
                log::warn!("too many flash sectors, table truncated at {}", MAX_SECTORS);
                break 'regions;
            }
            addr += block_size * size_ratio;
        }
    }

    let size = match 1u32.checked_shl(qry.dev_size as u32) {
        Some(per_chip) => per_chip * size_ratio,
        None => 0,
    };

    Geometry { sectors, size }
}

/// Normalize the query's timeout exponents to millisecond budgets
///
/// Block erase times are stored in milliseconds, word and buffer program
/// times in microseconds; the microsecond fields round up on conversion.
pub(crate) fn decode_timeouts(qry: &CfiQuery) -> Timeouts {
    // Typical value times maximum multiplier, both powers of two; summing
    // the exponents keeps a corrupt table from overflowing the shift.
    let scale = |typ: u8, max: u8| 1u64 << (typ as u32 + max as u32).min(63);
    let erase_ms = scale(qry.block_erase_timeout_typ, qry.block_erase_timeout_max);
    let write_us = scale(qry.word_write_timeout_typ, qry.word_write_timeout_max);
    let buffer_us = scale(qry.buf_write_timeout_typ, qry.buf_write_timeout_max);

    Timeouts {
        erase_ms,
        write_ms: write_us.div_ceil(1000),
        buffer_ms: buffer_us.div_ceil(1000),
    }
}

/// Write buffer size in bytes per chip, 1 when buffered writes are
/// unsupported
pub(crate) fn decode_buffer_size(qry: &CfiQuery) -> u32 {
    1u32.checked_shl(qry.max_buf_write_size as u32).unwrap_or(1)
}

/// Whether an AMD-style part stores its geometry top-boot-first
///
/// Parts older than CFI 1.1 are guessed from the device ID; newer parts
/// carry an explicit flag in the extended query table.
pub(crate) fn amd_geometry_reversed(
    qry: &CfiQuery,
    device_id: u16,
    cfi_version: u16,
    ext_boot_flag: u8,
) -> bool {
    if qry.num_erase_regions <= 1 {
        return false;
    }
    if cfi_version < 0x3131 {
        device_id & 0x80 != 0
    } else {
        ext_boot_flag == 3
    }
}

/// Whether an Atmel part stores its geometry top-boot-first
pub(crate) fn atmel_geometry_reversed(qry: &CfiQuery, ext_top_bit: u8) -> bool {
    qry.ext_table_offset != 0 && ext_top_bit & 1 == 0 && qry.num_erase_regions > 1
}
