//! NOR flash command opcodes and status bits
//!
//! These are the JEDEC CFI query command plus the two command-set dialects
//! the driver speaks: Intel/Sharp-style (status-register based) and
//! AMD/Fujitsu-style (unlock-sequence based).

use bitflags::bitflags;

// ============================================================================
// CFI query
// ============================================================================

/// Enter CFI query mode
pub const CFI_QUERY: u8 = 0x98;
/// Word offset the query command is written at
pub const CFI_QUERY_OFFSET: u32 = 0x55;
/// Alternate query offset used by some AMD-style parts
pub const CFI_QUERY_OFFSET_ALT: u32 = 0x555;
/// Word offset of the "QRY" signature in query mode
pub const CFI_QUERY_RESP: u32 = 0x10;

// ============================================================================
// Identification offsets (query and read-ID modes)
// ============================================================================

/// Enter read-identifier (autoselect) mode, shared by both dialects
pub const READ_ID: u8 = 0x90;
/// Manufacturer ID word offset
pub const OFFSET_MANUFACTURER_ID: u32 = 0x00;
/// Device ID word offset
pub const OFFSET_DEVICE_ID: u32 = 0x01;
/// Per-sector protection status word offset (within the sector)
pub const OFFSET_PROTECT: u32 = 0x02;

// ============================================================================
// Intel/Sharp command set
// ============================================================================

/// Return to read-array mode
pub const INTEL_RESET: u8 = 0xFF;
/// Clear the status register
pub const INTEL_CLEAR_STATUS: u8 = 0x50;
/// Block erase setup
pub const INTEL_BLOCK_ERASE: u8 = 0x20;
/// Erase confirm
pub const INTEL_ERASE_CONFIRM: u8 = 0xD0;
/// Erase resume, shares the confirm encoding
pub const INTEL_ERASE_RESUME: u8 = 0xD0;
/// Single-word program setup
pub const INTEL_PROGRAM: u8 = 0x40;
/// Write-to-buffer setup
pub const INTEL_WRITE_TO_BUFFER: u8 = 0xE8;
/// Buffer program confirm
pub const INTEL_BUFFER_CONFIRM: u8 = 0xD0;
/// Lock-bit setup
pub const INTEL_PROTECT: u8 = 0x60;
/// Set the addressed block's lock bit
pub const INTEL_PROTECT_SET: u8 = 0x01;
/// Clear lock bits
pub const INTEL_PROTECT_CLEAR: u8 = 0xD0;

bitflags! {
    /// Intel-style status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntelStatus: u8 {
        /// Write state machine ready
        const READY = 0x80;
        /// Erase suspended
        const ERASE_SUSPENDED = 0x40;
        /// Erase or clear-lock-bit error
        const ERASE_ERROR = 0x20;
        /// Program or set-lock-bit error
        const PROGRAM_ERROR = 0x10;
        /// Vpp below threshold
        const VPP_LOW = 0x08;
        /// Program suspended
        const PROGRAM_SUSPENDED = 0x04;
        /// Operation attempted on a locked block
        const BLOCK_LOCKED = 0x02;
    }
}

/// Protection status bit read at [`OFFSET_PROTECT`] in read-ID mode
pub const STATUS_PROTECT: u8 = 0x01;

// ============================================================================
// AMD/Fujitsu command set
// ============================================================================

/// Return to read-array mode
pub const AMD_RESET: u8 = 0xF0;
/// First unlock cycle value
pub const AMD_UNLOCK_START: u8 = 0xAA;
/// Second unlock cycle value
pub const AMD_UNLOCK_ACK: u8 = 0x55;
/// Single-word program setup (after unlock)
pub const AMD_PROGRAM: u8 = 0xA0;
/// Erase setup (after unlock)
pub const AMD_ERASE_START: u8 = 0x80;
/// Sector erase confirm, written at the sector address
pub const AMD_ERASE_SECTOR: u8 = 0x30;
/// Write-to-buffer setup, written at the sector address
pub const AMD_WRITE_TO_BUFFER: u8 = 0x25;
/// Buffer program confirm
pub const AMD_BUFFER_CONFIRM: u8 = 0x29;

/// DQ6 toggles on successive status reads while the device is busy
pub const AMD_STATUS_TOGGLE: u8 = 0x40;

// ============================================================================
// Unlock cycle addresses (word offsets)
// ============================================================================

/// First unlock offset for CFI-detected parts
pub const UNLOCK1: u32 = 0x555;
/// Second unlock offset for CFI-detected parts
pub const UNLOCK2: u32 = 0x2AA;
/// First unlock offset in x8/x16 or x16/x32 compatibility mode
pub const UNLOCK1_COMPAT: u32 = 0xAAA;
/// Second unlock offset in x8/x16 or x16/x32 compatibility mode
pub const UNLOCK2_COMPAT: u32 = 0x555;
/// First unlock offset used when probing legacy (pre-CFI) parts
pub const UNLOCK1_LEGACY: u32 = 0x5555;
/// Second unlock offset used when probing legacy (pre-CFI) parts
pub const UNLOCK2_LEGACY: u32 = 0x2AAA;
