//! Error types for parflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Operation whose status poll ran out of its timeout budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Block erase
    Erase,
    /// Single-word program
    Program,
    /// Buffered block program
    BufferWrite,
    /// Sector protect or unprotect
    Protect,
}

/// Hardware failure decoded from the status register after a completed
/// Intel-style operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// Both erase and program status bits set: illegal command sequence
    CommandSequence,
    /// Block erase failed, possibly because of a set lock bit
    BlockErase,
    /// Lock-bit operation failed
    Locking,
    /// Programming voltage below threshold during the operation
    VppLow,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bank identification failed; all operations on the bank are no-ops
    UnknownDevice,
    /// Sector indices or address range outside the bank
    InvalidSectorRange,
    /// Operation would touch a hardware-locked sector
    ProtectedSector,
    /// Program target is not in the erased state (programming can only
    /// clear bits)
    NotErased,
    /// Status polling exceeded the operation's timeout budget
    Timeout(Operation),
    /// Status register reported a hardware failure
    Hardware(HardwareError),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::Program => write!(f, "program"),
            Self::BufferWrite => write!(f, "buffer write"),
            Self::Protect => write!(f, "protect"),
        }
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandSequence => write!(f, "command sequence error"),
            Self::BlockErase => write!(f, "block erase error (possible lock bit)"),
            Self::Locking => write!(f, "locking error"),
            Self::VppLow => write!(f, "Vpp low error"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDevice => write!(f, "unknown flash device"),
            Self::InvalidSectorRange => write!(f, "invalid sector range"),
            Self::ProtectedSector => write!(f, "sector is protected"),
            Self::NotErased => write!(f, "flash not erased"),
            Self::Timeout(op) => write!(f, "{} timeout", op),
            Self::Hardware(kind) => write!(f, "{}", kind),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
