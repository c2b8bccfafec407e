//! parflash-core - Driver core for memory-mapped parallel NOR flash
//!
//! This crate identifies CFI-conformant and legacy JEDEC parallel NOR
//! flash chips behind a memory-mapped bus, decodes their geometry and
//! timing, and drives the erase/program/protect command handshakes. It is
//! designed to be `no_std` compatible for use in firmware.
//!
//! The platform supplies one thing: a [`FlashBus`] implementation giving
//! width-sized volatile access to the flash window plus a monotonic clock,
//! a delay, and interrupt masking. Everything else is derived from the
//! device's own parameter block at probe time.
//!
//! # Example
//!
//! ```ignore
//! use parflash_core::{BankRegistry, ProtectOp};
//!
//! fn bring_up<B: parflash_core::FlashBus>(bus: &mut B) {
//!     let (flash, total) = BankRegistry::init(bus, &[0xFF00_0000]);
//!     log::info!("{} bytes of flash", total);
//!
//!     if let Some(handle) = flash.handles().next() {
//!         let summary = flash.erase(bus, handle, 0, 3).unwrap();
//!         log::info!("{} sectors erased", summary.erased);
//!         flash.write_buff(bus, handle, b"boot", 0xFF00_0001).unwrap();
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "std")]
extern crate std;

pub mod bank;
pub mod bus;
pub mod cmd;
pub mod error;
pub mod registry;

mod cfi;
mod detect;
mod jedec;
mod ops;

pub use bank::{BankInfo, CmdSet, CmdSetCaps, FlashBank, Sector, Vendor, MAX_SECTORS};
pub use bus::{ChipWidth, FlashBus, PortWidth};
pub use error::{Error, HardwareError, Operation, Result};
pub use ops::{NoProgress, Progress};
pub use registry::{BankHandle, BankRegistry, EraseSummary, ProtectOp, MAX_BANKS};
