//! # Memory-Buffer Console
//!
//! Kernel output goes into a RAM ring ([`Mbuf`]) instead of a device. A
//! reader (a user-space console server once the ring is mapped for it, or a
//! debugger) drains it at its own pace; the kernel never waits for output to
//! be consumed.
//!
//! ## Output path
//!
//! ```text
//! log::warn!(..)
//!     ↓
//! MbufLogger (level filter, "[LEVEL] target: message\n")
//!     ↓
//! Sink::outc() per byte
//!     ↓
//! Mbuf ring ── newline bumps the line counter ──► reader
//! ```
//!
//! ## Feature System
//!
//! ### `enabled` Feature (default)
//! When disabled, [`MbufLogger`] reports every record as disabled and writes
//! nothing. The ring itself stays available.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_console::{Mbuf, MbufLogger};
//! use log::LevelFilter;
//!
//! static RING: Mbuf<4096> = Mbuf::new();
//! static LOGGER: MbufLogger = MbufLogger::new(&RING, LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger initialization");
//! log::info!("console up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;
mod mbuf;

pub use logger::MbufLogger;
pub use mbuf::{Mbuf, Sink};
