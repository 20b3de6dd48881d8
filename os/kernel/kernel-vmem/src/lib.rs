//! # Page-Table Engine
//!
//! One radix-tree implementation shared by every translation structure the
//! hypervisor maintains: host page tables walked by the CPU, extended page
//! tables walked for guests, and DMA page tables walked by the SMMU.
//!
//! ## What you get
//! - [`Ptab<F>`] with [`walk`](Ptab::walk), [`lookup`](Ptab::lookup) and
//!   [`update`](Ptab::update), generic over an entry [`PteFormat`].
//! - Entry formats [`Hpt`], [`Ept`] and [`Dpt`].
//! - Format-independent [`Permissions`] and [`Memattr`].
//! - [`aligned_order`] for covering arbitrary ranges with the largest blocks.
//! - Host-table extras on [`Hptp`]: sharing the kernel's global area,
//!   temporary remap windows, pre-sized global mappings.
//! - Translation tags [`Pcid`], [`Vmid`] and [`Sdid`].
//! - The allocator/mapper seams [`FrameAlloc`] and [`PhysMapper`].
//!
//! ## Walk
//!
//! Each 48-bit input address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L3   |  L2   |  L1   |  L0   | Offset |
//! ```
//!
//! Levels are numbered from the leaves. Every table holds 512 (2⁹) entries of
//! 8 bytes; a leaf at level 1 maps 2 MiB, at level 2 it maps 1 GiB.
//!
//! ```text
//!   L3  →  L2  →  L1  →  L0  →  Frame
//!   │      │      │      │
//!   │      │      │      └───► leaf, 4 KiB
//!   │      │      └──────────► leaf if large, 2 MiB
//!   │      └─────────────────► leaf if large, 1 GiB
//!   └────────────────────────► always a table
//! ```
//!
//! ## Orders
//!
//! Sizes are passed as orders. [`aligned_order`] works on byte orders;
//! [`Ptab::update`] takes the order in base pages, so a 2 MiB block is order 9.
//!
//! ```rust
//! # use kernel_vmem::{aligned_order, info::PAGE_BITS};
//! let o = aligned_order(0x60_0000, 0x20_0000, 0x4000_0000);
//! assert_eq!(o - PAGE_BITS, 9);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

mod bits;
mod dpt;
mod ept;
mod hpt;
mod hptp;
mod ids;
mod paging;
mod ptab;
mod pte;

#[cfg(test)]
mod testing;

pub use crate::bits::{aligned_order, bit_scan_lsb, bit_scan_msb};
pub use crate::dpt::{Dpt, DptEntry};
pub use crate::ept::{Ept, EptEntry};
pub use crate::hpt::{Hpt, HptEntry};
pub use crate::hptp::{Hptp, LocalTlb, RemapWindow};
pub use crate::ids::{Pcid, Sdid, Vmid};
pub use crate::paging::{CacheType, Memattr, Permissions};
pub use crate::ptab::{Mapping, Ptab, PtabError};
pub use crate::pte::PteFormat;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Input address of a translation (virtual, guest-physical or DMA address).
pub type IAddr = u64;

/// Output address of a translation (host physical).
pub type OAddr = u64;

/// Source of **physical** 4 KiB frames for page tables.
///
/// The implementation decides where frames come from (boot pool, bitmap,
/// host heap in tests). Returned frames **must** be 4 KiB aligned.
pub trait FrameAlloc: Send + Sync {
    /// Allocate one frame, or `None` on out-of-memory.
    fn alloc_4k(&self) -> Option<OAddr>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, pa: OAddr);
}

/// Converts physical addresses to pointers usable in the current address
/// space (identity map, higher-half direct map, ...).
///
/// The pointer is valid for as long as the frame stays allocated.
pub trait PhysMapper: Send + Sync {
    fn phys_to_ptr(&self, pa: OAddr) -> *mut u8;
}

/// A frame allocator together with the mapping that reaches its frames.
pub trait FramePool: FrameAlloc + PhysMapper {}

impl<T: FrameAlloc + PhysMapper + ?Sized> FramePool for T {}

/// Align `x` down to the nearest multiple of `a`.
///
/// This returns the greatest value `y <= x` such that `y % a == 0`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two** (e.g., 1, 2, 4, 8, …).
///   These bit-trick formulas rely on that property.
/// - No additional constraints on `x`.
///
/// ### Notes
/// - If `x` is already aligned to `a`, it is returned unchanged.
/// - For non power-of-two `a`, the result is meaningless.
/// - This function does not perform runtime checks for performance reasons.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(1,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(4096,   4096), 4096);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// This returns the smallest value `y >= x` such that `y % a == 0`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`.
///   In debug builds, overflow panics; in release, it wraps (yielding a wrong result).
///   If you need saturating behavior, handle that before calling.
///
/// ### Notes
/// - If `x` is already aligned to `a`, it is returned unchanged.
/// - This function does not perform runtime checks for performance reasons.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4095,    4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(4097,    4096), 8192);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
