//! # Kernel Memory Allocation
//!
//! Frame pools feeding the page-table engine and typed slab caches for
//! kernel objects.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Slab caches ([`slab`])              │
//! │    • Fixed-capacity typed arenas per object kind    │
//! │    • Handles return slots to their origin cache     │
//! └─────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────┐
//! │              Physical Mapper ([`phys_mapper`])      │
//! │    • Physical-to-virtual translation                │
//! │    • Direct map at a constant offset                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Frame pools ([`frame_alloc`])             │
//! │    • 4 KiB frames for page tables                   │
//! │    • Lock-free bitmap over a physical range         │
//! │    • Heap-backed pool for hosted runs               │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Both pools implement [`FrameAlloc`](kernel_vmem::FrameAlloc) and
//! [`PhysMapper`](kernel_vmem::PhysMapper), so either can be handed to a
//! [`Ptab`](kernel_vmem::Ptab) as an `Arc<dyn FramePool>`.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::HeapFramePool;
//! use kernel_vmem::{FrameAlloc, Hpt, Memattr, Permissions, Ptab};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(HeapFramePool::new(16));
//! let pt: Ptab<Hpt> = Ptab::new(pool.clone());
//! pt.update(0x40_0000, 0x20_0000, 0, Permissions::R, Memattr::ram()).unwrap();
//! assert_eq!(pt.lookup(0x40_0010).map(|m| m.phys), Some(0x20_0010));
//!
//! drop(pt);
//! assert_eq!(pool.allocated(), 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod phys_mapper;
pub mod slab;

pub use frame_alloc::{BitmapFramePool, HeapFramePool};
pub use phys_mapper::DirectMap;
pub use slab::{SlabBox, SlabCache};
