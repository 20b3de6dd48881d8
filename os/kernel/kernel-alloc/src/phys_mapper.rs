//! # Direct-map [`PhysMapper`]
//!
//! With a direct map every physical address is visible at a constant offset,
//! `va = offset + pa`. The boot code sets the mapping up once; afterwards
//! page-table frames can be touched without temporary mappings.
//!
//! ```rust
//! use kernel_alloc::phys_mapper::DirectMap;
//! use kernel_vmem::PhysMapper;
//!
//! let map = DirectMap::new(0xffff_8000_0000_0000);
//! assert_eq!(map.phys_to_ptr(0x1000) as u64, 0xffff_8000_0000_1000);
//! assert_eq!(map.virt_to_phys(0xffff_8000_0000_1000), 0x1000);
//! ```

use kernel_vmem::{OAddr, PhysMapper};

/// Offset mapping of all physical memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Identity mapping.
    #[must_use]
    pub const fn identity() -> Self {
        Self { offset: 0 }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Inverse of [`PhysMapper::phys_to_ptr`].
    #[must_use]
    pub const fn virt_to_phys(&self, va: u64) -> OAddr {
        va.wrapping_sub(self.offset)
    }
}

impl PhysMapper for DirectMap {
    #[inline]
    fn phys_to_ptr(&self, pa: OAddr) -> *mut u8 {
        self.offset.wrapping_add(pa) as *mut u8
    }
}
