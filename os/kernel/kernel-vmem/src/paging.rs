//! Format-independent mapping permissions and memory attributes.
//!
//! Every entry format ([`Hpt`](crate::Hpt), [`Ept`](crate::Ept),
//! [`Dpt`](crate::Dpt)) translates these into its own bit layout. A format
//! that cannot express a permission drops it on encode and reports the closest
//! superset on decode.

bitflags::bitflags! {
    /// Access rights granted by a leaf mapping.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u8 {
        /// Readable.
        const R  = 1 << 0;
        /// Writable.
        const W  = 1 << 1;
        /// Executable in user (guest user) mode.
        const XU = 1 << 2;
        /// Executable in supervisor mode.
        const XS = 1 << 3;
        /// Accessible from user mode.
        const U  = 1 << 4;
        /// Survives address-space switches in the TLB.
        const G  = 1 << 5;
    }
}

impl Permissions {
    /// Read, write and execute in both modes.
    pub const RWX: Self = Self::R.union(Self::W).union(Self::XU).union(Self::XS);
}

/// Cacheability of a mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheType {
    /// Device registers: uncached, strongly ordered.
    Uncacheable,
    /// Normal memory: write-back cached.
    WriteBack,
}

/// Memory attribute of a leaf mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Memattr {
    pub cache: CacheType,
}

impl Memattr {
    /// Cacheable RAM.
    #[must_use]
    pub const fn ram() -> Self {
        Self {
            cache: CacheType::WriteBack,
        }
    }

    /// Uncacheable device memory.
    #[must_use]
    pub const fn dev() -> Self {
        Self {
            cache: CacheType::Uncacheable,
        }
    }

    #[must_use]
    pub const fn is_ram(self) -> bool {
        matches!(self.cache, CacheType::WriteBack)
    }
}
