//! Tags that let translation caches keep entries of several spaces apart.
//!
//! Each allocator is a wrapping atomic counter truncated to the width the
//! hardware tag field has. Reuse after wrap-around is accepted: a stale entry
//! tagged with a recycled id is removed by the flush that accompanies
//! every space switch into a freshly created space.

use core::sync::atomic::{AtomicU16, Ordering};

macro_rules! tag {
    ($(#[$meta:meta])* $name:ident, $bits:expr, reserve_zero = $rz:expr) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub struct $name(u16);

        impl $name {
            /// Width of the hardware field.
            pub const BITS: u32 = $bits;

            const MASK: u16 = ((1u32 << $bits) - 1) as u16;
            const RESERVE_ZERO: bool = $rz;

            /// Next id from the global counter.
            pub fn alloc() -> Self {
                static NEXT: AtomicU16 = AtomicU16::new(1);
                loop {
                    let v = NEXT.fetch_add(1, Ordering::Relaxed) & Self::MASK;
                    if v != 0 || !Self::RESERVE_ZERO {
                        return Self(v);
                    }
                }
            }

            /// The id held in a hardware field.
            #[inline]
            #[must_use]
            pub const fn from_raw(v: u16) -> Self {
                Self(v & Self::MASK)
            }

            #[inline]
            #[must_use]
            pub const fn raw(self) -> u16 {
                self.0
            }
        }
    };
}

tag!(
    /// Process-context identifier of a host space.
    Pcid, 12, reserve_zero = false
);

tag!(
    /// Virtual-machine identifier of a guest space.
    Vmid, 16, reserve_zero = false
);

tag!(
    /// SMMU domain identifier of a DMA space. Zero is reserved for
    /// untranslated context entries.
    Sdid, 16, reserve_zero = true
);
