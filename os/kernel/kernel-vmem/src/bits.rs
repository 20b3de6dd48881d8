//! Bit scans and the block-size selection used by every mapping loop.

/// Index of the most significant set bit, or `None` for zero.
#[inline]
#[must_use]
pub const fn bit_scan_msb(v: u64) -> Option<u32> {
    if v == 0 { None } else { Some(63 - v.leading_zeros()) }
}

/// Index of the least significant set bit, or `None` for zero.
#[inline]
#[must_use]
pub const fn bit_scan_lsb(v: u64) -> Option<u32> {
    if v == 0 { None } else { Some(v.trailing_zeros()) }
}

/// Largest order `o` such that a block of `2^o` bytes fits into `size` and
/// starts aligned in both address spaces `a1` and `a2`.
///
/// A zero address imposes no alignment constraint. Mapping loops call this
/// once per step and advance all three values by `2^o`, which covers an
/// arbitrary range in `O(log n)` steps.
///
/// ```rust
/// # use kernel_vmem::aligned_order;
/// assert_eq!(aligned_order(0x1000, 0x1000, 0x2000), 12);
/// assert_eq!(aligned_order(0x40_0000, 0x20_0000, 0x60_0000), 21);
/// assert_eq!(aligned_order(0x3000, 0, 0), 13);
/// ```
#[inline]
#[must_use]
pub const fn aligned_order(size: u64, a1: u64, a2: u64) -> u32 {
    debug_assert!(size != 0);
    let mut o = match bit_scan_msb(size) {
        Some(o) => o,
        None => 0,
    };
    if let Some(l) = bit_scan_lsb(a1)
        && l < o
    {
        o = l;
    }
    if let Some(l) = bit_scan_lsb(a2)
        && l < o
    {
        o = l;
    }
    o
}
