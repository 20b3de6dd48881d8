use crate::info::{PAGE_BITS, PTE_BPL};
use crate::{Memattr, Permissions};

/// Encoding of one page-table format.
///
/// A format describes how many levels its tree has, up to which level leaves
/// may be installed, and how table pointers and leaves are packed into a raw
/// 64-bit entry. [`Ptab`](crate::Ptab) is generic over this trait and never
/// looks at individual bits itself.
///
/// Level numbering counts from the leaves: level 0 maps base pages, level
/// `LEVELS - 1` is the root table.
pub trait PteFormat: Send + Sync + 'static {
    /// Number of table levels.
    const LEVELS: u32;

    /// Highest level at which a leaf may be installed.
    const MAX_LEAF: u32;

    /// Number of translated input-address bits.
    const IBITS: u32 = Self::LEVELS * PTE_BPL + PAGE_BITS;

    /// Software bit marking a table pointer borrowed from another tree.
    ///
    /// Borrowed subtrees are never freed by the borrowing tree. Zero if the
    /// format does not support sharing.
    const BORROWED: u64 = 0;

    /// A non-leaf entry referencing the table at `pa`.
    fn table(pa: u64) -> u64;

    /// A leaf entry at `level` mapping `pa`.
    fn leaf(pa: u64, level: u32, pm: Permissions, ma: Memattr) -> u64;

    /// Whether the entry is valid at all.
    fn is_present(raw: u64) -> bool;

    /// Whether the entry at `level` references a next-level table.
    fn is_table(raw: u64, level: u32) -> bool;

    /// Output address (table or frame) held by the entry.
    fn addr(raw: u64) -> u64;

    /// Permissions of a leaf entry.
    fn permissions(raw: u64) -> Permissions;

    /// Memory attribute of a leaf entry.
    fn memattr(raw: u64) -> Memattr;

    /// Largest mapping order (in base pages) a single leaf can hold.
    #[inline]
    #[must_use]
    fn lev_ord() -> u32 {
        Self::MAX_LEAF * PTE_BPL
    }
}
