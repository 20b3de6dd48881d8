//! # Memory Layout

/// Number of index bits resolved per page-table level.
pub const PTE_BPL: u32 = 9;

/// Number of offset bits of a base page.
pub const PAGE_BITS: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;

/// Number of address bits translated below (and including) level `l`.
#[inline]
#[must_use]
pub const fn levl_bits(l: u32) -> u32 {
    l * PTE_BPL + PAGE_BITS
}

/// Size of the region mapped by one entry at level `l`.
///
/// ```rust
/// # use kernel_info::memory::page_size;
/// assert_eq!(page_size(0), 0x1000);
/// assert_eq!(page_size(1), 0x20_0000);
/// assert_eq!(page_size(2), 0x4000_0000);
/// ```
#[inline]
#[must_use]
pub const fn page_size(l: u32) -> u64 {
    1 << levl_bits(l)
}

/// Offset mask within a level-`l` page.
#[inline]
#[must_use]
pub const fn offs_mask(l: u32) -> u64 {
    page_size(l) - 1
}

/// Compose a canonical higher-half address from its four table indices.
#[inline]
#[must_use]
pub const fn virt_addr(l3: u64, l2: u64, l1: u64, l0: u64) -> u64 {
    (0xffff << levl_bits(4)) | (l3 << levl_bits(3)) | (l2 << levl_bits(2)) | (l1 << levl_bits(1)) | (l0 << levl_bits(0))
}

// Space-local area
pub const MMAP_SPC_PIO_E: u64 = virt_addr(511, 511, 0, 2);
pub const MMAP_SPC_PIO: u64 = virt_addr(511, 511, 0, 0);
pub const MMAP_SPC: u64 = virt_addr(511, 511, 0, 0);

// CPU-local area
pub const MMAP_CPU_DATA: u64 = virt_addr(511, 510, 511, 511);
pub const MMAP_CPU_DSTT: u64 = virt_addr(511, 510, 511, 391);
pub const MMAP_CPU_DSTB: u64 = virt_addr(511, 510, 511, 390);
pub const MMAP_CPU_APIC: u64 = virt_addr(511, 510, 511, 256);
pub const MMAP_CPU: u64 = virt_addr(511, 510, 511, 0);

// Global area
pub const MMAP_GLB_TPM2: u64 = virt_addr(511, 510, 508, 320);
pub const MMAP_GLB_MAP1: u64 = virt_addr(511, 510, 500, 0);
pub const MMAP_GLB_MAP0: u64 = virt_addr(511, 510, 496, 0);
pub const MMAP_GLB_APIC: u64 = virt_addr(511, 510, 488, 0);
pub const MMAP_GLB_UART: u64 = virt_addr(511, 510, 480, 0);
pub const MMAP_GLB_SMMU: u64 = virt_addr(511, 510, 448, 0);

/// Where the kernel image is linked.
pub const LINK_ADDR: u64 = virt_addr(511, 510, 0, 0);

pub const MMAP_GLB_CPUS: u64 = virt_addr(511, 509, 0, 0);
pub const MMAP_GLB_PCIS: u64 = virt_addr(511, 253, 0, 0);

/// Remap window 1, `[MMAP_TMP_RW1S, MMAP_TMP_RW1E)`.
pub const MMAP_TMP_RW1E: u64 = MMAP_GLB_PCIS;
pub const MMAP_TMP_RW1S: u64 = virt_addr(511, 252, 0, 0);

/// Remap window 0, `[MMAP_TMP_RW0S, MMAP_TMP_RW0E)`.
pub const MMAP_TMP_RW0E: u64 = MMAP_TMP_RW1S;
pub const MMAP_TMP_RW0S: u64 = virt_addr(511, 251, 0, 0);

/// Lowest address of the area shared by every host space.
pub const BASE_ADDR: u64 = MMAP_TMP_RW0S;

const _: () = {
    assert!(MMAP_TMP_RW0S < MMAP_TMP_RW0E);
    assert!(MMAP_TMP_RW0E <= MMAP_TMP_RW1S);
    assert!(MMAP_TMP_RW1E <= MMAP_GLB_CPUS);
    assert!(MMAP_GLB_CPUS < LINK_ADDR);
    assert!(LINK_ADDR < MMAP_GLB_SMMU);
    assert!(MMAP_GLB_SMMU < MMAP_GLB_UART);
    assert!(MMAP_GLB_UART < MMAP_GLB_APIC);
    assert!(MMAP_GLB_APIC < MMAP_GLB_MAP0);
    assert!(MMAP_GLB_MAP0 < MMAP_GLB_MAP1);
    assert!(MMAP_GLB_MAP1 < MMAP_GLB_TPM2);
    assert!(MMAP_GLB_TPM2 < MMAP_CPU);
    assert!(MMAP_CPU < MMAP_SPC);
    assert!(MMAP_SPC_PIO < MMAP_SPC_PIO_E);
};
