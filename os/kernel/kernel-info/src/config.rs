//! # Kernel Limits
//!
//! Sizing constants for per-CPU arrays, the scheduler and cross-core waits.

/// Maximum number of CPUs the per-CPU arrays are sized for.
pub const MAX_CPUS: usize = 64;

/// Number of distinct scheduling priorities (`0..SC_PRIORITIES`).
pub const SC_PRIORITIES: usize = 128;

/// Priority of the root scheduling context.
pub const DEFAULT_PRIO: u8 = 1;

/// Budget of the root scheduling context, in timer ticks.
pub const DEFAULT_QUANTUM: u64 = 10_000;

/// Timer ticks per millisecond of the platform time base.
pub const TICKS_PER_MS: u64 = 1_000;

/// How long a TLB shootdown waits for one remote CPU to acknowledge.
pub const SHOOTDOWN_TIMEOUT_MS: u64 = 1;

/// How long SMMU register-based invalidations may take before being reported.
pub const SMMU_TIMEOUT_MS: u64 = 10;

/// Depth of the object-space table tree; each level resolves 9 selector bits.
pub const OBJ_LEVELS: u32 = 2;

/// Slots in each per-Pd space cache.
pub const PD_SPACE_SLOTS: usize = 16;

/// Slots in each per-Pd FPU save-area cache.
pub const PD_FPU_SLOTS: usize = 64;

/// Slots in the global Pd, Ec and Sc caches.
pub const KOBJ_SLOTS: usize = 1024;

const _: () = {
    assert!(MAX_CPUS <= 64, "CpuSet is a single 64-bit word");
    assert!(SC_PRIORITIES <= u8::MAX as usize + 1);
    assert!((DEFAULT_PRIO as usize) < SC_PRIORITIES);
    assert!(DEFAULT_QUANTUM > 0);
    assert!(OBJ_LEVELS > 0 && OBJ_LEVELS * 9 < 64);
    assert!(PD_SPACE_SLOTS > 0 && PD_FPU_SLOTS > 0 && KOBJ_SLOTS > 0);
};
