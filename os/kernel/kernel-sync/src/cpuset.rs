use crate::CpuId;
use core::sync::atomic::{AtomicU64, Ordering};

/// A lock-free set of CPUs, one bit per [`CpuId`].
#[derive(Debug, Default)]
pub struct CpuSet(AtomicU64);

impl CpuSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    const fn bit(cpu: CpuId) -> u64 {
        debug_assert!(cpu.as_usize() < 64);
        1 << cpu.as_usize()
    }

    /// Add `cpu`; returns whether it was already a member.
    #[inline]
    pub fn set(&self, cpu: CpuId) -> bool {
        self.0.fetch_or(Self::bit(cpu), Ordering::AcqRel) & Self::bit(cpu) != 0
    }

    /// Add the first `count` CPUs.
    #[inline]
    pub fn set_all(&self, count: usize) {
        let mask = if count >= 64 { u64::MAX } else { (1 << count) - 1 };
        self.0.fetch_or(mask, Ordering::AcqRel);
    }

    /// Remove `cpu`; returns whether it was a member.
    #[inline]
    pub fn chk_clr(&self, cpu: CpuId) -> bool {
        self.0.fetch_and(!Self::bit(cpu), Ordering::AcqRel) & Self::bit(cpu) != 0
    }

    #[inline]
    pub fn contains(&self, cpu: CpuId) -> bool {
        self.0.load(Ordering::Acquire) & Self::bit(cpu) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_report_previous_membership() {
        let s = CpuSet::new();
        assert!(!s.set(CpuId::new(3)));
        assert!(s.set(CpuId::new(3)));
        assert!(s.contains(CpuId::new(3)));
        assert!(s.chk_clr(CpuId::new(3)));
        assert!(!s.chk_clr(CpuId::new(3)));
        assert!(s.is_empty());
    }

    #[test]
    fn set_all_covers_prefix() {
        let s = CpuSet::new();
        s.set_all(5);
        assert!(s.contains(CpuId::new(4)));
        assert!(!s.contains(CpuId::new(5)));
        s.set_all(64);
        assert!(s.contains(CpuId::new(63)));
    }
}
