use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Index;

/// Logical CPU index (`0..n`).
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuId(u16);

impl CpuId {
    pub const BSP: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU{}", self.0)
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(C, align(64))] // avoid false sharing between neighbouring CPUs
struct Slot<T>(T);

/// One `T` per CPU, indexed by [`CpuId`].
///
/// The array is fixed at bring-up; its length is the number of CPUs online.
pub struct PerCpu<T> {
    slots: Box<[Slot<T>]>,
}

impl<T> PerCpu<T> {
    /// Build the array by calling `f` once per CPU in ascending order.
    pub fn new(count: usize, mut f: impl FnMut(CpuId) -> T) -> Self {
        assert!(count > 0 && count <= usize::from(u16::MAX));
        let mut v = Vec::with_capacity(count);
        for i in 0..count {
            #[allow(clippy::cast_possible_truncation)]
            v.push(Slot(f(CpuId(i as u16))));
        }
        Self {
            slots: v.into_boxed_slice(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, cpu: CpuId) -> Option<&T> {
        self.slots.get(cpu.as_usize()).map(|s| &s.0)
    }

    /// All CPU ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = CpuId> + use<T> {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.slots.len()).map(|i| CpuId(i as u16))
    }

    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        self.ids().zip(self.slots.iter().map(|s| &s.0))
    }
}

impl<T> Index<CpuId> for PerCpu<T> {
    type Output = T;

    #[inline]
    fn index(&self, cpu: CpuId) -> &T {
        &self.slots[cpu.as_usize()].0
    }
}

/// Slot `i` of the array belongs to CPU `i`.
impl<T> FromIterator<T> for PerCpu<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let slots: Box<[Slot<T>]> = iter.into_iter().map(Slot).collect();
        assert!(!slots.is_empty() && slots.len() <= usize::from(u16::MAX));
        Self { slots }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_cache_line_sized() {
        assert_eq!(core::mem::align_of::<Slot<u8>>(), 64);
        let p = PerCpu::new(3, |c| c.as_usize() * 10);
        let a = core::ptr::from_ref(&p[CpuId::new(0)]) as usize;
        let b = core::ptr::from_ref(&p[CpuId::new(1)]) as usize;
        assert_eq!(b - a, 64);
    }

    #[test]
    fn iter_visits_in_order() {
        let p = PerCpu::new(4, |c| c.as_usize());
        let seen: Vec<_> = p.iter().map(|(c, v)| (c.as_usize(), *v)).collect();
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert!(p.get(CpuId::new(4)).is_none());
    }

    #[test]
    fn collect_assigns_slots_in_order() {
        let p: PerCpu<&str> = ["bsp", "ap"].into_iter().collect();
        assert_eq!(p.len(), 2);
        assert_eq!(p[CpuId::new(1)], "ap");
    }
}
