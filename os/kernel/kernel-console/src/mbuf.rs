use core::ops::Range;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Byte sink the logger writes into.
pub trait Sink: Sync {
    fn outc(&self, c: u8);
}

/// Memory-buffer console: a ring of `N` bytes shared with a reader.
///
/// The writer never blocks. When the ring is full the oldest byte is
/// dropped by advancing the read index. Writers must be serialized by the
/// caller; readers may run concurrently on other CPUs (or in user space, once
/// the ring is mapped there).
///
/// ```rust
/// use kernel_console::{Mbuf, Sink};
///
/// let m: Mbuf<8> = Mbuf::new();
/// for c in b"hello\n" {
///     m.outc(*c);
/// }
/// let mut out = [0; 8];
/// let n = m.read(&mut out);
/// assert_eq!(&out[..n], b"hello\n");
/// assert_eq!(m.lines(), 1);
/// ```
#[repr(C)]
pub struct Mbuf<const N: usize> {
    r_idx: AtomicU32,
    w_idx: AtomicU32,
    /// Newlines written so far; readers wait for this to change.
    lines: AtomicU64,
    buffer: [AtomicU8; N],
}

impl<const N: usize> Mbuf<N> {
    const VALID: () = assert!(N > 1 && N <= u32::MAX as usize);

    #[must_use]
    pub const fn new() -> Self {
        let () = Self::VALID;
        Self {
            r_idx: AtomicU32::new(0),
            w_idx: AtomicU32::new(0),
            lines: AtomicU64::new(0),
            buffer: [const { AtomicU8::new(0) }; N],
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    const fn succ(i: u32) -> u32 {
        ((i as usize + 1) % N) as u32
    }

    /// Bytes the ring can hold before dropping.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Acquire)
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        let r = self.r_idx.load(Ordering::Acquire) as usize;
        let w = self.w_idx.load(Ordering::Acquire) as usize;
        (w + N - r) % N
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address range of the whole structure, for granting access to it.
    #[must_use]
    pub fn region(&self) -> Range<u64> {
        let base = core::ptr::from_ref(self) as u64;
        base..base + core::mem::size_of::<Self>() as u64
    }

    /// Consume up to `out.len()` buffered bytes.
    pub fn read(&self, out: &mut [u8]) -> usize {
        loop {
            let r = self.r_idx.load(Ordering::Acquire);
            let w = self.w_idx.load(Ordering::Acquire);

            let mut i = r;
            let mut n = 0;
            while i != w && n < out.len() {
                out[n] = self.buffer[i as usize].load(Ordering::Relaxed);
                i = Self::succ(i);
                n += 1;
            }

            // Fails if the writer dropped bytes under us; those may be stale.
            if self
                .r_idx
                .compare_exchange(r, i, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return n;
            }
        }
    }
}

impl<const N: usize> Default for Mbuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Sink for Mbuf<N> {
    fn outc(&self, c: u8) {
        let w = self.w_idx.load(Ordering::Relaxed);
        let n = Self::succ(w);

        // Full: drop the oldest byte unless a reader just made room.
        let _ = self
            .r_idx
            .compare_exchange(n, Self::succ(n), Ordering::AcqRel, Ordering::Relaxed);

        self.buffer[w as usize].store(c, Ordering::Relaxed);
        self.w_idx.store(n, Ordering::Release);

        if c == b'\n' {
            self.lines.fetch_add(1, Ordering::Release);
        }
    }
}
