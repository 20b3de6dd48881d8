//! Bounded polling for cross-core confirmations.

use core::hint::spin_loop;

/// A monotonic time source.
pub trait Clock {
    /// Current time in ticks.
    fn now(&self) -> u64;

    /// Ticks per millisecond.
    fn ticks_per_ms(&self) -> u64;
}

/// Poll `f` until it returns `true` or `ms` milliseconds have elapsed.
///
/// Returns `false` on timeout. The condition is evaluated at least once, and
/// once more after the deadline has been observed, so a confirmation that
/// raced with the deadline is not reported as a timeout.
///
/// ```rust
/// # use kernel_sync::{Clock, wait_until};
/// # use core::cell::Cell;
/// struct Ticks(Cell<u64>);
/// impl Clock for Ticks {
///     fn now(&self) -> u64 { let t = self.0.get(); self.0.set(t + 1); t }
///     fn ticks_per_ms(&self) -> u64 { 10 }
/// }
/// let clock = Ticks(Cell::new(0));
/// assert!(!wait_until(&clock, 1, || false));
/// assert!(wait_until(&clock, 1, || true));
/// ```
pub fn wait_until<C, F>(clock: &C, ms: u64, mut f: F) -> bool
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    let start = clock.now();
    let limit = ms.saturating_mul(clock.ticks_per_ms());

    loop {
        if f() {
            return true;
        }

        if clock.now().wrapping_sub(start) > limit {
            return f();
        }

        spin_loop();
    }
}
