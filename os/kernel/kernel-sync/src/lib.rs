//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: fair ticket lock used for the remote run-queue and SMMU
//!   configuration paths.
//! * [`wait_until`]: bounded polling for cross-core acknowledgements.
//! * [`PerCpu`] / [`CpuId`]: CPU-local state as an explicit array.
//! * [`CpuSet`]: atomic CPU bitmap.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod cpuset;
mod per_cpu;
mod spin_lock;
pub mod wait;

pub use cpuset::CpuSet;
pub use per_cpu::{CpuId, PerCpu};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use wait::{Clock, wait_until};
