//! # Microhypervisor Core
//!
//! Kernel objects and the policy around them: protection domains and their
//! spaces, execution and scheduling contexts, FPU ownership, TLB shootdown,
//! DMA remapping and the measurement log.
//!
//! ## Object graph
//!
//! ```text
//!                  ┌────────────── Pd ──────────────┐
//!                  │   slab caches for its spaces   │
//!                  └──▲──────▲──────▲──────▲──────▲─┘
//!                     │      │      │      │      │   Refptr<Pd>
//!                  SpaceObj SpaceHst SpaceGst SpaceDma SpacePio/Msr
//!                     ▲      ▲
//!                     │      │   Refptr
//!                     └─ Ec ─┘ ◀──── Sc ◀──── ready queue of one Cpu
//! ```
//!
//! Arrows are counted references ([`Refptr`]). A Pd reaches its attached
//! spaces only weakly, so the graph has no strong cycles.
//!
//! ## Execution model
//!
//! There is no implicit "current CPU". Every kernel path takes the
//! [`Kernel`] and the [`CpuId`](kernel_sync::CpuId) it runs on; hardware
//! effects go through [`Platform`]. Switching paths (`schedule`, `activate`,
//! `reply`) are tail operations: once they return, the CPU runs something
//! else and the caller must not touch per-CPU state again.
//!
//! ## Usage
//!
//! The hosted test harness drives the core with an in-memory platform:
//!
//! ```rust,ignore
//! let k = Kernel::new(platform, Arc::new(HeapFramePool::new(256)), 2)?;
//! let root = k.create_root(CpuId::BSP)?;
//! k.idle_step(CpuId::BSP); // runs the root Ec
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod capability;
pub mod cpu;
pub mod ec;
pub mod fpu;
pub mod kernel;
pub mod kobject;
pub mod pd;
pub mod platform;
pub mod sc;
pub mod smmu;
pub mod space;
pub mod status;
pub mod tlb;
pub mod tpm_log;

pub use capability::{Capability, Object};
pub use cpu::{Cpu, Hazard};
pub use ec::{Cont, Ec, EcFlags, Kind, Regs};
pub use fpu::FpuState;
pub use kernel::Kernel;
pub use kobject::{Kobject, Kref, RefCount, Refptr};
pub use pd::{Pd, Subtype};
pub use platform::{Platform, Request};
pub use sc::Sc;
pub use smmu::{Smmu, SmmuRegs};
pub use status::{Result, Status};
pub use tpm_log::{Digests, HashAlgs, TpmLog, TpmLogError};
