//! # Hypervisor Configuration and Platform Inputs
//!
//! This crate holds the compile-time contracts that every other kernel crate
//! agrees on: the virtual-address layout, scheduler and reclamation limits,
//! and the plain value types that platform discovery hands to the core.
//!
//! ## Overview
//!
//! The core never parses firmware tables itself. Whatever ACPI, multiboot or
//! the loader discovered arrives as small `Copy` records ([`platform`]). The
//! layout ([`memory`]) and limits ([`config`]) are `const` items so that
//! table walks, window checks and per-CPU arrays are sized at compile time.
//!
//! ## Virtual Memory Architecture
//!
//! Every host address space shares the upper 512 GiB slot with the kernel.
//! Inside that slot the layout is fixed:
//!
//! ```text
//! VIRT_ADDR(L3, L2, L1, L0)
//!
//! (511, 511, 000, 000) ┌──────────────────────────────┐ MMAP_SPC_PIO
//!                      │ Space-local: I/O bitmap      │
//! (511, 510, 511, 000) ├──────────────────────────────┤ MMAP_CPU
//!                      │ CPU-local data, stacks, APIC │
//! (511, 510, 448..508) ├──────────────────────────────┤ MMAP_GLB_*
//!                      │ SMMU / UART / APIC / MAP0/1  │
//!                      │ TPM2 windows                 │
//! (511, 510, 000, 000) ├──────────────────────────────┤ LINK_ADDR
//!                      │ Kernel text and data         │
//! (511, 509, 000, 000) ├──────────────────────────────┤ MMAP_GLB_CPUS
//!                      │ Per-CPU global area          │
//! (511, 253, 000, 000) ├──────────────────────────────┤ MMAP_GLB_PCIS
//!                      │ PCI segment config space     │
//! (511, 252, 000, 000) ├──────────────────────────────┤ MMAP_TMP_RW1S
//!                      │ Remap window 1               │
//! (511, 251, 000, 000) ├──────────────────────────────┤ MMAP_TMP_RW0S
//!                      │ Remap window 0               │
//!                      └──────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_info::memory::{MMAP_TMP_RW0S, MMAP_TMP_RW0E, page_size};
//!
//! // Each remap window spans one 1 GiB slot.
//! assert_eq!(MMAP_TMP_RW0E - MMAP_TMP_RW0S, page_size(2));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod memory;
pub mod platform;
