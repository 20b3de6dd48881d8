//! # DMA remapping units
//!
//! Each [`Smmu`] translates device accesses of one PCI segment. A device is
//! assigned to a DMA space by pointing its context entry at the space's
//! table:
//!
//! ```text
//!   RTADDR ──▶ root table         context table (one per bus)
//!              [bus] lo ─────────▶ [devfn] lo = DPT root | P
//!                                          hi = SDID << 8 | AW
//! ```
//!
//! Both tables are one 4 KiB frame of 256 16-byte entries. Invalidations go
//! through the register interface and are polled with a bounded wait.

#![allow(clippy::cast_possible_truncation)]

use crate::kernel::Kernel;
use crate::platform::Platform;
use crate::space::{SpaceDma, SpaceHst};
use crate::status::{Result, Status};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_info::config::SMMU_TIMEOUT_MS;
use kernel_info::memory::PAGE_SIZE;
use kernel_info::platform::{PciDevice, SmmuInfo};
use kernel_sync::{SpinLock, wait_until};
use kernel_vmem::{Dpt, FramePool, OAddr, Permissions, PteFormat, Sdid, bit_scan_msb};

/// MMIO access to one unit's register page.
pub trait SmmuRegs: Send + Sync {
    fn read32(&self, off: usize) -> u32;
    fn write32(&self, off: usize, val: u32);
    fn read64(&self, off: usize) -> u64;
    fn write64(&self, off: usize, val: u64);
}

/// Register offsets.
pub mod reg {
    pub const VER: usize = 0x00;
    pub const CAP: usize = 0x08;
    pub const ECAP: usize = 0x10;
    pub const GCMD: usize = 0x18;
    pub const GSTS: usize = 0x1c;
    pub const RTADDR: usize = 0x20;
    pub const CCMD: usize = 0x28;
    pub const FSTS: usize = 0x34;
    pub const FECTL: usize = 0x38;
    pub const IQERCD: usize = 0xb0;
}

bitflags::bitflags! {
    /// Fault status bits.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Fault: u32 {
        const PFO = 1 << 0;
        const PPF = 1 << 1;
        const AFO = 1 << 2;
        const APF = 1 << 3;
        const IQE = 1 << 4;
        const ICE = 1 << 5;
        const ITE = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Global command and status bits.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Gcmd: u32 {
        const SRTP = 1 << 30;
        const TE = 1 << 31;
    }
}

const ENTRIES: usize = 256;
const PRESENT: u64 = 1;
const BUSY: u64 = 1 << 63;

type Table = [AtomicU64; 2 * ENTRIES];

pub struct Smmu {
    info: SmmuInfo,
    regs: Box<dyn SmmuRegs>,
    platform: Arc<dyn Platform>,
    pool: Arc<dyn FramePool>,
    cap: u64,
    ecap: u64,
    root: OAddr,
    cfg_lock: SpinLock<()>,
}

impl Smmu {
    /// Bring up the unit at `info` and register it with the kernel. DMA stays
    /// blocked for every device until it is assigned a space.
    pub fn new(k: &Kernel, info: SmmuInfo, regs: Box<dyn SmmuRegs>) -> Result<Arc<Self>> {
        // The register page is not reachable from user space.
        SpaceHst::access_ctrl(k, info.phys, PAGE_SIZE, Permissions::empty())?;

        let pool = k.pool().clone();
        let root = pool.alloc_4k().ok_or(Status::MemObj)?;

        let smmu = Self {
            info,
            cap: regs.read64(reg::CAP),
            ecap: regs.read64(reg::ECAP),
            regs,
            platform: k.platform_arc(),
            pool,
            root,
            cfg_lock: SpinLock::new(()),
        };
        smmu.clear(root);

        let ver = smmu.regs.read32(reg::VER);
        log::debug!(
            "SMMU {:#x}: {}.{} CAP {:#x} ECAP {:#x}",
            info.phys,
            ver >> 4 & 0xf,
            ver & 0xf,
            smmu.cap,
            smmu.ecap
        );

        smmu.init();

        let smmu = Arc::new(smmu);
        k.register_smmu(smmu.clone());
        Ok(smmu)
    }

    fn init(&self) {
        self.regs.write32(reg::FECTL, 0);
        self.regs.write32(reg::FSTS, Self::w1c().bits());

        self.regs.write64(reg::RTADDR, self.root);
        self.command(Gcmd::SRTP);
        self.command(Gcmd::TE);
    }

    fn command(&self, c: Gcmd) {
        let sts = self.regs.read32(reg::GSTS) & Gcmd::TE.bits();
        self.regs.write32(reg::GCMD, sts | c.bits());

        if !wait_until(&*self.platform, SMMU_TIMEOUT_MS, || self.regs.read32(reg::GSTS) & c.bits() != 0) {
            log::warn!("SMMU {:#x}: command {c:?} timed out", self.info.phys);
        }
    }

    #[must_use]
    pub const fn info(&self) -> SmmuInfo {
        self.info
    }

    /// Physical address of the root table.
    #[must_use]
    pub const fn root(&self) -> OAddr {
        self.root
    }

    /// Supported guest address widths; bit `n` means `n + 2` levels.
    const fn sagaw(&self) -> u64 {
        self.cap >> 8 & 0x1f
    }

    /// Page-table levels this unit walks.
    #[must_use]
    pub fn levels(&self) -> u32 {
        bit_scan_msb(self.sagaw()).map_or(Dpt::LEVELS, |b| Dpt::LEVELS.min(2 + b))
    }

    /// Offset of the IOTLB registers.
    const fn iro(&self) -> usize {
        (self.ecap >> 8 & 0x3ff) as usize * 16
    }

    /// Offset of the fault recording registers.
    const fn fro(&self) -> usize {
        (self.cap >> 24 & 0x3ff) as usize * 16
    }

    /// Number of fault recording registers.
    const fn nfr(&self) -> usize {
        (self.cap >> 40 & 0xff) as usize + 1
    }

    const fn w1c() -> Fault {
        Fault::ITE.union(Fault::ICE).union(Fault::IQE).union(Fault::APF).union(Fault::AFO).union(Fault::PFO)
    }

    fn table(&self, pa: OAddr) -> &Table {
        // SAFETY: `pa` is a frame this unit allocated and owns until drop;
        // the pool maps it writable and 8-byte aligned.
        unsafe { &*self.pool.phys_to_ptr(pa).cast::<Table>() }
    }

    fn clear(&self, pa: OAddr) {
        for e in self.table(pa) {
            e.store(0, Ordering::Relaxed);
        }
    }

    /// Context entry of `dev`, as `(lo, hi)`, if its bus has a table.
    #[must_use]
    pub fn context(&self, dev: PciDevice) -> Option<(u64, u64)> {
        let r = self.table(self.root)[2 * usize::from(dev.bus())].load(Ordering::Acquire);
        if r & PRESENT == 0 {
            return None;
        }

        let c = self.table(r & !0xfff);
        let i = 2 * usize::from(dev.ari());
        Some((c[i].load(Ordering::Acquire), c[i + 1].load(Ordering::Acquire)))
    }

    /// Assign `dev` to `dma`. If the device was assigned before and `inv`
    /// is set, translations cached for its old domain are invalidated.
    ///
    /// `false` if the space has no table deep enough or no context table
    /// could be allocated.
    pub fn configure(&self, dma: &SpaceDma, dev: PciDevice, mut inv: bool) -> bool {
        let lev = self.levels();
        let sdid = dma.sdid();

        let Some(ptab) = dma.root_for(lev) else {
            return false;
        };

        let zap = {
            let _guard = self.cfg_lock.lock();

            let r = &self.table(self.root)[2 * usize::from(dev.bus())];
            if r.load(Ordering::Acquire) & PRESENT == 0 {
                let Some(ctx) = self.pool.alloc_4k() else {
                    return false;
                };
                self.clear(ctx);
                r.store(ctx | PRESENT, Ordering::Release);
            }

            let c = self.table(r.load(Ordering::Acquire) & !0xfff);
            let i = 2 * usize::from(dev.ari());
            let (lo, hi) = (&c[i], &c[i + 1]);

            let zap = Sdid::from_raw((hi.load(Ordering::Acquire) >> 8) as u16);

            if lo.load(Ordering::Acquire) & PRESENT == 0 {
                inv = false;
            } else {
                lo.store(0, Ordering::Release);
            }

            hi.store(u64::from(sdid.raw()) << 8 | u64::from(lev - 2), Ordering::Release);
            lo.store(ptab | PRESENT, Ordering::Release);

            zap
        };

        if inv {
            self.invalidate_ctx();
            self.invalidate_tlb_all(zap);
        }

        log::debug!(
            "SMMU {:#x}: device {:04x}:{:02x}:{:02x}.{} assigned to domain {}",
            self.info.phys,
            dev.seg(),
            dev.bus(),
            dev.dev(),
            dev.fun(),
            sdid.raw()
        );

        true
    }

    /// Global context-cache invalidation.
    pub fn invalidate_ctx(&self) {
        self.regs.write64(reg::CCMD, BUSY | 1 << 61);
        self.wait(reg::CCMD, "context");
    }

    /// Domain-selective IOTLB invalidation.
    pub fn invalidate_tlb_all(&self, sdid: Sdid) {
        let off = self.iro() + 8;
        self.regs.write64(off, BUSY | 2 << 60 | u64::from(sdid.raw()) << 32);
        self.wait(off, "IOTLB");
    }

    fn wait(&self, off: usize, what: &str) {
        if !wait_until(&*self.platform, SMMU_TIMEOUT_MS, || self.regs.read64(off) & BUSY == 0) {
            log::warn!("SMMU {:#x}: {what} invalidation timed out", self.info.phys);
        }
    }

    /// Fault interrupt: report and clear every recorded fault. Returns the
    /// number of primary fault records consumed.
    pub fn fault(&self) -> usize {
        let raw = self.regs.read32(reg::FSTS);
        let fsts = Fault::from_bits_truncate(raw);
        let mut n = 0;

        if fsts.contains(Fault::PPF) {
            let mut frr = (raw >> 8 & 0xff) as usize % self.nfr();

            while n < self.nfr() {
                let off = self.fro() + frr * 16;
                let hi = self.regs.read64(off + 8);
                if hi & BUSY == 0 {
                    break;
                }

                let lo = self.regs.read64(off);
                let sid = PciDevice::from_raw(u32::from(hi as u16));
                log::warn!(
                    "SMMU {:#x}: FRR {frr} FR {:#x} SID {:02x}:{:02x}.{} FI {lo:#x}",
                    self.info.phys,
                    hi >> 32 & 0xff,
                    sid.bus(),
                    sid.dev(),
                    sid.fun()
                );

                self.regs.write64(off + 8, BUSY);
                frr = (frr + 1) % self.nfr();
                n += 1;
            }
        }

        if fsts.intersects(Fault::ITE | Fault::ICE | Fault::IQE) {
            let error = self.regs.read64(reg::IQERCD);

            if fsts.contains(Fault::ITE) {
                log::warn!("SMMU {:#x}: ITE from SID {:#06x}", self.info.phys, error >> 32 & 0xffff);
            }
            if fsts.contains(Fault::ICE) {
                log::warn!("SMMU {:#x}: ICE from SID {:#06x}", self.info.phys, error >> 48);
            }
            if fsts.contains(Fault::IQE) {
                log::warn!("SMMU {:#x}: IQE {}", self.info.phys, error & 0xf);
            }
        }

        self.regs.write32(reg::FSTS, Self::w1c().bits());
        n
    }
}

impl Drop for Smmu {
    fn drop(&mut self) {
        let root = self.table(self.root);
        for bus in 0..ENTRIES {
            let r = root[2 * bus].load(Ordering::Acquire);
            if r & PRESENT != 0 {
                self.pool.free_4k(r & !0xfff);
            }
        }
        self.pool.free_4k(self.root);
    }
}
