//! # Platform Discovery Records
//!
//! Plain values produced by firmware-table parsing and consumed by the core.
//! Nothing in here knows how the values were found.

/// A physical memory range `[base, base + size)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PhysRange {
    pub base: u64,
    pub size: u64,
}

impl PhysRange {
    #[must_use]
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base + self.size
    }

    #[must_use]
    pub const fn contains(&self, pa: u64) -> bool {
        pa >= self.base && pa < self.end()
    }
}

/// A PCI requester id including its segment: `seg:bus:dev.fun`.
///
/// ```rust
/// # use kernel_info::platform::PciDevice;
/// let d = PciDevice::new(1, 0x3a, 0x1f, 3);
/// assert_eq!(d.seg(), 1);
/// assert_eq!(d.bus(), 0x3a);
/// assert_eq!(d.dev(), 0x1f);
/// assert_eq!(d.fun(), 3);
/// assert_eq!(d.bdf(), 0x3afb);
/// ```
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PciDevice(u32);

impl PciDevice {
    const SEG_SHIFT: u32 = 16;
    const BUS_SHIFT: u32 = 8;
    const DEV_SHIFT: u32 = 3;

    #[must_use]
    pub const fn new(seg: u16, bus: u8, dev: u8, fun: u8) -> Self {
        Self(
            (seg as u32) << Self::SEG_SHIFT
                | (bus as u32) << Self::BUS_SHIFT
                | ((dev as u32) & 0x1f) << Self::DEV_SHIFT
                | (fun as u32) & 0x7,
        )
    }

    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn seg(self) -> u16 {
        (self.0 >> Self::SEG_SHIFT) as u16
    }

    /// Bus/device/function as the 16-bit requester id.
    #[must_use]
    pub const fn bdf(self) -> u16 {
        self.0 as u16
    }

    #[must_use]
    pub const fn bus(self) -> u8 {
        (self.0 >> Self::BUS_SHIFT) as u8
    }

    /// Device and function combined, as used for ARI and context-table indexing.
    #[must_use]
    pub const fn ari(self) -> u8 {
        self.0 as u8
    }

    #[must_use]
    pub const fn dev(self) -> u8 {
        (self.0 >> Self::DEV_SHIFT) as u8 & 0x1f
    }

    #[must_use]
    pub const fn fun(self) -> u8 {
        self.0 as u8 & 0x7
    }
}

/// An IOMMU (VT-d remapping unit) reported by the DMAR table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmmuInfo {
    /// Register page.
    pub phys: u64,
    /// PCI segment the unit translates for.
    pub seg: u16,
}

/// Firmware-reserved TCG event log.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TpmLogInfo {
    pub phys: u64,
    pub size: u32,
    /// Offset of the first free byte.
    pub offs: u32,
}
