//! FPU save areas.
//!
//! FPU state is switched lazily: the FPU stays with its owner until another
//! Ec traps on first use, see [`Ec::switch_fpu`](crate::ec::Ec::switch_fpu).

/// Size of the legacy FXSAVE image.
pub const FPU_AREA: usize = 512;

#[repr(C, align(64))]
#[derive(Clone)]
pub struct FpuState {
    pub data: [u8; FPU_AREA],
}

impl FpuState {
    #[must_use]
    pub const fn new() -> Self {
        Self { data: [0; FPU_AREA] }
    }
}

impl Default for FpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FpuState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FpuState").finish_non_exhaustive()
    }
}
