//! Status codes reported to the orchestration layer.

use kernel_vmem::PtabError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    /// The operation was aborted, e.g. because a referenced object died.
    #[error("aborted")]
    Aborted,
    /// No memory for the object itself.
    #[error("out of memory (object)")]
    MemObj,
    /// No memory for the capability slot.
    #[error("out of memory (capability)")]
    MemCap,
    #[error("bad capability")]
    BadCap,
    #[error("bad parameter")]
    BadPar,
    #[error("bad cpu")]
    BadCpu,
    #[error("timeout")]
    Timeout,
}

pub type Result<T> = core::result::Result<T, Status>;

impl From<PtabError> for Status {
    fn from(e: PtabError) -> Self {
        match e {
            PtabError::OutOfMemory => Self::MemObj,
        }
    }
}
