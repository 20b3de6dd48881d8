//! Capabilities: a counted reference plus a permission mask.

use crate::ec::Ec;
use crate::kobject::Refptr;
use crate::pd::Pd;
use crate::sc::Sc;
use crate::space::{SpaceDma, SpaceGst, SpaceHst, SpaceMsr, SpaceObj, SpacePio};
use core::fmt;

/// The object a capability refers to.
#[derive(Clone)]
pub enum Object {
    Pd(Refptr<Pd>),
    Ec(Refptr<Ec>),
    Sc(Refptr<Sc>),
    Obj(Refptr<SpaceObj>),
    Hst(Refptr<SpaceHst>),
    Gst(Refptr<SpaceGst>),
    Dma(Refptr<SpaceDma>),
    Pio(Refptr<SpacePio>),
    Msr(Refptr<SpaceMsr>),
}

impl Object {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pd(_) => "pd",
            Self::Ec(_) => "ec",
            Self::Sc(_) => "sc",
            Self::Obj(_) => "obj",
            Self::Hst(_) => "hst",
            Self::Gst(_) => "gst",
            Self::Dma(_) => "dma",
            Self::Pio(_) => "pio",
            Self::Msr(_) => "msr",
        }
    }
}

#[derive(Clone)]
pub struct Capability {
    obj: Object,
    perms: u8,
}

impl Capability {
    /// Every permission bit.
    pub const ALL: u8 = 0x1f;

    #[must_use]
    pub const fn new(obj: Object, perms: u8) -> Self {
        Self {
            obj,
            perms: perms & Self::ALL,
        }
    }

    #[must_use]
    pub const fn object(&self) -> &Object {
        &self.obj
    }

    #[must_use]
    pub const fn perms(&self) -> u8 {
        self.perms
    }

    /// A copy with only the permissions in `pmask`; `None` if none remain.
    #[must_use]
    pub fn restrict(&self, pmask: u8) -> Option<Self> {
        let perms = self.perms & pmask;
        (perms != 0).then(|| Self {
            obj: self.obj.clone(),
            perms,
        })
    }

    #[must_use]
    pub fn pd(&self) -> Option<&Refptr<Pd>> {
        match &self.obj {
            Object::Pd(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn obj(&self) -> Option<&Refptr<SpaceObj>> {
        match &self.obj {
            Object::Obj(o) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({}, {:#x})", self.obj.kind(), self.perms)
    }
}
