//! # TCG event log
//!
//! Measurements the kernel takes are appended to the crypto-agile event log
//! the firmware reserved. The log starts with a `Spec ID Event03` header
//! listing the digest algorithms every record carries:
//!
//! ```text
//!   0  pcr = 0        4  type = EV_NO_ACTION    8  sha1 (zero)
//!  28  event size    32  "Spec ID Event03\0"   48  class, version
//!  56  count         60  { alg: u16, size: u16 } * count
//! ```
//!
//! Records appended by [`TpmLog::extend`] are `EV_EVENT_TAG` events with an
//! empty tagged event. All fields are little endian.

#![allow(clippy::cast_possible_truncation)]

use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_info::platform::TpmLogInfo;
use kernel_vmem::PhysMapper;

const EV_NO_ACTION: u32 = 0x3;
const EV_EVENT_TAG: u32 = 0x6;

const SIGNATURE: &[u8; 16] = b"Spec ID Event03\0";

/// Size of the fixed part of the header, up to the algorithm list.
const HEADER: usize = 60;

/// Fixed part of an appended record: pcr, type, count, then event size,
/// tagged id and tagged size.
const RECORD: usize = 6 * 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TpmLogError {
    #[error("no event log")]
    NotPresent,
    #[error("bad header")]
    BadHeader,
    #[error("bad signature")]
    BadSignature,
}

bitflags::bitflags! {
    /// Digest algorithms the log records carry.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct HashAlgs: u8 {
        const SHA1 = 1 << 0;
        const SHA256 = 1 << 1;
        const SHA384 = 1 << 2;
        const SHA512 = 1 << 3;
    }
}

impl HashAlgs {
    /// TCG algorithm id.
    const fn from_id(id: u16) -> Self {
        match id {
            0x4 => Self::SHA1,
            0xb => Self::SHA256,
            0xc => Self::SHA384,
            0xd => Self::SHA512,
            _ => Self::empty(),
        }
    }
}

/// One digest per algorithm; only those the log lists are recorded.
#[derive(Debug, Copy, Clone)]
pub struct Digests<'a> {
    pub sha1: &'a [u8; 20],
    pub sha256: &'a [u8; 32],
    pub sha384: &'a [u8; 48],
    pub sha512: &'a [u8; 64],
}

pub struct TpmLog {
    mapper: Arc<dyn PhysMapper>,
    phys: u64,
    size: u32,
    offs: u32,
    algs: HashAlgs,
    /// Size of all tagged digests of one record.
    tdsz: u32,
}

impl TpmLog {
    /// Validate the log header at `info.phys`.
    pub fn init(mapper: Arc<dyn PhysMapper>, info: TpmLogInfo) -> Result<Self, TpmLogError> {
        if info.phys == 0 || info.size == 0 || info.offs == 0 {
            return Err(TpmLogError::NotPresent);
        }

        let mut log = Self {
            mapper,
            phys: info.phys,
            size: info.size,
            offs: info.offs,
            algs: HashAlgs::empty(),
            tdsz: 0,
        };

        if (info.size as usize) < HEADER || info.offs > info.size {
            return Err(TpmLogError::BadHeader);
        }

        let h = log.read(0, HEADER);
        let word = |o: usize| u32::from_le_bytes([h[o], h[o + 1], h[o + 2], h[o + 3]]);

        let (pcr, evt, esz, cnt) = (word(0), word(4), word(28), word(56));
        if pcr != 0 || evt != EV_NO_ACTION || u64::from(esz) != 29 + u64::from(cnt) * 4 {
            return Err(TpmLogError::BadHeader);
        }

        if &h[32..48] != SIGNATURE {
            return Err(TpmLogError::BadSignature);
        }

        let major = h[53];
        let n = cnt as usize;
        if HEADER + n * 4 > info.size as usize {
            return Err(TpmLogError::BadHeader);
        }

        let list = log.read(HEADER, n * 4);
        let (mut algs, mut tdsz) = (HashAlgs::empty(), 0);
        for a in list.chunks_exact(4) {
            let id = u16::from_le_bytes([a[0], a[1]]);
            let dsz = u16::from_le_bytes([a[2], a[3]]);
            algs |= HashAlgs::from_id(id);
            tdsz += 2 + u32::from(dsz);
        }

        log.algs = algs;
        log.tdsz = tdsz;

        log::debug!("TPM log v{major} at {:#x}: {} bytes used, {algs:?}", info.phys, info.offs);
        Ok(log)
    }

    #[must_use]
    pub const fn offs(&self) -> u32 {
        self.offs
    }

    #[must_use]
    pub const fn algs(&self) -> HashAlgs {
        self.algs
    }

    fn read(&self, off: usize, len: usize) -> Vec<u8> {
        let mut v = alloc::vec![0; len];
        // SAFETY: `[off, off + len)` lies inside the log, which the mapper
        // keeps mapped.
        unsafe {
            core::ptr::copy_nonoverlapping(self.mapper.phys_to_ptr(self.phys + off as u64), v.as_mut_ptr(), len);
        }
        v
    }

    /// Append a measurement of `pcr`. `false` if the log is full; nothing
    /// is written then.
    pub fn extend(&mut self, pcr: u32, d: &Digests<'_>) -> bool {
        let len = RECORD as u32 + self.tdsz;

        if len > self.size - self.offs {
            return false;
        }

        let mut rec = Vec::with_capacity(len as usize);
        rec.extend_from_slice(&pcr.to_le_bytes());
        rec.extend_from_slice(&EV_EVENT_TAG.to_le_bytes());
        rec.extend_from_slice(&self.algs.bits().count_ones().to_le_bytes());

        let mut add = |alg: HashAlgs, id: u16, digest: &[u8]| {
            if self.algs.contains(alg) {
                rec.extend_from_slice(&id.to_le_bytes());
                rec.extend_from_slice(digest);
            }
        };
        add(HashAlgs::SHA1, 0x4, d.sha1);
        add(HashAlgs::SHA256, 0xb, d.sha256);
        add(HashAlgs::SHA384, 0xc, d.sha384);
        add(HashAlgs::SHA512, 0xd, d.sha512);

        rec.extend_from_slice(&8u32.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());

        // Unknown algorithms still take their share of the record.
        rec.resize(len as usize, 0);

        // SAFETY: `len` bytes fit between `offs` and the end of the log.
        unsafe {
            core::ptr::copy_nonoverlapping(rec.as_ptr(), self.mapper.phys_to_ptr(self.phys + u64::from(self.offs)), rec.len());
        }

        self.offs += len;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::DirectMap;

    fn header(algs: &[(u16, u16)]) -> Vec<u8> {
        let mut h = vec![0u8; HEADER];
        h[4..8].copy_from_slice(&EV_NO_ACTION.to_le_bytes());
        h[28..32].copy_from_slice(&(29 + 4 * algs.len() as u32).to_le_bytes());
        h[32..48].copy_from_slice(SIGNATURE);
        h[53] = 2;
        h[56..60].copy_from_slice(&(algs.len() as u32).to_le_bytes());
        for (id, sz) in algs {
            h.extend_from_slice(&id.to_le_bytes());
            h.extend_from_slice(&sz.to_le_bytes());
        }
        h
    }

    fn open(buf: &mut [u8], used: usize) -> Result<TpmLog, TpmLogError> {
        let info = TpmLogInfo {
            phys: buf.as_mut_ptr() as u64,
            size: buf.len() as u32,
            offs: used as u32,
        };
        TpmLog::init(Arc::new(DirectMap::identity()), info)
    }

    const DIGESTS: Digests<'static> = Digests {
        sha1: &[1; 20],
        sha256: &[2; 32],
        sha384: &[3; 48],
        sha512: &[4; 64],
    };

    #[test]
    fn header_lists_algorithms() {
        let h = header(&[(0x4, 20), (0xb, 32)]);
        let mut buf = vec![0u8; 512];
        buf[..h.len()].copy_from_slice(&h);

        let log = open(&mut buf, h.len()).unwrap();
        assert_eq!(log.algs(), HashAlgs::SHA1 | HashAlgs::SHA256);
        assert_eq!(log.tdsz, 22 + 34);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut h = header(&[(0xb, 32)]);
        h[32] = b'X';
        let mut buf = vec![0u8; 256];
        buf[..h.len()].copy_from_slice(&h);

        assert_eq!(open(&mut buf, h.len()).err(), Some(TpmLogError::BadSignature));
    }

    #[test]
    fn rejects_inconsistent_event_size() {
        let mut h = header(&[(0xb, 32)]);
        h[28] = 30;
        let mut buf = vec![0u8; 256];
        buf[..h.len()].copy_from_slice(&h);

        assert_eq!(open(&mut buf, h.len()).err(), Some(TpmLogError::BadHeader));
    }

    #[test]
    fn extend_appends_tagged_record() {
        let h = header(&[(0xb, 32)]);
        let mut buf = vec![0u8; 256];
        buf[..h.len()].copy_from_slice(&h);

        let mut log = open(&mut buf, h.len()).unwrap();
        assert!(log.extend(17, &DIGESTS));
        assert_eq!(log.offs() as usize, h.len() + 24 + 34);

        let r = &buf[h.len()..];
        assert_eq!(&r[0..4], &17u32.to_le_bytes());
        assert_eq!(&r[4..8], &EV_EVENT_TAG.to_le_bytes());
        assert_eq!(&r[8..12], &1u32.to_le_bytes());
        assert_eq!(&r[12..14], &0xbu16.to_le_bytes());
        assert_eq!(&r[14..46], &[2; 32]);
        assert_eq!(&r[46..50], &8u32.to_le_bytes());
    }

    #[test]
    fn extend_without_room_keeps_offset() {
        let h = header(&[(0xd, 64)]);
        let mut buf = vec![0u8; h.len() + 24 + 66 - 1];
        buf[..h.len()].copy_from_slice(&h);

        let mut log = open(&mut buf, h.len()).unwrap();
        assert!(!log.extend(0, &DIGESTS));
        assert_eq!(log.offs() as usize, h.len());
        assert!(buf[h.len()..].iter().all(|&b| b == 0));
    }
}
