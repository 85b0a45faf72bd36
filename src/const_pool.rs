//! Deduplicating pool of aligned constants
//!
//! Constants added to a pool get a stable offset; identical byte runs
//! share one slot. The pool is materialized as an aligned data region
//! labeled at its start (see `embed_const_pool` on the emitter surface).

use crate::error::Error;
use crate::util::into_bytes::IntoBytes;
use crate::util::misc::align_up;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Largest constant a pool accepts, in bytes.
pub const MAX_CONST_SIZE: usize = 32;

type ConstBytes = SmallVec<[u8; MAX_CONST_SIZE]>;

/// A bag of aligned constant values.
///
/// # Examples
///
/// ```
/// use mortar::const_pool::ConstPool;
///
/// let mut pool = ConstPool::default();
/// let a = pool.add_value(0x1122_3344u32).unwrap();
/// let b = pool.add_value(0x1122_3344u32).unwrap();
/// assert_eq!(a, b); // deduplicated
/// assert_eq!(pool.alignment(), 4);
/// ```
// TODO: offsets are assigned first-fit in insertion order; alignment
// padding between mixed-size entries is never reclaimed.
#[derive(Default)]
pub struct ConstPool {
    dedup: FxHashMap<ConstBytes, u32>,
    entries: Vec<(u32, ConstBytes)>,
    size: usize,
    alignment: usize,
}

impl ConstPool {
    /// Offset of `bytes` within the pool, adding it if new.
    ///
    /// The length must be a power of two up to [`MAX_CONST_SIZE`]; each
    /// entry is aligned to its own size.
    pub fn add(&mut self, bytes: &[u8]) -> Result<u32, Error> {
        let len = bytes.len();
        if len == 0 || len > MAX_CONST_SIZE || !len.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }

        let key = ConstBytes::from_slice(bytes);
        if let Some(&offset) = self.dedup.get(&key) {
            return Ok(offset);
        }

        let offset = align_up(self.size, len) as u32;
        self.size = offset as usize + len;
        self.alignment = self.alignment.max(len);

        self.dedup.insert(key.clone(), offset);
        self.entries.push((offset, key));
        Ok(offset)
    }

    /// [`ConstPool::add`] for anything convertible to little-endian
    /// bytes.
    #[inline(always)]
    pub fn add_value<'a>(
        &mut self,
        value: impl IntoBytes<'a>,
    ) -> Result<u32, Error> {
        self.add(&value.into_bytes())
    }

    /// Total pool size in bytes, padding included.
    #[must_use]
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Required alignment of the materialized pool: the size of its
    /// largest entry, never less than 1.
    #[must_use]
    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.alignment.max(1)
    }

    /// Write the pool image into `dst`. Gaps between entries are zero.
    pub fn fill(&self, dst: &mut [u8]) -> Result<(), Error> {
        if dst.len() < self.size {
            return Err(Error::InvalidArgument);
        }
        dst[..self.size].fill(0);
        for (offset, bytes) in &self.entries {
            let start = *offset as usize;
            dst[start..start + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }
}
