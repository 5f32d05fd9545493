//! Engine configuration and slab class profile generation.

use crate::error::{CacheError, CacheResult};
use crate::item::{CAS_SIZE, ITEM_HDR_SIZE};
use crate::slab::SLAB_HDR_SIZE;

/// Default slab size (1MB).
pub const DEFAULT_SLAB_SIZE: usize = 1024 * 1024;

/// Default cap on total slab memory (64MB).
pub const DEFAULT_MAXBYTES: usize = 64 * 1024 * 1024;

/// Default smallest item chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 88;

/// Default growth factor between adjacent classes.
pub const DEFAULT_FACTOR: f64 = 1.25;

/// Default hashtable power (2^16 buckets).
pub const DEFAULT_HASH_POWER: u8 = 16;

/// Largest representable class id; class ids are `u8` in the item header.
pub const MAX_NCLASSES: usize = 255;

/// Slab eviction policy consulted when the reserve is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    /// No eviction: allocation failure surfaces as out-of-memory.
    None,
    /// Evict a slab chosen uniformly at random.
    #[default]
    Random,
    /// Evict the least recently updated slab.
    Lru,
}

/// Engine configuration.
///
/// `profile`, when set, is the explicit list of per-class item sizes and
/// overrides `chunk_size`/`factor` generation.
#[derive(Debug, Clone)]
pub struct SlabConfig {
    /// Bytes per slab.
    pub slab_size: usize,
    /// Cap on total slab memory.
    pub maxbytes: usize,
    /// Carve one slab per class at setup.
    pub prealloc: bool,
    /// Eviction policy.
    pub evict_opt: Eviction,
    /// Serve allocations from per-class free queues.
    pub use_freeq: bool,
    /// Reserve 8 bytes per item for a CAS value.
    pub use_cas: bool,
    /// Smallest item chunk, the first class size.
    pub chunk_size: usize,
    /// Growth factor between adjacent classes.
    pub factor: f64,
    /// Explicit class profile, overriding generated growth.
    pub profile: Option<Vec<usize>>,
    /// Log2 of the hash table bucket count.
    pub hash_power: u8,
}

impl Default for SlabConfig {
    fn default() -> Self {
        Self {
            slab_size: DEFAULT_SLAB_SIZE,
            maxbytes: DEFAULT_MAXBYTES,
            prealloc: true,
            evict_opt: Eviction::default(),
            use_freeq: true,
            use_cas: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            factor: DEFAULT_FACTOR,
            profile: None,
            hash_power: DEFAULT_HASH_POWER,
        }
    }
}

impl SlabConfig {
    /// Largest item footprint a slab can hold.
    pub fn item_max(&self) -> usize {
        self.slab_size - SLAB_HDR_SIZE
    }

    /// Number of slabs the reserve can hold.
    pub fn nslabs(&self) -> usize {
        self.maxbytes / self.slab_size
    }

    /// Resolve the class profile: item sizes, strictly increasing, the
    /// last one equal to the largest size a slab accommodates.
    pub fn build_profile(&self) -> CacheResult<Vec<usize>> {
        let min_item = ITEM_HDR_SIZE + if self.use_cas { CAS_SIZE } else { 0 } + 2;
        let item_max = self.item_max();

        if self.slab_size % 8 != 0 {
            return Err(CacheError::InvalidConfig("slab_size must be 8-byte aligned"));
        }
        if self.slab_size <= SLAB_HDR_SIZE + min_item {
            return Err(CacheError::InvalidConfig("slab_size too small"));
        }
        if self.maxbytes < self.slab_size {
            return Err(CacheError::InvalidConfig("maxbytes below slab_size"));
        }
        if self.nslabs() > 0xFFFF {
            return Err(CacheError::InvalidConfig(
                "maxbytes/slab_size exceeds the slab id space",
            ));
        }

        if let Some(profile) = &self.profile {
            if profile.is_empty() || profile.len() > MAX_NCLASSES {
                return Err(CacheError::InvalidConfig("bad profile length"));
            }
            for pair in profile.windows(2) {
                if pair[1] <= pair[0] {
                    return Err(CacheError::InvalidConfig(
                        "profile must be strictly increasing",
                    ));
                }
            }
            if profile.iter().any(|size| size % 8 != 0) {
                return Err(CacheError::InvalidConfig(
                    "profile sizes must be 8-byte aligned",
                ));
            }
            if profile[0] < min_item || *profile.last().unwrap() > item_max {
                return Err(CacheError::InvalidConfig("profile outside item bounds"));
            }
            return Ok(profile.clone());
        }

        if self.factor <= 1.0 {
            return Err(CacheError::InvalidConfig("growth factor must exceed 1.0"));
        }

        let mut profile = Vec::new();
        let mut size = align8(self.chunk_size.max(min_item));
        while size < item_max {
            profile.push(size);
            if profile.len() > MAX_NCLASSES {
                return Err(CacheError::InvalidConfig("too many classes; raise factor"));
            }
            let next = align8((size as f64 * self.factor) as usize);
            size = next.max(size + 8);
        }
        profile.push(item_max);
        Ok(profile)
    }
}

#[inline]
fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Find the smallest class whose item size fits `ntotal` bytes.
///
/// Returns `None` when the item is larger than the largest class.
#[inline]
pub fn slab_id(profile: &[usize], ntotal: usize) -> Option<u8> {
    match profile.binary_search(&ntotal) {
        Ok(idx) => Some(idx as u8),
        Err(idx) if idx < profile.len() => Some(idx as u8),
        Err(_) => None,
    }
}
