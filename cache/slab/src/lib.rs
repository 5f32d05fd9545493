//! Slab-allocated in-memory cache engine.
//!
//! A twemcache-style storage engine: a fixed-class slab allocator holding
//! variable-sized items, paired with a chained hash index, with lazy
//! expiration, CAS versioning, and whole-slab eviction.
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------+
//! |                 SlabCache                   |
//! |                                             |
//! |  +---------------------------------------+  |
//! |  | HashTable                             |  |
//! |  | - chained, link embedded in the item  |  |
//! |  +---------------------------------------+  |
//! |        |                                    |
//! |        v                                    |
//! |  +---------------------------------------+  |
//! |  | SlabPool                              |  |
//! |  | +----------------------------------+  |  |
//! |  | | class 0 (88B slots)  free queue  |  |  |
//! |  | +----------------------------------+  |  |
//! |  | | class 1 (112B slots) free queue  |  |  |
//! |  | +----------------------------------+  |  |
//! |  | | ...                              |  |  |
//! |  | +----------------------------------+  |  |
//! |  +---------------------------------------+  |
//! +---------------------------------------------+
//! ```
//!
//! The engine is a single owned value driven by one worker; none of its
//! operations block or suspend. Expiration is lazy: items are unlinked
//! when a lookup finds them past their expiry or behind the flush
//! watermark. There is no background sweeper.
//!
//! # Example
//!
//! ```
//! use cache_slab::{SlabCache, SlabConfig};
//!
//! let mut cache = SlabCache::new(&SlabConfig {
//!     slab_size: 64 * 1024,
//!     maxbytes: 4 * 1024 * 1024,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! cache.set(b"key", b"value", 0, 0).unwrap();
//! assert_eq!(cache.get(b"key").unwrap().value(), b"value");
//! ```

mod allocator;
mod config;
mod error;
mod hashtable;
mod item;
mod metrics;
mod slab;
pub mod time;

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use allocator::SlabPool;
use hashtable::HashTable;
use item::{ItemHeader, item_ntotal};
use metrics::{
    ITEM_CURR, ITEM_INSERT, ITEM_KEYVAL_BYTE, ITEM_REMOVE, ITEM_REQ, ITEM_REQ_EX,
};

pub use config::{Eviction, SlabConfig};
pub use error::{CacheError, CacheResult};
pub use item::{CAS_SIZE, ITEM_HDR_SIZE};
pub use slab::SLAB_HDR_SIZE;

/// Result of a compare-and-swap store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Token matched; the new value is stored.
    Stored,
    /// Token mismatch; the item changed since it was read.
    Exists,
    /// No such key.
    NotFound,
}

/// The cache engine.
pub struct SlabCache {
    pool: SlabPool,
    index: HashTable,
    /// Flush watermark in relative seconds; 0 = never flushed.
    flush_at: AtomicU32,
    cas_counter: u64,
}

impl SlabCache {
    /// Set up the engine: class table, reserved slab region, hash index.
    pub fn new(config: &SlabConfig) -> CacheResult<Self> {
        time::setup();
        time::update();
        let pool = SlabPool::new(config)?;
        let index = HashTable::new(config.hash_power);
        debug!(
            nclasses = pool.nclasses(),
            nbuckets = index.nbuckets(),
            "slab cache ready"
        );
        Ok(Self {
            pool,
            index,
            flush_at: AtomicU32::new(0),
            cas_counter: 0,
        })
    }

    /// Look up `key`, lazily unlinking it when expired or flushed.
    pub fn get(&mut self, key: &[u8]) -> Option<ItemView<'_>> {
        let loc = self.lookup(key)?;
        Some(ItemView { cache: &*self, loc })
    }

    /// Whether `key` is live.
    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    /// Allocate, fill, and link a new item.
    ///
    /// Does not displace a prior value for the key; callers wanting SET
    /// semantics use [`set`](Self::set).
    pub fn insert(&mut self, key: &[u8], value: &[u8], flag: u32, exptime: u32) -> CacheResult<()> {
        let expire_at = time::reltime(exptime);
        self.insert_rel(key, value, flag, expire_at)
    }

    /// Store `value` under `key`, replacing any prior value.
    pub fn set(&mut self, key: &[u8], value: &[u8], flag: u32, exptime: u32) -> CacheResult<()> {
        self.delete(key);
        self.insert(key, value, flag, exptime)
    }

    /// Overwrite an existing item's value, in place when the new footprint
    /// stays in the item's class. Returns `false` when the key is absent.
    pub fn update(
        &mut self,
        key: &[u8],
        value: &[u8],
        flag: u32,
        exptime: u32,
    ) -> CacheResult<bool> {
        let Some(loc) = self.lookup(key) else {
            return Ok(false);
        };
        let expire_at = time::reltime(exptime);
        self.store_value(loc, key, value, flag, expire_at)?;
        Ok(true)
    }

    /// Append or prepend `value` to an existing item.
    ///
    /// In place when the grown item still fits its class and the value
    /// alignment admits it; otherwise the item moves to a larger class and
    /// the old slot is recycled. Returns `false` when the key is absent.
    pub fn annex(&mut self, key: &[u8], value: &[u8], append: bool) -> CacheResult<bool> {
        let Some(oit) = self.lookup(key) else {
            return Ok(false);
        };

        let (klen, ovlen, oid, oraligned, dataflag, expire_at) = {
            let hdr = unsafe { self.pool.header(oit) };
            (
                hdr.klen(),
                hdr.vlen(),
                hdr.id(),
                hdr.is_raligned(),
                hdr.dataflag(),
                hdr.expire_at(),
            )
        };

        let nvlen = ovlen + value.len();
        let nid = self
            .pool
            .slab_id(item_ntotal(klen, nvlen, self.pool.use_cas()))
            .ok_or(CacheError::Oversized)?;

        let use_cas = self.pool.use_cas();
        let slot_size = self.pool.slot_size_of(oit);

        if append {
            if nid == oid && !oraligned {
                // room at the tail of a left-aligned value
                unsafe {
                    let hdr = self.pool.header_mut(oit);
                    let dst = hdr.value_ptr(use_cas, slot_size).add(ovlen) as *mut u8;
                    std::ptr::copy_nonoverlapping(value.as_ptr(), dst, value.len());
                    hdr.set_vlen(nvlen as u32);
                }
                ITEM_KEYVAL_BYTE.add(value.len() as i64);
                self.stamp_cas(oit);
                self.pool.touch(oit);
                return Ok(true);
            }

            let nit = match self.alloc_item(klen, nvlen) {
                Ok(nit) => nit,
                Err(e) => return Err(e),
            };
            // allocation may evict; make sure the source survived
            if self.index.get(key, &self.pool) != Some(oit) {
                self.pool.put_slot(nit);
                return Ok(false);
            }
            let nslot = self.pool.slot_size_of(nit);
            unsafe {
                let src = self.pool.header(oit).value_ptr(use_cas, slot_size);
                let hdr = self.pool.header_mut(nit);
                hdr.set_klen(klen as u8);
                hdr.set_vlen(nvlen as u32);
                hdr.set_dataflag(dataflag);
                hdr.set_expire_at(expire_at);
                hdr.set_create_at(time::now());
                std::ptr::copy_nonoverlapping(key.as_ptr(), hdr.key_ptr(use_cas) as *mut u8, klen);
                let dst = hdr.value_ptr(use_cas, nslot) as *mut u8;
                std::ptr::copy_nonoverlapping(src, dst, ovlen);
                std::ptr::copy_nonoverlapping(value.as_ptr(), dst.add(ovlen), value.len());
            }
            self.stamp_cas(nit);
            self.unlink(oit);
            self.link(nit);
        } else {
            if nid == oid && oraligned {
                // room right before a right-aligned value
                unsafe {
                    let hdr = self.pool.header_mut(oit);
                    let dst = hdr.value_ptr(use_cas, slot_size).sub(value.len()) as *mut u8;
                    std::ptr::copy_nonoverlapping(value.as_ptr(), dst, value.len());
                    hdr.set_vlen(nvlen as u32);
                }
                ITEM_KEYVAL_BYTE.add(value.len() as i64);
                self.stamp_cas(oit);
                self.pool.touch(oit);
                return Ok(true);
            }

            let nit = match self.alloc_item(klen, nvlen) {
                Ok(nit) => nit,
                Err(e) => return Err(e),
            };
            if self.index.get(key, &self.pool) != Some(oit) {
                self.pool.put_slot(nit);
                return Ok(false);
            }
            let nslot = self.pool.slot_size_of(nit);
            unsafe {
                let src = self.pool.header(oit).value_ptr(use_cas, slot_size);
                let hdr = self.pool.header_mut(nit);
                hdr.set_klen(klen as u8);
                hdr.set_raligned(true);
                hdr.set_vlen(nvlen as u32);
                hdr.set_dataflag(dataflag);
                hdr.set_expire_at(expire_at);
                hdr.set_create_at(time::now());
                std::ptr::copy_nonoverlapping(key.as_ptr(), hdr.key_ptr(use_cas) as *mut u8, klen);
                // value_ptr is slot_end - nvlen once vlen and alignment are set
                let dst = hdr.value_ptr(use_cas, nslot) as *mut u8;
                std::ptr::copy_nonoverlapping(value.as_ptr(), dst, value.len());
                std::ptr::copy_nonoverlapping(src, dst.add(value.len()), ovlen);
            }
            self.stamp_cas(nit);
            self.unlink(oit);
            self.link(nit);
        }

        Ok(true)
    }

    /// Unlink `key` if present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.lookup(key) {
            Some(loc) => {
                self.unlink(loc);
                true
            }
            None => false,
        }
    }

    /// Apply an increment or decrement to an ASCII-decimal value.
    ///
    /// Returns `Ok(None)` when the key is absent. Increments reject
    /// overflow; decrements saturate at zero.
    pub fn delta(&mut self, key: &[u8], delta: u64, incr: bool) -> CacheResult<Option<u64>> {
        let Some(loc) = self.lookup(key) else {
            return Ok(None);
        };

        let (current, flag, expire_at) = {
            let hdr = unsafe { self.pool.header(loc) };
            let value = unsafe { hdr.value(self.pool.use_cas(), self.pool.slot_size_of(loc)) };
            let text = std::str::from_utf8(value).map_err(|_| CacheError::NotNumeric)?;
            let current: u64 = text.trim().parse().map_err(|_| CacheError::NotNumeric)?;
            (current, hdr.dataflag(), hdr.expire_at())
        };

        let updated = if incr {
            current.checked_add(delta).ok_or(CacheError::Overflow)?
        } else {
            current.saturating_sub(delta)
        };

        let rendered = updated.to_string();
        self.store_value(loc, key, rendered.as_bytes(), flag, expire_at)?;
        Ok(Some(updated))
    }

    /// Store `value` only when `cas` matches the item's current token.
    pub fn cas(
        &mut self,
        key: &[u8],
        value: &[u8],
        flag: u32,
        exptime: u32,
        cas: u64,
    ) -> CacheResult<CasOutcome> {
        let Some(loc) = self.lookup(key) else {
            return Ok(CasOutcome::NotFound);
        };
        let current = unsafe { self.pool.header(loc).cas(self.pool.use_cas()) };
        if current != cas {
            return Ok(CasOutcome::Exists);
        }
        let expire_at = time::reltime(exptime);
        self.store_value(loc, key, value, flag, expire_at)?;
        Ok(CasOutcome::Stored)
    }

    /// Set the flush watermark: every item created at or before this
    /// instant is expired on its next access.
    pub fn flush(&mut self) {
        time::update();
        // the watermark must be nonzero to take effect in the process's
        // first second
        let now = time::now().max(1);
        self.flush_at.store(now, Ordering::Relaxed);
        debug!(flush_at = now, "all keys flushed");
    }

    /// Free slots queued for a class.
    pub fn free_slots(&self, id: u8) -> usize {
        self.pool.free_slots(id)
    }

    /// Entries in the index matching `key` (chain duplicates included).
    pub fn key_matches(&self, key: &[u8]) -> usize {
        self.index.matches(key, &self.pool)
    }

    /// The class an item with these lengths would land in.
    pub fn class_for(&self, klen: usize, vlen: usize) -> Option<u8> {
        self.pool.slab_id(item_ntotal(klen, vlen, self.pool.use_cas()))
    }

    /// Carved slabs.
    pub fn nslabs(&self) -> usize {
        self.pool.nslabs()
    }

    /// Configured classes.
    pub fn nclasses(&self) -> usize {
        self.pool.nclasses()
    }

    /// Look up a live item, unlinking it when lazily expired.
    fn lookup(&mut self, key: &[u8]) -> Option<u32> {
        let loc = self.index.get(key, &self.pool)?;
        if self.is_expired(loc) {
            debug!("lazily expiring item");
            self.unlink(loc);
            return None;
        }
        Some(loc)
    }

    fn is_expired(&self, loc: u32) -> bool {
        let hdr = unsafe { self.pool.header(loc) };
        let flush_at = self.flush_at.load(Ordering::Relaxed);
        (hdr.expire_at() > 0 && hdr.expire_at() < time::now())
            || (flush_at > 0 && hdr.create_at() <= flush_at)
    }

    /// Acquire and reset a slot sized for the given lengths.
    fn alloc_item(&mut self, klen: usize, vlen: usize) -> CacheResult<u32> {
        if klen > u8::MAX as usize {
            return Err(CacheError::KeyTooLong);
        }
        let ntotal = item_ntotal(klen, vlen, self.pool.use_cas());
        let id = self.pool.slab_id(ntotal).ok_or(CacheError::Oversized)?;

        match self.pool.get_slot(id, &mut self.index) {
            Some(loc) => {
                ITEM_REQ.increment();
                unsafe { self.pool.header_mut(loc) }.reset();
                Ok(loc)
            }
            None => {
                ITEM_REQ_EX.increment();
                Err(CacheError::OutOfMemory)
            }
        }
    }

    /// Insert with an already-relative expiry.
    fn insert_rel(
        &mut self,
        key: &[u8],
        value: &[u8],
        flag: u32,
        expire_at: u32,
    ) -> CacheResult<()> {
        let loc = self.alloc_item(key.len(), value.len())?;
        let use_cas = self.pool.use_cas();
        let slot_size = self.pool.slot_size_of(loc);
        unsafe {
            let hdr = self.pool.header_mut(loc);
            hdr.set_klen(key.len() as u8);
            hdr.set_vlen(value.len() as u32);
            hdr.set_dataflag(flag);
            hdr.set_expire_at(expire_at);
            hdr.set_create_at(time::now());
            std::ptr::copy_nonoverlapping(
                key.as_ptr(),
                hdr.key_ptr(use_cas) as *mut u8,
                key.len(),
            );
            std::ptr::copy_nonoverlapping(
                value.as_ptr(),
                hdr.value_ptr(use_cas, slot_size) as *mut u8,
                value.len(),
            );
        }
        self.stamp_cas(loc);
        self.link(loc);
        Ok(())
    }

    /// Overwrite an item's value, in place when the class still fits.
    fn store_value(
        &mut self,
        loc: u32,
        key: &[u8],
        value: &[u8],
        flag: u32,
        expire_at: u32,
    ) -> CacheResult<()> {
        let (klen, id, ovlen) = {
            let hdr = unsafe { self.pool.header(loc) };
            (hdr.klen(), hdr.id(), hdr.vlen())
        };
        let ntotal = item_ntotal(klen, value.len(), self.pool.use_cas());
        let nid = self.pool.slab_id(ntotal).ok_or(CacheError::Oversized)?;

        if nid == id {
            let use_cas = self.pool.use_cas();
            let slot_size = self.pool.slot_size_of(loc);
            unsafe {
                let hdr = self.pool.header_mut(loc);
                hdr.set_vlen(value.len() as u32);
                hdr.set_dataflag(flag);
                hdr.set_expire_at(expire_at);
                std::ptr::copy_nonoverlapping(
                    value.as_ptr(),
                    hdr.value_ptr(use_cas, slot_size) as *mut u8,
                    value.len(),
                );
            }
            ITEM_KEYVAL_BYTE.add(value.len() as i64 - ovlen as i64);
            self.stamp_cas(loc);
            self.pool.touch(loc);
            return Ok(());
        }

        self.unlink(loc);
        self.insert_rel(key, value, flag, expire_at)
    }

    /// Stamp the next CAS token onto an item.
    fn stamp_cas(&mut self, loc: u32) {
        if !self.pool.use_cas() {
            return;
        }
        self.cas_counter += 1;
        let cas = self.cas_counter;
        unsafe { self.pool.header_mut(loc).set_cas(true, cas) };
    }

    /// Link an item into the hash index.
    fn link(&mut self, loc: u32) {
        let (klen, vlen) = {
            let hdr = unsafe { self.pool.header(loc) };
            hdr.check_magic();
            debug_assert!(!hdr.is_linked() && !hdr.in_freeq());
            (hdr.klen(), hdr.vlen())
        };
        unsafe { self.pool.header_mut(loc) }.set_linked(true);
        self.index.put(loc, &self.pool);
        self.pool.touch(loc);
        ITEM_INSERT.increment();
        ITEM_CURR.increment();
        ITEM_KEYVAL_BYTE.add((klen + vlen) as i64);
    }

    /// Unlink an item from the index and recycle its slot.
    fn unlink(&mut self, loc: u32) {
        let linked_key = {
            let hdr = unsafe { self.pool.header(loc) };
            hdr.check_magic();
            if hdr.is_linked() {
                ITEM_KEYVAL_BYTE.sub((hdr.klen() + hdr.vlen()) as i64);
                Some(unsafe { hdr.key(self.pool.use_cas()) }.to_vec())
            } else {
                None
            }
        };
        if let Some(key) = linked_key {
            unsafe { self.pool.header_mut(loc) }.set_linked(false);
            self.index.delete(&key, &self.pool);
            ITEM_CURR.decrement();
            ITEM_REMOVE.increment();
        }
        self.pool.put_slot(loc);
    }
}

/// A borrowed view of a live item.
///
/// Holding the view borrows the cache, so no mutation can recycle the
/// slot while the caller reads it.
pub struct ItemView<'a> {
    cache: &'a SlabCache,
    loc: u32,
}

impl ItemView<'_> {
    #[inline]
    fn hdr(&self) -> &ItemHeader {
        unsafe { self.cache.pool.header(self.loc) }
    }

    /// The value bytes.
    pub fn value(&self) -> &[u8] {
        unsafe {
            self.hdr().value(
                self.cache.pool.use_cas(),
                self.cache.pool.slot_size_of(self.loc),
            )
        }
    }

    /// Client dataflag, echoed verbatim.
    pub fn dataflag(&self) -> u32 {
        self.hdr().dataflag()
    }

    /// Current CAS token (0 when CAS is disabled).
    pub fn cas(&self) -> u64 {
        unsafe { self.hdr().cas(self.cache.pool.use_cas()) }
    }

    pub fn klen(&self) -> usize {
        self.hdr().klen()
    }

    pub fn vlen(&self) -> usize {
        self.hdr().vlen()
    }

    /// Owning class id.
    pub fn class_id(&self) -> u8 {
        self.hdr().id()
    }

    /// Whether the value is stored flush with the slot end.
    pub fn is_raligned(&self) -> bool {
        self.hdr().is_raligned()
    }
}
