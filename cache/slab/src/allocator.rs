//! Slab pool: slot acquisition, slab carving, and slab eviction.
//!
//! Slot acquisition order for a class:
//!
//! 1. pop the class's free queue (when enabled)
//! 2. bump-allocate from the class's partial slab
//! 3. carve a fresh slab from the reserve
//! 4. evict a whole slab per the configured policy and recycle it
//!
//! Eviction unlinks every live resident of the victim and purges any
//! free-queue entries that reference it before the slab changes class.

use rand::Rng;
use tracing::warn;

use crate::config::{Eviction, SlabConfig, slab_id};
use crate::hashtable::HashTable;
use crate::item::{ItemHeader, pack_ref, unpack_ref};
use crate::metrics::{ITEM_CURR, ITEM_KEYVAL_BYTE, ITEM_REMOVE, SLAB_CURR, SLAB_EVICT, SLAB_REQ};
use crate::slab::{Heap, NULL_SLAB, SLAB_HDR_SIZE, SlabClass, SlabMeta, check_slab_hdr, write_slab_hdr};
use crate::time;

/// The slab pool: reserved region, class table, and slab bookkeeping.
pub(crate) struct SlabPool {
    heap: Heap,
    slab_size: usize,
    nslabs_cap: usize,
    profile: Vec<usize>,
    table: Vec<SlabMeta>,
    classes: Vec<SlabClass>,
    evict_opt: Eviction,
    use_freeq: bool,
    use_cas: bool,
}

impl SlabPool {
    pub fn new(config: &SlabConfig) -> Result<Self, crate::error::CacheError> {
        let profile = config.build_profile()?;
        let nslabs_cap = config.nslabs();
        let heap = Heap::new(nslabs_cap * config.slab_size)?;

        let classes = profile
            .iter()
            .map(|&size| SlabClass::new(size, config.slab_size))
            .collect();

        let mut pool = Self {
            heap,
            slab_size: config.slab_size,
            nslabs_cap,
            profile,
            table: Vec::new(),
            classes,
            evict_opt: config.evict_opt,
            use_freeq: config.use_freeq,
            use_cas: config.use_cas,
        };

        if config.prealloc {
            for id in 0..pool.classes.len() {
                if pool.table.len() >= pool.nslabs_cap {
                    break;
                }
                pool.carve(id as u8);
            }
        }

        Ok(pool)
    }

    #[inline]
    pub fn use_cas(&self) -> bool {
        self.use_cas
    }

    #[inline]
    pub fn nclasses(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn nslabs(&self) -> usize {
        self.table.len()
    }

    /// Smallest class that fits `ntotal` bytes.
    #[inline]
    pub fn slab_id(&self, ntotal: usize) -> Option<u8> {
        slab_id(&self.profile, ntotal)
    }

    /// Slot size of a class.
    #[inline]
    pub fn item_size(&self, id: u8) -> usize {
        self.classes[id as usize].item_size
    }

    #[inline]
    pub fn free_slots(&self, id: u8) -> usize {
        self.classes[id as usize].free_q.len()
    }

    /// Slot base address for a packed ref.
    #[inline]
    fn slot_ptr(&self, r: u32) -> *mut u8 {
        let (slab, slot) = unpack_ref(r);
        let meta = &self.table[slab as usize];
        let class = &self.classes[meta.id as usize];
        debug_assert!(slot < class.items_per_slab);
        let base = self.heap.slab_ptr(slab, self.slab_size);
        let offset = SLAB_HDR_SIZE + slot as usize * class.item_size;
        let ptr = unsafe {
            check_slab_hdr(base);
            base.add(offset)
        };
        debug_assert_eq!(
            unsafe { ItemHeader::from_ptr(ptr) }.offset() as usize,
            offset,
            "slot offset mismatch"
        );
        ptr
    }

    /// Slot size of the class owning `r`.
    #[inline]
    pub fn slot_size_of(&self, r: u32) -> usize {
        let (slab, _) = unpack_ref(r);
        self.classes[self.table[slab as usize].id as usize].item_size
    }

    /// Item header at `r`.
    ///
    /// # Safety
    ///
    /// `r` must name a carved slot.
    #[inline]
    pub unsafe fn header(&self, r: u32) -> &ItemHeader {
        unsafe { ItemHeader::from_ptr(self.slot_ptr(r)) }
    }

    /// Mutable item header at `r`.
    ///
    /// # Safety
    ///
    /// `r` must name a carved slot, and the caller must not hold another
    /// reference to the same slot.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn header_mut(&self, r: u32) -> &mut ItemHeader {
        unsafe { ItemHeader::from_ptr_mut(self.slot_ptr(r)) }
    }

    /// Update the owning slab's last-update time.
    #[inline]
    pub fn touch(&mut self, r: u32) {
        let (slab, _) = unpack_ref(r);
        self.table[slab as usize].utime = time::now();
    }

    /// Acquire a slot of class `id`.
    ///
    /// `index` is needed so slab eviction can unlink the victims.
    pub fn get_slot(&mut self, id: u8, index: &mut HashTable) -> Option<u32> {
        if self.use_freeq {
            if let Some(r) = self.classes[id as usize].free_q.pop() {
                unsafe { self.header_mut(r) }.set_in_freeq(false);
                return Some(r);
            }
        }

        if let Some(r) = self.bump(id) {
            return Some(r);
        }

        if self.table.len() < self.nslabs_cap {
            SLAB_REQ.increment();
            self.carve(id);
            return self.bump(id);
        }

        let victim = match self.evict_opt {
            Eviction::None => return None,
            Eviction::Random => rand::rng().random_range(0..self.table.len()) as u32,
            Eviction::Lru => self
                .table
                .iter()
                .enumerate()
                .min_by_key(|(_, meta)| meta.utime)
                .map(|(slab, _)| slab as u32)?,
        };

        self.recycle(victim, id, index);
        self.bump(id)
    }

    /// Return a slot to its class's free queue.
    pub fn put_slot(&mut self, r: u32) {
        let (slab, _) = unpack_ref(r);
        let id = self.table[slab as usize].id;
        unsafe { self.header_mut(r) }.set_in_freeq(true);
        self.classes[id as usize].free_q.push(r);
    }

    /// Bump-allocate from the class's partial slab.
    fn bump(&mut self, id: u8) -> Option<u32> {
        let class = &mut self.classes[id as usize];
        if class.partial == NULL_SLAB || class.partial_next >= class.items_per_slab {
            return None;
        }
        let r = pack_ref(class.partial, class.partial_next);
        class.partial_next += 1;
        Some(r)
    }

    /// Carve a fresh slab from the reserve and make it the class partial.
    fn carve(&mut self, id: u8) -> u32 {
        debug_assert!(self.table.len() < self.nslabs_cap);
        let slab = self.table.len() as u32;
        self.table.push(SlabMeta {
            id,
            utime: time::now(),
        });
        unsafe { self.init_slab(slab, id) };

        let class = &mut self.classes[id as usize];
        class.partial = slab;
        class.partial_next = 0;
        SLAB_CURR.increment();
        slab
    }

    /// Evict every resident of `victim` and hand the slab to `new_id`.
    fn recycle(&mut self, victim: u32, new_id: u8, index: &mut HashTable) {
        let old_id = self.table[victim as usize].id;
        let items_per_slab = self.classes[old_id as usize].items_per_slab;

        warn!(
            slab = victim,
            from_class = old_id,
            to_class = new_id,
            "evicting slab"
        );

        for slot in 0..items_per_slab {
            let r = pack_ref(victim, slot);
            let key = {
                let hdr = unsafe { self.header(r) };
                hdr.check_magic();
                if !hdr.is_linked() {
                    continue;
                }
                ITEM_KEYVAL_BYTE.sub((hdr.klen() + hdr.vlen()) as i64);
                unsafe { hdr.key(self.use_cas) }.to_vec()
            };
            index.delete(&key, self);
            ITEM_CURR.decrement();
            ITEM_REMOVE.increment();
        }

        // free-queue entries into the victim would dangle across the
        // class change
        let old_class = &mut self.classes[old_id as usize];
        old_class.free_q.retain(|&fr| unpack_ref(fr).0 != victim);
        if old_class.partial == victim {
            old_class.partial = NULL_SLAB;
            old_class.partial_next = 0;
        }

        self.table[victim as usize].id = new_id;
        self.table[victim as usize].utime = time::now();
        unsafe { self.init_slab(victim, new_id) };

        let class = &mut self.classes[new_id as usize];
        class.partial = victim;
        class.partial_next = 0;
        SLAB_EVICT.increment();
    }

    /// Write the slab header and initialize every slot header.
    ///
    /// # Safety
    ///
    /// `slab` must be a carved slab id; no live references into the slab.
    unsafe fn init_slab(&self, slab: u32, id: u8) {
        let base = self.heap.slab_ptr(slab, self.slab_size);
        let class = &self.classes[id as usize];
        unsafe {
            write_slab_hdr(base, id);
            for slot in 0..class.items_per_slab {
                let offset = SLAB_HDR_SIZE + slot as usize * class.item_size;
                ItemHeader::init(base.add(offset), offset as u32, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlabConfig;

    fn small_config() -> SlabConfig {
        SlabConfig {
            slab_size: 4096,
            maxbytes: 4 * 4096,
            prealloc: false,
            profile: Some(vec![64, 128, 512]),
            ..Default::default()
        }
    }

    #[test]
    fn test_bump_then_fresh_slab() {
        let config = small_config();
        let mut pool = SlabPool::new(&config).unwrap();
        let mut index = HashTable::new(8);

        assert_eq!(pool.nslabs(), 0);
        let a = pool.get_slot(0, &mut index).unwrap();
        assert_eq!(pool.nslabs(), 1);
        let b = pool.get_slot(0, &mut index).unwrap();
        assert_ne!(a, b);
        assert_eq!(unpack_ref(a).0, unpack_ref(b).0);
    }

    #[test]
    fn test_freeq_reuse() {
        let config = small_config();
        let mut pool = SlabPool::new(&config).unwrap();
        let mut index = HashTable::new(8);

        let a = pool.get_slot(1, &mut index).unwrap();
        pool.put_slot(a);
        assert_eq!(pool.free_slots(1), 1);
        assert!(unsafe { pool.header(a) }.in_freeq());

        let b = pool.get_slot(1, &mut index).unwrap();
        assert_eq!(a, b);
        assert!(!unsafe { pool.header(b) }.in_freeq());
        assert_eq!(pool.free_slots(1), 0);
    }

    #[test]
    fn test_prealloc_carves_per_class() {
        let config = SlabConfig {
            prealloc: true,
            ..small_config()
        };
        let pool = SlabPool::new(&config).unwrap();
        assert_eq!(pool.nslabs(), 3);
    }

    #[test]
    fn test_exhaustion_without_eviction() {
        let config = SlabConfig {
            evict_opt: Eviction::None,
            slab_size: 4096,
            maxbytes: 4096,
            prealloc: false,
            profile: Some(vec![2048]),
            ..Default::default()
        };
        let mut pool = SlabPool::new(&config).unwrap();
        let mut index = HashTable::new(8);

        // one slab, (4096-8)/2048 = 1 slot
        assert!(pool.get_slot(0, &mut index).is_some());
        assert!(pool.get_slot(0, &mut index).is_none());
    }

    #[test]
    fn test_eviction_recycles_slab_to_new_class() {
        let config = SlabConfig {
            evict_opt: Eviction::Random,
            slab_size: 4096,
            maxbytes: 4096,
            prealloc: false,
            profile: Some(vec![512, 1024]),
            ..Default::default()
        };
        let mut pool = SlabPool::new(&config).unwrap();
        let mut index = HashTable::new(8);

        let a = pool.get_slot(0, &mut index).unwrap();
        assert_eq!(pool.table[unpack_ref(a).0 as usize].id, 0);

        // reserve exhausted: class 1 steals the only slab
        let b = pool.get_slot(1, &mut index).unwrap();
        assert_eq!(pool.table[unpack_ref(b).0 as usize].id, 1);
        assert_eq!(pool.slot_size_of(b), 1024);
    }

    #[test]
    fn test_eviction_purges_victim_freeq() {
        let config = SlabConfig {
            evict_opt: Eviction::Random,
            slab_size: 4096,
            maxbytes: 4096,
            prealloc: false,
            profile: Some(vec![512, 1024]),
            ..Default::default()
        };
        let mut pool = SlabPool::new(&config).unwrap();
        let mut index = HashTable::new(8);

        let a = pool.get_slot(0, &mut index).unwrap();
        pool.put_slot(a);
        assert_eq!(pool.free_slots(0), 1);

        let _b = pool.get_slot(1, &mut index).unwrap();
        assert_eq!(pool.free_slots(0), 0, "stale refs into recycled slab");
    }
}
