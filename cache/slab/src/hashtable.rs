//! Chained hash index over slab items.
//!
//! A power-of-two array of buckets, each holding the head of a singly
//! linked chain. The chain link is the `next` field embedded in the item
//! header, so a lookup walks items directly with no separate chain nodes.
//! The table is sized once at setup and never resized.

use ahash::RandomState;

use crate::allocator::SlabPool;
use crate::item::NULL_REF;

pub(crate) struct HashTable {
    buckets: Box<[u32]>,
    mask: u64,
    hash_builder: RandomState,
}

impl HashTable {
    /// Create a table with `2^power` buckets.
    pub fn new(power: u8) -> Self {
        let nbuckets = 1usize << power;
        Self {
            buckets: vec![NULL_REF; nbuckets].into_boxed_slice(),
            mask: (nbuckets - 1) as u64,
            hash_builder: RandomState::new(),
        }
    }

    #[inline]
    fn bucket_of(&self, key: &[u8]) -> usize {
        (self.hash_builder.hash_one(key) & self.mask) as usize
    }

    /// Prepend `r` to its key's chain.
    ///
    /// Does not check for duplicates; the caller unlinks any prior value
    /// for the key first.
    pub fn put(&mut self, r: u32, pool: &SlabPool) {
        let bucket = {
            let hdr = unsafe { pool.header(r) };
            hdr.check_magic();
            self.bucket_of(unsafe { hdr.key(pool.use_cas()) })
        };
        let head = self.buckets[bucket];
        unsafe { pool.header_mut(r) }.set_next(head);
        self.buckets[bucket] = r;
    }

    /// First item in `key`'s chain whose key bytes compare equal.
    pub fn get(&self, key: &[u8], pool: &SlabPool) -> Option<u32> {
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NULL_REF {
            let hdr = unsafe { pool.header(cur) };
            hdr.check_magic();
            if unsafe { hdr.key(pool.use_cas()) } == key {
                return Some(cur);
            }
            cur = hdr.next();
        }
        None
    }

    /// Remove the first matching entry, returning it.
    pub fn delete(&mut self, key: &[u8], pool: &SlabPool) -> Option<u32> {
        let bucket = self.bucket_of(key);
        let mut prev = NULL_REF;
        let mut cur = self.buckets[bucket];

        while cur != NULL_REF {
            let (matched, next) = {
                let hdr = unsafe { pool.header(cur) };
                hdr.check_magic();
                (unsafe { hdr.key(pool.use_cas()) } == key, hdr.next())
            };

            if matched {
                if prev == NULL_REF {
                    self.buckets[bucket] = next;
                } else {
                    unsafe { pool.header_mut(prev) }.set_next(next);
                }
                unsafe { pool.header_mut(cur) }.set_next(NULL_REF);
                return Some(cur);
            }
            prev = cur;
            cur = next;
        }
        None
    }

    /// Entries in `key`'s chain whose key bytes compare equal.
    pub fn matches(&self, key: &[u8], pool: &SlabPool) -> usize {
        let mut n = 0;
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NULL_REF {
            let hdr = unsafe { pool.header(cur) };
            if unsafe { hdr.key(pool.use_cas()) } == key {
                n += 1;
            }
            cur = hdr.next();
        }
        n
    }

    #[inline]
    pub fn nbuckets(&self) -> usize {
        self.buckets.len()
    }
}
