//! In-band item header and slot reference packing.
//!
//! Each slot in a slab starts with a fixed header, optionally followed by
//! an 8-byte CAS field, then the key bytes and the value bytes:
//!
//! ```text
//! +--------+-------+-----+---------------------------+
//! | header | [cas] | key |     value (left)          |   default
//! +--------+-------+-----+---------------------------+
//! | header | [cas] | key |          (value, right)   |   is_raligned
//! +--------+-------+-----+---------------------------+
//! ```
//!
//! A left-aligned value occupies `[data, data + vlen)` right after the key;
//! a right-aligned value is flush with the slot's end, which makes future
//! prepends a copy into the gap instead of a reallocation.
//!
//! Items are addressed by a packed `(slab_id << 16) | slot_index` index
//! rather than a pointer; the same packing is used for the hash chain link
//! embedded in the header and for free-queue entries.

/// Sentinel for corruption checks.
pub const ITEM_MAGIC: u32 = 0xfeed_bead;

/// Fixed header size in bytes.
pub const ITEM_HDR_SIZE: usize = 32;

/// Size of the optional CAS field.
pub const CAS_SIZE: usize = 8;

/// Null slot reference (chain end, no partial slab).
pub const NULL_REF: u32 = u32::MAX;

const FLAG_LINKED: u8 = 1 << 0;
const FLAG_IN_FREEQ: u8 = 1 << 1;
const FLAG_RALIGNED: u8 = 1 << 2;

/// Pack a slab id and slot index into a slot reference.
#[inline]
pub fn pack_ref(slab_id: u32, slot: u16) -> u32 {
    debug_assert!(slab_id <= 0xFFFE, "slab id too large for slot ref");
    (slab_id << 16) | u32::from(slot)
}

/// Unpack a slot reference into (slab_id, slot_index).
#[inline]
pub fn unpack_ref(r: u32) -> (u32, u16) {
    (r >> 16, (r & 0xFFFF) as u16)
}

/// Item header at the start of every slot.
///
/// `offset` locates the slot within its owning slab and `id` names the
/// slab class; neither changes after the slab is carved. `next` is the
/// hash chain link, kept inside the item so a lookup touches one line.
#[repr(C)]
pub struct ItemHeader {
    magic: u32,
    /// Byte offset of this slot within its owning slab.
    offset: u32,
    /// Hash chain link (packed slot ref), `NULL_REF` at chain end.
    next: u32,
    /// Opaque client flags, echoed back verbatim.
    dataflag: u32,
    vlen: u32,
    /// Expiry in relative seconds, 0 = never.
    expire_at: u32,
    create_at: u32,
    /// Slab class id.
    id: u8,
    flags: u8,
    klen: u8,
    _pad: u8,
}

const _: () = assert!(std::mem::size_of::<ItemHeader>() == ITEM_HDR_SIZE);

impl ItemHeader {
    /// Get a shared reference to the header at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized slot header and outlive `'a`.
    #[inline]
    pub unsafe fn from_ptr<'a>(ptr: *const u8) -> &'a Self {
        unsafe { &*(ptr as *const ItemHeader) }
    }

    /// Get a mutable reference to the header at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized slot header, outlive `'a`, and no
    /// other reference to the slot may be live.
    #[inline]
    pub unsafe fn from_ptr_mut<'a>(ptr: *mut u8) -> &'a mut Self {
        unsafe { &mut *(ptr as *mut ItemHeader) }
    }

    /// Initialize the immutable part of a header when a slab is carved.
    ///
    /// # Safety
    ///
    /// `ptr` must point to writable slot memory of at least
    /// `ITEM_HDR_SIZE` bytes.
    pub unsafe fn init(ptr: *mut u8, offset: u32, id: u8) {
        let hdr = unsafe { Self::from_ptr_mut(ptr) };
        hdr.magic = ITEM_MAGIC;
        hdr.offset = offset;
        hdr.id = id;
        hdr.next = NULL_REF;
        hdr.flags = 0;
        hdr.klen = 0;
        hdr._pad = 0;
        hdr.dataflag = 0;
        hdr.vlen = 0;
        hdr.expire_at = 0;
        hdr.create_at = 0;
    }

    /// Clear the mutable fields before reuse.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.magic, ITEM_MAGIC);
        self.next = NULL_REF;
        self.flags = 0;
        self.klen = 0;
        self.dataflag = 0;
        self.vlen = 0;
        self.expire_at = 0;
        self.create_at = 0;
    }

    #[inline]
    pub fn check_magic(&self) {
        debug_assert_eq!(self.magic, ITEM_MAGIC, "item magic mismatch");
    }

    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn klen(&self) -> usize {
        self.klen as usize
    }

    #[inline]
    pub fn set_klen(&mut self, klen: u8) {
        self.klen = klen;
    }

    #[inline]
    pub fn vlen(&self) -> usize {
        self.vlen as usize
    }

    #[inline]
    pub fn set_vlen(&mut self, vlen: u32) {
        self.vlen = vlen;
    }

    #[inline]
    pub fn dataflag(&self) -> u32 {
        self.dataflag
    }

    #[inline]
    pub fn set_dataflag(&mut self, flag: u32) {
        self.dataflag = flag;
    }

    #[inline]
    pub fn expire_at(&self) -> u32 {
        self.expire_at
    }

    #[inline]
    pub fn set_expire_at(&mut self, at: u32) {
        self.expire_at = at;
    }

    #[inline]
    pub fn create_at(&self) -> u32 {
        self.create_at
    }

    #[inline]
    pub fn set_create_at(&mut self, at: u32) {
        self.create_at = at;
    }

    #[inline]
    pub fn next(&self) -> u32 {
        self.next
    }

    #[inline]
    pub fn set_next(&mut self, next: u32) {
        self.next = next;
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.flags & FLAG_LINKED != 0
    }

    #[inline]
    pub fn set_linked(&mut self, on: bool) {
        debug_assert!(!on || !self.in_freeq(), "linked item cannot be in freeq");
        if on {
            self.flags |= FLAG_LINKED;
        } else {
            self.flags &= !FLAG_LINKED;
        }
    }

    #[inline]
    pub fn in_freeq(&self) -> bool {
        self.flags & FLAG_IN_FREEQ != 0
    }

    #[inline]
    pub fn set_in_freeq(&mut self, on: bool) {
        debug_assert!(!on || !self.is_linked(), "freeq item cannot be linked");
        if on {
            self.flags |= FLAG_IN_FREEQ;
        } else {
            self.flags &= !FLAG_IN_FREEQ;
        }
    }

    #[inline]
    pub fn is_raligned(&self) -> bool {
        self.flags & FLAG_RALIGNED != 0
    }

    #[inline]
    pub fn set_raligned(&mut self, on: bool) {
        if on {
            self.flags |= FLAG_RALIGNED;
        } else {
            self.flags &= !FLAG_RALIGNED;
        }
    }

    /// Pointer to the CAS field, valid only when CAS is enabled.
    #[inline]
    unsafe fn cas_ptr(&self) -> *const u8 {
        unsafe { (self as *const Self as *const u8).add(ITEM_HDR_SIZE) }
    }

    /// Read the CAS value. Returns 0 when CAS is disabled.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot.
    #[inline]
    pub unsafe fn cas(&self, use_cas: bool) -> u64 {
        if !use_cas {
            return 0;
        }
        let mut raw = [0u8; CAS_SIZE];
        unsafe {
            std::ptr::copy_nonoverlapping(self.cas_ptr(), raw.as_mut_ptr(), CAS_SIZE);
        }
        u64::from_le_bytes(raw)
    }

    /// Stamp a CAS value. No-op when CAS is disabled.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot with CAS space.
    #[inline]
    pub unsafe fn set_cas(&mut self, use_cas: bool, cas: u64) {
        if !use_cas {
            return;
        }
        let raw = cas.to_le_bytes();
        unsafe {
            std::ptr::copy_nonoverlapping(raw.as_ptr(), self.cas_ptr() as *mut u8, CAS_SIZE);
        }
    }

    /// Pointer to the key bytes.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot.
    #[inline]
    pub unsafe fn key_ptr(&self, use_cas: bool) -> *const u8 {
        let cas = if use_cas { CAS_SIZE } else { 0 };
        unsafe { (self as *const Self as *const u8).add(ITEM_HDR_SIZE + cas) }
    }

    /// The key as a slice.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot holding a key.
    #[inline]
    pub unsafe fn key(&self, use_cas: bool) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.key_ptr(use_cas), self.klen as usize) }
    }

    /// Pointer to the value bytes, a function of `is_raligned`.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot of `slot_size`
    /// bytes.
    #[inline]
    pub unsafe fn value_ptr(&self, use_cas: bool, slot_size: usize) -> *const u8 {
        if self.is_raligned() {
            let end = unsafe { (self as *const Self as *const u8).add(slot_size) };
            unsafe { end.sub(self.vlen as usize) }
        } else {
            unsafe { self.key_ptr(use_cas).add(self.klen as usize) }
        }
    }

    /// The value as a slice.
    ///
    /// # Safety
    ///
    /// The header must sit at the start of a valid slot of `slot_size`
    /// bytes holding a value.
    #[inline]
    pub unsafe fn value(&self, use_cas: bool, slot_size: usize) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.value_ptr(use_cas, slot_size), self.vlen as usize)
        }
    }
}

/// Total slot footprint of an item with the given key/value lengths.
#[inline]
pub fn item_ntotal(klen: usize, vlen: usize, use_cas: bool) -> usize {
    ITEM_HDR_SIZE + if use_cas { CAS_SIZE } else { 0 } + klen + vlen
}
