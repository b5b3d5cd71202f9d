//! Cached Mapping Table (C1): a bounded-capacity LRU cache of
//! `(stream, LPA) -> (PPA, sector bitmap, dirty)`.
//!
//! Slots live in a slab (`Vec<Option<CmtSlot>>`) addressed by a stable
//! small-integer [`SlotHandle`], with an intrusive doubly linked LRU list
//! threaded through `prev`/`next` fields on each slot. This gives O(1)
//! `reserve`/`insert`/`update`/`retrieve_ppa`/evict, per the spec's
//! "slot->list-node is a direct reference" contract, without the
//! iterator-into-`std::list` aliasing the original C++ uses.

use std::collections::HashMap;

use crate::error::{LogicError, Result, SimError};
use crate::types::{Lpa, PageStatusBitmap, Ppa, StreamId, Vpa};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmtEntryStatus {
    Waiting,
    Valid,
}

/// A stable handle into the CMT slab. Indices are reused once a slot is
/// evicted, so a stale handle must never be read after eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u32);

#[derive(Debug, Clone)]
pub struct CmtSlot {
    pub stream: StreamId,
    pub lpa: Lpa,
    pub mapping: Vpa,
    pub bitmap: PageStatusBitmap,
    pub dirty: bool,
    pub status: CmtEntryStatus,
    prev: Option<SlotHandle>,
    next: Option<SlotHandle>,
}

pub struct CachedMappingTable {
    capacity: usize,
    slots: Vec<Option<CmtSlot>>,
    free: Vec<SlotHandle>,
    index: HashMap<(StreamId, Lpa), SlotHandle>,
    /// Most-recently-used end of the list.
    mru: Option<SlotHandle>,
    /// Least-recently-used end of the list; eviction removes this slot.
    lru: Option<SlotHandle>,
    len: usize,
}

impl CachedMappingTable {
    pub fn new(capacity: usize) -> Self {
        CachedMappingTable {
            capacity,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            mru: None,
            lru: None,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn check_free_slot_availability(&self) -> bool {
        self.len < self.capacity
    }

    /// True iff the key is present with status `Valid`.
    pub fn exists(&self, stream: StreamId, lpa: Lpa) -> bool {
        self.index
            .get(&(stream, lpa))
            .and_then(|h| self.slot(*h))
            .map(|s| s.status == CmtEntryStatus::Valid)
            .unwrap_or(false)
    }

    pub fn is_slot_reserved_waiting(&self, stream: StreamId, lpa: Lpa) -> bool {
        self.index
            .get(&(stream, lpa))
            .and_then(|h| self.slot(*h))
            .map(|s| s.status == CmtEntryStatus::Waiting)
            .unwrap_or(false)
    }

    /// Insert a new slot in status `Waiting` at the MRU end.
    pub fn reserve(&mut self, stream: StreamId, lpa: Lpa) -> Result<()> {
        if self.index.contains_key(&(stream, lpa)) {
            return Err(SimError::Logic(LogicError::DuplicateKey { stream, lpa }));
        }
        if !self.check_free_slot_availability() {
            return Err(SimError::Logic(LogicError::Overfull));
        }

        // The mapping field is meaningless while `Waiting`: `exists` and
        // `retrieve_mapping` both refuse any slot that isn't `Valid`, and
        // a `Waiting` slot is never dirty, so it can never reach
        // `writeback_mapping_entry` either. `Vpa(0)` rather than a sentinel
        // built from `NO_PPA` avoids colliding with the shared-page flag
        // bit if that invariant is ever loosened.
        let handle = self.alloc_slot(CmtSlot {
            stream,
            lpa,
            mapping: Vpa(0),
            bitmap: PageStatusBitmap::EMPTY,
            dirty: false,
            status: CmtEntryStatus::Waiting,
            prev: None,
            next: None,
        });
        self.index.insert((stream, lpa), handle);
        self.push_front(handle);
        self.len += 1;
        Ok(())
    }

    /// Transition a reserved slot to `Valid`, clearing dirty.
    pub fn insert(&mut self, stream: StreamId, lpa: Lpa, mapping: Vpa, bitmap: PageStatusBitmap) -> Result<()> {
        let handle = *self
            .index
            .get(&(stream, lpa))
            .ok_or(SimError::Logic(LogicError::NotReserved { stream, lpa }))?;
        let slot = self.slot_mut(handle).expect("indexed handle must resolve");
        slot.mapping = mapping;
        slot.bitmap = bitmap;
        slot.dirty = false;
        slot.status = CmtEntryStatus::Valid;
        Ok(())
    }

    /// Update an existing valid mapping and mark it dirty.
    pub fn update(&mut self, stream: StreamId, lpa: Lpa, mapping: Vpa, bitmap: PageStatusBitmap) -> Result<()> {
        let handle = *self
            .index
            .get(&(stream, lpa))
            .ok_or(SimError::Logic(LogicError::NotValid { stream, lpa }))?;
        let slot = self.slot_mut(handle).expect("indexed handle must resolve");
        if slot.status != CmtEntryStatus::Valid {
            return Err(SimError::Logic(LogicError::NotValid { stream, lpa }));
        }
        slot.mapping = mapping;
        slot.bitmap = bitmap;
        slot.dirty = true;
        Ok(())
    }

    /// Move the slot to MRU and return its mapping (a direct PPA or a
    /// shared VPA); requires `Valid`.
    pub fn retrieve_mapping(&mut self, stream: StreamId, lpa: Lpa) -> Result<Vpa> {
        let handle = *self
            .index
            .get(&(stream, lpa))
            .ok_or(SimError::Logic(LogicError::NotValid { stream, lpa }))?;
        let mapping = {
            let slot = self.slot(handle).expect("indexed handle must resolve");
            if slot.status != CmtEntryStatus::Valid {
                return Err(SimError::Logic(LogicError::NotValid { stream, lpa }));
            }
            slot.mapping
        };
        self.touch(handle);
        Ok(mapping)
    }

    pub fn bitmap_of(&self, stream: StreamId, lpa: Lpa) -> Result<PageStatusBitmap> {
        self.index
            .get(&(stream, lpa))
            .and_then(|h| self.slot(*h))
            .map(|s| s.bitmap)
            .ok_or(SimError::Logic(LogicError::NotValid { stream, lpa }))
    }

    pub fn is_dirty(&self, stream: StreamId, lpa: Lpa) -> bool {
        self.index
            .get(&(stream, lpa))
            .and_then(|h| self.slot(*h))
            .map(|s| s.dirty)
            .unwrap_or(false)
    }

    pub fn make_clean(&mut self, stream: StreamId, lpa: Lpa) {
        if let Some(handle) = self.index.get(&(stream, lpa)).copied() {
            if let Some(slot) = self.slot_mut(handle) {
                slot.dirty = false;
            }
        }
    }

    /// Remove the LRU slot and return its key and a copy of its contents.
    /// The caller inspects `dirty` to decide whether a writeback is owed.
    pub fn evict_one(&mut self) -> Option<(Lpa, CmtSlot)> {
        let handle = self.lru?;
        self.unlink(handle);
        let slot = self.slots[handle.0 as usize].take().expect("lru handle must be occupied");
        self.index.remove(&(slot.stream, slot.lpa));
        self.free.push(handle);
        self.len -= 1;
        Some((slot.lpa, slot))
    }

    fn alloc_slot(&mut self, slot: CmtSlot) -> SlotHandle {
        if let Some(handle) = self.free.pop() {
            self.slots[handle.0 as usize] = Some(slot);
            handle
        } else {
            let handle = SlotHandle(self.slots.len() as u32);
            self.slots.push(Some(slot));
            handle
        }
    }

    fn slot(&self, handle: SlotHandle) -> Option<&CmtSlot> {
        self.slots.get(handle.0 as usize).and_then(|s| s.as_ref())
    }

    fn slot_mut(&mut self, handle: SlotHandle) -> Option<&mut CmtSlot> {
        self.slots.get_mut(handle.0 as usize).and_then(|s| s.as_mut())
    }

    fn push_front(&mut self, handle: SlotHandle) {
        let old_mru = self.mru;
        if let Some(slot) = self.slot_mut(handle) {
            slot.prev = None;
            slot.next = old_mru;
        }
        if let Some(old) = old_mru {
            if let Some(old_slot) = self.slot_mut(old) {
                old_slot.prev = Some(handle);
            }
        }
        self.mru = Some(handle);
        if self.lru.is_none() {
            self.lru = Some(handle);
        }
    }

    fn unlink(&mut self, handle: SlotHandle) {
        let (prev, next) = {
            let slot = self.slot(handle).expect("unlink target must exist");
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => {
                if let Some(s) = self.slot_mut(p) {
                    s.next = next;
                }
            }
            None => self.mru = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slot_mut(n) {
                    s.prev = prev;
                }
            }
            None => self.lru = prev,
        }
    }

    /// Move a slot to the MRU end in-place (used on cache hit).
    fn touch(&mut self, handle: SlotHandle) {
        if self.mru == Some(handle) {
            return;
        }
        self.unlink(handle);
        self.push_front(handle);
    }
}
