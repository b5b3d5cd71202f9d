//! Collaborator contracts (§5 of the specification).
//!
//! The Address Translation Engine never touches flash directly: it asks a
//! Block Manager for a physical page, a GC/Wear-Leveling Unit whether a
//! plane is under backpressure, and hands translated transactions to a
//! Transaction Scheduling Unit. Production wiring plugs in real flash
//! models behind these traits; the `Ref*` structs here are minimal
//! in-memory collaborators good enough to drive the engine end-to-end for
//! tests and the CLI.

use std::collections::{HashMap, HashSet};

use crate::amu::transaction::Transaction;
use crate::error::Result;
use crate::types::{PhysicalAddress, Ppa};

/// Allocates and tracks block/page occupancy within a plane already chosen
/// by the plane allocator, and answers validity/metadata questions GC and
/// the engine need during relocation.
pub trait BlockManager {
    /// Assign a block and page within `address`'s plane for a user or GC
    /// write, returning the fully-resolved address (block/page filled in).
    fn allocate_page_in_plane_for_write(
        &mut self,
        address: PhysicalAddress,
        is_for_gc: bool,
    ) -> Result<PhysicalAddress>;

    /// Assign a block and page within `address`'s plane for a translation
    /// (mapping table) page write.
    fn allocate_page_in_plane_for_translation_write(
        &mut self,
        address: PhysicalAddress,
    ) -> Result<PhysicalAddress>;

    fn invalidate_page(&mut self, ppa: Ppa);

    fn is_page_valid(&self, ppa: Ppa) -> bool;

    /// Record that a read has been issued to `ppa` (wear/read-disturb
    /// bookkeeping the real block manager would perform; a no-op here).
    fn read_transaction_issued(&mut self, ppa: Ppa);

    fn holds_mapping_data(&self, ppa: Ppa) -> bool;

    /// Every `Ppa` currently occupying `address`'s block, in page order.
    /// The GC Barrier Coordinator walks this to lock every valid page in a
    /// block before relocating it (§4.6).
    fn current_page_write_index(&self, address: &PhysicalAddress) -> Vec<Ppa>;
}

/// Resolves a physical page back to its flash coordinate, independent of
/// any mapping-table state (used when the engine needs to re-derive an
/// address it already allocated, e.g. for a writeback).
pub trait FlashController {
    fn get_metadata(&self, ppa: Ppa) -> Option<PhysicalAddress>;
}

/// Garbage collection / wear leveling signals the engine must respect
/// before admitting a write to a plane.
pub trait GcAndWearLevelingUnit {
    /// True iff writes to this plane must be held back (the plane's free
    /// page count is below `get_minimum_number_of_free_pages_before_gc`).
    fn stop_servicing_writes(&self, address: &PhysicalAddress) -> bool;

    fn get_minimum_number_of_free_pages_before_gc(&self) -> u32;
}

/// Receives fully translated transactions for scheduling onto flash. The
/// engine's job ends at `submit`; timing and queueing beyond this point are
/// out of scope (§2 Non-goals).
pub trait TransactionScheduler {
    fn submit(&mut self, transaction: Transaction) -> Result<()>;
}

/// An in-memory block manager: one free-page cursor per plane, a flat
/// validity set, and a reverse PPA->address table so `get_metadata` and
/// `is_page_valid` are O(1). Pages are numbered densely per plane in
/// allocation order; this is a simulation convenience, not a realistic
/// block/page geometry, since the spec leaves wear leveling and physical
/// layout out of the AMU's scope.
pub struct RefBlockManager {
    next_ppa: u64,
    plane_cursor: HashMap<(u32, u32, u32, u32), u32>,
    valid: HashSet<Ppa>,
    addresses: HashMap<Ppa, PhysicalAddress>,
    mapping_pages: HashSet<Ppa>,
    pages_per_block: u32,
}

impl RefBlockManager {
    pub fn new(pages_per_block: u32) -> Self {
        RefBlockManager {
            next_ppa: 0,
            plane_cursor: HashMap::new(),
            valid: HashSet::new(),
            addresses: HashMap::new(),
            mapping_pages: HashSet::new(),
            pages_per_block: pages_per_block.max(1),
        }
    }

    fn allocate(&mut self, mut address: PhysicalAddress, is_mapping: bool) -> PhysicalAddress {
        let key = (address.channel, address.chip, address.die, address.plane);
        let cursor = self.plane_cursor.entry(key).or_insert(0);
        address.block = *cursor / self.pages_per_block;
        address.page = *cursor % self.pages_per_block;
        *cursor += 1;

        let ppa = Ppa(self.next_ppa);
        self.next_ppa += 1;
        self.valid.insert(ppa);
        self.addresses.insert(ppa, address);
        if is_mapping {
            self.mapping_pages.insert(ppa);
        }
        address
    }
}

impl BlockManager for RefBlockManager {
    fn allocate_page_in_plane_for_write(
        &mut self,
        address: PhysicalAddress,
        _is_for_gc: bool,
    ) -> Result<PhysicalAddress> {
        Ok(self.allocate(address, false))
    }

    fn allocate_page_in_plane_for_translation_write(
        &mut self,
        address: PhysicalAddress,
    ) -> Result<PhysicalAddress> {
        Ok(self.allocate(address, true))
    }

    fn invalidate_page(&mut self, ppa: Ppa) {
        self.valid.remove(&ppa);
    }

    fn is_page_valid(&self, ppa: Ppa) -> bool {
        self.valid.contains(&ppa)
    }

    fn read_transaction_issued(&mut self, _ppa: Ppa) {}

    fn holds_mapping_data(&self, ppa: Ppa) -> bool {
        self.mapping_pages.contains(&ppa)
    }

    fn current_page_write_index(&self, address: &PhysicalAddress) -> Vec<Ppa> {
        let mut pages: Vec<(u32, Ppa)> = self
            .addresses
            .iter()
            .filter(|(_, a)| {
                a.channel == address.channel
                    && a.chip == address.chip
                    && a.die == address.die
                    && a.plane == address.plane
                    && a.block == address.block
            })
            .map(|(&ppa, a)| (a.page, ppa))
            .collect();
        pages.sort_by_key(|(page, _)| *page);
        pages.into_iter().map(|(_, ppa)| ppa).collect()
    }
}

/// A flash controller view backed by the same address table the block
/// manager populates; kept as a separate trait object so the engine does
/// not need to know block-manager internals to resolve an address.
pub struct RefFlashController {
    addresses: HashMap<Ppa, PhysicalAddress>,
}

impl RefFlashController {
    pub fn new() -> Self {
        RefFlashController { addresses: HashMap::new() }
    }

    pub fn record(&mut self, ppa: Ppa, address: PhysicalAddress) {
        self.addresses.insert(ppa, address);
    }
}

impl Default for RefFlashController {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashController for RefFlashController {
    fn get_metadata(&self, ppa: Ppa) -> Option<PhysicalAddress> {
        self.addresses.get(&ppa).copied()
    }
}

/// A GC unit that never backpressures; planes are treated as having
/// unlimited free pages. Suitable for traces that don't exercise §4.7's
/// overfull-plane path; configure a lower threshold via `with_threshold`
/// to exercise it.
pub struct RefGcUnit {
    min_free_pages: u32,
    stopped_planes: HashSet<(u32, u32, u32, u32)>,
}

impl RefGcUnit {
    pub fn new(min_free_pages: u32) -> Self {
        RefGcUnit { min_free_pages, stopped_planes: HashSet::new() }
    }

    /// Test/CLI hook: force a plane into backpressure to exercise the
    /// overfull-plane barrier path.
    pub fn stop_plane(&mut self, address: &PhysicalAddress) {
        self.stopped_planes.insert((address.channel, address.chip, address.die, address.plane));
    }

    pub fn resume_plane(&mut self, address: &PhysicalAddress) {
        self.stopped_planes.remove(&(address.channel, address.chip, address.die, address.plane));
    }
}

impl GcAndWearLevelingUnit for RefGcUnit {
    fn stop_servicing_writes(&self, address: &PhysicalAddress) -> bool {
        self.stopped_planes.contains(&(address.channel, address.chip, address.die, address.plane))
    }

    fn get_minimum_number_of_free_pages_before_gc(&self) -> u32 {
        self.min_free_pages
    }
}

/// Records every transaction the engine hands off, in submission order.
#[derive(Default)]
pub struct RefTransactionScheduler {
    pub submitted: Vec<Transaction>,
}

impl RefTransactionScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionScheduler for RefTransactionScheduler {
    fn submit(&mut self, transaction: Transaction) -> Result<()> {
        self.submitted.push(transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PhysicalAddress;

    #[test]
    fn ref_block_manager_allocates_densely_within_a_plane() {
        let mut bm = RefBlockManager::new(4);
        let plane = PhysicalAddress::plane_only(0, 0, 0, 0);
        let a0 = bm.allocate_page_in_plane_for_write(plane, false).unwrap();
        let a1 = bm.allocate_page_in_plane_for_write(plane, false).unwrap();
        assert_eq!(a0.page, 0);
        assert_eq!(a1.page, 1);
        assert_eq!(a0.block, 0);
    }

    #[test]
    fn invalidated_pages_are_reported_invalid() {
        let mut bm = RefBlockManager::new(4);
        let plane = PhysicalAddress::plane_only(0, 0, 0, 0);
        bm.allocate_page_in_plane_for_write(plane, false).unwrap();
        assert!(bm.is_page_valid(Ppa(0)));
        bm.invalidate_page(Ppa(0));
        assert!(!bm.is_page_valid(Ppa(0)));
    }

    #[test]
    fn current_page_write_index_lists_a_blocks_pages_in_order() {
        let mut bm = RefBlockManager::new(4);
        let plane = PhysicalAddress::plane_only(0, 0, 0, 0);
        for _ in 0..4 {
            bm.allocate_page_in_plane_for_write(plane, false).unwrap();
        }
        let block = PhysicalAddress { block: 0, ..plane };
        let index = bm.current_page_write_index(&block);
        assert_eq!(index, vec![Ppa(0), Ppa(1), Ppa(2), Ppa(3)]);
    }

    #[test]
    fn gc_unit_reports_backpressure_only_on_stopped_planes() {
        let mut gc = RefGcUnit::new(4);
        let plane = PhysicalAddress::plane_only(0, 0, 0, 0);
        assert!(!gc.stop_servicing_writes(&plane));
        gc.stop_plane(&plane);
        assert!(gc.stop_servicing_writes(&plane));
    }
}
