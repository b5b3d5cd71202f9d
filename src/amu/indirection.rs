//! Secondary Mapping Table + Reverse Mapping (C4).
//!
//! `Smt: VPA -> PPA` is populated only for pages whose refcount is, or
//! once was, >= 2 (open question O3: the entry is *not* demoted back to a
//! direct LPA->PPA mapping when the refcount later drops to 1 — it is
//! removed only when GC erases the underlying page).
//!
//! `ReverseMapping: PPA -> {fingerprint, owning LPA, VPA, use_SMT,
//! invalid}` records exactly one owning LPA per physical page.
//!
//! Per the spec's open question O2, physical pages are treated as
//! stream-private (each stream's block pool is disjoint), so both tables
//! are owned per-stream by `AddressMappingDomain` rather than kept as
//! process-global singletons.

use std::collections::HashMap;

use crate::error::{LogicError, Result, SimError};
use crate::types::{Fingerprint, Lpa, Ppa, Vpa};

#[derive(Debug, Clone)]
pub struct RmEntry {
    pub fingerprint: Fingerprint,
    pub lpa: Lpa,
    pub vpa: Option<Vpa>,
    pub use_smt: bool,
    pub invalid: bool,
}

#[derive(Default)]
pub struct SecondaryMappingTable {
    table: HashMap<Vpa, Ppa>,
}

impl SecondaryMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vpa: Vpa) -> Option<Ppa> {
        self.table.get(&vpa).copied()
    }

    pub fn contains(&self, vpa: Vpa) -> bool {
        self.table.contains_key(&vpa)
    }

    pub fn insert(&mut self, vpa: Vpa, ppa: Ppa) {
        self.table.insert(vpa, ppa);
    }

    pub fn remove(&mut self, vpa: Vpa) {
        self.table.remove(&vpa);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[derive(Default)]
pub struct ReverseMapping {
    table: HashMap<Ppa, RmEntry>,
}

impl ReverseMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ppa: Ppa) -> Option<&RmEntry> {
        self.table.get(&ppa)
    }

    pub fn get_required(&self, ppa: Ppa) -> Result<&RmEntry> {
        self.table
            .get(&ppa)
            .ok_or(SimError::Logic(LogicError::MissingRmEntry { ppa }))
    }

    pub fn insert(&mut self, ppa: Ppa, entry: RmEntry) {
        self.table.insert(ppa, entry);
    }

    pub fn mark_invalid(&mut self, ppa: Ppa) {
        if let Some(entry) = self.table.get_mut(&ppa) {
            entry.invalid = true;
        }
    }

    pub fn set_use_smt(&mut self, ppa: Ppa, use_smt: bool) {
        if let Some(entry) = self.table.get_mut(&ppa) {
            entry.use_smt = use_smt;
        }
    }

    pub fn set_vpa(&mut self, ppa: Ppa, vpa: Vpa) {
        if let Some(entry) = self.table.get_mut(&ppa) {
            entry.vpa = Some(vpa);
        }
    }

    /// Remove the entry for a page the Block Manager has erased.
    pub fn erase(&mut self, ppa: Ppa) {
        self.table.remove(&ppa);
    }

    /// The first non-invalid entry, in arbitrary iteration order. This is
    /// the "online_create_entry_for_reads" modeling shortcut (open
    /// question O1): a faithful read-before-write placeholder, not a real
    /// allocation decision.
    pub fn first_valid(&self) -> Option<(Ppa, &RmEntry)> {
        self.table.iter().find(|(_, e)| !e.invalid).map(|(p, e)| (*p, e))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smt_round_trip() {
        let mut smt = SecondaryMappingTable::new();
        let vpa = Ppa(5).as_vpa();
        smt.insert(vpa, Ppa(5));
        assert_eq!(smt.get(vpa), Some(Ppa(5)));
        smt.remove(vpa);
        assert!(smt.get(vpa).is_none());
    }

    #[test]
    fn rm_missing_entry_is_logic_error() {
        let rm = ReverseMapping::new();
        let err = rm.get_required(Ppa(1)).unwrap_err();
        assert_eq!(err, SimError::Logic(LogicError::MissingRmEntry { ppa: Ppa(1) }));
    }

    #[test]
    fn first_valid_skips_invalidated_entries() {
        let mut rm = ReverseMapping::new();
        rm.insert(Ppa(1), RmEntry { fingerprint: Fingerprint("A".into()), lpa: Lpa(0), vpa: None, use_smt: false, invalid: true });
        rm.insert(Ppa(2), RmEntry { fingerprint: Fingerprint("B".into()), lpa: Lpa(1), vpa: None, use_smt: false, invalid: false });
        let (ppa, _) = rm.first_valid().unwrap();
        assert_eq!(ppa, Ppa(2));
    }
}
