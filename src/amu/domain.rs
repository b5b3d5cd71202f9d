//! Address Mapping Domain (C2): per-stream state.
//!
//! Holds the stream's Primary/Global Mapping Table, Global Translation
//! Directory, plane geometry, barrier sets, deduplicator and
//! reverse/secondary mapping tables, plus bookkeeping counters. The
//! Cached Mapping Table itself is owned by the engine (it may be shared
//! across domains — see [`crate::config::CmtSharingMode`]); the domain
//! only tracks how many of its own entries currently occupy it, so an
//! equal-size partition can be enforced without the domain borrowing the
//! shared structure.

use crate::amu::barrier::BarrierCoordinator;
use crate::amu::dedup::Deduplicator;
use crate::amu::geometry::StreamGeometry;
use crate::amu::indirection::{ReverseMapping, SecondaryMappingTable};
use crate::types::{Lpa, Mvpn, Mppn, PageStatusBitmap, StreamId, Timestamp, Vpa};

/// One row of the Primary/Global Mapping Table. Absence is modeled with
/// `Option` rather than the source's PPA sentinel, since Rust's `Option`
/// makes "no mapping yet" a compile-time-checked state instead of a magic
/// value that happens to collide with the VPA shared-page flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct PmtEntry {
    pub mapping: Option<Vpa>,
    pub bitmap: PageStatusBitmap,
    pub timestamp: Timestamp,
}

/// One row of the Global Translation Directory: MVPN -> MPPN.
#[derive(Debug, Clone, Copy, Default)]
pub struct GtdEntry {
    pub mppn: Option<Mppn>,
    pub timestamp: Timestamp,
}

pub struct AddressMappingDomain {
    pub stream: StreamId,
    pub pmt: Vec<PmtEntry>,
    pub gtd: Vec<GtdEntry>,
    pub geometry: StreamGeometry,
    pub dedup: Deduplicator,
    pub smt: SecondaryMappingTable,
    pub rm: ReverseMapping,
    pub barrier: BarrierCoordinator,

    pub translation_entries_per_page: u32,
    /// Maximum CMT slots this stream may occupy under equal-size
    /// partitioning; `None` when the CMT is fully shared.
    pub cmt_quota: Option<usize>,
    pub cmt_occupancy: usize,

    pub cmt_hits: u64,
    pub cmt_misses: u64,
    /// Flash writes of dirty mapping pages (real, in non-ideal mode; a
    /// passive counter only, in ideal mode per open question O4).
    pub gmt_write_count: u64,
    pub read_before_write_count: u64,
    pub update_read_count: u64,
    pub total_page_write_no: u64,
    pub gc_page_write_no: u64,
    pub inserted_entries_in_preconditioning: u64,
    /// Writes silently skipped because the fingerprint source ran dry.
    pub exhausted_write_count: u64,
}

impl AddressMappingDomain {
    pub fn new(
        stream: StreamId,
        total_logical_pages: u64,
        total_translation_pages: u64,
        translation_entries_per_page: u32,
        geometry: StreamGeometry,
        dedup: Deduplicator,
        cmt_quota: Option<usize>,
    ) -> Self {
        AddressMappingDomain {
            stream,
            pmt: vec![PmtEntry::default(); total_logical_pages as usize],
            gtd: vec![GtdEntry::default(); total_translation_pages as usize],
            geometry,
            dedup,
            smt: SecondaryMappingTable::new(),
            rm: ReverseMapping::new(),
            barrier: BarrierCoordinator::new(),
            translation_entries_per_page,
            cmt_quota,
            cmt_occupancy: 0,
            cmt_hits: 0,
            cmt_misses: 0,
            gmt_write_count: 0,
            read_before_write_count: 0,
            update_read_count: 0,
            total_page_write_no: 0,
            gc_page_write_no: 0,
            inserted_entries_in_preconditioning: 0,
            exhausted_write_count: 0,
        }
    }

    pub fn total_logical_pages(&self) -> u64 {
        self.pmt.len() as u64
    }

    pub fn mvpn_of(&self, lpa: Lpa) -> Mvpn {
        Mvpn(lpa.0 / self.translation_entries_per_page as u64)
    }

    pub fn lpa_in_range(&self, lpa: Lpa) -> bool {
        (lpa.0 as usize) < self.pmt.len()
    }

    pub fn pmt_get(&self, lpa: Lpa) -> PmtEntry {
        self.pmt[lpa.0 as usize]
    }

    pub fn pmt_set(&mut self, lpa: Lpa, mapping: Vpa, bitmap: PageStatusBitmap, ts: Timestamp) {
        self.pmt[lpa.0 as usize] = PmtEntry {
            mapping: Some(mapping),
            bitmap,
            timestamp: ts,
        };
    }

    /// True iff this stream has room left in its CMT share (or the CMT is
    /// fully shared, in which case the caller checks the table itself).
    pub fn has_cmt_quota(&self) -> bool {
        match self.cmt_quota {
            Some(quota) => self.cmt_occupancy < quota,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amu::dedup::{Deduplicator, EmptyFingerprintSource};
    use crate::amu::geometry::StreamGeometry;

    fn geometry() -> StreamGeometry {
        StreamGeometry {
            channel_ids: vec![0],
            chip_ids: vec![0],
            die_ids: vec![0],
            plane_ids: vec![0],
        }
    }

    fn domain() -> AddressMappingDomain {
        AddressMappingDomain::new(
            StreamId(0),
            16,
            4,
            4,
            geometry(),
            Deduplicator::new(Box::new(EmptyFingerprintSource)),
            None,
        )
    }

    #[test]
    fn mvpn_of_groups_lpas_by_translation_entries_per_page() {
        let d = domain();
        assert_eq!(d.mvpn_of(Lpa(0)), Mvpn(0));
        assert_eq!(d.mvpn_of(Lpa(3)), Mvpn(0));
        assert_eq!(d.mvpn_of(Lpa(4)), Mvpn(1));
    }

    #[test]
    fn fresh_pmt_entries_have_no_mapping() {
        let d = domain();
        assert!(d.pmt_get(Lpa(0)).mapping.is_none());
    }

    #[test]
    fn quota_tracks_equal_size_partitioning() {
        let mut d = domain();
        d.cmt_quota = Some(2);
        assert!(d.has_cmt_quota());
        d.cmt_occupancy = 2;
        assert!(!d.has_cmt_quota());
    }
}
