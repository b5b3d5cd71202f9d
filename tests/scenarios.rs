//! End-to-end scenarios from the specification's testable-properties
//! section: single stream, single plane, 8 sectors per page, CMT capacity
//! of 4 entries.

use caftl_sim::amu::dedup::{FingerprintSource, VecFingerprintSource};
use caftl_sim::amu::transaction::{Transaction, TransactionKind};
use caftl_sim::amu::AddressTranslationEngine;
use caftl_sim::collaborators::{RefBlockManager, RefFlashController, RefGcUnit, RefTransactionScheduler};
use caftl_sim::config::{Config, StreamConfig};
use caftl_sim::types::{Fingerprint, Lpa, PageStatusBitmap, StreamId};

type Engine = AddressTranslationEngine<RefBlockManager, RefFlashController, RefGcUnit, RefTransactionScheduler>;

fn engine_with_fingerprints(fps: &[&str]) -> Engine {
    let config = Config::builder()
        .cmt_capacity_in_bytes(80)
        .cmt_entry_size(20)
        .translation_entries_per_page(4)
        .sectors_per_page(8)
        .block_count_per_plane(64)
        .page_count_per_block(64)
        .add_stream(StreamConfig {
            id: StreamId(0),
            geometry: caftl_sim::amu::geometry::StreamGeometry {
                channel_ids: vec![0],
                chip_ids: vec![0],
                die_ids: vec![0],
                plane_ids: vec![0],
            },
            total_logical_pages: 64,
        })
        .build()
        .unwrap();

    let owned: Vec<Fingerprint> = fps.iter().map(|s| Fingerprint(s.to_string())).collect();
    let sources: Vec<Box<dyn FingerprintSource>> = vec![Box::new(VecFingerprintSource::new(owned))];

    AddressTranslationEngine::new(
        &config,
        sources,
        RefBlockManager::new(64),
        RefFlashController::new(),
        RefGcUnit::new(0),
        RefTransactionScheduler::new(),
    )
    .unwrap()
}

fn write(lpa: u64, bitmap: u64) -> Transaction {
    Transaction::new(StreamId(0), TransactionKind::Write, Lpa(lpa), PageStatusBitmap::new(bitmap), lpa)
}

fn read(lpa: u64, bitmap: u64) -> Transaction {
    Transaction::new(StreamId(0), TransactionKind::Read, Lpa(lpa), PageStatusBitmap::new(bitmap), lpa)
}

#[test]
fn s1_fresh_unique_write() {
    let mut e = engine_with_fingerprints(&["A"]);
    e.translate_and_dispatch(vec![write(0, 0xFF)]).unwrap();

    let domain = e.domain(StreamId(0)).unwrap();
    assert_eq!(domain.dedup.fpt_len(), 1);
    assert_eq!(domain.dedup.lookup(&Fingerprint("A".into())).unwrap().refcount, 1);
    let mapping = domain.pmt_get(Lpa(0)).mapping.unwrap();
    assert!(!mapping.is_shared());
    assert!(domain.smt.is_empty());
    assert_eq!(e.scheduler().submitted.len(), 1);
}

#[test]
fn s2_duplicate_write_promotes_to_shared_vpa() {
    let mut e = engine_with_fingerprints(&["A", "A"]);
    e.translate_and_dispatch(vec![write(0, 0xFF)]).unwrap();
    e.translate_and_dispatch(vec![write(1, 0xFF)]).unwrap();

    let domain = e.domain(StreamId(0)).unwrap();
    assert_eq!(domain.dedup.lookup(&Fingerprint("A".into())).unwrap().refcount, 2);
    let m0 = domain.pmt_get(Lpa(0)).mapping.unwrap();
    let m1 = domain.pmt_get(Lpa(1)).mapping.unwrap();
    assert!(m1.is_shared());
    assert_eq!(m0, m1);
    assert_eq!(domain.smt.get(m1), Some(m0.as_ppa()));
    // only one program ever reached the scheduler: the duplicate write is dedup_wr.
    assert_eq!(e.scheduler().submitted.len(), 1);
}

#[test]
fn s3_partial_overwrite_emits_update_read_and_invalidates_old_chunk() {
    let mut e = engine_with_fingerprints(&["A", "B"]);
    e.translate_and_dispatch(vec![write(0, 0xFF)]).unwrap();
    e.translate_and_dispatch(vec![write(0, 0x0F)]).unwrap();

    let domain = e.domain(StreamId(0)).unwrap();
    assert!(domain.dedup.lookup(&Fingerprint("A".into())).is_none(), "refcount dropped to zero, entry erased");
    assert!(domain.dedup.lookup(&Fingerprint("B".into())).is_some());
    assert_eq!(domain.update_read_count, 1);
    assert_eq!(domain.read_before_write_count, 0, "this is an update-read on overwrite, not O1's read-before-write");

    // the update-read (for the stale write) plus the new program both reached the scheduler.
    assert_eq!(e.scheduler().submitted.len(), 3);
    assert!(e.scheduler().submitted[1].is_read(), "update-read submitted alongside the second write");
}

#[test]
fn s4_cmt_eviction_writes_back_a_dirty_mapping_page() {
    let mut e = engine_with_fingerprints(&["A", "B", "C", "D", "E"]);
    for lpa in 0..5 {
        e.translate_and_dispatch(vec![write(lpa, 0xFF)]).unwrap();
    }
    assert!(e.cmt().len() <= e.cmt().capacity());

    let domain = e.domain(StreamId(0)).unwrap();
    assert!(domain.gmt_write_count >= 1, "fifth insert should have evicted and written back a dirty slot");
}

#[test]
fn s6_fingerprint_exhaustion_leaves_mapping_untouched() {
    let mut e = engine_with_fingerprints(&["A", "B", "C"]);
    for lpa in 0..3 {
        e.translate_and_dispatch(vec![write(lpa, 0xFF)]).unwrap();
    }
    e.translate_and_dispatch(vec![write(3, 0xFF)]).unwrap();

    let domain = e.domain(StreamId(0)).unwrap();
    assert!(domain.pmt_get(Lpa(3)).mapping.is_none());
    assert_eq!(domain.exhausted_write_count, 1);

    // a read of an LPA that was never successfully written has no PMT
    // mapping, so online_create_entry_for_reads (O1) falls back to an
    // arbitrary already-written page via ReverseMapping::first_valid
    // instead of reporting an empty page.
    let submitted_before = e.scheduler().submitted.len();
    e.translate_and_dispatch(vec![read(3, 0xFF)]).unwrap();
    assert_eq!(e.scheduler().submitted.len(), submitted_before + 1);
    assert_eq!(e.domain(StreamId(0)).unwrap().read_before_write_count, 1);
}
