//! The unit of work the Address Translation Engine processes: a host I/O
//! transaction carrying a stream, an LPA, a sector bitmap, and (once
//! translated) a resolved physical address.

use crate::types::{Lpa, PageStatusBitmap, Ppa, PhysicalAddress, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub stream: StreamId,
    pub kind: TransactionKind,
    pub lpa: Lpa,
    pub sectors_bitmap: PageStatusBitmap,
    /// Opaque correlation id the caller uses to match a transaction back
    /// to its originating host request; never interpreted by the AMU.
    pub user_request_ref: u64,

    /// Resolved physical page, once translation succeeds.
    pub ppa: Option<Ppa>,
    /// Resolved physical coordinate (channel/chip/die/plane/block/page).
    pub address: Option<PhysicalAddress>,
    /// True iff this write's fingerprint collided with an existing chunk:
    /// the program never reaches flash and the transaction must not be
    /// submitted to the transaction scheduling unit.
    pub dedup_wr: bool,
    /// An update-read for surviving sectors of an overwritten page,
    /// dispatched alongside this write when set.
    pub related_read: Option<Box<Transaction>>,
}

impl Transaction {
    pub fn new(stream: StreamId, kind: TransactionKind, lpa: Lpa, sectors_bitmap: PageStatusBitmap, user_request_ref: u64) -> Self {
        Transaction {
            stream,
            kind,
            lpa,
            sectors_bitmap,
            user_request_ref,
            ppa: None,
            address: None,
            dedup_wr: false,
            related_read: None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind == TransactionKind::Read
    }

    pub fn is_write(&self) -> bool {
        self.kind == TransactionKind::Write
    }

    pub fn is_translated(&self) -> bool {
        self.ppa.is_some()
    }
}
