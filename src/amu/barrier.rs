//! GC Barrier Coordinator (C7).
//!
//! While GC relocates the data behind an LPA or a mapping page (MVPN), the
//! coordinator locks that key so no concurrent user transaction reaches
//! the transaction scheduling unit for it (invariant I5). Transactions
//! that arrive locked are parked here and replayed, in read-before-write
//! order, when the barrier is released.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::amu::transaction::Transaction;
use crate::error::{LogicError, Result, SimError};
use crate::types::{Lpa, Mvpn};

#[derive(Default)]
pub struct BarrierCoordinator {
    locked_lpas: HashSet<Lpa>,
    locked_mvpns: HashSet<Mvpn>,
    read_behind_lpa: HashMap<Lpa, VecDeque<Transaction>>,
    write_behind_lpa: HashMap<Lpa, VecDeque<Transaction>>,
    mvpn_read_behind: HashSet<Mvpn>,
    mvpn_write_behind: HashSet<Mvpn>,
}

/// What a released MVPN barrier owes the engine: whether a mapping read
/// and/or a mapping write must be synthesized and dispatched.
#[derive(Debug, Clone, Copy, Default)]
pub struct MvpnReplay {
    pub read_pending: bool,
    pub write_pending: bool,
}

impl BarrierCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked_lpa(&self, lpa: Lpa) -> bool {
        self.locked_lpas.contains(&lpa)
    }

    pub fn is_locked_mvpn(&self, mvpn: Mvpn) -> bool {
        self.locked_mvpns.contains(&mvpn)
    }

    pub fn set_barrier_lpa(&mut self, lpa: Lpa) -> Result<()> {
        if !self.locked_lpas.insert(lpa) {
            return Err(SimError::Logic(LogicError::DoubleLock { lpa }));
        }
        Ok(())
    }

    pub fn set_barrier_mvpn(&mut self, mvpn: Mvpn) -> Result<()> {
        if !self.locked_mvpns.insert(mvpn) {
            return Err(SimError::Logic(LogicError::DoubleLockMvpn { mvpn }));
        }
        Ok(())
    }

    /// Park a user transaction behind the barrier on its LPA. The caller
    /// (the engine) is responsible for having checked `is_locked_lpa`
    /// first.
    pub fn manage_user_transaction_facing_barrier(&mut self, t: Transaction) {
        let lpa = t.lpa;
        let queue = if t.is_read() {
            self.read_behind_lpa.entry(lpa).or_default()
        } else {
            self.write_behind_lpa.entry(lpa).or_default()
        };
        queue.push_back(t);
    }

    /// Record that a mapping-page read or write is deferred behind an
    /// MVPN barrier.
    pub fn manage_mapping_transaction_facing_barrier(&mut self, mvpn: Mvpn, is_read: bool) {
        if is_read {
            self.mvpn_read_behind.insert(mvpn);
        } else {
            self.mvpn_write_behind.insert(mvpn);
        }
    }

    /// Release the barrier on `lpa`, returning the parked transactions in
    /// replay order: all reads, then all writes, each in original
    /// insertion order.
    pub fn remove_barrier_lpa(&mut self, lpa: Lpa) -> Result<Vec<Transaction>> {
        if !self.locked_lpas.remove(&lpa) {
            return Err(SimError::Logic(LogicError::UnlockWithoutLock { lpa }));
        }
        let mut replay = Vec::new();
        if let Some(reads) = self.read_behind_lpa.remove(&lpa) {
            replay.extend(reads);
        }
        if let Some(writes) = self.write_behind_lpa.remove(&lpa) {
            replay.extend(writes);
        }
        Ok(replay)
    }

    /// Release the barrier on `mvpn`, returning which mapping-page
    /// operations the caller must now synthesize.
    pub fn remove_barrier_mvpn(&mut self, mvpn: Mvpn) -> Result<MvpnReplay> {
        if !self.locked_mvpns.remove(&mvpn) {
            return Err(SimError::Logic(LogicError::UnlockWithoutLockMvpn { mvpn }));
        }
        Ok(MvpnReplay {
            read_pending: self.mvpn_read_behind.remove(&mvpn),
            write_pending: self.mvpn_write_behind.remove(&mvpn),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amu::transaction::TransactionKind;
    use crate::types::{PageStatusBitmap, StreamId};

    fn txn(lpa: u64, kind: TransactionKind) -> Transaction {
        Transaction::new(StreamId(0), kind, Lpa(lpa), PageStatusBitmap::EMPTY, 0)
    }

    #[test]
    fn double_lock_is_rejected() {
        let mut b = BarrierCoordinator::new();
        b.set_barrier_lpa(Lpa(1)).unwrap();
        let err = b.set_barrier_lpa(Lpa(1)).unwrap_err();
        assert_eq!(err, SimError::Logic(LogicError::DoubleLock { lpa: Lpa(1) }));
    }

    #[test]
    fn unlock_without_lock_is_rejected() {
        let mut b = BarrierCoordinator::new();
        let err = b.remove_barrier_lpa(Lpa(1)).unwrap_err();
        assert_eq!(err, SimError::Logic(LogicError::UnlockWithoutLock { lpa: Lpa(1) }));
    }

    #[test]
    fn replay_drains_reads_before_writes() {
        let mut b = BarrierCoordinator::new();
        b.set_barrier_lpa(Lpa(1)).unwrap();
        b.manage_user_transaction_facing_barrier(txn(1, TransactionKind::Write));
        b.manage_user_transaction_facing_barrier(txn(1, TransactionKind::Read));
        let replay = b.remove_barrier_lpa(Lpa(1)).unwrap();
        assert_eq!(replay.len(), 2);
        assert!(replay[0].is_read());
        assert!(replay[1].is_write());
        assert!(!b.is_locked_lpa(Lpa(1)));
    }

    #[test]
    fn mvpn_replay_reports_pending_kinds() {
        let mut b = BarrierCoordinator::new();
        b.set_barrier_mvpn(Mvpn(3)).unwrap();
        b.manage_mapping_transaction_facing_barrier(Mvpn(3), true);
        let replay = b.remove_barrier_mvpn(Mvpn(3)).unwrap();
        assert!(replay.read_pending);
        assert!(!replay.write_pending);
    }
}
