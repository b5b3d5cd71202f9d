//! Crate-wide error kinds.
//!
//! `Logic`, `Config` and `OutOfRange` are programmer/configuration bugs:
//! the simulation cannot continue and callers are expected to abort.
//! Three other conditions never reach this type at all, because none of
//! them are fatal: fingerprint exhaustion silently skips the write
//! (logged at `warn!`, counted on the domain), and backpressure/barrier
//! parking queue the transaction for later replay. None needs a value to
//! propagate through `?`.

use std::fmt;

use crate::types::{Lpa, Mvpn, Ppa, StreamId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// An invariant was violated: double-lock, unlock-without-lock,
    /// duplicate CMT insert, overfull CMT without eviction, a lookup that
    /// required an SMT/RM entry that was missing, etc.
    Logic(LogicError),
    /// Out-of-range channel/chip/die/plane id, or an unknown plane
    /// allocation scheme.
    Config(String),
    /// An LPA exceeded the stream's configured logical page count.
    OutOfRange { stream: StreamId, lpa: Lpa },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    DuplicateKey { stream: StreamId, lpa: Lpa },
    Overfull,
    NotReserved { stream: StreamId, lpa: Lpa },
    NotValid { stream: StreamId, lpa: Lpa },
    DoubleLock { lpa: Lpa },
    UnlockWithoutLock { lpa: Lpa },
    DoubleLockMvpn { mvpn: Mvpn },
    UnlockWithoutLockMvpn { mvpn: Mvpn },
    MissingSmtEntry { vpa: crate::types::Vpa },
    MissingRmEntry { ppa: Ppa },
    OwnerMismatch { expected: Lpa, found: Lpa },
    /// Preconditioning was asked to seed an LPA that already has a PMT row.
    AlreadyAllocated { stream: StreamId, lpa: Lpa },
    /// `bring_to_cmt_for_preconditioning` was asked for an LPA preconditioning
    /// never allocated a PMT row for.
    UnallocatedForPreconditioning { stream: StreamId, lpa: Lpa },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Logic(e) => write!(f, "logic error: {e}"),
            SimError::Config(msg) => write!(f, "config error: {msg}"),
            SimError::OutOfRange { stream, lpa } => {
                write!(f, "{lpa} out of range for stream {}", stream.0)
            }
        }
    }
}

impl fmt::Display for LogicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicError::DuplicateKey { stream, lpa } => {
                write!(f, "duplicate CMT key ({}, {lpa})", stream.0)
            }
            LogicError::Overfull => write!(f, "CMT is overfull: evict before reserving"),
            LogicError::NotReserved { stream, lpa } => {
                write!(f, "({}, {lpa}) has no reserved CMT slot", stream.0)
            }
            LogicError::NotValid { stream, lpa } => {
                write!(f, "({}, {lpa}) CMT slot is not VALID", stream.0)
            }
            LogicError::DoubleLock { lpa } => write!(f, "{lpa} is already barrier-locked"),
            LogicError::UnlockWithoutLock { lpa } => write!(f, "{lpa} was never barrier-locked"),
            LogicError::DoubleLockMvpn { mvpn } => {
                write!(f, "MVPN({}) is already barrier-locked", mvpn.0)
            }
            LogicError::UnlockWithoutLockMvpn { mvpn } => {
                write!(f, "MVPN({}) was never barrier-locked", mvpn.0)
            }
            LogicError::MissingSmtEntry { vpa } => {
                write!(f, "no SMT entry for VPA({})", vpa.0)
            }
            LogicError::MissingRmEntry { ppa } => write!(f, "no reverse mapping for {ppa}"),
            LogicError::OwnerMismatch { expected, found } => write!(
                f,
                "reverse mapping owner mismatch: expected {expected}, found {found}"
            ),
            LogicError::AlreadyAllocated { stream, lpa } => {
                write!(f, "({}, {lpa}) is already allocated, cannot precondition", stream.0)
            }
            LogicError::UnallocatedForPreconditioning { stream, lpa } => {
                write!(f, "({}, {lpa}) has no preconditioned mapping to bring into the CMT", stream.0)
            }
        }
    }
}

impl std::error::Error for SimError {}
impl std::error::Error for LogicError {}

pub type Result<T> = std::result::Result<T, SimError>;
