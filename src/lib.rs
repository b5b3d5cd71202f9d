//! Discrete-event simulator for a page-level Flash Translation Layer with
//! content-aware deduplication.
//!
//! # Architecture
//!
//! A single-threaded [`amu::AddressTranslationEngine`] owns one shared
//! [`amu::cmt::CachedMappingTable`] and one [`amu::domain::AddressMappingDomain`]
//! per I/O stream. Every table mutation happens synchronously inside the
//! engine's call stack for one transaction at a time, which is what lets
//! the multi-table invariants (CMT/PMT/GTD/FPT/SMT/RM consistency) hold
//! between events without locks — see the engine module's own doc comment
//! for why this is the load-bearing design decision, not an optimization.
//!
//! # Key Structures
//!
//! - [`types`] — newtyped addresses (LPA/PPA/VPA/MVPN/MPPN) and small value
//!   types shared across every table.
//! - [`amu`] — the seven cooperating components: Cached Mapping Table,
//!   Address Mapping Domain, Deduplicator, Secondary/Reverse Mapping,
//!   Plane Allocation, the Address Translation Engine, and the GC Barrier
//!   Coordinator.
//! - [`collaborators`] — trait boundaries to the Block Manager, Flash
//!   Controller, GC/Wear-Leveling Unit and Transaction Scheduling Unit,
//!   plus minimal in-memory reference implementations.
//! - [`config`] — simulation configuration and its flat-file loader.
//! - [`trace`] — host I/O trace and fingerprint-stream file parsing.
//! - [`stats`] — run-summary aggregation and CSV rendering.

pub mod amu;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod stats;
pub mod trace;
pub mod types;

pub use error::{Result, SimError};
