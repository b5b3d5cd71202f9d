//! Identifiers and value types shared across the address mapping unit.
//!
//! Every address kind (logical, physical, virtual, mapping-page) gets its
//! own newtype so the compiler rejects mixing an `Lpa` with a `Ppa` where
//! the spec's tables are keyed by one and not the other.

use std::fmt;

/// Logical Page Address (host view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lpa(pub u64);

/// Physical Page Address (flash page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ppa(pub u64);

/// Virtual Page Address: a [`Ppa`] with the top bit set, signalling
/// "consult the Secondary Mapping Table to obtain the real PPA".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vpa(pub u64);

/// Mapping Virtual Page Number: index of a translation page in the GTD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mvpn(pub u64);

/// Mapping Physical Page Number: physical location of a translation page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mppn(pub u64);

/// Small non-negative stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u16);

/// Monotone counter sourced from the simulation clock.
pub type Timestamp = u64;

/// The bit that distinguishes a virtual address from a physical one.
pub const VPA_FLAG: u64 = 1 << 63;

/// Sentinel meaning "no physical page mapped".
pub const NO_PPA: Ppa = Ppa(u64::MAX);
/// Sentinel meaning "no mapping physical page".
pub const NO_MPPN: Mppn = Mppn(u64::MAX);
/// Sentinel meaning "no logical page".
pub const NO_LPA: Lpa = Lpa(u64::MAX);

impl Ppa {
    pub fn is_none(self) -> bool {
        self == NO_PPA
    }

    /// View this physical page address as a virtual one (sets the top bit).
    pub fn as_vpa(self) -> Vpa {
        Vpa(self.0 | VPA_FLAG)
    }
}

impl Mppn {
    pub fn is_none(self) -> bool {
        self == NO_MPPN
    }
}

impl Lpa {
    pub fn is_none(self) -> bool {
        self == NO_LPA
    }
}

impl Vpa {
    /// True iff the top bit is set, i.e. this address must be resolved
    /// through the Secondary Mapping Table rather than used directly.
    pub fn is_shared(self) -> bool {
        self.0 & VPA_FLAG != 0
    }

    /// Strip the shared-page flag and view this as a bare physical page
    /// address. Only meaningful when `is_shared()` is true.
    pub fn as_ppa(self) -> Ppa {
        Ppa(self.0 & !VPA_FLAG)
    }

    /// Wrap a raw PPA as a non-shared VPA (used where a table slot stores
    /// "either a VPA or a direct PPA" and the direct case needs the same
    /// type).
    pub fn from_ppa(ppa: Ppa) -> Self {
        Vpa(ppa.0)
    }
}

impl fmt::Display for Lpa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LPA({})", self.0)
    }
}

impl fmt::Display for Ppa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "PPA(none)")
        } else {
            write!(f, "PPA({})", self.0)
        }
    }
}

/// An opaque, hashable content fingerprint. A string in the trace format,
/// opaque bytes in practice; kept as an owned `String` since the trace
/// source yields one per line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-width bitmask of sector-validity bits within one page. The width
/// is bounded by `sectors_per_page`, which the spec allows up to 64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageStatusBitmap(pub u64);

impl PageStatusBitmap {
    pub const EMPTY: PageStatusBitmap = PageStatusBitmap(0);

    pub fn new(bits: u64) -> Self {
        PageStatusBitmap(bits)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: PageStatusBitmap) -> PageStatusBitmap {
        PageStatusBitmap(self.0 | other.0)
    }

    pub fn intersection(self, other: PageStatusBitmap) -> PageStatusBitmap {
        PageStatusBitmap(self.0 & other.0)
    }

    /// Bits present in `self` but not in `other`.
    pub fn difference(self, other: PageStatusBitmap) -> PageStatusBitmap {
        PageStatusBitmap(self.0 & !other.0)
    }

    pub fn contains_all(self, other: PageStatusBitmap) -> bool {
        self.intersection(other) == other
    }
}

/// Physical flash page address: the tuple a plane allocation scheme
/// produces, plus the block/page coordinates assigned later by the block
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalAddress {
    pub channel: u32,
    pub chip: u32,
    pub die: u32,
    pub plane: u32,
    pub block: u32,
    pub page: u32,
}

impl PhysicalAddress {
    /// A plane coordinate with block/page left unset (used by the plane
    /// allocator, which only ever produces channel/chip/die/plane).
    pub fn plane_only(channel: u32, chip: u32, die: u32, plane: u32) -> Self {
        PhysicalAddress {
            channel,
            chip,
            die,
            plane,
            block: 0,
            page: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpa_round_trips_through_shared_flag() {
        let ppa = Ppa(42);
        let vpa = ppa.as_vpa();
        assert!(vpa.is_shared());
        assert_eq!(vpa.as_ppa(), ppa);
    }

    #[test]
    fn plain_vpa_from_ppa_is_not_shared() {
        let vpa = Vpa::from_ppa(Ppa(7));
        assert!(!vpa.is_shared());
    }

    #[test]
    fn bitmap_difference_and_containment() {
        let full = PageStatusBitmap::new(0xFF);
        let half = PageStatusBitmap::new(0x0F);
        assert!(full.contains_all(half));
        assert!(!half.contains_all(full));
        assert_eq!(full.difference(half).0, 0xF0);
    }
}
