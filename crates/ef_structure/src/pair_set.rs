//! Compact base-pair sets.
//!
//! A `Pair` packs two 16-bit indices (`NAIDX`) into one 32-bit key
//! (`P1KEY`). Tracebacks collect their pairs in a `PairSet` and convert
//! into a [`PairTable`] once at the end, which validates that the
//! collected pairs are non-crossing.

use std::fmt;
use nohash_hasher::IntSet;

use crate::PairTable;
use crate::NAIDX;
use crate::P1KEY;

/// A base pair (i, j) with i < j, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair {
    i: NAIDX,
    j: NAIDX,
}

impl Pair {
    pub fn new(i: NAIDX, j: NAIDX) -> Self {
        debug_assert!(i < j);
        Pair { i, j }
    }

    pub fn i(&self) -> NAIDX {
        self.i
    }

    pub fn j(&self) -> NAIDX {
        self.j
    }

    pub fn key(&self) -> P1KEY {
        ((self.i as P1KEY) << NAIDX::BITS) | (self.j as P1KEY)
    }

    pub fn from_key(key: P1KEY) -> Self {
        let i = (key >> NAIDX::BITS) as NAIDX;
        let j = (key & NAIDX::MAX as P1KEY) as NAIDX;
        debug_assert!(i < j);
        Pair { i, j }
    }
}

/// A set of base pairs on a sequence of fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSet {
    length: usize,
    pairs: IntSet<P1KEY>,
}

impl PairSet {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            pairs: IntSet::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Insert a pair; returns true if it was newly inserted.
    pub fn insert(&mut self, pair: Pair) -> bool {
        debug_assert!((pair.j() as usize) < self.length);
        self.pairs.insert(pair.key())
    }

    pub fn contains(&self, pair: &Pair) -> bool {
        self.pairs.contains(&pair.key())
    }

    /// Iterator over all pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = Pair> + '_ {
        self.pairs.iter().map(|&k| Pair::from_key(k))
    }

    /// All pairs sorted by (i, j).
    pub fn to_vec(&self) -> Vec<Pair> {
        let mut v: Vec<_> = self.iter().collect();
        v.sort_unstable_by_key(|p| (p.i(), p.j()));
        v
    }

    /// Length of the underlying sequence.
    pub fn length(&self) -> usize {
        self.length
    }
}

impl From<&PairTable> for PairSet {
    fn from(pt: &PairTable) -> Self {
        let mut set = PairSet::new(pt.len());
        for (i, j) in pt.pairs() {
            set.insert(Pair::new(i as NAIDX, j as NAIDX));
        }
        set
    }
}

impl fmt::Display for PairSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for pair in self.to_vec() {
            if !first {
                write!(f, ",")?;
            }
            // 1-based for humans.
            write!(f, "({},{})", pair.i() + 1, pair.j() + 1)?;
            first = false;
        }
        Ok(())
    }
}
