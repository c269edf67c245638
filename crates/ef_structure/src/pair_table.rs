//! Pair tables: for every position, the partner index or `None`.
//!
//! All indices are 0-based. The folding engines work 1-based internally
//! and convert at the boundary (see [`PairTable::partner_array`]).

use std::fmt;
use std::ops::Deref;

use crate::NAIDX;
use crate::StructureError;
use crate::DotBracket;
use crate::DotBracketVec;
use crate::PairSet;

/// A non-crossing secondary structure as a partner list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairTable(pub Vec<Option<NAIDX>>);

impl Deref for PairTable {
    type Target = [Option<NAIDX>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PairTable {
    /// An open chain of the given length.
    pub fn unpaired(length: usize) -> Self {
        PairTable(vec![None; length])
    }

    /// All pairs (i, j) with i < j, in 5'->3' order of i.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|j| (i, j as usize)))
            .filter(|(i, j)| i < j)
    }

    /// Number of base pairs.
    pub fn pair_count(&self) -> usize {
        self.pairs().count()
    }

    /// The canonical 1-indexed partner array: `a[i] = j` if i pairs with j,
    /// `a[i] = 0` if i is unpaired. Index 0 is unused and holds 0.
    pub fn partner_array(&self) -> Vec<usize> {
        let mut array = vec![0; self.len() + 1];
        for (i, p) in self.iter().enumerate() {
            if let Some(j) = p {
                array[i + 1] = *j as usize + 1;
            }
        }
        array
    }

    /// Inverse of [`PairTable::partner_array`].
    pub fn from_partner_array(array: &[usize]) -> Result<Self, StructureError> {
        let n = array.len().saturating_sub(1);
        let mut pairs = PairSet::new(n);
        for (i, &j) in array.iter().enumerate().skip(1) {
            if j == 0 {
                continue;
            }
            if j > n || array[j] != i {
                return Err(StructureError::Crossing { i: i - 1, j: j.saturating_sub(1) });
            }
            if i < j {
                pairs.insert(crate::Pair::new((i - 1) as NAIDX, (j - 1) as NAIDX));
            }
        }
        PairTable::try_from(&pairs)
    }
}

impl TryFrom<&DotBracketVec> for PairTable {
    type Error = StructureError;

    fn try_from(dbv: &DotBracketVec) -> Result<Self, Self::Error> {
        if dbv.len() >= NAIDX::MAX as usize {
            return Err(StructureError::TooLong(dbv.len()));
        }
        let mut table = vec![None; dbv.len()];
        let mut stack: Vec<usize> = Vec::new();
        for (j, db) in dbv.iter().enumerate() {
            match db {
                DotBracket::Unpaired => (),
                DotBracket::Open => stack.push(j),
                DotBracket::Close => {
                    let i = stack.pop().ok_or(StructureError::UnmatchedClose(j))?;
                    table[i] = Some(j as NAIDX);
                    table[j] = Some(i as NAIDX);
                }
            }
        }
        if let Some(i) = stack.pop() {
            return Err(StructureError::UnmatchedOpen(i));
        }
        Ok(PairTable(table))
    }
}

impl TryFrom<&str> for PairTable {
    type Error = StructureError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        PairTable::try_from(&DotBracketVec::try_from(s)?)
    }
}

/// Pair sets carry no ordering guarantee, so the conversion rejects
/// crossing pairs and bases that appear in more than one pair.
impl TryFrom<&PairSet> for PairTable {
    type Error = StructureError;

    fn try_from(ps: &PairSet) -> Result<Self, Self::Error> {
        let mut table: Vec<Option<NAIDX>> = vec![None; ps.length()];
        let pairs = ps.to_vec();
        for pair in &pairs {
            let (i, j) = (pair.i() as usize, pair.j() as usize);
            if table[i].is_some() || table[j].is_some() {
                return Err(StructureError::Crossing { i, j });
            }
            table[i] = Some(pair.j());
            table[j] = Some(pair.i());
        }
        // Pairs sorted by i: a stack of open pairs detects crossings.
        let mut open: Vec<usize> = Vec::new();
        for (k, p) in table.iter().enumerate() {
            if let Some(partner) = p {
                let partner = *partner as usize;
                if k < partner {
                    open.push(partner);
                } else if open.pop() != Some(k) {
                    return Err(StructureError::Crossing { i: partner, j: k });
                }
            }
        }
        Ok(PairTable(table))
    }
}

impl fmt::Display for PairTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DotBracketVec::from(self))
    }
}
