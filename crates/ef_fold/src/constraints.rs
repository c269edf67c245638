//! Forced and prohibited pairs, and the pair feasibility table derived
//! from them.
//!
//! Constraint positions are 1-based. `j = 0` addresses bases rather than
//! pairs: `Force (i, 0, k)` requires bases i..i+k-1 to pair with something,
//! `Prohibit (i, 0, k)` keeps them single-stranded.

use ahash::AHashSet;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::Base;
use ef_energy::NucleotideVec;
use ef_energy::TURN;

use crate::FoldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Force,
    Prohibit,
}

/// A stack of `k` pairs (i, j), (i+1, j-1), ..., or `k` bases when `j = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

impl Constraint {
    pub fn force(i: usize, j: usize, k: usize) -> Self {
        Self { kind: ConstraintKind::Force, i, j, k }
    }

    pub fn prohibit(i: usize, j: usize, k: usize) -> Self {
        Self { kind: ConstraintKind::Prohibit, i, j, k }
    }
}

/// A SHAPE reactivity: (1-based position, value).
pub type ShapeReactivity = (usize, f64);

/// Everything the caller may restrict a fold with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub pairs: Vec<Constraint>,
    /// Sparse reactivity list.
    pub shape: Vec<ShapeReactivity>,
}

impl Constraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.pairs.push(constraint);
        self
    }

    pub fn with_shape(mut self, shape: Vec<ShapeReactivity>) -> Self {
        self.shape = shape;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    Unknown,
    Required,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseStatus {
    Free,
    InForcedPair,
    MustPair,
    SingleStranded,
}

/// Validated constraints of one sequence.
#[derive(Debug, Clone)]
pub struct ConstraintTable {
    n: usize,
    partner: Vec<usize>,
    bases: Vec<BaseStatus>,
    forbidden: AHashSet<(usize, usize)>,
    blocked_prefix: Vec<usize>,
}

fn conflict(index: usize, i: usize, j: usize, message: &str) -> FoldError {
    FoldError::ConstraintConflict { index, i, j, message: message.to_string() }
}

fn validate(index: usize, c: &Constraint, n: usize) -> Result<(), FoldError> {
    let (i, j, k) = (c.i, c.j, c.k);
    if i == 0 || i > n {
        return Err(conflict(index, i, j, "position i outside the sequence"));
    }
    if k == 0 {
        return Err(conflict(index, i, j, "stack length k must be at least 1"));
    }
    if j == 0 {
        if i + k - 1 > n {
            return Err(conflict(index, i, j, "bases i..i+k-1 exceed the sequence"));
        }
        return Ok(());
    }
    if j > n || j <= i + TURN {
        return Err(conflict(index, i, j, "position j must satisfy i + 3 < j <= n"));
    }
    // The innermost pair of the stack must still close a hairpin.
    if (j + 1).saturating_sub(k) <= (i + k - 1) + TURN {
        return Err(conflict(index, i, j, "stack too long for a hairpin of at least 3 bases"));
    }
    Ok(())
}

impl ConstraintTable {
    /// An unconstrained table. Ambiguous bases are single-stranded.
    pub fn unconstrained(sequence: &NucleotideVec) -> Self {
        let n = sequence.len();
        let mut bases = vec![BaseStatus::Free; n + 2];
        for (k, &b) in sequence.iter().enumerate() {
            if b == Base::N {
                bases[k + 1] = BaseStatus::SingleStranded;
            }
        }
        let mut table = Self {
            n,
            partner: vec![0; n + 2],
            bases,
            forbidden: AHashSet::default(),
            blocked_prefix: Vec::new(),
        };
        table.update_prefix();
        table
    }

    pub fn build(sequence: &NucleotideVec, constraints: &[Constraint]) -> Result<Self, FoldError> {
        let n = sequence.len();
        for (index, c) in constraints.iter().enumerate() {
            validate(index, c, n)?;
        }
        let mut table = Self::unconstrained(sequence);
        for (index, c) in constraints.iter().enumerate() {
            match (c.kind, c.j) {
                (ConstraintKind::Force, 0) => table.force_bases(index, c, sequence)?,
                (ConstraintKind::Force, _) => table.force_pairs(index, c, sequence)?,
                (ConstraintKind::Prohibit, 0) => table.prohibit_bases(index, c)?,
                (ConstraintKind::Prohibit, _) => table.prohibit_pairs(index, c)?,
            }
        }
        table.update_prefix();
        Ok(table)
    }

    fn force_pairs(&mut self, index: usize, c: &Constraint, sequence: &NucleotideVec) -> Result<(), FoldError> {
        for t in 0..c.k {
            let (a, b) = (c.i + t, c.j - t);
            if !sequence[a - 1].can_pair(sequence[b - 1]) {
                return Err(conflict(index, a, b, "non-canonical pair cannot be forced"));
            }
            if self.partner[a] == b {
                continue;
            }
            if self.bases[a] == BaseStatus::SingleStranded || self.bases[b] == BaseStatus::SingleStranded {
                return Err(conflict(index, a, b, "base is forced single-stranded"));
            }
            if self.partner[a] != 0 || self.partner[b] != 0 {
                return Err(conflict(index, a, b, "base is already forced into another pair"));
            }
            if self.forbidden.contains(&(a, b)) {
                return Err(conflict(index, a, b, "pair is prohibited"));
            }
            let crossing = (1..=self.n).any(|x| {
                let y = self.partner[x];
                y > x && ((x < a && a < y && y < b) || (a < x && x < b && b < y))
            });
            if crossing {
                return Err(conflict(index, a, b, "forced pairs would form a pseudoknot"));
            }
            self.partner[a] = b;
            self.partner[b] = a;
            self.bases[a] = BaseStatus::InForcedPair;
            self.bases[b] = BaseStatus::InForcedPair;
        }
        Ok(())
    }

    fn force_bases(&mut self, index: usize, c: &Constraint, sequence: &NucleotideVec) -> Result<(), FoldError> {
        for a in c.i..c.i + c.k {
            if sequence[a - 1] == Base::N {
                return Err(conflict(index, a, 0, "ambiguous base cannot pair"));
            }
            match self.bases[a] {
                BaseStatus::SingleStranded => {
                    return Err(conflict(index, a, 0, "base is forced single-stranded"));
                }
                BaseStatus::Free => self.bases[a] = BaseStatus::MustPair,
                BaseStatus::InForcedPair | BaseStatus::MustPair => (),
            }
        }
        Ok(())
    }

    fn prohibit_pairs(&mut self, index: usize, c: &Constraint) -> Result<(), FoldError> {
        for t in 0..c.k {
            let (a, b) = (c.i + t, c.j - t);
            if self.partner[a] == b {
                return Err(conflict(index, a, b, "pair is already forced"));
            }
            self.forbidden.insert((a, b));
        }
        Ok(())
    }

    fn prohibit_bases(&mut self, index: usize, c: &Constraint) -> Result<(), FoldError> {
        for a in c.i..c.i + c.k {
            match self.bases[a] {
                BaseStatus::InForcedPair => {
                    return Err(conflict(index, a, 0, "base is in a forced pair"));
                }
                BaseStatus::MustPair => {
                    return Err(conflict(index, a, 0, "base is forced to pair"));
                }
                _ => self.bases[a] = BaseStatus::SingleStranded,
            }
        }
        Ok(())
    }

    fn update_prefix(&mut self) {
        let mut prefix = vec![0; self.n + 1];
        for k in 1..=self.n {
            let blocked = matches!(self.bases[k], BaseStatus::InForcedPair | BaseStatus::MustPair);
            prefix[k] = prefix[k - 1] + blocked as usize;
        }
        self.blocked_prefix = prefix;
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn base_status(&self, i: usize) -> BaseStatus {
        self.bases[i]
    }

    pub fn required_partner(&self, i: usize) -> Option<usize> {
        (self.partner[i] != 0).then(|| self.partner[i])
    }

    /// May all bases i..=j stay unpaired? Empty ranges always may.
    #[inline]
    pub fn unpaired_ok(&self, i: usize, j: usize) -> bool {
        i > j || self.blocked_prefix[j] == self.blocked_prefix[i - 1]
    }

    /// The symmetric feasibility table, 1-based with a border row and
    /// column. Cells with `j - i <= TURN` are `Forbidden`.
    pub fn pair_status_table(&self) -> Array2<PairStatus> {
        let n = self.n;
        let mut status = Array2::from_elem((n + 2, n + 2), PairStatus::Forbidden);
        for i in 1..=n {
            // Required-paired positions in [i, j] whose partner lies outside.
            let mut unbalanced = 0usize;
            for j in i..=n {
                let pj = self.partner[j];
                if pj != 0 {
                    if pj >= i && pj < j {
                        unbalanced -= 1;
                    } else {
                        unbalanced += 1;
                    }
                }
                if j <= i + TURN {
                    continue;
                }
                let cell = if self.partner[i] == j {
                    PairStatus::Required
                } else if self.partner[i] != 0
                    || self.partner[j] != 0
                    || unbalanced > 0
                    || self.bases[i] == BaseStatus::SingleStranded
                    || self.bases[j] == BaseStatus::SingleStranded
                    || self.forbidden.contains(&(i, j))
                {
                    PairStatus::Forbidden
                } else {
                    PairStatus::Unknown
                };
                status[(i, j)] = cell;
                status[(j, i)] = cell;
            }
        }
        status
    }
}
