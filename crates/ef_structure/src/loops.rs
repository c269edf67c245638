//! Nearest-neighbor loop decomposition of secondary structures.

use crate::PairTable;

/// One elementary loop of a secondary structure. Pairs are 0-based
/// `(i, j)` with `i < j`; `closing` is the outermost pair of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NearestNeighborLoop {
    Hairpin {
        closing: (usize, usize),
    },
    /// Stacks, bulges and interior loops.
    Interior {
        closing: (usize, usize),
        inner: (usize, usize),
    },
    Multibranch {
        closing: (usize, usize),
        branches: Vec<(usize, usize)>,
    },
    Exterior {
        branches: Vec<(usize, usize)>,
    },
}

impl NearestNeighborLoop {
    /// Unpaired bases enclosed by this loop (not counting the exterior loop).
    pub fn unpaired_count(&self) -> usize {
        match self {
            NearestNeighborLoop::Hairpin { closing: (i, j) } => j - i - 1,
            NearestNeighborLoop::Interior { closing: (i, j), inner: (p, q) } => {
                (p - i - 1) + (j - q - 1)
            }
            NearestNeighborLoop::Multibranch { closing: (i, j), branches } => {
                let covered: usize = branches.iter().map(|(k, l)| l - k + 1).sum();
                (j - i - 1) - covered
            }
            NearestNeighborLoop::Exterior { .. } => 0,
        }
    }
}

/// Anything that can be decomposed into nearest-neighbor loops.
pub trait LoopDecomposition {
    /// Calls `f` once per loop: the exterior loop first, then the loops
    /// closed by each pair in depth-first order.
    fn for_each_loop<F: FnMut(&NearestNeighborLoop)>(&self, f: F);

    fn loops(&self) -> Vec<NearestNeighborLoop> {
        let mut all = Vec::new();
        self.for_each_loop(|l| all.push(l.clone()));
        all
    }
}

impl PairTable {
    /// Pairs directly enclosed by the segment [start, end].
    fn branches_within(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut branches = Vec::new();
        let mut k = start;
        while k <= end {
            match self[k] {
                Some(l) if (l as usize) > k => {
                    branches.push((k, l as usize));
                    k = l as usize + 1;
                }
                _ => k += 1,
            }
        }
        branches
    }
}

impl LoopDecomposition for PairTable {
    fn for_each_loop<F: FnMut(&NearestNeighborLoop)>(&self, mut f: F) {
        if self.is_empty() {
            f(&NearestNeighborLoop::Exterior { branches: Vec::new() });
            return;
        }
        let branches = self.branches_within(0, self.len() - 1);
        let mut stack: Vec<(usize, usize)> = branches.iter().rev().copied().collect();
        f(&NearestNeighborLoop::Exterior { branches });

        while let Some((i, j)) = stack.pop() {
            let inner = if j > i + 1 { self.branches_within(i + 1, j - 1) } else { Vec::new() };
            let nn_loop = match inner.len() {
                0 => NearestNeighborLoop::Hairpin { closing: (i, j) },
                1 => NearestNeighborLoop::Interior { closing: (i, j), inner: inner[0] },
                _ => NearestNeighborLoop::Multibranch { closing: (i, j), branches: inner.clone() },
            };
            stack.extend(inner.iter().rev());
            f(&nn_loop);
        }
    }
}
