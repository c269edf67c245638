//! Outside pass and base-pair probabilities.
//!
//! Outside values are pulled from longer spans: a cell is complete once
//! every diagonal above it is. Within a cell, outside-QM feeds
//! outside-QMB, which feeds outside-QB.

use log::debug;
use log::trace;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::TURN;

use crate::context::alloc_table;
use crate::context::FoldContext;
use crate::numeric::BoltzmannSum;
use crate::partition::PfTables;
use crate::FoldError;

struct OutsideTables<T> {
    oqb: Array2<T>,
    oqm: Array2<T>,
    oqmb: Array2<T>,
}

impl<T: BoltzmannSum> OutsideTables<T> {
    /// (outside-QM, outside-QMB, outside-QB) of (i, j).
    fn cell(&self, pf: &PfTables<T>, ctx: &FoldContext, i: usize, j: usize) -> (T, T, T) {
        let n = ctx.n;
        let model = &ctx.model;
        let w = &pf.weights;

        // Multi(i, j) is the first part of a multiloop closed by (i-1, q),
        // or the head of a split in a longer segment.
        let mut oqm = T::zero();
        if i >= 2 {
            for q in j + TURN + 3..=n {
                let outer = &self.oqb[(i - 1, q)];
                if !ctx.allowed(i - 1, q) || outer.is_zero() {
                    continue;
                }
                let closing: T = w.lift(model.ml_closing(i - 1, q), 2);
                oqm.add_assign(&outer.times(&pf.qmb[(j + 1, q - 1)]).times(&closing));
            }
        }
        for j2 in j + TURN + 2..=n {
            oqm.add_assign(&self.oqm[(i, j2)].times(&pf.qmb[(j + 1, j2)]));
        }

        // Branch(i, j) is the last branch of a multiloop closed by (p, j+1),
        // follows leading unpaired bases, or ends a split.
        let mut oqmb = T::zero();
        if j < n {
            for p in 1..=i.saturating_sub(TURN + 3) {
                let outer = &self.oqb[(p, j + 1)];
                if !ctx.allowed(p, j + 1) || outer.is_zero() {
                    continue;
                }
                let closing: T = w.lift(model.ml_closing(p, j + 1), 2);
                oqmb.add_assign(&outer.times(&pf.qm[(p + 1, i - 1)]).times(&closing));
            }
        }
        for i2 in (1..=i).rev() {
            if !ctx.unpaired_ok(i2, i - 1) {
                break;
            }
            let segment = if i2 == i { &oqm } else { &self.oqm[(i2, j)] };
            let leading: T = w.lift(model.ml_unpaired(i - i2), i - i2);
            oqmb.add_assign(&segment.times(&leading));
        }
        for i2 in 1..=i.saturating_sub(TURN + 2) {
            oqmb.add_assign(&self.oqm[(i2, j)].times(&pf.qm[(i2, i - 1)]));
        }

        // Pair(i, j) is an exterior branch, the inner pair of an interior
        // loop, or a multiloop branch.
        let mut oqb = T::zero();
        if ctx.allowed(i, j) {
            let ext: T = w.lift(model.ext_branch(i, j), 0);
            oqb = pf.z5[i - 1].times(&pf.z3[j + 1]).times(&ext);
            for (p, q) in ctx.outer_pairs(i, j) {
                let outer = &self.oqb[(p, q)];
                if outer.is_zero() {
                    continue;
                }
                let interior: T = w.lift(model.interior(p, q, i, j), (i - p) + (q - j));
                oqb.add_assign(&outer.times(&interior));
            }
            for j2 in j..=n {
                if !ctx.unpaired_ok(j + 1, j2) {
                    break;
                }
                let segment = if j2 == j { &oqmb } else { &self.oqmb[(i, j2)] };
                let branch: T = w.lift(model.ml_branch(i, j) + model.ml_unpaired(j2 - j), j2 - j);
                oqb.add_assign(&segment.times(&branch));
            }
        }

        (oqm, oqmb, oqb)
    }
}

/// Base-pair probabilities of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePairProbabilities {
    n: usize,
    /// Upper triangle, 1-based with a border row and column.
    probs: Array2<f64>,
}

impl BasePairProbabilities {
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Probability that the 1-based positions i and j pair.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.probs[(i, j)]
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.probs
    }

    /// 1-based (i, j, p) triples with `p > threshold`, ordered by (i, j).
    pub fn to_sparse(&self, threshold: f64) -> Vec<(usize, usize, f64)> {
        let mut sparse = Vec::new();
        for i in 1..=self.n {
            for j in i + 1..=self.n {
                let p = self.probs[(i, j)];
                if p > threshold {
                    sparse.push((i, j, p));
                }
            }
        }
        sparse
    }

    /// Probability that position i is unpaired.
    pub fn unpaired_probability(&self, i: usize) -> f64 {
        let paired: f64 = (1..=self.n).filter(|&j| j != i).map(|j| self.get(i, j)).sum();
        (1.0 - paired).max(0.0)
    }
}

pub(crate) fn compute<T: BoltzmannSum>(
    ctx: &FoldContext,
    pf: &PfTables<T>,
    pool: &rayon::ThreadPool,
) -> Result<BasePairProbabilities, FoldError> {
    let n = ctx.n;
    debug!("Outside pass: 3 tables of {} cells.", (n + 2) * (n + 2));
    let mut out = OutsideTables {
        oqb: alloc_table(n, T::zero())?,
        oqm: alloc_table(n, T::zero())?,
        oqmb: alloc_table(n, T::zero())?,
    };

    for d in (TURN + 1..n).rev() {
        trace!("Outside diagonal {}", d);
        let cells = ctx.diagonal(pool, d, |i, j| out.cell(pf, ctx, i, j));
        for (offset, (oqm, oqmb, oqb)) in cells.into_iter().enumerate() {
            let (i, j) = (offset + 1, offset + 1 + d);
            out.oqm[(i, j)] = oqm;
            out.oqmb[(i, j)] = oqmb;
            out.oqb[(i, j)] = oqb;
        }
    }

    let z = pf.total();
    let mut probs = alloc_table(n, 0.0f64)?;
    for i in 1..=n {
        for j in i + TURN + 1..=n {
            if ctx.allowed(i, j) {
                probs[(i, j)] = pf.qb[(i, j)].times(&out.oqb[(i, j)]).ratio(z);
            }
        }
    }
    Ok(BasePairProbabilities { n, probs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_energy::EnergyTables;
    use ef_energy::NucleotideVec;
    use crate::partition;
    use crate::partition::Weights;
    use crate::Constraint;
    use crate::Constraints;
    use crate::FoldConfig;

    fn probabilities(seq: &str, constraints: &Constraints, config: &FoldConfig) -> BasePairProbabilities {
        let tables = EnergyTables::default();
        let seq = NucleotideVec::try_from(seq).unwrap();
        let ctx = FoldContext::new(&seq, constraints, &tables, config).unwrap();
        let pool = config.thread_pool().unwrap();
        let pf = partition::fill::<f64>(&ctx, Weights::new(&ctx, None, 0.0), &pool).unwrap();
        compute(&ctx, &pf, &pool).unwrap()
    }

    #[test]
    fn test_probabilities_are_bounded() {
        let seq = "GGGGAAACCCCAUAUAGCGCAAAGCGCA";
        let bpp = probabilities(seq, &Constraints::none(), &FoldConfig::default());
        for i in 1..=bpp.len() {
            let row: f64 = (1..=bpp.len()).filter(|&j| j != i).map(|j| bpp.get(i, j)).sum();
            assert!(row <= 1.0 + 1e-9, "row {} sums to {}", i, row);
            assert!(bpp.unpaired_probability(i) >= 0.0);
        }
        assert!(bpp.get(1, 11) > 0.0);
        assert_eq!(bpp.get(1, 2), 0.0);
        assert_eq!(bpp.get(11, 1), bpp.get(1, 11));
    }

    #[test]
    fn test_single_hairpin_count_mode() {
        // Two structures: open chain and G1-C5.
        let config = FoldConfig { count_mode: true, ..Default::default() };
        let bpp = probabilities("GAAAC", &Constraints::none(), &config);
        assert!((bpp.get(1, 5) - 0.5).abs() < 1e-12);
        assert!((bpp.unpaired_probability(3) - 1.0).abs() < 1e-12);
        assert_eq!(bpp.to_sparse(0.1), vec![(1, 5, bpp.get(1, 5))]);
    }

    #[test]
    fn test_forced_pair_has_probability_one() {
        let constraints = Constraints::none().with(Constraint::force(2, 8, 1));
        let bpp = probabilities("GGGAAACCCA", &constraints, &FoldConfig::default());
        assert!((bpp.get(2, 8) - 1.0).abs() < 1e-9);
        assert_eq!(bpp.get(1, 10), 0.0);
    }
}
