//! Everything one folding run needs: the bound energy model, the
//! validated constraints, the allowed-pair table and the configuration.

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use ef_energy::DangleMode;
use ef_energy::EnergyModel;
use ef_energy::EnergyTables;
use ef_energy::NearestNeighborModel;
use ef_energy::NucleotideVec;
use ef_energy::MAXLOOP;
use ef_energy::TURN;

use crate::ConstraintTable;
use crate::Constraints;
use crate::FoldConfig;
use crate::FoldError;
use crate::PairStatus;

/// Allocates an `(n + 2) × (n + 2)` table, reporting allocation failure
/// instead of aborting.
pub(crate) fn alloc_table<T: Clone>(n: usize, fill: T) -> Result<Array2<T>, FoldError> {
    let dim = n + 2;
    let cells = dim.checked_mul(dim).ok_or(FoldError::ResourceExhaustion(usize::MAX))?;
    let mut data = Vec::new();
    data.try_reserve_exact(cells).map_err(|_| FoldError::ResourceExhaustion(cells))?;
    data.resize(cells, fill);
    Array2::from_shape_vec((dim, dim), data).map_err(|_| FoldError::ResourceExhaustion(cells))
}

pub(crate) struct FoldContext<'a> {
    pub n: usize,
    pub model: NearestNeighborModel<'a>,
    pub constraints: ConstraintTable,
    pub config: &'a FoldConfig,
    allowed: Array2<bool>,
}

impl<'a> FoldContext<'a> {
    pub fn new(
        sequence: &NucleotideVec,
        constraints: &Constraints,
        tables: &'a EnergyTables,
        config: &'a FoldConfig,
    ) -> Result<Self, FoldError> {
        config.validate()?;
        let n = sequence.len();
        let table = ConstraintTable::build(sequence, &constraints.pairs)?;
        let shape = config.shape.profile(n, &constraints.shape)?;
        let model = NearestNeighborModel::new(tables, sequence, config.model).with_shape(shape);

        debug!("Folding context for {} nt, {} constraints, {} SHAPE values.",
            n, constraints.pairs.len(), constraints.shape.len());

        let mut ctx = Self {
            n,
            model,
            constraints: table,
            config,
            allowed: alloc_table(0, false)?,
        };
        ctx.allowed = ctx.allowed_pairs()?;
        Ok(ctx)
    }

    fn allowed_pairs(&self) -> Result<Array2<bool>, FoldError> {
        let n = self.n;
        let status = self.constraints.pair_status_table();
        let mut allowed = alloc_table(n, false)?;
        for i in 1..=n {
            for j in i + TURN + 1..=n {
                let ok = match status[(i, j)] {
                    PairStatus::Forbidden => false,
                    PairStatus::Required => true,
                    PairStatus::Unknown => self.model.can_pair(i, j)
                        && self.config.max_contact_distance.is_none_or(|d| j - i <= d),
                };
                allowed[(i, j)] = ok;
            }
        }
        if let Some(min_helix) = self.config.prefilter {
            let kept = prefilter(&allowed, &status, n, min_helix)?;
            allowed = kept;
        }
        Ok(allowed)
    }

    #[inline]
    pub fn allowed(&self, i: usize, j: usize) -> bool {
        self.allowed[(i, j)]
    }

    #[inline]
    pub fn unpaired_ok(&self, i: usize, j: usize) -> bool {
        self.constraints.unpaired_ok(i, j)
    }

    /// Whether the grammar offers the flanked steps of single dangles.
    #[inline]
    pub fn single_dangles(&self) -> bool {
        self.model.options().dangles == DangleMode::Single
    }

    /// Inner pairs (p, q) of stacks, bulges and interior loops closed by
    /// (i, j): p ascending, q descending, loop size at most `MAXLOOP`.
    pub fn inner_pairs(&self, i: usize, j: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let p_max = (i + MAXLOOP + 1).min((j + 1).saturating_sub(TURN + 3));
        (i + 1..=p_max)
            .take_while(move |&p| self.unpaired_ok(i + 1, p - 1))
            .flat_map(move |p| {
                let s1 = p - i - 1;
                let q_min = (p + TURN + 1).max((j - 1).saturating_sub(MAXLOOP - s1));
                (q_min..j).rev()
                    .take_while(move |&q| self.unpaired_ok(q + 1, j - 1))
                    .filter(move |&q| self.allowed(p, q))
                    .map(move |q| (p, q))
            })
    }

    /// Split points k of a multiloop closed by (i, j): the first part
    /// WM[i+1, k-1], the last branch starts at k.
    pub fn multi_splits(&self, i: usize, j: usize) -> std::ops::RangeInclusive<usize> {
        (i + TURN + 3)..=(j.saturating_sub(TURN + 2))
    }

    /// Outer pairs (p, q) whose interior loop encloses (i, j): p descending,
    /// q ascending.
    pub fn outer_pairs(&self, i: usize, j: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let p_min = i.saturating_sub(MAXLOOP + 1).max(1);
        (p_min..i).rev()
            .take_while(move |&p| self.unpaired_ok(p + 1, i - 1))
            .flat_map(move |p| {
                let s1 = i - p - 1;
                let q_max = (j + 1 + MAXLOOP - s1).min(self.n);
                (j + 1..=q_max)
                    .take_while(move |&q| self.unpaired_ok(j + 1, q - 1))
                    .filter(move |&q| self.allowed(p, q))
                    .map(move |q| (p, q))
            })
    }

    /// Evaluates `cell` for every (i, i + d) on the pool. Returns once the
    /// whole diagonal is done, which is the only synchronization the fill
    /// loops rely on.
    pub fn diagonal<T, F>(&self, pool: &rayon::ThreadPool, d: usize, cell: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, usize) -> T + Sync + Send,
    {
        pool.install(|| {
            (1..=self.n - d)
                .into_par_iter()
                .map(|i| cell(i, i + d))
                .collect()
        })
    }
}

/// Drops pairs that cannot take part in a helix of at least `min_helix`
/// stacked pairs. Required pairs are kept regardless.
fn prefilter(
    allowed: &Array2<bool>,
    status: &Array2<PairStatus>,
    n: usize,
    min_helix: usize,
) -> Result<Array2<bool>, FoldError> {
    // inward[i, j]: stacked pairs starting at (i, j) going inward.
    let mut inward = alloc_table(n, 0usize)?;
    for d in TURN + 1..n {
        for i in 1..=n - d {
            let j = i + d;
            if allowed[(i, j)] {
                inward[(i, j)] = 1 + if d >= TURN + 3 { inward[(i + 1, j - 1)] } else { 0 };
            }
        }
    }
    let mut kept = alloc_table(n, false)?;
    // outward[i, j]: stacked pairs starting at (i, j) going outward.
    let mut outward = alloc_table(n, 0usize)?;
    for d in (TURN + 1..n).rev() {
        for i in 1..=n - d {
            let j = i + d;
            if !allowed[(i, j)] {
                continue;
            }
            outward[(i, j)] = 1 + if i > 1 && j < n { outward[(i - 1, j + 1)] } else { 0 };
            let helix = inward[(i, j)] + outward[(i, j)] - 1;
            kept[(i, j)] = helix >= min_helix || status[(i, j)] == PairStatus::Required;
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Constraint;

    fn context<'a>(seq: &str, tables: &'a EnergyTables, config: &'a FoldConfig) -> FoldContext<'a> {
        let seq = NucleotideVec::try_from(seq).unwrap();
        FoldContext::new(&seq, &Constraints::none(), tables, config).unwrap()
    }

    #[test]
    fn test_allowed_pairs() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let ctx = context("GGGAAACCC", &tables, &config);
        assert!(ctx.allowed(1, 9));
        assert!(ctx.allowed(3, 7));
        assert!(!ctx.allowed(4, 8));
        assert!(!ctx.allowed(3, 6));
    }

    #[test]
    fn test_contact_distance() {
        let tables = EnergyTables::default();
        let config = FoldConfig { max_contact_distance: Some(6), ..Default::default() };
        let ctx = context("GGGAAACCC", &tables, &config);
        assert!(!ctx.allowed(1, 9));
        assert!(ctx.allowed(2, 8));
    }

    #[test]
    fn test_prefilter_removes_isolated_pairs() {
        let tables = EnergyTables::default();
        let config = FoldConfig { prefilter: Some(2), ..Default::default() };
        // Only G1-C9 could stack on nothing: A2 and A8 do not pair.
        let ctx = context("GAAAAAAAC", &tables, &config);
        assert!(!ctx.allowed(1, 9));
        let ctx = context("GGAAAAACC", &tables, &config);
        assert!(ctx.allowed(1, 9));
        assert!(ctx.allowed(2, 8));
    }

    #[test]
    fn test_required_pair_bypasses_prefilter() {
        let tables = EnergyTables::default();
        let config = FoldConfig { prefilter: Some(2), ..Default::default() };
        let seq = NucleotideVec::try_from("GAAAAAAAC").unwrap();
        let constraints = Constraints::none().with(Constraint::force(1, 9, 1));
        let ctx = FoldContext::new(&seq, &constraints, &tables, &config).unwrap();
        assert!(ctx.allowed(1, 9));
    }

    #[test]
    fn test_inner_and_outer_pairs_agree() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let ctx = context("GGGCAAAGCAAUCCC", &tables, &config);
        let n = ctx.n;
        for i in 1..=n {
            for j in i + TURN + 1..=n {
                if !ctx.allowed(i, j) {
                    continue;
                }
                for (p, q) in ctx.inner_pairs(i, j) {
                    assert!(ctx.outer_pairs(p, q).any(|o| o == (i, j)));
                }
                for (p, q) in ctx.outer_pairs(i, j) {
                    assert!(ctx.inner_pairs(p, q).any(|o| o == (i, j)));
                }
            }
        }
    }
}
