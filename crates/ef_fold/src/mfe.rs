//! Minimum free energy fill and traceback.
//!
//! All tables are 1-based with a border row and column. Cells that no
//! structure can realize hold [`INF`].

use log::debug;
use log::trace;
use ndarray::Array2;

use ef_energy::INF;
use ef_energy::TURN;
use ef_structure::PairSet;
use ef_structure::PairTable;

use crate::context::alloc_table;
use crate::context::FoldContext;
use crate::decomposition::insert_pair;
use crate::decomposition::Frame;
use crate::decomposition::Step;
use crate::FoldError;

pub(crate) struct MfeTables {
    /// Optimal energy of i..j given that i·j pairs.
    pub v: Array2<i32>,
    /// Multiloop segment i..j with at least one branch.
    pub wm: Array2<i32>,
    /// Multiloop segment i..j with exactly one branch, starting at i.
    pub wmb: Array2<i32>,
    /// Exterior prefix 1..j.
    pub w: Vec<i32>,
}

#[derive(Debug, Clone, Copy)]
struct MfeCell {
    v: i32,
    wmb: i32,
    wm: i32,
}

impl MfeTables {
    pub fn energy(&self) -> i32 {
        self.w[self.w.len() - 1]
    }

    fn cell(&self, ctx: &FoldContext, i: usize, j: usize) -> MfeCell {
        let model = &ctx.model;
        let mut vbi = INF;
        let mut vm = INF;
        let mut v = INF;

        if ctx.allowed(i, j) {
            for (p, q) in ctx.inner_pairs(i, j) {
                let inner = self.v[(p, q)];
                if inner < INF {
                    vbi = vbi.min(inner + model.interior(i, j, p, q));
                }
            }
            let closing = model.ml_closing(i, j);
            for k in ctx.multi_splits(i, j) {
                let (a, b) = (self.wm[(i + 1, k - 1)], self.wmb[(k, j - 1)]);
                if a < INF && b < INF {
                    vm = vm.min(a + b + closing);
                }
            }
            let hairpin = if ctx.unpaired_ok(i + 1, j - 1) { model.hairpin(i, j) } else { INF };
            v = hairpin.min(vbi).min(vm);
            if ctx.single_dangles() {
                v = v.min(self.flanked_min(ctx, Frame::Pair(i, j)));
            }
        }

        let mut wmb = INF;
        for l in (i + TURN + 1..=j).rev() {
            if !ctx.unpaired_ok(l + 1, j) {
                break;
            }
            let branch = if l == j { v } else { self.v[(i, l)] };
            if branch < INF {
                wmb = wmb.min(branch + model.ml_branch(i, l) + model.ml_unpaired(j - l));
            }
        }
        if ctx.single_dangles() {
            wmb = wmb.min(self.flanked_min(ctx, Frame::Branch(i, j)));
        }

        let mut wm = INF;
        for k in i..=j - TURN - 1 {
            let last = if k == i { wmb } else { self.wmb[(k, j)] };
            if last >= INF {
                continue;
            }
            if ctx.unpaired_ok(i, k - 1) {
                wm = wm.min(model.ml_unpaired(k - i) + last);
            }
            if k >= i + TURN + 2 && self.wm[(i, k - 1)] < INF {
                wm = wm.min(self.wm[(i, k - 1)] + last);
            }
        }

        MfeCell { v, wmb, wm }
    }

    /// Best single-dangle alternative of a cell. Flanked steps never
    /// refer back to the cell they decompose.
    fn flanked_min(&self, ctx: &FoldContext, frame: Frame) -> i32 {
        frame.steps(ctx).into_iter()
            .filter(|step| step.is_flanked())
            .map(|step| self.step_bound(ctx, frame, step))
            .min()
            .unwrap_or(INF)
    }
}

/// Fills all MFE tables, one diagonal at a time.
pub(crate) fn fill(ctx: &FoldContext, pool: &rayon::ThreadPool) -> Result<MfeTables, FoldError> {
    let n = ctx.n;
    debug!("MFE fill: 3 tables of {} cells.", (n + 2) * (n + 2));
    let mut tables = MfeTables {
        v: alloc_table(n, INF)?,
        wm: alloc_table(n, INF)?,
        wmb: alloc_table(n, INF)?,
        w: vec![INF; n + 1],
    };

    for d in TURN + 1..n {
        trace!("MFE diagonal {}", d);
        let cells = ctx.diagonal(pool, d, |i, j| tables.cell(ctx, i, j));
        for (offset, c) in cells.into_iter().enumerate() {
            let (i, j) = (offset + 1, offset + 1 + d);
            tables.v[(i, j)] = c.v;
            tables.wmb[(i, j)] = c.wmb;
            tables.wm[(i, j)] = c.wm;
        }
    }

    let model = &ctx.model;
    tables.w[0] = 0;
    for j in 1..=n {
        let mut best = if ctx.unpaired_ok(j, j) { tables.w[j - 1] } else { INF };
        for i in 1..j.saturating_sub(TURN) {
            let (prefix, pair) = (tables.w[i - 1], tables.v[(i, j)]);
            if prefix < INF && pair < INF {
                best = best.min(prefix + pair + model.ext_branch(i, j));
            }
        }
        if ctx.single_dangles() {
            best = best.min(tables.flanked_min(ctx, Frame::Exterior(j)));
        }
        tables.w[j] = best.min(INF);
    }

    if tables.energy() >= INF {
        return Err(FoldError::NoFeasibleStructure);
    }
    Ok(tables)
}

impl MfeTables {
    /// Optimal energy of a cell; `Exterior(0)` is the empty prefix.
    pub fn value(&self, frame: Frame) -> i32 {
        match frame {
            Frame::Exterior(j) => self.w[j],
            Frame::Pair(i, j) => self.v[(i, j)],
            Frame::Multi(i, j) => self.wm[(i, j)],
            Frame::Branch(i, j) => self.wmb[(i, j)],
        }
    }

    /// Energy of a step plus the optimal energies of the cells it leaves.
    pub fn step_bound(&self, ctx: &FoldContext, frame: Frame, step: Step) -> i32 {
        let mut bound = frame.step_energy(ctx, step);
        for succ in frame.successors(step).into_iter().flatten() {
            let value = self.value(succ);
            if value >= INF {
                return INF;
            }
            bound += value;
        }
        bound
    }
}

/// Replays the forward minimization: the first step (in grammar order)
/// that reproduces a cell's value wins.
pub(crate) fn traceback(ctx: &FoldContext, t: &MfeTables) -> Result<PairTable, FoldError> {
    let mut pairs = PairSet::new(ctx.n);
    let mut stack = vec![Frame::Exterior(ctx.n)];

    while let Some(frame) = stack.pop() {
        if frame == Frame::Exterior(0) {
            continue;
        }
        if let Frame::Pair(i, j) = frame {
            insert_pair(&mut pairs, i, j);
        }
        let target = t.value(frame);
        let step = frame.steps(ctx).into_iter()
            .find(|&step| t.step_bound(ctx, frame, step) == target)
            .ok_or_else(|| traceback_failure(frame))?;
        stack.extend(frame.successors(step).into_iter().flatten());
    }

    Ok(PairTable::try_from(&pairs)?)
}

pub(crate) fn traceback_failure(frame: Frame) -> FoldError {
    let (i, j, table) = match frame {
        Frame::Exterior(j) => (1, j, "W"),
        Frame::Pair(i, j) => (i, j, "V"),
        Frame::Multi(i, j) => (i, j, "WM"),
        Frame::Branch(i, j) => (i, j, "WMB"),
    };
    FoldError::TracebackFailed { i, j, table }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_energy::Base;
    use ef_energy::DangleMode;
    use ef_energy::EnergyModel;
    use ef_energy::EnergyTables;
    use ef_energy::NucleotideVec;
    use crate::Constraint;
    use crate::Constraints;
    use crate::FoldConfig;

    fn fold(seq: &str, constraints: &Constraints, config: &FoldConfig) -> Result<(i32, PairTable), FoldError> {
        let tables = EnergyTables::default();
        let seq = NucleotideVec::try_from(seq).unwrap();
        let ctx = FoldContext::new(&seq, constraints, &tables, config)?;
        let pool = config.thread_pool()?;
        let t = fill(&ctx, &pool)?;
        let pt = traceback(&ctx, &t)?;
        assert_eq!(ctx.model.energy_of_structure(&pt), t.energy());
        Ok((t.energy(), pt))
    }

    #[test]
    fn test_mfe_hairpin() {
        let (energy, pt) = fold("GGGAAACCC", &Constraints::none(), &FoldConfig::default()).unwrap();
        assert_eq!(pt.to_string(), "(((...)))");
        assert_eq!(energy, -120);
    }

    #[test]
    fn test_mfe_open_chain() {
        let (energy, pt) = fold("AAAAAAAA", &Constraints::none(), &FoldConfig::default()).unwrap();
        assert_eq!(energy, 0);
        assert_eq!(pt.to_string(), "........");
        let (energy, _) = fold("", &Constraints::none(), &FoldConfig::default()).unwrap();
        assert_eq!(energy, 0);
    }

    #[test]
    fn test_mfe_multiloop_sequence() {
        let seq = "GGGGAAACCCCAGGGGAAACCCCAGGGGAAACCCCACCCC";
        let (energy, pt) = fold(seq, &Constraints::none(), &FoldConfig::default()).unwrap();
        assert!(energy < 0);
        assert_eq!(pt.len(), seq.len());
    }

    #[test]
    fn test_single_dangles() {
        // Two forced helices around A12, the only shareable neighbor.
        let seq = "GGGGAAACCCCAGGGGAAACCCC";
        let constraints = Constraints::none()
            .with(Constraint::force(1, 11, 4))
            .with(Constraint::force(13, 23, 4));
        let mut single = FoldConfig::default();
        single.model.dangles = DangleMode::Single;
        let (d1, pt1) = fold(seq, &constraints, &single).unwrap();
        let (d2, pt2) = fold(seq, &constraints, &FoldConfig::default()).unwrap();
        assert_eq!(pt1.to_string(), "((((...)))).((((...))))");
        assert_eq!(pt1, pt2);
        let t = EnergyTables::default();
        let three = t.dangle3.get([Base::G, Base::C, Base::A]);
        let five = t.dangle5.get([Base::G, Base::C, Base::A]);
        assert_eq!(d1 - d2, -three.max(five));
        assert!(d1 > d2);

        // Free folding: the traceback reproduces the fill under single dangles.
        let (energy, _) = fold("GGGAAACCCAGGGAAACCCAGGGAAACCC", &Constraints::none(), &single).unwrap();
        assert!(energy < 0);
        let (energy, _) = fold("GGGAGCUCAGCCUGGGAGAGCGCCUGCUUUGCACGCAGG", &Constraints::none(), &single).unwrap();
        assert!(energy < 0);
    }

    #[test]
    fn test_forced_pair_is_kept() {
        let constraints = Constraints::none().with(Constraint::force(2, 8, 1));
        let (_, pt) = fold("GGGAAACCC", &constraints, &FoldConfig::default()).unwrap();
        assert_eq!(pt[1], Some(7));
    }

    #[test]
    fn test_prohibited_bases_stay_unpaired() {
        let constraints = Constraints::none().with(Constraint::prohibit(1, 0, 9));
        let (energy, pt) = fold("GGGAAACCC", &constraints, &FoldConfig::default()).unwrap();
        assert_eq!(energy, 0);
        assert_eq!(pt.pair_count(), 0);
    }

    #[test]
    fn test_infeasible_constraints() {
        // Base 4 must pair but no A can pair with anything.
        let constraints = Constraints::none().with(Constraint::force(4, 0, 1));
        let err = fold("GGGAAACCC", &constraints, &FoldConfig::default()).unwrap_err();
        assert!(matches!(err, FoldError::NoFeasibleStructure));
    }
}
