//! McCaskill partition function over the shared grammar.
//!
//! The fill is generic over [`BoltzmannSum`]; the facade picks the
//! backend. Weights may be rescaled per nucleotide so that long sequences
//! stay in range: a step covering `f` new bases carries `m^f`, and the
//! true partition function is recovered as `Z_scaled / m^N`.

use std::f64::consts::LN_10;

use log::debug;
use log::trace;
use ndarray::Array2;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::INF;
use ef_energy::RT_DCAL;
use ef_energy::TURN;

use crate::context::alloc_table;
use crate::context::FoldContext;
use crate::decomposition::Frame;
use crate::decomposition::Step;
use crate::numeric::BoltzmannSum;
use crate::Backend;
use crate::FoldError;

/// Converts loop energies into backend weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Weights {
    /// Per-nucleotide scale `m`.
    pub per_base: f64,
    pub count_mode: bool,
    pub precision: u32,
}

impl Weights {
    pub fn new(ctx: &FoldContext, mfe: Option<i32>, scale: f64) -> Self {
        let per_base = match mfe {
            Some(e) if ctx.n > 0 && !ctx.config.count_mode => {
                (scale * e as f64 / (RT_DCAL * ctx.n as f64)).exp()
            }
            _ => 1.0,
        };
        Self {
            per_base,
            count_mode: ctx.config.count_mode,
            precision: ctx.config.precision,
        }
    }

    /// `exp(-E/RT) · m^fresh` in `f64`; 0 for infeasible energies.
    #[inline]
    pub fn boltzmann(&self, energy: i32, fresh: usize) -> f64 {
        if energy >= INF {
            0.0
        } else if self.count_mode {
            1.0
        } else {
            (-(energy as f64) / RT_DCAL).exp() * self.per_base.powi(fresh as i32)
        }
    }

    #[inline]
    pub fn lift<T: BoltzmannSum>(&self, energy: i32, fresh: usize) -> T {
        T::from_weight(self.boltzmann(energy, fresh), self.precision)
    }
}

pub(crate) struct PfTables<T> {
    pub qb: Array2<T>,
    pub qm: Array2<T>,
    pub qmb: Array2<T>,
    /// Exterior prefixes: `z5[j]` covers 1..j, `z5[0] = 1`.
    pub z5: Vec<T>,
    /// Exterior suffixes: `z3[i]` covers i..N, `z3[N + 1] = 1`.
    pub z3: Vec<T>,
    pub weights: Weights,
}

impl<T: BoltzmannSum> PfTables<T> {
    /// The partition function of the whole sequence, still scaled.
    pub fn total(&self) -> &T {
        &self.z5[self.z5.len() - 2]
    }

    pub fn value<'s>(&'s self, frame: Frame) -> &'s T {
        match frame {
            Frame::Exterior(j) => &self.z5[j],
            Frame::Pair(i, j) => &self.qb[(i, j)],
            Frame::Multi(i, j) => &self.qm[(i, j)],
            Frame::Branch(i, j) => &self.qmb[(i, j)],
        }
    }

    /// Boltzmann weight of one step: its own loop weight times the
    /// partition functions of the cells it leaves. `own` overrides table
    /// entries that are not written back yet.
    pub fn step_weight(&self, ctx: &FoldContext, frame: Frame, step: Step, own: &[(Frame, &T)]) -> T {
        let mut weight: T = self.weights.lift(frame.step_energy(ctx, step), frame.fresh_bases(step));
        for succ in frame.successors(step).into_iter().flatten() {
            if weight.is_zero() {
                break;
            }
            let value = own.iter()
                .find(|(f, _)| *f == succ)
                .map_or_else(|| self.value(succ), |(_, v)| *v);
            weight = weight.times(value);
        }
        weight
    }

    fn sum_steps(&self, ctx: &FoldContext, frame: Frame, own: &[(Frame, &T)]) -> T {
        frame.steps(ctx).into_iter().fold(T::zero(), |acc, step| {
            acc.plus(&self.step_weight(ctx, frame, step, own))
        })
    }

    /// (QB, QMB, QM) of one cell, in that order.
    fn cell(&self, ctx: &FoldContext, i: usize, j: usize) -> (T, T, T) {
        let qb = self.sum_steps(ctx, Frame::Pair(i, j), &[]);
        let qmb = self.sum_steps(ctx, Frame::Branch(i, j), &[(Frame::Pair(i, j), &qb)]);
        let qm = self.sum_steps(ctx, Frame::Multi(i, j), &[(Frame::Branch(i, j), &qmb)]);
        (qb, qmb, qm)
    }
}

/// Fills the inside tables and both exterior arrays.
pub(crate) fn fill<T: BoltzmannSum>(
    ctx: &FoldContext,
    weights: Weights,
    pool: &rayon::ThreadPool,
) -> Result<PfTables<T>, FoldError> {
    let n = ctx.n;
    debug!("Partition function fill: 3 tables of {} cells, m = {}.", (n + 2) * (n + 2), weights.per_base);
    let mut tables = PfTables {
        qb: alloc_table(n, T::zero())?,
        qm: alloc_table(n, T::zero())?,
        qmb: alloc_table(n, T::zero())?,
        z5: vec![T::zero(); n + 2],
        z3: vec![T::zero(); n + 2],
        weights,
    };

    for d in TURN + 1..n {
        trace!("PF diagonal {}", d);
        let cells = ctx.diagonal(pool, d, |i, j| tables.cell(ctx, i, j));
        for (offset, (qb, qmb, qm)) in cells.into_iter().enumerate() {
            let (i, j) = (offset + 1, offset + 1 + d);
            tables.qb[(i, j)] = qb;
            tables.qmb[(i, j)] = qmb;
            tables.qm[(i, j)] = qm;
        }
    }

    tables.z5[0] = T::one();
    for j in 1..=n {
        tables.z5[j] = tables.sum_steps(ctx, Frame::Exterior(j), &[]);
    }

    let unpaired: T = weights.lift(0, 1);
    tables.z3[n + 1] = T::one();
    for i in (1..=n).rev() {
        let mut z = if ctx.unpaired_ok(i, i) { tables.z3[i + 1].times(&unpaired) } else { T::zero() };
        for j in i + TURN + 1..=n {
            if !ctx.allowed(i, j) || tables.qb[(i, j)].is_zero() {
                continue;
            }
            let branch: T = weights.lift(ctx.model.ext_branch(i, j), 0);
            z.add_assign(&tables.qb[(i, j)].times(&branch).times(&tables.z3[j + 1]));
        }
        tables.z3[i] = z;
    }

    if tables.total().is_zero() {
        return Err(FoldError::NoFeasibleStructure);
    }
    Ok(tables)
}

/// A partition function value in any backend, reduced to the forms
/// callers need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionValue {
    /// Scientific notation with the digits the backend carries.
    pub decimal: String,
    pub ln: f64,
}

impl PartitionValue {
    /// The unscaled partition function of filled tables. The logarithm is
    /// unscaled on its own, so it stays exact where `Z` does not fit the
    /// backend.
    pub(crate) fn from_tables<T: BoltzmannSum>(tables: &PfTables<T>, n: usize) -> Self {
        let ln = unscaled_ln(tables, n);
        let value = unscaled(tables, n);
        let decimal = if (value.ln() - ln).abs() <= 1e-9 * ln.abs().max(1.0) {
            value.to_decimal_string()
        } else {
            decimal_from_ln(ln)
        };
        Self { decimal, ln }
    }

    /// The value as `f64`; infinite or zero when out of range.
    pub fn to_f64(&self) -> f64 {
        self.ln.exp()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFunction {
    pub value: PartitionValue,
    pub backend: Backend,
    /// Per-nucleotide scale used during the fill.
    pub per_base_scale: f64,
}

impl PartitionFunction {
    pub fn ln_z(&self) -> f64 {
        self.value.ln
    }

    /// Ensemble free energy `-RT ln Z` in kcal/mol.
    pub fn ensemble_energy(&self) -> f64 {
        -RT_DCAL * self.value.ln / 100.0
    }
}

/// `ln(Z_scaled / m^N)`.
pub(crate) fn unscaled_ln<T: BoltzmannSum>(tables: &PfTables<T>, n: usize) -> f64 {
    tables.total().ln() - n as f64 * tables.weights.per_base.ln()
}

fn decimal_from_ln(ln: f64) -> String {
    let log10 = ln / LN_10;
    let exponent = log10.floor();
    format!("{}e{}", 10f64.powf(log10 - exponent), exponent)
}

/// The unscaled partition function `Z_scaled / m^N`.
pub(crate) fn unscaled<T: BoltzmannSum>(tables: &PfTables<T>, n: usize) -> T {
    let w = tables.weights;
    if w.per_base == 1.0 {
        return tables.total().clone();
    }
    let inverse = T::from_weight(1.0 / w.per_base, w.precision);
    tables.total().times(&inverse.powu(n))
}
