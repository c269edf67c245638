//! Loop energies of the nearest-neighbor model.
//!
//! Every function takes 1-based sequence positions; the sequence is
//! padded so that positions `0` and `n + 1` exist and hold `Base::N`.
//! Loops reported by [`LoopDecomposition`] are 0-based and converted in
//! [`EnergyModel::energy_of_loop`].

use ahash::AHashMap;
use serde::Deserialize;
use serde::Serialize;

use ef_structure::LoopDecomposition;
use ef_structure::NearestNeighborLoop;

use crate::Base;
use crate::BaseTable;
use crate::EnergyTables;
use crate::NucleotideVec;
use crate::INF;
use crate::MAXLOOP;
use crate::TURN;

/// Treatment of unpaired bases next to a helix end in exterior loops
/// and multiloops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DangleMode {
    /// No dangling-end contributions (d0).
    None,
    /// Each unpaired base dangles on at most one adjacent helix end, in the
    /// cheapest assignment (d1).
    Single,
    /// Both neighbors always dangle, paired or not (d2).
    #[default]
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub dangles: DangleMode,
    /// Use the mismatch tables when both neighbors of a helix end exist.
    pub terminal_mismatch: bool,
    /// Score interior loops with a single-base side using an A·A mismatch.
    pub asymmetric_rule: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            dangles: DangleMode::Double,
            terminal_mismatch: false,
            asymmetric_rule: false,
        }
    }
}

pub trait EnergyModel {
    /// Can bases at 1-based positions `i` and `j` form a canonical pair?
    fn can_pair(&self, i: usize, j: usize) -> bool;

    fn min_hairpin_size(&self) -> usize {
        TURN
    }

    fn energy_of_loop(&self, nn_loop: &NearestNeighborLoop) -> i32;

    fn energy_of_structure<T: LoopDecomposition>(&self, structure: &T) -> i32 {
        let mut total = 0;
        structure.for_each_loop(|l| {
            total = (total + self.energy_of_loop(l)).min(INF);
        });
        total
    }
}

/// The nearest-neighbor model bound to one sequence.
#[derive(Debug, Clone)]
pub struct NearestNeighborModel<'a> {
    tables: &'a EnergyTables,
    options: ModelOptions,
    seq: Vec<Base>,
    shape: Vec<i32>,
    tetraloops: AHashMap<[Base; 6], i32>,
}

impl<'a> NearestNeighborModel<'a> {
    pub fn new(tables: &'a EnergyTables, sequence: &NucleotideVec, options: ModelOptions) -> Self {
        let mut seq = Vec::with_capacity(sequence.len() + 2);
        seq.push(Base::N);
        seq.extend(sequence.iter().copied());
        seq.push(Base::N);

        let tetraloops = tables.tetraloops.iter()
            .filter_map(|(key, &bonus)| {
                let bases: Vec<Base> = key.chars().filter_map(|c| Base::try_from(c).ok()).collect();
                <[Base; 6]>::try_from(bases).ok().map(|k| (k, bonus))
            })
            .collect();

        Self {
            tables,
            options,
            shape: vec![0; seq.len()],
            seq,
            tetraloops,
        }
    }

    /// Attach per-position SHAPE pseudo-energies (1-based, `len() + 2` entries).
    pub fn with_shape(mut self, shape: Vec<i32>) -> Self {
        debug_assert_eq!(shape.len(), self.seq.len());
        self.shape = shape;
        self
    }

    pub fn len(&self) -> usize {
        self.seq.len() - 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tables(&self) -> &EnergyTables {
        self.tables
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    #[inline]
    pub fn base(&self, i: usize) -> Base {
        self.seq[i]
    }

    #[inline]
    fn shape_sum(&self, positions: [usize; 4]) -> i32 {
        positions.iter().map(|&k| self.shape[k]).sum()
    }

    /// Terminal AU/GU penalty for the pair i·j.
    #[inline]
    pub fn au_penalty(&self, i: usize, j: usize) -> i32 {
        if self.seq[i].is_weak_pair(self.seq[j]) { self.tables.terminal_au } else { 0 }
    }

    /// Logarithmic extrapolation beyond the tabulated loop size.
    pub fn log_extrapolation(&self, size: usize) -> i32 {
        (self.tables.prelog * (size as f64 / MAXLOOP as f64).ln()).floor() as i32
    }

    #[inline]
    fn mismatch(&self, table: &BaseTable<4>, i: usize, j: usize, x: usize, y: usize) -> i32 {
        table.get([self.seq[i], self.seq[j], self.seq[x], self.seq[y]])
    }

    /// Hairpin loop closed by i·j.
    pub fn hairpin(&self, i: usize, j: usize) -> i32 {
        let size = j - i - 1;
        if size < TURN {
            return INF;
        }
        let t = self.tables;
        let mut energy = if size > MAXLOOP {
            t.hairpin[MAXLOOP] + self.log_extrapolation(size)
                + self.mismatch(&t.hairpin_mismatch, i, j, i + 1, j - 1)
        } else if size > TURN {
            t.hairpin[size] + self.mismatch(&t.hairpin_mismatch, i, j, i + 1, j - 1)
        } else {
            t.hairpin[size] + self.au_penalty(i, j)
        };

        if size == 4 {
            let mut key = [Base::N; 6];
            key.copy_from_slice(&self.seq[i..=j]);
            energy += self.tetraloops.get(&key).copied().unwrap_or(0);
        }

        // GGG hairpins closed by G·U.
        if i > 2
            && self.seq[i - 2] == Base::G
            && self.seq[i - 1] == Base::G
            && self.seq[i] == Base::G
            && self.seq[j] == Base::U
        {
            energy += t.gu_bonus;
        }

        if self.seq[i + 1..j].iter().all(|&b| b == Base::C) {
            energy += if size == TURN {
                t.poly_c_triloop
            } else {
                t.poly_c_intercept + size as i32 * t.poly_c_slope
            };
        }
        energy
    }

    /// Helix stack of i·j on (i+1)·(j-1).
    pub fn stack(&self, i: usize, j: usize) -> i32 {
        self.tables.stack.get([self.seq[i], self.seq[j], self.seq[i + 1], self.seq[j - 1]])
            + self.shape_sum([i, j, i + 1, j - 1])
    }

    /// Stack, bulge or interior loop closed by i·j with inner pair p·q.
    pub fn interior(&self, i: usize, j: usize, p: usize, q: usize) -> i32 {
        let t = self.tables;
        let s1 = p - i - 1;
        let s2 = j - q - 1;
        let size = s1 + s2;
        let seq = &self.seq;

        if size == 0 {
            return self.stack(i, j);
        }

        if s1 == 0 || s2 == 0 {
            return if size == 1 {
                t.stack.get([seq[i], seq[j], seq[p], seq[q]]) + t.bulge[1]
                    + self.shape_sum([i, j, p, q])
            } else if size > MAXLOOP {
                t.bulge[MAXLOOP] + self.log_extrapolation(size)
                    + self.au_penalty(i, j) + self.au_penalty(p, q)
            } else {
                t.bulge[size] + self.au_penalty(i, j) + self.au_penalty(p, q)
            };
        }

        let initiation = if size > MAXLOOP {
            t.interior[MAXLOOP] + self.log_extrapolation(size)
        } else {
            t.interior[size]
        };
        let ninio = (t.ninio[s1.min(s2).min(2)] * s1.abs_diff(s2) as i32).min(t.max_ninio);

        match (s1, s2) {
            (1, 1) => t.int11.get([seq[i], seq[i + 1], seq[p], seq[j], seq[j - 1], seq[q]]),
            (1, 2) => t.int21.get([seq[i], seq[j], seq[i + 1], seq[j - 1], seq[j - 2], seq[p], seq[q]]),
            (2, 1) => t.int21.get([seq[q], seq[p], seq[q + 1], seq[i + 2], seq[i + 1], seq[j], seq[i]]),
            (2, 2) => t.int22.get([seq[i], seq[p], seq[j], seq[q],
                seq[i + 1], seq[i + 2], seq[j - 1], seq[j - 2]]),
            // Turner 2004 charges initiation and asymmetry on top of the
            // 2x3 mismatches.
            (2, 3) | (3, 2) => {
                self.mismatch(&t.interior_mismatch_23, i, j, i + 1, j - 1)
                    + self.mismatch(&t.interior_mismatch_23, q, p, q + 1, p - 1)
                    + initiation + ninio
            }
            (1, _) | (_, 1) if self.options.asymmetric_rule => {
                t.interior_mismatch.get([seq[i], seq[j], Base::A, Base::A])
                    + t.interior_mismatch.get([seq[q], seq[p], Base::A, Base::A])
                    + initiation + ninio
            }
            _ => {
                self.mismatch(&t.interior_mismatch, i, j, i + 1, j - 1)
                    + self.mismatch(&t.interior_mismatch, q, p, q + 1, p - 1)
                    + initiation + ninio
            }
        }
    }

    /// Dangles of the helix end a·b under double dangles; the other modes
    /// add theirs elsewhere.
    fn helix_end(&self, mismatch: &BaseTable<4>, a: usize, b: usize, x: Option<usize>, y: Option<usize>) -> i32 {
        match self.options.dangles {
            DangleMode::Double => self.dangle_energy(mismatch, a, b, x, y),
            DangleMode::None | DangleMode::Single => 0,
        }
    }

    /// Dangles or terminal mismatch on the helix end a·b, where `x` is the
    /// neighbor 5' of a and `y` the neighbor 3' of b.
    fn dangle_energy(&self, mismatch: &BaseTable<4>, a: usize, b: usize, x: Option<usize>, y: Option<usize>) -> i32 {
        let (ba, bb) = (self.seq[a], self.seq[b]);
        match (x, y) {
            (Some(x), Some(y)) if self.options.terminal_mismatch => {
                mismatch.get([ba, bb, self.seq[x], self.seq[y]])
            }
            _ => {
                x.map_or(0, |x| self.tables.dangle5.get([ba, bb, self.seq[x]]))
                    + y.map_or(0, |y| self.tables.dangle3.get([ba, bb, self.seq[y]]))
            }
        }
    }

    /// Closing pair contribution of a multiloop closed by i·j.
    pub fn ml_closing(&self, i: usize, j: usize) -> i32 {
        let ml = self.tables.multiloop;
        ml.closing + ml.branch + self.au_penalty(i, j)
            + self.helix_end(&self.tables.multi_mismatch, j, i, Some(j - 1), Some(i + 1))
    }

    /// Branch i·j inside a multiloop.
    pub fn ml_branch(&self, i: usize, j: usize) -> i32 {
        self.tables.multiloop.branch + self.au_penalty(i, j)
            + self.helix_end(&self.tables.multi_mismatch, i, j, Some(i - 1), Some(j + 1))
    }

    /// Penalty for `count` unpaired bases in a multiloop.
    #[inline]
    pub fn ml_unpaired(&self, count: usize) -> i32 {
        self.tables.multiloop.unpaired * count as i32
    }

    /// Branch i·j in the exterior loop.
    pub fn ext_branch(&self, i: usize, j: usize) -> i32 {
        let x = (i > 1).then(|| i - 1);
        let y = (j < self.len()).then(|| j + 1);
        self.au_penalty(i, j) + self.helix_end(&self.tables.exterior_mismatch, i, j, x, y)
    }

    /// Exterior branch i·j dangling on i - 1 (`five`) and j + 1 (`three`),
    /// whatever the dangle mode. The caller guarantees the neighbors exist.
    pub fn ext_branch_flanked(&self, i: usize, j: usize, five: bool, three: bool) -> i32 {
        self.au_penalty(i, j) + self.dangle_energy(&self.tables.exterior_mismatch, i, j,
            five.then(|| i - 1), three.then(|| j + 1))
    }

    /// Multiloop branch i·j dangling on i - 1 (`five`) and j + 1 (`three`).
    pub fn ml_branch_flanked(&self, i: usize, j: usize, five: bool, three: bool) -> i32 {
        self.tables.multiloop.branch + self.au_penalty(i, j)
            + self.dangle_energy(&self.tables.multi_mismatch, i, j, five.then(|| i - 1), three.then(|| j + 1))
    }

    /// Multiloop closed by i·j whose closing helix end dangles on j - 1
    /// (`five`) and i + 1 (`three`).
    pub fn ml_closing_flanked(&self, i: usize, j: usize, five: bool, three: bool) -> i32 {
        let ml = self.tables.multiloop;
        ml.closing + ml.branch + self.au_penalty(i, j)
            + self.dangle_energy(&self.tables.multi_mismatch, j, i, five.then(|| j - 1), three.then(|| i + 1))
    }

    /// Helix ends of the branches of one loop, in order. Branches are
    /// 0-based; `lo` and `hi` are the 1-based positions that bound the loop.
    fn branch_ends(&self, mismatch: &'a BaseTable<4>, branches: &[(usize, usize)], lo: usize, hi: usize) -> Vec<HelixEnd<'a>> {
        branches.iter().enumerate()
            .map(|(t, &(k, l))| {
                let (k, l) = (k + 1, l + 1);
                let prev = if t == 0 { lo } else { branches[t - 1].1 + 1 };
                let next = branches.get(t + 1).map_or(hi, |&(k2, _)| k2 + 1);
                HelixEnd {
                    mismatch,
                    a: k,
                    b: l,
                    x: (k - 1 > prev).then(|| k - 1),
                    y: (l + 1 < next).then(|| l + 1),
                }
            })
            .collect()
    }

    /// Helix ends of the multiloop closed by the 1-based pair i·j, the
    /// closing pair first.
    fn multiloop_ends(&self, i: usize, j: usize, branches: &[(usize, usize)]) -> Vec<HelixEnd<'a>> {
        let first = branches.first().map_or(j, |&(k, _)| k + 1);
        let last = branches.last().map_or(i, |&(_, l)| l + 1);
        let mut ends = vec![HelixEnd {
            mismatch: &self.tables.multi_mismatch,
            a: j,
            b: i,
            x: (j - 1 > last).then(|| j - 1),
            y: (i + 1 < first).then(|| i + 1),
        }];
        ends.extend(self.branch_ends(&self.tables.multi_mismatch, branches, i, j));
        ends
    }

    /// Cheapest dangles of one loop when every unpaired base dangles on at
    /// most one helix end. `ends` are in loop order; in a closed loop the
    /// last end also neighbors the first.
    fn single_dangles(&self, ends: &[HelixEnd], closed: bool) -> i32 {
        let Some(first) = ends.first() else {
            return 0;
        };
        let choices = |e: &HelixEnd| -> Vec<(bool, bool)> {
            [(false, false), (true, false), (false, true), (true, true)].into_iter()
                .filter(|&(dx, dy)| (!dx || e.x.is_some()) && (!dy || e.y.is_some()))
                .collect()
        };
        let cost = |e: &HelixEnd, (dx, dy): (bool, bool)| {
            self.dangle_energy(e.mismatch, e.a, e.b, e.x.filter(|_| dx), e.y.filter(|_| dy))
        };

        let mut best = INF;
        for start in choices(first) {
            // Cheapest prefix, by whether its last end took its 3' neighbor.
            let mut prefix = [INF, INF];
            prefix[start.1 as usize] = cost(first, start);
            for pair in ends.windows(2) {
                let shared = pair[0].y.is_some() && pair[0].y == pair[1].x;
                let mut next = [INF, INF];
                for choice in choices(&pair[1]) {
                    for (took, &energy) in prefix.iter().enumerate() {
                        if energy >= INF || (shared && took == 1 && choice.0) {
                            continue;
                        }
                        let slot = &mut next[choice.1 as usize];
                        *slot = (*slot).min(energy + cost(&pair[1], choice));
                    }
                }
                prefix = next;
            }
            let last = &ends[ends.len() - 1];
            let wraps = closed && start.0 && last.y.is_some() && last.y == first.x;
            for (took, &energy) in prefix.iter().enumerate() {
                if !(wraps && took == 1) {
                    best = best.min(energy);
                }
            }
        }
        best
    }
}

/// One helix end of a loop: the pair a·b read in loop direction, with its
/// unpaired neighbors `x` 5' of a and `y` 3' of b.
struct HelixEnd<'t> {
    mismatch: &'t BaseTable<4>,
    a: usize,
    b: usize,
    x: Option<usize>,
    y: Option<usize>,
}

impl EnergyModel for NearestNeighborModel<'_> {
    fn can_pair(&self, i: usize, j: usize) -> bool {
        self.seq[i].can_pair(self.seq[j])
    }

    fn energy_of_loop(&self, nn_loop: &NearestNeighborLoop) -> i32 {
        match nn_loop {
            NearestNeighborLoop::Hairpin { closing: (i, j) } => self.hairpin(i + 1, j + 1),
            NearestNeighborLoop::Interior { closing: (i, j), inner: (p, q) } => {
                self.interior(i + 1, j + 1, p + 1, q + 1)
            }
            NearestNeighborLoop::Multibranch { closing: (i, j), branches } => {
                let single = match self.options.dangles {
                    DangleMode::Single => self.single_dangles(&self.multiloop_ends(i + 1, j + 1, branches), true),
                    DangleMode::None | DangleMode::Double => 0,
                };
                self.ml_closing(i + 1, j + 1)
                    + branches.iter().map(|(k, l)| self.ml_branch(k + 1, l + 1)).sum::<i32>()
                    + self.ml_unpaired(nn_loop.unpaired_count())
                    + single
            }
            NearestNeighborLoop::Exterior { branches } => {
                let single = match self.options.dangles {
                    DangleMode::Single => {
                        let ends = self.branch_ends(&self.tables.exterior_mismatch, branches, 0, self.len() + 1);
                        self.single_dangles(&ends, false)
                    }
                    DangleMode::None | DangleMode::Double => 0,
                };
                branches.iter().map(|(k, l)| self.ext_branch(k + 1, l + 1)).sum::<i32>() + single
            }
        }
    }
}
