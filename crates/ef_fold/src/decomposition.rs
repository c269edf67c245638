//! The shared folding grammar.
//!
//! Every engine decomposes the same four kinds of table cells ([`Frame`])
//! with the same alternatives ([`Step`]), listed in one fixed order. The
//! MFE fill minimizes over them inline; tracebacks, sampling, suboptimal
//! enumeration and the partition function walk them through this module.

use ef_energy::TURN;
use ef_structure::NAIDX;
use ef_structure::Pair;
use ef_structure::PairSet;

use crate::context::FoldContext;

/// A table cell still to be decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Frame {
    /// Exterior prefix 1..j.
    Exterior(usize),
    /// i·j pairs.
    Pair(usize, usize),
    /// Multiloop segment with at least one branch.
    Multi(usize, usize),
    /// Multiloop segment with one branch starting at i.
    Branch(usize, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    /// `Pair(i, j)` closes a hairpin.
    Hairpin,
    /// `Pair(i, j)` closes a stack, bulge or interior loop on (p, q).
    Interior(usize, usize),
    /// `Pair(i, j)` closes a multiloop whose last branch starts at k.
    Multi(usize),
    /// `Branch(i, j)` is the pair i·l followed by unpaired bases.
    Branch(usize),
    /// `Multi(i, j)` is k - i unpaired bases, then `Branch(k, j)`.
    Leading(usize),
    /// `Multi(i, j)` is `Multi(i, k - 1)`, then `Branch(k, j)`.
    Split(usize),
    /// `Exterior(j)` leaves j unpaired.
    Unpaired,
    /// `Exterior(j)` ends with the pair i·j.
    Closing(usize),
    /// Single dangles only: `Pair(i, j)` closes a multiloop whose last
    /// branch starts at k; the closing helix end takes the flanking bases.
    FlankedMulti(usize, Flank),
    /// Single dangles only: `Branch(i, j)` is a pair ending at l whose
    /// helix end takes the flanking bases.
    FlankedBranch(usize, Flank),
    /// Single dangles only: `Exterior(j)` ends with a pair starting at p
    /// whose helix end takes the flanking bases.
    FlankedClosing(usize, Flank),
}

/// Unpaired neighbors a helix end dangles on under single dangles. `Five`
/// is the base 5' of the helix end, `Three` the base 3' of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Flank {
    Five,
    Three,
    Both,
}

impl Flank {
    pub const ALL: [Flank; 3] = [Flank::Five, Flank::Three, Flank::Both];

    /// 1 if the 5' neighbor dangles.
    pub fn five(self) -> usize {
        matches!(self, Flank::Five | Flank::Both) as usize
    }

    /// 1 if the 3' neighbor dangles.
    pub fn three(self) -> usize {
        matches!(self, Flank::Three | Flank::Both) as usize
    }
}

impl Step {
    pub fn is_flanked(self) -> bool {
        matches!(self, Step::FlankedMulti(..) | Step::FlankedBranch(..) | Step::FlankedClosing(..))
    }
}

impl Frame {
    /// All alternatives of this cell, in the order every engine uses them.
    pub fn steps(self, ctx: &FoldContext) -> Vec<Step> {
        let mut steps = Vec::new();
        match self {
            Frame::Exterior(0) => (),
            Frame::Exterior(j) => {
                if ctx.unpaired_ok(j, j) {
                    steps.push(Step::Unpaired);
                }
                steps.extend((1..j.saturating_sub(TURN))
                    .filter(|&i| ctx.allowed(i, j))
                    .map(Step::Closing));
                if ctx.single_dangles() {
                    for flank in Flank::ALL {
                        if flank.three() == 1 && !ctx.unpaired_ok(j, j) {
                            continue;
                        }
                        let q = j - flank.three();
                        steps.extend((1 + flank.five()..q.saturating_sub(TURN))
                            .filter(|&p| flank.five() == 0 || ctx.unpaired_ok(p - 1, p - 1))
                            .filter(|&p| ctx.allowed(p, q))
                            .map(|p| Step::FlankedClosing(p, flank)));
                    }
                }
            }
            Frame::Pair(i, j) => {
                if !ctx.allowed(i, j) {
                    return steps;
                }
                if ctx.unpaired_ok(i + 1, j - 1) {
                    steps.push(Step::Hairpin);
                }
                steps.extend(ctx.inner_pairs(i, j).map(|(p, q)| Step::Interior(p, q)));
                steps.extend(ctx.multi_splits(i, j).map(Step::Multi));
                if ctx.single_dangles() {
                    for flank in Flank::ALL {
                        if (flank.five() == 1 && !ctx.unpaired_ok(j - 1, j - 1))
                            || (flank.three() == 1 && !ctx.unpaired_ok(i + 1, i + 1)) {
                            continue;
                        }
                        steps.extend((i + TURN + 3 + flank.three()..=j.saturating_sub(TURN + 2 + flank.five()))
                            .map(|k| Step::FlankedMulti(k, flank)));
                    }
                }
            }
            Frame::Branch(i, j) => {
                steps.extend((i + TURN + 1..=j).rev()
                    .take_while(|&l| ctx.unpaired_ok(l + 1, j))
                    .filter(|&l| ctx.allowed(i, l))
                    .map(Step::Branch));
                if ctx.single_dangles() {
                    for flank in Flank::ALL {
                        if flank.five() == 1 && !ctx.unpaired_ok(i, i) {
                            continue;
                        }
                        let start = i + flank.five();
                        steps.extend((start + TURN + 1..=j - flank.three()).rev()
                            .take_while(|&l| ctx.unpaired_ok(l + 1, j))
                            .filter(|&l| ctx.allowed(start, l))
                            .map(|l| Step::FlankedBranch(l, flank)));
                    }
                }
            }
            Frame::Multi(i, j) => {
                for k in i..(j + 1).saturating_sub(TURN + 1) {
                    if ctx.unpaired_ok(i, k - 1) {
                        steps.push(Step::Leading(k));
                    }
                    if k >= i + TURN + 2 {
                        steps.push(Step::Split(k));
                    }
                }
            }
        }
        steps
    }

    /// Energy of the loop part a step commits to, in dcal/mol.
    pub fn step_energy(self, ctx: &FoldContext, step: Step) -> i32 {
        let model = &ctx.model;
        match (self, step) {
            (Frame::Pair(i, j), Step::Hairpin) => model.hairpin(i, j),
            (Frame::Pair(i, j), Step::Interior(p, q)) => model.interior(i, j, p, q),
            (Frame::Pair(i, j), Step::Multi(_)) => model.ml_closing(i, j),
            (Frame::Branch(i, j), Step::Branch(l)) => model.ml_branch(i, l) + model.ml_unpaired(j - l),
            (Frame::Multi(i, _), Step::Leading(k)) => model.ml_unpaired(k - i),
            (Frame::Exterior(j), Step::Closing(i)) => model.ext_branch(i, j),
            (Frame::Pair(i, j), Step::FlankedMulti(_, f)) => {
                model.ml_closing_flanked(i, j, f.five() == 1, f.three() == 1)
                    + model.ml_unpaired(f.five() + f.three())
            }
            (Frame::Branch(i, j), Step::FlankedBranch(l, f)) => {
                model.ml_branch_flanked(i + f.five(), l, f.five() == 1, f.three() == 1)
                    + model.ml_unpaired(j - l + f.five())
            }
            (Frame::Exterior(j), Step::FlankedClosing(p, f)) => {
                model.ext_branch_flanked(p, j - f.three(), f.five() == 1, f.three() == 1)
            }
            _ => 0,
        }
    }

    /// Nucleotides a step covers for the first time; every base of the
    /// sequence is covered exactly once per structure.
    pub fn fresh_bases(self, step: Step) -> usize {
        match (self, step) {
            (Frame::Pair(i, j), Step::Hairpin) => j - i + 1,
            (Frame::Pair(i, j), Step::Interior(p, q)) => (p - i) + (j - q),
            (Frame::Pair(..), Step::Multi(_)) => 2,
            (Frame::Branch(_, j), Step::Branch(l)) => j - l,
            (Frame::Multi(i, _), Step::Leading(k)) => k - i,
            (Frame::Exterior(_), Step::Unpaired) => 1,
            (Frame::Pair(..), Step::FlankedMulti(_, f)) => 2 + f.five() + f.three(),
            (Frame::Branch(_, j), Step::FlankedBranch(l, f)) => f.five() + (j - l),
            (Frame::Exterior(_), Step::FlankedClosing(_, f)) => f.five() + f.three(),
            _ => 0,
        }
    }

    /// The cells a step leaves to decompose.
    pub fn successors(self, step: Step) -> [Option<Frame>; 2] {
        match (self, step) {
            (Frame::Pair(..), Step::Hairpin) => [None, None],
            (Frame::Pair(..), Step::Interior(p, q)) => [Some(Frame::Pair(p, q)), None],
            (Frame::Pair(i, j), Step::Multi(k)) => {
                [Some(Frame::Multi(i + 1, k - 1)), Some(Frame::Branch(k, j - 1))]
            }
            (Frame::Branch(i, _), Step::Branch(l)) => [Some(Frame::Pair(i, l)), None],
            (Frame::Multi(_, j), Step::Leading(k)) => [Some(Frame::Branch(k, j)), None],
            (Frame::Multi(i, j), Step::Split(k)) => {
                [Some(Frame::Multi(i, k - 1)), Some(Frame::Branch(k, j))]
            }
            (Frame::Exterior(j), Step::Unpaired) => [Some(Frame::Exterior(j - 1)), None],
            (Frame::Exterior(j), Step::Closing(i)) => {
                [Some(Frame::Exterior(i - 1)), Some(Frame::Pair(i, j))]
            }
            (Frame::Pair(i, j), Step::FlankedMulti(k, f)) => [
                Some(Frame::Multi(i + 1 + f.three(), k - 1)),
                Some(Frame::Branch(k, j - 1 - f.five())),
            ],
            (Frame::Branch(i, _), Step::FlankedBranch(l, f)) => [Some(Frame::Pair(i + f.five(), l)), None],
            (Frame::Exterior(j), Step::FlankedClosing(p, f)) => {
                [Some(Frame::Exterior(p - 1 - f.five())), Some(Frame::Pair(p, j - f.three()))]
            }
            _ => [None, None],
        }
    }
}

/// Records the 1-based pair i·j in a 0-based pair set.
pub(crate) fn insert_pair(pairs: &mut PairSet, i: usize, j: usize) {
    pairs.insert(Pair::new((i - 1) as NAIDX, (j - 1) as NAIDX));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_energy::EnergyTables;
    use ef_energy::NucleotideVec;
    use crate::Constraints;
    use crate::FoldConfig;

    #[test]
    fn test_steps_cover_every_base_once() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let seq = NucleotideVec::try_from("GGGAAACCCAGGGAAACCC").unwrap();
        let ctx = FoldContext::new(&seq, &Constraints::none(), &tables, &config).unwrap();
        let frame = Frame::Pair(1, 19);
        for step in frame.steps(&ctx) {
            let inner: usize = frame.successors(step).iter().flatten().map(|f| match *f {
                Frame::Pair(p, q) | Frame::Multi(p, q) | Frame::Branch(p, q) => q - p + 1,
                Frame::Exterior(j) => j,
            }).sum();
            assert_eq!(inner + frame.fresh_bases(step), 19, "{:?}", step);
        }
    }

    #[test]
    fn test_flanked_steps_cover_every_base_once() {
        let tables = EnergyTables::default();
        let mut config = FoldConfig::default();
        config.model.dangles = ef_energy::DangleMode::Single;
        let seq = NucleotideVec::try_from("AGGGAAACCCAGGGAAACCCA").unwrap();
        let ctx = FoldContext::new(&seq, &Constraints::none(), &tables, &config).unwrap();
        let span = |f: &Frame| match *f {
            Frame::Pair(p, q) | Frame::Multi(p, q) | Frame::Branch(p, q) => q - p + 1,
            Frame::Exterior(j) => j,
        };
        for frame in [Frame::Exterior(21), Frame::Pair(2, 20), Frame::Branch(2, 12)] {
            let steps = frame.steps(&ctx);
            assert!(steps.iter().any(|s| s.is_flanked()), "{:?}", frame);
            for step in steps {
                let inner: usize = frame.successors(step).iter().flatten().map(span).sum();
                assert_eq!(inner + frame.fresh_bases(step), span(&frame), "{:?} {:?}", frame, step);
            }
        }

        let plain = FoldConfig::default();
        let ctx = FoldContext::new(&seq, &Constraints::none(), &tables, &plain).unwrap();
        assert!(!Frame::Exterior(21).steps(&ctx).iter().any(|s| s.is_flanked()));
    }

    #[test]
    fn test_step_order() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let seq = NucleotideVec::try_from("GGGAAACCC").unwrap();
        let ctx = FoldContext::new(&seq, &Constraints::none(), &tables, &config).unwrap();
        let steps = Frame::Pair(1, 9).steps(&ctx);
        assert_eq!(steps[0], Step::Hairpin);
        assert_eq!(steps[1], Step::Interior(2, 8));
        let steps = Frame::Exterior(9).steps(&ctx);
        assert_eq!(steps[0], Step::Unpaired);
        assert_eq!(steps[1], Step::Closing(1));
        assert!(Frame::Exterior(0).steps(&ctx).is_empty());
    }
}
