//! Suboptimal structures within an energy band above the MFE.
//!
//! Depth-first over partial structures. The MFE tables give an exact lower
//! bound for every pending cell, so a partial is only expanded while its
//! committed energy plus the optimal completion stays inside the band.

use ahash::AHashSet;
use log::debug;
use log::info;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::INF;
use ef_energy::TURN;
use ef_structure::PairSet;
use ef_structure::PairTable;

use crate::context::FoldContext;
use crate::decomposition::insert_pair;
use crate::decomposition::Frame;
use crate::decomposition::Step;
use crate::mfe::MfeTables;
use crate::FoldError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuboptRecord {
    pub structure: String,
    /// Free energy in dcal/mol.
    pub energy: i32,
}

impl SuboptRecord {
    pub fn energy_kcal(&self) -> f64 {
        self.energy as f64 / 100.0
    }
}

/// A grammar step, or one of the redundant multiloop moves that are only
/// admitted without unique decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Step(Step),
    /// `Multi(i, j)` is `Multi(i, j - 1)` plus j unpaired.
    Trailing,
    /// `Multi(i, j)` is `Multi(i, k - 1)` plus `Multi(k, j)`.
    Join(usize),
}

#[derive(Debug, Clone)]
struct Partial {
    frames: Vec<Frame>,
    pairs: Vec<(usize, usize)>,
    energy: i32,
    bound: i32,
}

fn moves(ctx: &FoldContext, frame: Frame, unique: bool) -> Vec<Move> {
    let mut moves: Vec<Move> = frame.steps(ctx).into_iter().map(Move::Step).collect();
    if let (Frame::Multi(i, j), false) = (frame, unique) {
        if j > i + TURN + 1 && ctx.unpaired_ok(j, j) {
            moves.push(Move::Trailing);
        }
        moves.extend((i + TURN + 2..(j + 1).saturating_sub(TURN + 1)).map(Move::Join));
    }
    moves
}

fn move_energy(ctx: &FoldContext, frame: Frame, m: Move) -> i32 {
    match m {
        Move::Step(step) => frame.step_energy(ctx, step),
        Move::Trailing => ctx.model.ml_unpaired(1),
        Move::Join(_) => 0,
    }
}

fn move_successors(frame: Frame, m: Move) -> [Option<Frame>; 2] {
    match (frame, m) {
        (_, Move::Step(step)) => frame.successors(step),
        (Frame::Multi(i, j), Move::Trailing) => [Some(Frame::Multi(i, j - 1)), None],
        (Frame::Multi(i, j), Move::Join(k)) => [Some(Frame::Multi(i, k - 1)), Some(Frame::Multi(k, j))],
        _ => [None, None],
    }
}

pub(crate) fn enumerate(ctx: &FoldContext, t: &MfeTables, delta: f64) -> Result<Vec<SuboptRecord>, FoldError> {
    let config = ctx.config.subopt;
    let mfe = t.energy();
    let threshold = mfe.saturating_add((delta * 100.0).round() as i32);
    debug!("Suboptimal structures up to {} dcal/mol (MFE {}).", threshold, mfe);

    let mut records = Vec::new();
    let mut seen: AHashSet<String> = AHashSet::default();
    let mut stack = vec![Partial {
        frames: vec![Frame::Exterior(ctx.n)],
        pairs: Vec::new(),
        energy: 0,
        bound: mfe,
    }];

    while let Some(mut partial) = stack.pop() {
        let Some(frame) = partial.frames.pop() else {
            let mut pairs = PairSet::new(ctx.n);
            for &(i, j) in &partial.pairs {
                insert_pair(&mut pairs, i, j);
            }
            let structure = PairTable::try_from(&pairs)?.to_string();
            if config.duplicate_check && !seen.insert(structure.clone()) {
                continue;
            }
            records.push(SuboptRecord { structure, energy: partial.energy });
            if config.max_structures > 0 && records.len() >= config.max_structures {
                break;
            }
            continue;
        };
        if frame == Frame::Exterior(0) {
            stack.push(partial);
            continue;
        }
        if let Frame::Pair(i, j) = frame {
            partial.pairs.push((i, j));
        }

        let rest = partial.bound - t.value(frame);
        let mut children = Vec::new();
        for m in moves(ctx, frame, config.unique_decomposition) {
            let mut bound = rest + move_energy(ctx, frame, m);
            let successors = move_successors(frame, m);
            for succ in successors.iter().flatten() {
                bound = bound.saturating_add(t.value(*succ));
            }
            if bound >= INF || bound > threshold {
                continue;
            }
            let mut child = partial.clone();
            child.frames.extend(successors.into_iter().flatten());
            child.energy += move_energy(ctx, frame, m);
            child.bound = bound;
            children.push(child);
        }
        // First move on top of the stack.
        stack.extend(children.into_iter().rev());
    }

    records.sort_by(|a, b| a.energy.cmp(&b.energy).then_with(|| a.structure.cmp(&b.structure)));
    info!("Enumerated {} structures within {} kcal/mol of the MFE.", records.len(), delta);
    Ok(records)
}
