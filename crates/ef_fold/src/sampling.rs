//! Stochastic traceback through the partition function tables.

use ahash::AHashMap;
use log::debug;
use log::info;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::RT_DCAL;
use ef_structure::PairSet;
use ef_structure::PairTable;

use crate::context::FoldContext;
use crate::decomposition::insert_pair;
use crate::decomposition::Frame;
use crate::mfe::traceback_failure;
use crate::numeric::BoltzmannSum;
use crate::partition::unscaled_ln;
use crate::partition::PfTables;
use crate::FoldError;
use crate::SamplingParallelism;

/// One distinct structure among the drawn samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub structure: String,
    /// Free energy in dcal/mol.
    pub energy: i32,
    pub count: usize,
    /// `count / samples`
    pub empirical: f64,
    /// Probability of the structure in the ensemble.
    pub boltzmann: f64,
}

#[derive(Debug)]
struct Draw {
    structure: PairTable,
    energy: i32,
    ln_p: f64,
}

/// Draws one structure. With a pool, the alternatives of each frame are
/// weighted in parallel.
fn draw<T: BoltzmannSum, R: Rng>(
    ctx: &FoldContext,
    pf: &PfTables<T>,
    rng: &mut R,
    within: Option<&rayon::ThreadPool>,
) -> Result<Draw, FoldError> {
    let mut pairs = PairSet::new(ctx.n);
    let mut stack = vec![Frame::Exterior(ctx.n)];
    let mut energy = 0;
    let mut ln_p = 0.0;

    while let Some(frame) = stack.pop() {
        if frame == Frame::Exterior(0) {
            continue;
        }
        if let Frame::Pair(i, j) = frame {
            insert_pair(&mut pairs, i, j);
        }
        let total = pf.value(frame);
        let steps = frame.steps(ctx);
        let weights: Vec<T> = match within {
            Some(pool) => pool.install(|| {
                steps.par_iter().map(|&s| pf.step_weight(ctx, frame, s, &[])).collect()
            }),
            None => steps.iter().map(|&s| pf.step_weight(ctx, frame, s, &[])).collect(),
        };

        let threshold = total.times_weight(rng.random::<f64>(), pf.weights.precision);
        let mut cumulative = T::zero();
        let mut chosen = None;
        for (idx, weight) in weights.iter().enumerate() {
            if weight.is_zero() {
                continue;
            }
            chosen = Some(idx);
            cumulative.add_assign(weight);
            if cumulative > threshold {
                break;
            }
        }
        // Rounding can leave the cumulative sum just below the threshold;
        // the last non-zero alternative is taken then.
        let idx = chosen.ok_or_else(|| traceback_failure(frame))?;
        let step = steps[idx];

        ln_p += weights[idx].ratio(total).ln();
        energy += frame.step_energy(ctx, step);
        stack.extend(frame.successors(step).into_iter().flatten());
    }

    Ok(Draw { structure: PairTable::try_from(&pairs)?, energy, ln_p })
}

pub(crate) fn sample<T: BoltzmannSum>(
    ctx: &FoldContext,
    pf: &PfTables<T>,
    count: usize,
    pool: &rayon::ThreadPool,
) -> Result<Vec<SampleRecord>, FoldError> {
    let config = ctx.config.sampling;
    let count_mode = ctx.config.count_mode;
    let ln_z = unscaled_ln(pf, ctx.n);
    debug!("Sampling {} structures, {:?}, seed {}.", count, config.parallelism, config.seed);

    let one = |index: usize| -> Result<Draw, FoldError> {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
        let within = (config.parallelism == SamplingParallelism::WithinSample).then_some(pool);
        let d = draw(ctx, pf, &mut rng, within)?;
        if config.strict_check {
            let expected = if count_mode { -ln_z } else { -(d.energy as f64) / RT_DCAL - ln_z };
            if (d.ln_p - expected).abs() > 1e-6 * expected.abs().max(1.0) {
                return Err(FoldError::SamplingInconsistency {
                    structure: d.structure.to_string(),
                    observed: d.ln_p,
                    expected,
                });
            }
        }
        Ok(d)
    };

    let draws: Vec<Draw> = match config.parallelism {
        SamplingParallelism::Samples => {
            pool.install(|| (0..count).into_par_iter().map(one).collect::<Result<_, _>>())?
        }
        _ => (0..count).map(one).collect::<Result<_, _>>()?,
    };

    let mut seen: AHashMap<String, (usize, i32)> = AHashMap::default();
    for d in draws {
        seen.entry(d.structure.to_string()).or_insert((0, d.energy)).0 += 1;
    }

    let mut records: Vec<SampleRecord> = seen.into_iter()
        .map(|(structure, (hits, energy))| {
            let boltzmann = if count_mode {
                (-ln_z).exp()
            } else {
                (-(energy as f64) / RT_DCAL - ln_z).exp()
            };
            SampleRecord {
                structure,
                energy,
                count: hits,
                empirical: hits as f64 / count as f64,
                boltzmann,
            }
        })
        .collect();
    records.sort_by(|a, b| {
        b.count.cmp(&a.count)
            .then(a.energy.cmp(&b.energy))
            .then_with(|| a.structure.cmp(&b.structure))
    });

    info!("Drew {} samples, {} distinct structures.", count, records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_energy::EnergyModel;
    use ef_energy::EnergyTables;
    use ef_energy::NucleotideVec;
    use crate::partition;
    use crate::partition::Weights;
    use crate::Constraints;
    use crate::FoldConfig;

    fn run(seq: &str, config: &FoldConfig, count: usize) -> Vec<SampleRecord> {
        let tables = EnergyTables::default();
        let seq = NucleotideVec::try_from(seq).unwrap();
        let ctx = FoldContext::new(&seq, &Constraints::none(), &tables, config).unwrap();
        let pool = config.thread_pool().unwrap();
        let pf = partition::fill::<f64>(&ctx, Weights::new(&ctx, None, 0.0), &pool).unwrap();
        let records = sample(&ctx, &pf, count, &pool).unwrap();
        for r in &records {
            let pt = PairTable::try_from(r.structure.as_str()).unwrap();
            assert_eq!(ctx.model.energy_of_structure(&pt), r.energy);
        }
        records
    }

    #[test]
    fn test_samples_are_reproducible() {
        let seq = "GGGGAAACCCCAUAUGGGAAACCCA";
        let mut config = FoldConfig { threads: 2, ..Default::default() };
        let a = run(seq, &config, 200);
        let b = run(seq, &config, 200);
        assert_eq!(a, b);

        config.sampling.parallelism = SamplingParallelism::Samples;
        let c = run(seq, &config, 200);
        assert_eq!(a, c);
        assert_eq!(a.iter().map(|r| r.count).sum::<usize>(), 200);
    }

    #[test]
    fn test_strict_check_within_sample() {
        let mut config = FoldConfig::default();
        config.sampling.strict_check = true;
        config.sampling.parallelism = SamplingParallelism::WithinSample;
        let records = run("GGGAAAUCCCAGCAUAGC", &config, 100);
        assert!(!records.is_empty());
    }

    #[test]
    fn test_count_mode_is_uniform() {
        let config = FoldConfig { count_mode: true, ..Default::default() };
        let records = run("GAAAC", &config, 2000);
        assert_eq!(records.len(), 2);
        for r in &records {
            assert!((r.boltzmann - 0.5).abs() < 1e-12);
            assert!((r.empirical - 0.5).abs() < 0.05);
        }
    }
}
