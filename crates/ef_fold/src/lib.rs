//! The ef_fold crate.
//!
//! Thermodynamic folding of single RNA sequences under the
//! nearest-neighbor model of `ef_energy`:
//!  - minimum free energy structure (Zuker),
//!  - partition function (McCaskill), native or arbitrary precision,
//!  - base-pair probabilities,
//!  - stochastic sampling from the Boltzmann ensemble,
//!  - suboptimal structures within an energy band.
//!
//! Every engine honors the same constraints (forced and prohibited pairs
//! or bases, SHAPE reactivities) and reads one immutable [`FoldConfig`].
//! Positions in the public API are 1-based unless stated otherwise.
//!

/// Numeric backends of the partition function.
pub mod numeric;

mod error;
mod config;
mod constraints;
mod context;
mod decomposition;
mod mfe;
mod partition;
mod probability;
mod sampling;
mod subopt;

pub use error::*;
pub use config::*;
pub use constraints::*;
pub use partition::PartitionFunction;
pub use partition::PartitionValue;
pub use probability::BasePairProbabilities;
pub use sampling::SampleRecord;
pub use subopt::SuboptRecord;

use log::info;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::DangleMode;
use ef_energy::EnergyModel;
use ef_energy::EnergyTables;
use ef_energy::NearestNeighborModel;
use ef_energy::NucleotideVec;
use ef_energy::RT_DCAL;
use ef_structure::PairTable;

use context::FoldContext;
use numeric::BigFloat;
use numeric::BoltzmannSum;
use numeric::Hybrid;
use partition::PfTables;
use partition::Weights;

/// The minimum free energy and one structure that attains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfeResult {
    /// dcal/mol
    pub energy: i32,
    pub structure: PairTable,
}

impl MfeResult {
    pub fn energy_kcal(&self) -> f64 {
        self.energy as f64 / 100.0
    }

    /// 1-based partner array, 0 for unpaired positions.
    pub fn partner_array(&self) -> Vec<usize> {
        self.structure.partner_array()
    }
}

/// Summary of a run, e.g. for a JSON report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfeReport {
    pub structure: String,
    pub energy_kcal: f64,
}

impl From<&MfeResult> for MfeReport {
    fn from(result: &MfeResult) -> Self {
        Self { structure: result.structure.to_string(), energy_kcal: result.energy_kcal() }
    }
}

pub fn compute_mfe(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
) -> Result<MfeResult, FoldError> {
    let seq = NucleotideVec::try_from(sequence)?;
    let ctx = FoldContext::new(&seq, constraints, tables, config)?;
    let pool = config.thread_pool()?;
    let t = mfe::fill(&ctx, &pool)?;
    let structure = mfe::traceback(&ctx, &t)?;
    info!("MFE of {} nt: {:.2} kcal/mol.", ctx.n, t.energy() as f64 / 100.0);
    Ok(MfeResult { energy: t.energy(), structure })
}

/// Work that needs filled partition function tables, whatever the backend.
trait PartitionTask {
    type Output;

    fn run<T: BoltzmannSum>(
        self,
        ctx: &FoldContext,
        pf: &PfTables<T>,
        pool: &rayon::ThreadPool,
        backend: Backend,
    ) -> Result<Self::Output, FoldError>;
}

fn with_partition<K: PartitionTask>(
    ctx: &FoldContext,
    pool: &rayon::ThreadPool,
    task: K,
) -> Result<K::Output, FoldError> {
    let n = ctx.n;
    let config = ctx.config;
    config.check_ensemble()?;
    let scale = config.resolve_scale(n);
    let guarded = matches!(config.backend, Backend::Auto | Backend::Native);
    let reference = if !config.count_mode && (scale != 0.0 || guarded) {
        Some(mfe::fill(ctx, pool)?.energy())
    } else {
        None
    };
    let ln_peak = if config.count_mode { Some(0.0) } else { reference.map(|e| -(e as f64) / RT_DCAL) };
    let backend = config.resolve_backend(n, ln_peak);
    let weights = Weights::new(ctx, reference, scale);
    match backend {
        Backend::Native | Backend::Auto => {
            task.run(ctx, &partition::fill::<f64>(ctx, weights, pool)?, pool, Backend::Native)
        }
        Backend::BigFloat => {
            task.run(ctx, &partition::fill::<BigFloat>(ctx, weights, pool)?, pool, backend)
        }
        Backend::Hybrid => {
            task.run(ctx, &partition::fill::<Hybrid>(ctx, weights, pool)?, pool, backend)
        }
    }
}

struct Total;

impl PartitionTask for Total {
    type Output = PartitionFunction;

    fn run<T: BoltzmannSum>(
        self,
        ctx: &FoldContext,
        pf: &PfTables<T>,
        _pool: &rayon::ThreadPool,
        backend: Backend,
    ) -> Result<PartitionFunction, FoldError> {
        Ok(PartitionFunction {
            value: PartitionValue::from_tables(pf, ctx.n),
            backend,
            per_base_scale: pf.weights.per_base,
        })
    }
}

struct Probabilities;

impl PartitionTask for Probabilities {
    type Output = BasePairProbabilities;

    fn run<T: BoltzmannSum>(
        self,
        ctx: &FoldContext,
        pf: &PfTables<T>,
        pool: &rayon::ThreadPool,
        _backend: Backend,
    ) -> Result<BasePairProbabilities, FoldError> {
        probability::compute(ctx, pf, pool)
    }
}

struct Samples(usize);

impl PartitionTask for Samples {
    type Output = Vec<SampleRecord>;

    fn run<T: BoltzmannSum>(
        self,
        ctx: &FoldContext,
        pf: &PfTables<T>,
        pool: &rayon::ThreadPool,
        _backend: Backend,
    ) -> Result<Vec<SampleRecord>, FoldError> {
        sampling::sample(ctx, pf, self.0, pool)
    }
}

pub fn compute_partition_function(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
) -> Result<PartitionFunction, FoldError> {
    let seq = NucleotideVec::try_from(sequence)?;
    let ctx = FoldContext::new(&seq, constraints, tables, config)?;
    let pool = config.thread_pool()?;
    let pf = with_partition(&ctx, &pool, Total)?;
    info!("Partition function of {} nt ({:?}): ln Z = {:.6}, ensemble energy {:.2} kcal/mol.",
        ctx.n, pf.backend, pf.ln_z(), pf.ensemble_energy());
    Ok(pf)
}

pub fn compute_base_pair_probabilities(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
) -> Result<BasePairProbabilities, FoldError> {
    let seq = NucleotideVec::try_from(sequence)?;
    let ctx = FoldContext::new(&seq, constraints, tables, config)?;
    let pool = config.thread_pool()?;
    with_partition(&ctx, &pool, Probabilities)
}

/// Draws `count` structures from the Boltzmann ensemble and aggregates
/// them by structure.
pub fn sample_structures(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
    count: usize,
) -> Result<Vec<SampleRecord>, FoldError> {
    let seq = NucleotideVec::try_from(sequence)?;
    let ctx = FoldContext::new(&seq, constraints, tables, config)?;
    let pool = config.thread_pool()?;
    with_partition(&ctx, &pool, Samples(count))
}

/// All structures within `delta` kcal/mol of the MFE.
pub fn enumerate_suboptimal(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
    delta: f64,
) -> Result<Vec<SuboptRecord>, FoldError> {
    if !delta.is_finite() || delta < 0.0 {
        return Err(FoldError::InvalidConfiguration(format!("energy band {} must be finite and non-negative", delta)));
    }
    config.check_ensemble()?;
    let seq = NucleotideVec::try_from(sequence)?;
    let ctx = FoldContext::new(&seq, constraints, tables, config)?;
    let pool = config.thread_pool()?;
    let t = mfe::fill(&ctx, &pool)?;
    subopt::enumerate(&ctx, &t, delta)
}

/// The number of secondary structures the constraints admit.
pub fn count_structures(
    sequence: &str,
    constraints: &Constraints,
    tables: &EnergyTables,
    config: &FoldConfig,
) -> Result<PartitionValue, FoldError> {
    let mut config = config.clone();
    config.count_mode = true;
    // Dangles do not change the structure space.
    if config.model.dangles == DangleMode::Single {
        config.model.dangles = DangleMode::None;
    }
    if config.backend == Backend::Auto {
        config.backend = Backend::Hybrid;
    }
    Ok(compute_partition_function(sequence, constraints, tables, &config)?.value)
}

/// Free energy of a dot-bracket structure, in dcal/mol.
pub fn evaluate_structure(
    sequence: &str,
    structure: &str,
    tables: &EnergyTables,
    config: &FoldConfig,
) -> Result<i32, FoldError> {
    let seq = NucleotideVec::try_from(sequence)?;
    let pt = PairTable::try_from(structure)?;
    if pt.len() != seq.len() {
        return Err(FoldError::LengthMismatch { expected: seq.len(), found: pt.len() });
    }
    if let Some((i, j)) = pt.pairs().find(|&(i, j)| !seq[i].can_pair(seq[j])) {
        return Err(FoldError::NonCanonicalPair { i: i + 1, j: j + 1 });
    }
    let model = NearestNeighborModel::new(tables, &seq, config.model);
    Ok(model.energy_of_structure(&pt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use ef_energy::Base;
    use ef_energy::RT_DCAL;
    use ef_energy::TURN;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Every canonical non-crossing structure with hairpins of at least
    /// `TURN` bases, as dot-brackets of `seq[lo..hi]`.
    fn all_structures(seq: &[Base], lo: usize, hi: usize) -> Vec<String> {
        if lo >= hi {
            return vec![String::new()];
        }
        let mut out: Vec<String> = all_structures(seq, lo + 1, hi).into_iter()
            .map(|rest| format!(".{}", rest))
            .collect();
        for k in lo + TURN + 1..hi {
            if !seq[lo].can_pair(seq[k]) {
                continue;
            }
            let inner = all_structures(seq, lo + 1, k);
            let outer = all_structures(seq, k + 1, hi);
            for a in &inner {
                for b in &outer {
                    out.push(format!("({}){}", a, b));
                }
            }
        }
        out
    }

    /// (structure, energy) for the whole search space.
    fn exhaustive(sequence: &str, tables: &EnergyTables, config: &FoldConfig) -> Vec<(String, i32)> {
        let seq = NucleotideVec::try_from(sequence).unwrap();
        all_structures(&seq, 0, seq.len()).into_iter()
            .map(|s| {
                let e = evaluate_structure(sequence, &s, tables, config).unwrap();
                (s, e)
            })
            .collect()
    }

    const SEQUENCES: [&str; 5] = [
        "GGGAAACCC",
        "GCAUAGCUAGCA",
        "GGACUUCGGUCC",
        "ACGUACGUACGUAC",
        "GGGCAAAGCCCA",
    ];

    #[test]
    fn test_mfe_matches_exhaustive_search() {
        init();
        let tables = EnergyTables::default();
        for dangles in [DangleMode::Double, DangleMode::Single, DangleMode::None] {
            let mut config = FoldConfig::default();
            config.model.dangles = dangles;
            for seq in SEQUENCES {
                let all = exhaustive(seq, &tables, &config);
                let best = all.iter().map(|(_, e)| *e).min().unwrap();
                let mfe = compute_mfe(seq, &Constraints::none(), &tables, &config).unwrap();
                assert_eq!(mfe.energy, best, "{} {:?}", seq, dangles);
                let structure = mfe.structure.to_string();
                assert_eq!(evaluate_structure(seq, &structure, &tables, &config).unwrap(), best);
            }
        }
    }

    #[test]
    fn test_single_dangles_are_mfe_only() {
        let tables = EnergyTables::default();
        let mut config = FoldConfig::default();
        config.model.dangles = DangleMode::Single;
        let seq = "GGGAAACCCAGGGAAACCC";
        let none = Constraints::none();
        assert!(compute_mfe(seq, &none, &tables, &config).is_ok());
        assert!(evaluate_structure(seq, "(((...))).(((...)))", &tables, &config).is_ok());
        for err in [
            compute_partition_function(seq, &none, &tables, &config).map(|_| ()),
            compute_base_pair_probabilities(seq, &none, &tables, &config).map(|_| ()),
            sample_structures(seq, &none, &tables, &config, 10).map(|_| ()),
            enumerate_suboptimal(seq, &none, &tables, &config, 1.0).map(|_| ()),
        ] {
            assert!(matches!(err, Err(FoldError::InvalidConfiguration(_))));
        }
        let count = count_structures(seq, &none, &tables, &config).unwrap();
        let plain = count_structures(seq, &none, &tables, &FoldConfig::default()).unwrap();
        assert_eq!(count, plain);
    }

    #[test]
    fn test_partition_function_matches_exhaustive_sum() {
        init();
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        for seq in SEQUENCES {
            let all = exhaustive(seq, &tables, &config);
            let z: f64 = all.iter().map(|(_, e)| (-(*e as f64) / RT_DCAL).exp()).sum();
            let pf = compute_partition_function(seq, &Constraints::none(), &tables, &config).unwrap();
            assert_eq!(pf.backend, Backend::Native);
            assert!((pf.ln_z() - z.ln()).abs() < 1e-9, "{}: {} vs {}", seq, pf.ln_z(), z.ln());

            let count = count_structures(seq, &Constraints::none(), &tables, &config).unwrap();
            assert_eq!(count.to_f64().round() as usize, all.len(), "{}", seq);
        }
    }

    #[test]
    fn test_probabilities_match_exhaustive_sum() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        for seq in SEQUENCES {
            let all = exhaustive(seq, &tables, &config);
            let z: f64 = all.iter().map(|(_, e)| (-(*e as f64) / RT_DCAL).exp()).sum();
            let mut expected: AHashMap<(usize, usize), f64> = AHashMap::default();
            for (s, e) in &all {
                let pt = PairTable::try_from(s.as_str()).unwrap();
                for (i, j) in pt.pairs() {
                    *expected.entry((i + 1, j + 1)).or_insert(0.0) += (-(*e as f64) / RT_DCAL).exp() / z;
                }
            }
            let bpp = compute_base_pair_probabilities(seq, &Constraints::none(), &tables, &config).unwrap();
            let n = bpp.len();
            for i in 1..=n {
                for j in i + 1..=n {
                    let want = expected.get(&(i, j)).copied().unwrap_or(0.0);
                    assert!((bpp.get(i, j) - want).abs() < 1e-9, "{} ({}, {})", seq, i, j);
                }
            }
        }
    }

    #[test]
    fn test_subopt_matches_exhaustive_band() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        for seq in SEQUENCES {
            let all = exhaustive(seq, &tables, &config);
            let best = all.iter().map(|(_, e)| *e).min().unwrap();
            let mut want: Vec<(i32, String)> = all.into_iter()
                .filter(|(_, e)| *e <= best + 200)
                .map(|(s, e)| (e, s))
                .collect();
            want.sort();
            let got: Vec<(i32, String)> = enumerate_suboptimal(seq, &Constraints::none(), &tables, &config, 2.0)
                .unwrap()
                .into_iter()
                .map(|r| (r.energy, r.structure))
                .collect();
            assert_eq!(got, want, "{}", seq);
        }
    }

    #[test]
    fn test_zero_band_returns_mfe() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let seq = "GGGGAAACCCCAUAUGGGAAACCCA";
        let mfe = compute_mfe(seq, &Constraints::none(), &tables, &config).unwrap();
        let band = enumerate_suboptimal(seq, &Constraints::none(), &tables, &config, 0.0).unwrap();
        assert!(!band.is_empty());
        assert!(band.iter().all(|r| r.energy == mfe.energy));
        assert!(band.iter().any(|r| r.structure == mfe.structure.to_string()));
        assert!(enumerate_suboptimal(seq, &Constraints::none(), &tables, &config, -1.0).is_err());
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let tables = EnergyTables::default();
        let seq = "GGGAGCUCAGCCUGGGAGAGCGCCUGCUUUGCACGCAGGAGGUCAGCGGUUCGAUCCCGCUAGGCUCCA";
        let one = FoldConfig { threads: 1, ..Default::default() };
        let four = FoldConfig { threads: 4, ..Default::default() };
        let a = compute_mfe(seq, &Constraints::none(), &tables, &one).unwrap();
        let b = compute_mfe(seq, &Constraints::none(), &tables, &four).unwrap();
        assert_eq!(a, b);
        let za = compute_partition_function(seq, &Constraints::none(), &tables, &one).unwrap();
        let zb = compute_partition_function(seq, &Constraints::none(), &tables, &four).unwrap();
        assert_eq!(za, zb);
    }

    #[test]
    fn test_backends_agree() {
        let tables = EnergyTables::default();
        let seq = "GGGAGCUCAGCCUGGGAGAGCGCCUGCUUUGCACGCAGG";
        let native = compute_partition_function(seq, &Constraints::none(), &tables, &FoldConfig::default()).unwrap();
        for backend in [Backend::BigFloat, Backend::Hybrid] {
            let config = FoldConfig { backend, precision: 128, ..Default::default() };
            let other = compute_partition_function(seq, &Constraints::none(), &tables, &config).unwrap();
            assert_eq!(other.backend, backend);
            assert!((other.ln_z() - native.ln_z()).abs() < 1e-9, "{:?}", backend);
        }
        let scaled = FoldConfig { scale_factor: Some(1.07), ..Default::default() };
        let other = compute_partition_function(seq, &Constraints::none(), &tables, &scaled).unwrap();
        assert!(other.per_base_scale < 1.0);
        assert!((other.ln_z() - native.ln_z()).abs() < 1e-9);
    }

    #[test]
    fn test_auto_backend_survives_overflowing_sequences() {
        init();
        let tables = EnergyTables::default();
        // 160 G, a loop, 160 C: Z is about e^844, beyond f64.
        let seq = format!("{}AAAA{}", "G".repeat(160), "C".repeat(160));
        let auto = FoldConfig { precision: 128, ..Default::default() };
        let pf = compute_partition_function(&seq, &Constraints::none(), &tables, &auto).unwrap();
        assert_eq!(pf.backend, Backend::Hybrid);
        assert_eq!(pf.per_base_scale, 1.0);
        assert!(pf.ln_z().is_finite() && pf.ln_z() > f64::MAX.ln(), "{}", pf.ln_z());

        // Native f64 only fits once the weights are scaled by the MFE.
        let scaled = FoldConfig { backend: Backend::Native, scale_factor: Some(1.0), ..Default::default() };
        let native = compute_partition_function(&seq, &Constraints::none(), &tables, &scaled).unwrap();
        assert_eq!(native.backend, Backend::Native);
        assert!((native.ln_z() - pf.ln_z()).abs() < 1e-9 * pf.ln_z(), "{} vs {}", native.ln_z(), pf.ln_z());

        let bpp = compute_base_pair_probabilities(&seq, &Constraints::none(), &tables, &auto).unwrap();
        let first: f64 = (2..=seq.len()).map(|j| bpp.get(1, j)).sum();
        assert!(first.is_finite() && first > 0.9 && first <= 1.0 + 1e-9, "{}", first);
        assert!(bpp.get(1, seq.len()).is_finite());
    }

    #[test]
    fn test_mfe_pairs_are_probable() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let seq = "GGGAGCUCAGCCUGGGAGAGCGCCUGCUUUGCACGCAGG";
        let mfe = compute_mfe(seq, &Constraints::none(), &tables, &config).unwrap();
        let bpp = compute_base_pair_probabilities(seq, &Constraints::none(), &tables, &config).unwrap();
        for (i, j) in mfe.structure.pairs() {
            assert!(bpp.get(i + 1, j + 1) > 0.0);
        }
        for i in 1..=bpp.len() {
            let row: f64 = (1..=bpp.len()).filter(|&j| j != i).map(|j| bpp.get(i, j)).sum();
            assert!(row <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_sampling_frequencies() {
        let tables = EnergyTables::default();
        let mut config = FoldConfig { threads: 4, ..Default::default() };
        config.sampling.parallelism = SamplingParallelism::Samples;
        let seq = "GGGGAAACCCCAUAGCAUGC";
        let records = sample_structures(seq, &Constraints::none(), &tables, &config, 10_000).unwrap();
        let top = &records[0];
        assert!((top.empirical - top.boltzmann).abs() < 0.03, "{:?}", top);
        assert_eq!(records.iter().map(|r| r.count).sum::<usize>(), 10_000);
    }

    #[test]
    fn test_constraint_errors() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        let constraints = Constraints::none().with(Constraint::force(4, 9, 1));
        let err = compute_mfe("GGGAAACCCA", &constraints, &tables, &config).unwrap_err();
        assert!(matches!(err, FoldError::ConstraintConflict { index: 0, i: 4, j: 9, .. }));

        let constraints = Constraints::none().with_shape(vec![(11, 0.5)]);
        let err = compute_mfe("GGGAAACCCA", &constraints, &tables, &config).unwrap_err();
        assert!(matches!(err, FoldError::ConstraintConflict { .. }));

        let err = compute_mfe("GGGAXACCC", &Constraints::none(), &tables, &config).unwrap_err();
        assert!(matches!(err, FoldError::InvalidSequence { position: 5, symbol: 'X' }));
    }

    #[test]
    fn test_evaluate_structure() {
        let tables = EnergyTables::default();
        let config = FoldConfig::default();
        assert_eq!(evaluate_structure("GGGAAACCC", "(((...)))", &tables, &config).unwrap(), -120);
        assert!(matches!(
            evaluate_structure("GGGAAACCC", "(((...))", &tables, &config),
            Err(FoldError::LengthMismatch { expected: 9, found: 8 })));
        assert!(matches!(
            evaluate_structure("GGGAAACCA", "(((...)))", &tables, &config),
            Err(FoldError::NonCanonicalPair { i: 1, j: 9 })));
        assert!(matches!(
            evaluate_structure("GGGAAACCC", "(((...))(", &tables, &config),
            Err(FoldError::Structure(_))));
    }

    #[test]
    fn test_mfe_result_outputs() {
        let tables = EnergyTables::default();
        let mfe = compute_mfe("GGGAAACCC", &Constraints::none(), &tables, &FoldConfig::default()).unwrap();
        assert_eq!(mfe.energy_kcal(), -1.2);
        assert_eq!(mfe.partner_array(), vec![0, 9, 8, 7, 0, 0, 0, 3, 2, 1]);
        let report = MfeReport::from(&mfe);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"structure":"(((...)))","energy_kcal":-1.2}"#);
    }
}
