//! Immutable run configuration, passed by reference into every engine.

use std::f64::consts::LN_2;

use log::debug;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use ef_energy::DangleMode;
use ef_energy::ModelOptions;
use ef_energy::ShapeTransform;

use crate::FoldError;

/// Sequences at least this long use the hybrid backend and a non-zero
/// scale factor unless configured otherwise.
pub const LONG_SEQUENCE_THRESHOLD: usize = 1000;

pub const DEFAULT_PRECISION: u32 = 512;
pub const MIN_PRECISION: u32 = 64;
pub const MAX_PRECISION: u32 = 65536;

/// Automatic scale factor for long sequences, relative to the MFE.
pub const LONG_SEQUENCE_SCALE: f64 = 1.07;

/// Largest `ln` a native table value may reach, a margin below
/// `ln(f64::MAX)`.
pub const NATIVE_LN_LIMIT: f64 = 700.0;

/// Whether partition function values of `n` nt stay inside the native
/// range. `ln_peak` is the log weight of the best structure, `-MFE/RT`
/// (0 when counting); there are fewer than `2^n` structures.
pub fn native_fits(n: usize, ln_peak: f64) -> bool {
    ln_peak + n as f64 * LN_2 < NATIVE_LN_LIMIT
}

/// Numeric backend of the partition function tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// Native below [`LONG_SEQUENCE_THRESHOLD`] when the values fit (see
    /// [`native_fits`]), hybrid otherwise.
    #[default]
    Auto,
    Native,
    BigFloat,
    Hybrid,
}

/// How stochastic sampling uses the thread pool. The variants are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplingParallelism {
    #[default]
    None,
    /// Independent traversals run in parallel.
    Samples,
    /// The alternatives of one decomposition step are weighted in parallel.
    WithinSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub seed: u64,
    pub parallelism: SamplingParallelism,
    /// Verify that each sample was drawn with its Boltzmann probability.
    pub strict_check: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            parallelism: SamplingParallelism::None,
            strict_check: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuboptConfig {
    /// Derive every structure exactly once.
    pub unique_decomposition: bool,
    /// Suppress structures that were already emitted.
    pub duplicate_check: bool,
    /// Stop after this many structures; 0 is unlimited.
    pub max_structures: usize,
}

impl Default for SuboptConfig {
    fn default() -> Self {
        Self {
            unique_decomposition: true,
            duplicate_check: false,
            max_structures: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldConfig {
    pub model: ModelOptions,
    pub shape: ShapeTransform,
    pub backend: Backend,
    /// Mantissa bits of the arbitrary precision backend.
    pub precision: u32,
    /// Multiple of the MFE used to rescale Boltzmann weights; `None` selects
    /// 0 or [`LONG_SEQUENCE_SCALE`] by sequence length.
    pub scale_factor: Option<f64>,
    /// Worker threads; 0 lets rayon decide.
    pub threads: usize,
    pub max_contact_distance: Option<usize>,
    /// Minimum helix length a candidate pair must be able to join.
    pub prefilter: Option<usize>,
    /// Count structures instead of weighting them.
    pub count_mode: bool,
    pub sampling: SamplingConfig,
    pub subopt: SuboptConfig,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            model: ModelOptions::default(),
            shape: ShapeTransform::default(),
            backend: Backend::Auto,
            precision: DEFAULT_PRECISION,
            scale_factor: None,
            threads: 0,
            max_contact_distance: None,
            prefilter: None,
            count_mode: false,
            sampling: SamplingConfig::default(),
            subopt: SuboptConfig::default(),
        }
    }
}

impl FoldConfig {
    pub fn from_json(json: &str) -> Result<Self, FoldError> {
        let config: FoldConfig = serde_json::from_str(json)
            .map_err(|e| FoldError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FoldError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&self.precision) {
            return Err(FoldError::PrecisionConfigurationError(format!(
                "precision {} outside {}..={} bits", self.precision, MIN_PRECISION, MAX_PRECISION)));
        }
        if let Some(scale) = self.scale_factor {
            if !scale.is_finite() {
                return Err(FoldError::PrecisionConfigurationError(
                    format!("scale factor {} is not finite", scale)));
            }
        }
        if self.prefilter == Some(0) {
            return Err(FoldError::InvalidConfiguration("prefilter must be at least 1".into()));
        }
        if self.max_contact_distance == Some(0) {
            return Err(FoldError::InvalidConfiguration("contact distance must be positive".into()));
        }
        if !self.shape.slope.is_finite() || !self.shape.intercept.is_finite() {
            return Err(FoldError::InvalidConfiguration("SHAPE transform must be finite".into()));
        }
        if self.sampling.strict_check && self.sampling.parallelism == SamplingParallelism::Samples {
            return Err(FoldError::InvalidConfiguration(
                "strict sampling check cannot run with sample-level parallelism".into()));
        }
        Ok(())
    }

    /// Rejects single dangles, which only MFE folding and evaluation
    /// support.
    pub(crate) fn check_ensemble(&self) -> Result<(), FoldError> {
        if self.model.dangles == DangleMode::Single {
            return Err(FoldError::InvalidConfiguration(
                "single dangles (d1) support MFE folding and evaluation only".into()));
        }
        Ok(())
    }

    /// The concrete backend for a sequence of length `n` whose best
    /// structure has log weight `ln_peak`, if known.
    pub fn resolve_backend(&self, n: usize, ln_peak: Option<f64>) -> Backend {
        let fits = ln_peak.is_none_or(|peak| native_fits(n, peak));
        match self.backend {
            Backend::Auto if n < LONG_SEQUENCE_THRESHOLD && fits => Backend::Native,
            Backend::Auto => {
                debug!("{} nt with peak ln weight {:?} exceed the native range.", n, ln_peak);
                Backend::Hybrid
            }
            Backend::Native if !fits || (n >= LONG_SEQUENCE_THRESHOLD && !self.count_mode) => {
                warn!("Native backend on {} nt may overflow; results can be infinite.", n);
                Backend::Native
            }
            other => other,
        }
    }

    /// The scale factor for a sequence of length `n`.
    pub fn resolve_scale(&self, n: usize) -> f64 {
        match self.scale_factor {
            Some(s) => s,
            None if n < LONG_SEQUENCE_THRESHOLD => 0.0,
            None => LONG_SEQUENCE_SCALE,
        }
    }

    pub(crate) fn thread_pool(&self) -> Result<rayon::ThreadPool, FoldError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| FoldError::InvalidConfiguration(format!("thread pool: {}", e)))
    }
}
