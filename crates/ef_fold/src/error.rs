use thiserror::Error;

use ef_energy::EnergyError;
use ef_structure::StructureError;

/// Errors of the folding engines. Sequence, constraint and configuration
/// errors are raised before any DP table is allocated.
#[derive(Error, Debug)]
pub enum FoldError {
    #[error("invalid nucleotide '{symbol}' at position {position}")]
    InvalidSequence { position: usize, symbol: char },

    #[error("sequence of length {0} exceeds the supported maximum")]
    SequenceTooLong(usize),

    #[error("constraint {index} at ({i}, {j}): {message}")]
    ConstraintConflict { index: usize, i: usize, j: usize, message: String },

    #[error("no secondary structure satisfies the constraints")]
    NoFeasibleStructure,

    #[error("precision configuration: {0}")]
    PrecisionConfigurationError(String),

    #[error("sampled {structure} with ln p = {observed}, expected ln p = {expected}")]
    SamplingInconsistency { structure: String, observed: f64, expected: f64 },

    #[error("cannot allocate DP tables with {0} cells")]
    ResourceExhaustion(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("structure of length {found} does not match sequence length {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("pair ({i}, {j}) is not a canonical base pair")]
    NonCanonicalPair { i: usize, j: usize },

    #[error("traceback found no decomposition for ({i}, {j}) in {table}")]
    TracebackFailed { i: usize, j: usize, table: &'static str },

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Energy(EnergyError),
}

impl From<EnergyError> for FoldError {
    fn from(e: EnergyError) -> Self {
        match e {
            EnergyError::InvalidSequence { position, symbol } => {
                FoldError::InvalidSequence { position, symbol }
            }
            EnergyError::SequenceTooLong(n) => FoldError::SequenceTooLong(n),
            EnergyError::ShapePosition { index, position, length } => {
                FoldError::ConstraintConflict {
                    index,
                    i: position,
                    j: 0,
                    message: format!("SHAPE position outside 1..={}", length),
                }
            }
            other => FoldError::Energy(other),
        }
    }
}
