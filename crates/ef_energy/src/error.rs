use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnergyError {
    #[error("invalid nucleotide '{symbol}' at position {position}")]
    InvalidSequence { position: usize, symbol: char },

    #[error("sequence of length {0} exceeds the supported maximum")]
    SequenceTooLong(usize),

    #[error("SHAPE entry {index} refers to position {position}, outside 1..={length}")]
    ShapePosition { index: usize, position: usize, length: usize },

    #[error("parameter table '{table}' has {found} entries, expected {expected}")]
    TableShape { table: String, found: usize, expected: usize },

    #[error("parameter bundle could not be parsed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parameter bundle could not be read: {0}")]
    Io(#[from] std::io::Error),
}
