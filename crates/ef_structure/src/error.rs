use thiserror::Error;

/// Errors raised while building or converting structure representations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("invalid dot-bracket character '{symbol}' at position {position}")]
    InvalidSymbol { symbol: char, position: usize },

    #[error("unmatched ')' at position {0}")]
    UnmatchedClose(usize),

    #[error("unmatched '(' at position {0}")]
    UnmatchedOpen(usize),

    #[error("pair ({i}, {j}) crosses or conflicts with another pair")]
    Crossing { i: usize, j: usize },

    #[error("structure of length {0} exceeds the supported maximum")]
    TooLong(usize),
}
