//! The ef_structure crate.
//!
//! Secondary structure representations shared by the energy model and
//! the folding engines:
//!  - dot-bracket strings,
//!  - pair tables (partner lists),
//!  - compact pair sets,
//!  - nearest-neighbor loop decomposition.
//!

mod error;
mod dotbracket;
mod pair_table;
mod pair_set;
mod loops;

pub use error::*;
pub use dotbracket::*;
pub use pair_table::*;
pub use pair_set::*;
pub use loops::*;


/// Nucleic Acid INdeX: we use `u16` (0 to 65k), which is plenty for
/// single-stranded RNA folding. `P1KEY` must be *twice as large* (in bits)
/// as `NAIDX`, since pairs `(NAIDX, NAIDX)` are compacted into one `P1KEY`.
pub type NAIDX = u16;

/// Pair key. Must be >= 2×`NAIDX` in bit width so we can safely pack two indices.
pub type P1KEY = u32;

const _: () = {
    assert!(2 * NAIDX::BITS <= P1KEY::BITS);
};
