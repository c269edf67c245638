//! The ef_energy crate.
//!
//! Nearest-neighbor free energy evaluation for RNA secondary structures:
//!  - nucleotide encoding,
//!  - parameter tables (built-in defaults or JSON bundles),
//!  - SHAPE pseudo-energies,
//!  - per-loop energy functions and whole-structure evaluation.
//!
//! All energies are integers in dcal/mol (1/100 kcal/mol).

mod error;
mod nucleotides;
mod tables;
mod shape;
mod model;

pub use error::*;
pub use nucleotides::*;
pub use tables::*;
pub use shape::*;
pub use model::*;

/// Sentinel for infeasible energies. Anything at or above is "infinite".
pub const INF: i32 = 10_000_000;

/// Minimum number of unpaired bases in a hairpin loop.
pub const TURN: usize = 3;

/// Largest tabulated loop size; bigger loops are extrapolated.
pub const MAXLOOP: usize = 30;

/// Gas constant in kcal/(mol K).
pub const GAS_CONSTANT: f64 = 0.00198721;

/// 37 degrees Celsius in Kelvin.
pub const TEMPERATURE: f64 = 310.15;

/// RT in dcal/mol, the unit of every energy in this crate.
pub const RT_DCAL: f64 = GAS_CONSTANT * TEMPERATURE * 100.0;
