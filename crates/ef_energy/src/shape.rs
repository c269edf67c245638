//! SHAPE reactivity pseudo-energies.

use serde::Deserialize;
use serde::Serialize;

use crate::EnergyError;

/// `ΔG_shape(r) = slope·ln(r + 1) + intercept`, in kcal/mol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeTransform {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for ShapeTransform {
    fn default() -> Self {
        Self { slope: 2.6, intercept: -0.8 }
    }
}

impl ShapeTransform {
    /// Pseudo-energy in dcal/mol. Negative or missing (NaN) reactivities
    /// carry no information and contribute nothing.
    pub fn pseudo_energy(&self, reactivity: f64) -> i32 {
        if reactivity.is_nan() || reactivity < 0.0 {
            return 0;
        }
        (100.0 * (self.slope * (reactivity + 1.0).ln() + self.intercept)).round() as i32
    }

    /// Per-position energies, 1-based with a zero at both ends
    /// (length + 2 entries). Every position must lie in `1..=length`.
    pub fn profile(&self, length: usize, reactivities: &[(usize, f64)]) -> Result<Vec<i32>, EnergyError> {
        let mut energies = vec![0; length + 2];
        for (index, &(position, value)) in reactivities.iter().enumerate() {
            if position == 0 || position > length {
                return Err(EnergyError::ShapePosition { index, position, length });
            }
            energies[position] = self.pseudo_energy(value);
        }
        Ok(energies)
    }
}
