//! Numeric backends of the partition function.
//!
//! The recurrences are written once against [`BoltzmannSum`], a
//! non-negative number that can be added, multiplied, compared and
//! converted back to `f64`.

mod bigfloat;
mod hybrid;

pub use astro_float::BigFloat;
pub use hybrid::Hybrid;

use std::fmt::Debug;

pub trait BoltzmannSum: Clone + Debug + PartialOrd + Send + Sync {
    fn zero() -> Self;

    fn one() -> Self;

    /// Lifts a non-negative weight computed in `f64`. `precision` is the
    /// mantissa width (bits) for backends that have one.
    fn from_weight(w: f64, precision: u32) -> Self;

    fn plus(&self, other: &Self) -> Self;

    fn times(&self, other: &Self) -> Self;

    fn is_zero(&self) -> bool;

    /// `self / other` as `f64`; zero if `self` is zero.
    fn ratio(&self, other: &Self) -> f64;

    /// Natural logarithm, `-inf` for zero.
    fn ln(&self) -> f64;

    fn to_f64(&self) -> f64;

    /// Scientific notation with as many digits as the backend carries.
    fn to_decimal_string(&self) -> String;

    fn times_weight(&self, w: f64, precision: u32) -> Self {
        self.times(&Self::from_weight(w, precision))
    }

    fn add_assign(&mut self, other: &Self) {
        *self = self.plus(other);
    }

    /// `self^exp` by repeated squaring.
    fn powu(&self, mut exp: usize) -> Self {
        let mut base = self.clone();
        let mut acc = Self::one();
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.times(&base);
            }
            base = base.times(&base);
            exp >>= 1;
        }
        acc
    }
}

impl BoltzmannSum for f64 {
    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    fn from_weight(w: f64, _precision: u32) -> Self {
        w
    }

    fn plus(&self, other: &Self) -> Self {
        self + other
    }

    fn times(&self, other: &Self) -> Self {
        self * other
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }

    fn ratio(&self, other: &Self) -> f64 {
        if *self == 0.0 { 0.0 } else { self / other }
    }

    fn ln(&self) -> f64 {
        f64::ln(*self)
    }

    fn to_f64(&self) -> f64 {
        *self
    }

    fn to_decimal_string(&self) -> String {
        format!("{:e}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_of_weights<T: BoltzmannSum>(weights: &[f64]) -> T {
        weights.iter().fold(T::zero(), |acc, &w| acc.plus(&T::from_weight(w, 128)))
    }

    #[test]
    fn test_backends_agree_on_small_sums() {
        let weights = [1.5, 2.25, 1e-3, 7.0, 0.125];
        let native: f64 = sum_of_weights(&weights);
        let big: BigFloat = sum_of_weights(&weights);
        let hybrid: Hybrid = sum_of_weights(&weights);
        assert!((BoltzmannSum::to_f64(&big) - native).abs() < 1e-12);
        assert!((hybrid.to_f64() - native).abs() < 1e-12);
        assert!((BoltzmannSum::ln(&big) - native.ln()).abs() < 1e-12);
        assert!((big.ratio(&BigFloat::from_weight(2.0, 128)) - native / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_powu() {
        assert_eq!(3.0f64.powu(5), 243.0);
        let big = BigFloat::from_weight(3.0, 64).powu(5);
        assert_eq!(BoltzmannSum::to_f64(&big), 243.0);
        assert_eq!(2.0f64.powu(0), 1.0);
    }
}
