use std::cmp::Ordering;

use super::bigfloat::MIN_BITS;
use super::BigFloat;
use super::BoltzmannSum;

const SAFE_MIN: f64 = 1e-250;
const SAFE_MAX: f64 = 1e250;

/// Native `f64` arithmetic until a value leaves the safe range, then
/// [`BigFloat`] for the rest of its lifetime.
#[derive(Clone, Debug)]
pub enum Hybrid {
    Native { value: f64, precision: u32 },
    Big(BigFloat),
}

#[inline]
fn in_range(x: f64) -> bool {
    (SAFE_MIN..=SAFE_MAX).contains(&x)
}

impl Hybrid {
    pub fn is_native(&self) -> bool {
        matches!(self, Hybrid::Native { .. })
    }

    fn precision(&self) -> u32 {
        match self {
            Hybrid::Native { precision, .. } => *precision,
            Hybrid::Big(b) => b.mantissa_max_bit_len().map_or(0, |bits| bits as u32),
        }
    }

    fn promote(&self) -> BigFloat {
        match self {
            Hybrid::Native { value, precision } => {
                BigFloat::from_f64(*value, (*precision as usize).max(MIN_BITS))
            }
            Hybrid::Big(b) => b.clone(),
        }
    }
}

impl PartialEq for Hybrid {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Hybrid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Hybrid::Native { value: a, .. }, Hybrid::Native { value: b, .. }) => a.partial_cmp(b),
            _ => self.promote().partial_cmp(&other.promote()),
        }
    }
}

impl BoltzmannSum for Hybrid {
    fn zero() -> Self {
        Hybrid::Native { value: 0.0, precision: 0 }
    }

    fn one() -> Self {
        Hybrid::Native { value: 1.0, precision: 0 }
    }

    fn from_weight(w: f64, precision: u32) -> Self {
        if w == 0.0 || in_range(w) {
            Hybrid::Native { value: w, precision }
        } else {
            Hybrid::Big(BigFloat::from_weight(w, precision))
        }
    }

    fn plus(&self, other: &Self) -> Self {
        let precision = self.precision().max(other.precision());
        if let (Hybrid::Native { value: a, .. }, Hybrid::Native { value: b, .. }) = (self, other) {
            let sum = a + b;
            if sum == 0.0 || in_range(sum) {
                return Hybrid::Native { value: sum, precision };
            }
        }
        Hybrid::Big(self.promote().plus(&other.promote()))
    }

    fn times(&self, other: &Self) -> Self {
        let precision = self.precision().max(other.precision());
        if let (Hybrid::Native { value: a, .. }, Hybrid::Native { value: b, .. }) = (self, other) {
            if *a == 0.0 || *b == 0.0 {
                return Hybrid::Native { value: 0.0, precision };
            }
            let product = a * b;
            if in_range(product) {
                return Hybrid::Native { value: product, precision };
            }
        }
        Hybrid::Big(self.promote().times(&other.promote()))
    }

    fn is_zero(&self) -> bool {
        match self {
            Hybrid::Native { value, .. } => *value == 0.0,
            Hybrid::Big(b) => BoltzmannSum::is_zero(b),
        }
    }

    fn ratio(&self, other: &Self) -> f64 {
        match (self, other) {
            (Hybrid::Native { value: a, .. }, Hybrid::Native { value: b, .. }) => a.ratio(b),
            _ => self.promote().ratio(&other.promote()),
        }
    }

    fn ln(&self) -> f64 {
        match self {
            Hybrid::Native { value, .. } => value.ln(),
            Hybrid::Big(b) => BoltzmannSum::ln(b),
        }
    }

    fn to_f64(&self) -> f64 {
        match self {
            Hybrid::Native { value, .. } => *value,
            Hybrid::Big(b) => BoltzmannSum::to_f64(b),
        }
    }

    fn to_decimal_string(&self) -> String {
        match self {
            Hybrid::Native { value, .. } => format!("{:e}", value),
            Hybrid::Big(b) => b.to_decimal_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_native_in_range() {
        let a = Hybrid::from_weight(2.0, 128);
        let b = a.times(&Hybrid::from_weight(1e10, 128)).plus(&Hybrid::one());
        assert!(b.is_native());
        assert_eq!(b.to_f64(), 2e10 + 1.0);
    }

    #[test]
    fn test_promotes_on_overflow_and_underflow() {
        let big = Hybrid::from_weight(1e200, 128);
        let square = big.times(&big);
        assert!(!square.is_native());
        assert!((square.ln() - 400.0 * std::f64::consts::LN_10).abs() < 1e-9);
        assert!(square > big);

        let tiny = Hybrid::from_weight(1e-200, 128);
        let tiny_square = tiny.times(&tiny);
        assert!(!tiny_square.is_native());
        assert!(!tiny_square.is_zero());
        assert!(tiny_square < tiny);
    }

    #[test]
    fn test_zero_stays_native() {
        let zero = Hybrid::zero().times(&Hybrid::from_weight(1e-300, 128));
        assert!(zero.is_native());
        assert!(zero.is_zero());
    }
}
