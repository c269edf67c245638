use std::f64::consts::LN_2;

use astro_float::BigFloat;
use astro_float::RoundingMode;

use super::BoltzmannSum;

/// Rounding of every arbitrary-precision operation.
const ROUNDING: RoundingMode = RoundingMode::ToEven;

/// Mantissa width of exact constants and the floor for promoted values.
pub(crate) const MIN_BITS: usize = 64;

/// Working precision of a binary operation: the wider operand.
fn bits(a: &BigFloat, b: &BigFloat) -> usize {
    let width = |x: &BigFloat| x.mantissa_max_bit_len().unwrap_or(MIN_BITS);
    width(a).max(width(b))
}

/// The value as `fraction · 2^exponent` with the fraction in [0.5, 1),
/// read from the most significant mantissa word.
fn split(x: &BigFloat) -> Option<(f64, i64)> {
    let exponent = x.exponent()?;
    let top = *x.mantissa_digits()?.last()?;
    if top == 0 {
        return None;
    }
    let word_bits = 8 * std::mem::size_of_val(&top) as i32;
    Some((top as f64 / 2f64.powi(word_bits), exponent as i64))
}

/// `x · 2^e` without intermediate overflow of `2^e`.
fn ldexp(x: f64, e: i64) -> f64 {
    let e = e.clamp(-2200, 2200) as i32;
    x * 2f64.powi(e / 2) * 2f64.powi(e - e / 2)
}

impl BoltzmannSum for BigFloat {
    fn zero() -> Self {
        BigFloat::from_i32(0, MIN_BITS)
    }

    fn one() -> Self {
        BigFloat::from_i32(1, MIN_BITS)
    }

    fn from_weight(w: f64, precision: u32) -> Self {
        debug_assert!(w >= 0.0 || w.is_nan(), "Boltzmann weights are non-negative");
        let w = match w {
            w if w.is_nan() => 0.0,
            w if w.is_infinite() => f64::MAX,
            w => w,
        };
        BigFloat::from_f64(w, (precision as usize).max(MIN_BITS))
    }

    fn plus(&self, other: &Self) -> Self {
        self.add(other, bits(self, other), ROUNDING)
    }

    fn times(&self, other: &Self) -> Self {
        self.mul(other, bits(self, other), ROUNDING)
    }

    fn is_zero(&self) -> bool {
        BigFloat::is_zero(self)
    }

    fn ratio(&self, other: &Self) -> f64 {
        if BigFloat::is_zero(self) {
            return 0.0;
        }
        BoltzmannSum::to_f64(&self.div(other, bits(self, other), ROUNDING))
    }

    fn ln(&self) -> f64 {
        match split(self) {
            Some((fraction, exponent)) => fraction.ln() + exponent as f64 * LN_2,
            None => f64::NEG_INFINITY,
        }
    }

    fn to_f64(&self) -> f64 {
        match split(self) {
            Some((fraction, exponent)) => ldexp(fraction, exponent),
            None => 0.0,
        }
    }

    fn to_decimal_string(&self) -> String {
        format!("{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::LN_10;

    #[test]
    fn test_f64_roundtrip() {
        for x in [0.1, 1.0, 1234.5, 1e-300, 1.7e308] {
            let big = BigFloat::from_weight(x, 64);
            assert!((BoltzmannSum::to_f64(&big) / x - 1.0).abs() < 1e-15, "{}", x);
        }
        assert!(BoltzmannSum::is_zero(&BigFloat::from_weight(0.0, 64)));
        let zero = <BigFloat as BoltzmannSum>::zero();
        assert_eq!(BoltzmannSum::to_f64(&zero), 0.0);
        assert_eq!(BoltzmannSum::ln(&zero), f64::NEG_INFINITY);
    }

    #[test]
    fn test_beyond_f64_range() {
        let big = BigFloat::from_weight(1e300, 128);
        let square = big.times(&big);
        assert!(BoltzmannSum::to_f64(&square).is_infinite());
        assert!((BoltzmannSum::ln(&square) - 600.0 * LN_10).abs() < 1e-9);
        assert!(square > big);
        assert!((square.ratio(&big) / 1e300 - 1.0).abs() < 1e-12);

        let tiny = BigFloat::from_weight(1e-300, 128);
        let tiny_square = tiny.times(&tiny);
        assert_eq!(BoltzmannSum::to_f64(&tiny_square), 0.0);
        assert!(!BoltzmannSum::is_zero(&tiny_square));
        assert!((BoltzmannSum::ln(&tiny_square) + 600.0 * LN_10).abs() < 1e-9);
        assert!(tiny_square < tiny);
    }

    #[test]
    fn test_precision_limits_addition() {
        let one = BigFloat::from_weight(1.0, 64);
        let negligible = BigFloat::from_weight(2f64.powi(-100), 64);
        assert_eq!(BoltzmannSum::to_f64(&one.plus(&negligible)), 1.0);
        let wide = BigFloat::from_weight(1.0, 256).plus(&negligible);
        assert!(wide > BigFloat::from_weight(1.0, 256));
        let half = BigFloat::from_weight(0.5, 64);
        assert_eq!(BoltzmannSum::to_f64(&one.plus(&half)), 1.5);
        assert_eq!(<BigFloat as BoltzmannSum>::zero().plus(&half), half);
    }

    #[test]
    fn test_decimal_string() {
        let s = BigFloat::from_weight(2.5, 64).to_decimal_string();
        assert!(s.starts_with("2.5"), "{}", s);
        let big = BigFloat::from_weight(1e300, 256);
        let s = big.times(&big).to_decimal_string();
        assert!(s.contains('e'), "{}", s);
    }
}
