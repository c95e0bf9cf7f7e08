//! Arbitrary-precision signed integers with explicit infinity.
//!
//! `MslInt` backs the INTEGER primitive. Digit arithmetic is delegated to
//! `num-bigint`; this module adds the MSL-visible semantics: decimal parsing
//! that truncates at the first invalid character, the infinity algebra table,
//! and the extended operation set (pow, pow_mod, factorial, isqrt).

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// Signed integer of unbounded magnitude, or a signed infinity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MslInt {
    Finite(BigInt),
    Infinity { negative: bool },
}

impl MslInt {
    /// Positive infinity.
    pub fn infinity() -> Self {
        MslInt::Infinity { negative: false }
    }

    /// Zero.
    pub fn zero() -> Self {
        MslInt::Finite(BigInt::zero())
    }

    /// Parses a decimal literal. Accepts an optional leading sign and the
    /// spellings `inf` / `-inf`; digits are consumed up to the first invalid
    /// character, and an empty digit run yields zero.
    pub fn parse(text: &str) -> Self {
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        if digits == "inf" {
            return MslInt::Infinity { negative };
        }
        let end = digits
            .bytes()
            .position(|byte| !byte.is_ascii_digit())
            .unwrap_or(digits.len());
        let magnitude = if end == 0 {
            BigInt::zero()
        } else {
            digits[..end].parse::<BigInt>().unwrap_or_else(|_| BigInt::zero())
        };
        if negative {
            MslInt::Finite(-magnitude)
        } else {
            MslInt::Finite(magnitude)
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, MslInt::Infinity { .. })
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, MslInt::Finite(value) if value.is_zero())
    }

    pub fn is_negative(&self) -> bool {
        match self {
            MslInt::Finite(value) => value.is_negative(),
            MslInt::Infinity { negative } => *negative,
        }
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        match self {
            MslInt::Finite(value) => MslInt::Finite(value.abs()),
            MslInt::Infinity { .. } => MslInt::Infinity { negative: false },
        }
    }

    /// Conversion to a host double; infinities map to IEEE infinities.
    pub fn to_f64(&self) -> f64 {
        match self {
            MslInt::Finite(value) => value.to_f64().unwrap_or_else(|| {
                if value.is_negative() {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                }
            }),
            MslInt::Infinity { negative: true } => f64::NEG_INFINITY,
            MslInt::Infinity { negative: false } => f64::INFINITY,
        }
    }

    /// Index conversion for array and string subscripts.
    pub fn to_usize(&self) -> Option<usize> {
        match self {
            MslInt::Finite(value) => value.to_usize(),
            MslInt::Infinity { .. } => None,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        match self {
            MslInt::Finite(value) => value.to_u64(),
            MslInt::Infinity { .. } => None,
        }
    }

    /// Heap bytes owned by the digit storage, reported to the collector.
    pub fn byte_size(&self) -> usize {
        match self {
            MslInt::Finite(value) => (value.bits() as usize + 7) / 8,
            MslInt::Infinity { .. } => 0,
        }
    }

    /// Raises `self` to `exponent`. Negative exponents truncate toward zero
    /// (`0^negative` is infinity, consistent with the division table).
    pub fn pow(&self, exponent: &MslInt) -> Self {
        let exp_odd = matches!(exponent, MslInt::Finite(e) if !(e % BigInt::from(2)).is_zero());
        if exponent.is_negative() {
            return match self {
                MslInt::Finite(base) => {
                    if base.is_zero() {
                        MslInt::Infinity { negative: false }
                    } else if base.abs() == BigInt::from(1) {
                        let negative = base.is_negative() && exp_odd;
                        MslInt::Finite(if negative { BigInt::from(-1) } else { BigInt::from(1) })
                    } else {
                        MslInt::zero()
                    }
                }
                MslInt::Infinity { .. } => MslInt::zero(),
            };
        }
        match (self, exponent) {
            (MslInt::Infinity { negative }, _) => {
                if exponent.is_zero() {
                    MslInt::Finite(BigInt::from(1))
                } else {
                    MslInt::Infinity {
                        negative: *negative && exp_odd,
                    }
                }
            }
            (MslInt::Finite(base), MslInt::Finite(exp)) => match exp.to_u64() {
                Some(exp) => MslInt::Finite(pow_by_squaring(base, exp)),
                // Astronomical exponent: only magnitude <= 1 stays finite.
                None => {
                    if base.is_zero() {
                        MslInt::zero()
                    } else if base.abs() == BigInt::from(1) {
                        MslInt::Finite(base.clone())
                    } else {
                        MslInt::Infinity {
                            negative: base.is_negative(),
                        }
                    }
                }
            },
            (MslInt::Finite(base), MslInt::Infinity { .. }) => {
                if base.is_zero() {
                    MslInt::zero()
                } else if base.abs() == BigInt::from(1) {
                    MslInt::Finite(BigInt::from(1))
                } else {
                    MslInt::Infinity { negative: false }
                }
            }
        }
    }

    /// Modular exponentiation with a non-negative exponent. A zero or
    /// infinite modulus yields zero, matching the remainder table.
    pub fn pow_mod(&self, exponent: u64, modulus: &MslInt) -> Self {
        let (base, modulus) = match (self, modulus) {
            (MslInt::Finite(base), MslInt::Finite(modulus)) if !modulus.is_zero() => {
                (base, modulus)
            }
            _ => return MslInt::zero(),
        };
        let mut result = BigInt::from(1);
        let mut base = base % modulus;
        let mut exponent = exponent;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result * &base % modulus;
            }
            base = &base * &base % modulus;
            exponent >>= 1;
        }
        MslInt::Finite(result)
    }

    /// Factorial; arguments below one yield one.
    pub fn factorial(&self) -> Self {
        match self {
            MslInt::Infinity { negative: false } => MslInt::infinity(),
            MslInt::Infinity { negative: true } => MslInt::Finite(BigInt::from(1)),
            MslInt::Finite(value) => {
                let mut result = BigInt::from(1);
                let mut counter = value.clone();
                while counter.is_positive() {
                    result *= &counter;
                    counter -= 1;
                }
                MslInt::Finite(result)
            }
        }
    }

    /// Integer square root by quotient bisection; negative arguments yield
    /// zero.
    pub fn isqrt(&self) -> Self {
        match self {
            MslInt::Infinity { negative: false } => MslInt::infinity(),
            MslInt::Infinity { negative: true } => MslInt::zero(),
            MslInt::Finite(value) => {
                if !value.is_positive() {
                    return MslInt::zero();
                }
                let mut low = BigInt::zero();
                let mut high = value.clone();
                let mut result = BigInt::zero();
                while low <= high {
                    let mid: BigInt = (&low + &high) >> 1;
                    if &mid * &mid <= *value {
                        result = mid.clone();
                        low = mid + 1;
                    } else {
                        high = mid - 1;
                    }
                }
                MslInt::Finite(result)
            }
        }
    }
}

fn pow_by_squaring(base: &BigInt, mut exponent: u64) -> BigInt {
    let mut result = BigInt::from(1);
    let mut base = base.clone();
    while exponent > 0 {
        if exponent & 1 == 1 {
            result *= &base;
        }
        base = &base * &base;
        exponent >>= 1;
    }
    result
}

impl Add for &MslInt {
    type Output = MslInt;

    fn add(self, other: &MslInt) -> MslInt {
        match (self, other) {
            (MslInt::Finite(left), MslInt::Finite(right)) => MslInt::Finite(left + right),
            // Opposite-sign infinite sums have no defined value; the left
            // operand's sign is reported.
            (MslInt::Infinity { negative }, _) => MslInt::Infinity { negative: *negative },
            (_, MslInt::Infinity { negative }) => MslInt::Infinity { negative: *negative },
        }
    }
}

impl Sub for &MslInt {
    type Output = MslInt;

    fn sub(self, other: &MslInt) -> MslInt {
        match (self, other) {
            (MslInt::Finite(left), MslInt::Finite(right)) => MslInt::Finite(left - right),
            (MslInt::Infinity { negative }, _) => MslInt::Infinity { negative: *negative },
            (_, MslInt::Infinity { negative }) => MslInt::Infinity {
                negative: !*negative,
            },
        }
    }
}

impl Mul for &MslInt {
    type Output = MslInt;

    fn mul(self, other: &MslInt) -> MslInt {
        let negative = self.is_negative() != other.is_negative();
        match (self, other) {
            (MslInt::Finite(left), MslInt::Finite(right)) => MslInt::Finite(left * right),
            // 0 * inf is undefined and rendered as signed infinity.
            _ => MslInt::Infinity { negative },
        }
    }
}

impl Div for &MslInt {
    type Output = MslInt;

    fn div(self, other: &MslInt) -> MslInt {
        let negative = self.is_negative() != other.is_negative();
        match (self, other) {
            (MslInt::Finite(_), MslInt::Infinity { .. }) => MslInt::zero(),
            (MslInt::Infinity { .. }, _) => MslInt::Infinity { negative },
            (MslInt::Finite(left), MslInt::Finite(right)) => {
                if right.is_zero() {
                    MslInt::Infinity { negative }
                } else {
                    MslInt::Finite(left / right)
                }
            }
        }
    }
}

impl Rem for &MslInt {
    type Output = MslInt;

    fn rem(self, other: &MslInt) -> MslInt {
        match (self, other) {
            (MslInt::Finite(_), MslInt::Infinity { .. }) => self.clone(),
            (MslInt::Infinity { .. }, _) => MslInt::zero(),
            (MslInt::Finite(left), MslInt::Finite(right)) => {
                if right.is_zero() {
                    MslInt::zero()
                } else {
                    MslInt::Finite(left % right)
                }
            }
        }
    }
}

impl Neg for &MslInt {
    type Output = MslInt;

    fn neg(self) -> MslInt {
        match self {
            MslInt::Finite(value) => MslInt::Finite(-value),
            MslInt::Infinity { negative } => MslInt::Infinity {
                negative: !*negative,
            },
        }
    }
}

impl PartialOrd for MslInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MslInt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MslInt::Finite(left), MslInt::Finite(right)) => left.cmp(right),
            (MslInt::Infinity { negative: l }, MslInt::Infinity { negative: r }) => r.cmp(l),
            (MslInt::Infinity { negative: true }, _) => Ordering::Less,
            (MslInt::Infinity { negative: false }, _) => Ordering::Greater,
            (_, MslInt::Infinity { negative: true }) => Ordering::Greater,
            (_, MslInt::Infinity { negative: false }) => Ordering::Less,
        }
    }
}

impl fmt::Display for MslInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MslInt::Finite(value) => write!(f, "{value}"),
            MslInt::Infinity { negative: true } => f.write_str("-inf"),
            MslInt::Infinity { negative: false } => f.write_str("inf"),
        }
    }
}

impl From<i64> for MslInt {
    fn from(value: i64) -> Self {
        MslInt::Finite(BigInt::from(value))
    }
}

impl From<u64> for MslInt {
    fn from(value: u64) -> Self {
        MslInt::Finite(BigInt::from(value))
    }
}

impl From<usize> for MslInt {
    fn from(value: usize) -> Self {
        MslInt::Finite(BigInt::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i64) -> MslInt {
        MslInt::from(value)
    }

    #[test]
    fn parses_decimal_literals() {
        assert_eq!(MslInt::parse("12345678901234567890").to_string(), "12345678901234567890");
        assert_eq!(MslInt::parse("-42"), int(-42));
        assert_eq!(MslInt::parse("+7"), int(7));
        assert_eq!(MslInt::parse("inf"), MslInt::infinity());
        assert_eq!(MslInt::parse("-inf"), MslInt::Infinity { negative: true });
        // Truncation at the first invalid character, empty run is zero.
        assert_eq!(MslInt::parse("123abc"), int(123));
        assert_eq!(MslInt::parse("abc"), int(0));
        assert_eq!(MslInt::parse(""), int(0));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(&int(2) + &int(3), int(5));
        assert_eq!(&int(2) - &int(5), int(-3));
        assert_eq!(&int(6) * &int(-7), int(-42));
        assert_eq!(&int(14) / &int(3), int(4));
        assert_eq!(&int(14) % &int(3), int(2));
        assert_eq!(-&int(14), int(-14));
    }

    #[test]
    fn division_identity_holds() {
        for a in [-27i64, -14, -1, 0, 1, 5, 99] {
            for b in [-13i64, -4, 1, 3, 25] {
                let (a, b) = (int(a), int(b));
                let reconstructed = &(&(&a / &b) * &b) + &(&a % &b);
                assert_eq!(reconstructed, a);
            }
        }
        // Sign of % matches the dividend.
        assert!((&int(-7) % &int(3)).is_negative());
        assert!(!(&int(7) % &int(-3)).is_negative());
    }

    #[test]
    fn infinity_table() {
        let inf = MslInt::infinity();
        let neg_inf = MslInt::Infinity { negative: true };

        assert_eq!(&inf + &int(5), inf);
        assert_eq!(&int(5) - &inf, neg_inf);
        assert_eq!(&neg_inf * &int(3), neg_inf);
        assert_eq!(&int(0) * &inf, inf);
        assert_eq!(&int(1) / &int(0), inf);
        assert_eq!(&int(-1) / &int(0), neg_inf);
        assert_eq!(&int(0) / &int(0), inf);
        assert_eq!(&int(5) / &inf, int(0));
        assert_eq!(&inf / &inf, inf);
        assert_eq!(&int(5) % &inf, int(5));
        assert_eq!(&inf % &int(5), int(0));
        assert_eq!(&int(5) % &int(0), int(0));
    }

    #[test]
    fn ordering_with_infinities() {
        let inf = MslInt::infinity();
        let neg_inf = MslInt::Infinity { negative: true };
        assert!(neg_inf < int(-1_000_000));
        assert!(int(1_000_000) < inf);
        assert!(neg_inf < inf);
        assert_eq!(inf.cmp(&MslInt::infinity()), Ordering::Equal);
    }

    #[test]
    fn pow_and_friends() {
        assert_eq!(int(2).pow(&int(10)), int(1024));
        assert_eq!(int(-3).pow(&int(3)), int(-27));
        assert_eq!(int(5).pow(&int(0)), int(1));
        assert_eq!(int(2).pow(&int(-1)), int(0));
        assert_eq!(int(-1).pow(&int(-3)), int(-1));
        assert_eq!(int(0).pow(&int(-2)), MslInt::infinity());

        assert_eq!(int(3).pow_mod(4, &int(10)), int(1));
        assert_eq!(int(2).pow_mod(10, &int(1000)), int(24));

        assert_eq!(int(5).factorial(), int(120));
        assert_eq!(int(0).factorial(), int(1));
        assert_eq!(int(-3).factorial(), int(1));

        assert_eq!(int(0).isqrt(), int(0));
        assert_eq!(int(15).isqrt(), int(3));
        assert_eq!(int(16).isqrt(), int(4));
        assert_eq!(int(-9).isqrt(), int(0));
    }

    #[test]
    fn conversions() {
        assert_eq!(int(42).to_f64(), 42.0);
        assert_eq!(MslInt::infinity().to_f64(), f64::INFINITY);
        assert_eq!(int(7).to_usize(), Some(7));
        assert_eq!(int(-7).to_usize(), None);
        assert_eq!(MslInt::infinity().to_usize(), None);
        assert!(int(0).byte_size() <= 1);
        assert!(MslInt::parse("340282366920938463463374607431768211456").byte_size() >= 16);
    }
}
