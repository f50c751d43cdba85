use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

/// Signed euro amount, always rounded to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// `None` when the amount does not fit in an `i64` number of cents.
    pub fn to_cents(self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED).round().to_i64()
    }

    /// Rounds half away from zero: `12.345` → `12.35`.
    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Shortest decimal rendering: `2000.00` → `2000`, `-54.30` → `-54.3`.
    /// Used wherever the amount feeds a stable fingerprint.
    pub fn canonical(self) -> String {
        self.0.normalize().to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} €", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn from_decimal_rounds_to_cents() {
        assert_eq!(Money::from_decimal(dec("12.345")).to_cents(), Some(1235));
        assert_eq!(Money::from_decimal(dec("-54.3")).to_cents(), Some(-5430));
    }

    #[test]
    fn canonical_drops_trailing_zeros() {
        assert_eq!(Money::from_cents(200_000).canonical(), "2000");
        assert_eq!(Money::from_cents(-5430).canonical(), "-54.3");
        assert_eq!(Money::from_cents(1).canonical(), "0.01");
        assert_eq!(Money::from_decimal(dec("-0.00")).canonical(), "0");
    }

    #[test]
    fn sign_helpers_treat_zero_as_neither() {
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
        assert!(!Money::zero().is_positive());
        assert!(!Money::zero().is_negative());
    }

    #[test]
    fn display_in_euros() {
        assert_eq!(Money::from_cents(123_456).to_string(), "1234.56 €");
    }

    #[test]
    fn sum_of_amounts() {
        let total: Money = [100_000, -30_000].into_iter().map(Money::from_cents).sum();
        assert_eq!(total, Money::from_cents(70_000));
    }
}
