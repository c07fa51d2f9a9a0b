use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Signed integer amount in minor currency units ("centavos"; 100 per peso).
///
/// All bill and payment arithmetic in the core happens in this type. Decimal
/// pesos only exist at the API edge (`Money::from_pesos_str` / `display_pesos`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_centavos(centavos: i64) -> Self {
        Money(centavos)
    }

    pub fn centavos(&self) -> i64 {
        self.0
    }

    /// Parse a decimal pesos string (e.g. `"1234.56"`) into centavos, rounding
    /// to the nearest minor unit with banker's rounding (round-half-to-even).
    pub fn from_pesos_str(pesos: &str) -> Result<Self, MoneyError> {
        let decimal = Decimal::from_str(pesos).map_err(|_| MoneyError::InvalidAmount {
            input: pesos.to_string(),
        })?;
        Self::from_decimal_pesos(decimal)
    }

    /// Same as [`Money::from_pesos_str`] but rejects negative amounts, for
    /// call sites that represent a rate or charge that must never be negative.
    pub fn from_pesos_str_non_negative(pesos: &str) -> Result<Self, MoneyError> {
        let money = Self::from_pesos_str(pesos)?;
        if money.is_negative() {
            return Err(MoneyError::NegativeNotAllowed {
                input: pesos.to_string(),
            });
        }
        Ok(money)
    }

    pub fn from_decimal_pesos(pesos: Decimal) -> Result<Self, MoneyError> {
        let rounded = pesos.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
        let centavos = rounded * dec!(100);
        centavos
            .to_string()
            .parse::<i64>()
            .map(Money)
            .map_err(|_| MoneyError::Overflow)
    }

    /// Render as a display-pesos string, e.g. `Money::from_centavos(123456) -> "1,234.56"`.
    ///
    /// `locale` currently only distinguishes thousands-grouping; non-MXN
    /// locales are not needed since bills are single-currency (see Non-goals).
    pub fn display_pesos(&self, locale: Locale) -> String {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let pesos = abs / 100;
        let cents = abs % 100;
        let grouped = match locale {
            Locale::Plain => pesos.to_string(),
            Locale::MxGrouped => group_thousands(pesos),
        };
        format!("{}{}.{:02}", if negative { "-" } else { "" }, grouped, cents)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// Clamp to zero if negative; used wherever "owed" amounts must not go
    /// below zero after a subtraction (e.g. `baseOwed = currentCharge - basePaid`).
    pub fn non_negative(self) -> Self {
        if self.0 < 0 {
            Money::ZERO
        } else {
            self
        }
    }

    /// Multiply by a decimal rate or quantity, rounding to the nearest
    /// centavo with banker's rounding.
    pub fn mul_decimal(&self, factor: Decimal) -> Self {
        let result = Decimal::from(self.0) * factor;
        let rounded = result.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        Money(rounded.to_string().parse::<i64>().unwrap_or(i64::MAX))
    }

    pub fn as_decimal_pesos(&self) -> Decimal {
        Decimal::from(self.0) / dec!(100)
    }
}

fn group_thousands(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut groups = Vec::new();
    while n > 0 {
        groups.push(format!("{:03}", n % 1000));
        n /= 1000;
    }
    let mut groups: Vec<String> = groups
        .into_iter()
        .rev()
        .map(|g| g.trim_start_matches('0').to_string())
        .collect();
    if let Some(first) = groups.first_mut() {
        if first.is_empty() {
            *first = "0".to_string();
        }
    }
    groups.join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Plain,
    MxGrouped,
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_pesos(Locale::Plain))
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MoneyError {
    #[error("invalid monetary amount: {input}")]
    InvalidAmount { input: String },
    #[error("negative amount not allowed in this context: {input}")]
    NegativeNotAllowed { input: String },
    #[error("monetary amount overflowed i64 centavos")]
    Overflow,
}

/// An interest/penalty/commission rate, stored as an exact decimal (e.g.
/// `0.05` for 5%). Kept separate from `Money` since rates are dimensionless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize, Default)]
pub struct Rate(Decimal);

impl Rate {
    pub const ZERO: Rate = Rate(Decimal::ZERO);

    pub fn from_decimal(d: Decimal) -> Self {
        Rate(d)
    }

    pub fn from_percentage(p: Decimal) -> Self {
        Rate(p / dec!(100))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_percentage(&self) -> Decimal {
        self.0 * dec!(100)
    }

    /// `(1 + rate)^periods`, computed by iterated multiplication — the same
    /// technique the facility compounding engine uses, just with an integer
    /// exponent driven by whole elapsed months rather than a time-fraction.
    pub fn compound_factor(&self, periods: u32) -> Decimal {
        let base = Decimal::ONE + self.0;
        let mut factor = Decimal::ONE;
        for _ in 0..periods {
            factor *= base;
        }
        factor
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pesos_into_centavos() {
        assert_eq!(Money::from_pesos_str("1234.56").unwrap().centavos(), 123456);
        assert_eq!(Money::from_pesos_str("0.01").unwrap().centavos(), 1);
    }

    #[test]
    fn bankers_rounding_on_parse() {
        // 0.125 pesos -> 12.5 centavos -> rounds to even (12)
        assert_eq!(Money::from_pesos_str("0.125").unwrap().centavos(), 12);
        // 0.135 pesos -> 13.5 centavos -> rounds to even (14)
        assert_eq!(Money::from_pesos_str("0.135").unwrap().centavos(), 14);
    }

    #[test]
    fn rejects_negative_rate_context() {
        assert!(Money::from_pesos_str_non_negative("-5.00").is_err());
        assert!(Money::from_pesos_str_non_negative("5.00").is_ok());
    }

    #[test]
    fn display_pesos_formats_with_grouping() {
        let m = Money::from_centavos(123456789);
        assert_eq!(m.display_pesos(Locale::Plain), "1234567.89");
        assert_eq!(m.display_pesos(Locale::MxGrouped), "1,234,567.89");
    }

    #[test]
    fn non_negative_clamps() {
        let owed = Money::from_centavos(-500);
        assert_eq!(owed.non_negative(), Money::ZERO);
    }

    #[test]
    fn compound_factor_matches_manual_multiplication() {
        let rate = Rate::from_percentage(dec!(5));
        let factor = rate.compound_factor(3);
        // (1.05)^3 = 1.157625
        assert_eq!(factor, dec!(1.157625));
    }
}
