use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A non-negative monetary value counted in the currency's minor unit (cents for EUR).
///
/// Wraps `rust_decimal::Decimal` so that every amount crossing the domain boundary has
/// already been checked for sign and for being a whole number of minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

/// A strictly positive monetary amount, used for charges and refund requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Money);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(minor_units: Decimal) -> Result<Self> {
        if minor_units.is_sign_negative() && !minor_units.is_zero() {
            return Err(PaymentError::InvalidArgument(format!(
                "amount must not be negative, got {minor_units}"
            )));
        }
        if !minor_units.fract().is_zero() {
            return Err(PaymentError::InvalidArgument(format!(
                "amount must be a whole number of minor units, got {minor_units}"
            )));
        }
        Ok(Self(minor_units.normalize()))
    }

    pub fn from_minor(minor_units: u64) -> Self {
        Self(Decimal::from(minor_units))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Integer minor units, as the gateway's wire format expects.
    pub fn to_minor_units(&self) -> Result<i64> {
        self.0.to_i64().ok_or_else(|| {
            PaymentError::InvalidArgument(format!("amount {} is out of range", self.0))
        })
    }

    /// `self - rhs`, floored at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs >= self { Self::ZERO } else { Self(self.0 - rhs.0) }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        let money = Money::new(value)?;
        if money.is_zero() {
            return Err(PaymentError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }
        Ok(Self(money))
    }

    pub fn value(&self) -> Decimal {
        self.0.value()
    }

    pub fn money(&self) -> Money {
        self.0
    }
}

impl TryFrom<Decimal> for Money {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

impl From<Amount> for Money {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lowercase ISO-4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_lowercase()))
        } else {
            Err(PaymentError::InvalidArgument(format!(
                "currency must be a 3-letter code, got {code:?}"
            )))
        }
    }

    /// Parses `code` and checks it against the platform's supported set.
    pub fn supported(code: &str, supported: &[String]) -> Result<Self> {
        let currency = Self::new(code)?;
        if supported.iter().any(|s| s.eq_ignore_ascii_case(&currency.0)) {
            Ok(currency)
        } else {
            Err(PaymentError::InvalidArgument(format!(
                "currency {} is not supported",
                currency.0
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_arithmetic() {
        let a = Money::from_minor(1000);
        let b = Money::from_minor(250);
        assert_eq!(a + b, Money::from_minor(1250));
        assert_eq!(a - b, Money::from_minor(750));
        assert_eq!(b.saturating_sub(a), Money::ZERO);
    }

    #[test]
    fn test_money_validation() {
        assert!(Money::new(dec!(0)).is_ok());
        assert!(Money::new(dec!(10000.00)).is_ok());
        assert!(matches!(
            Money::new(dec!(-1)),
            Err(PaymentError::InvalidArgument(_))
        ));
        assert!(matches!(
            Money::new(dec!(10.5)),
            Err(PaymentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0)),
            Err(PaymentError::InvalidArgument(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-5)),
            Err(PaymentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!(Currency::new("EUR").unwrap().as_str(), "eur");
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("e1r").is_err());

        let supported = vec!["eur".to_string(), "usd".to_string()];
        assert!(Currency::supported("usd", &supported).is_ok());
        assert!(matches!(
            Currency::supported("jpy", &supported),
            Err(PaymentError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_money_serializes_as_decimal_string() {
        let json = serde_json::to_string(&Money::from_minor(500)).unwrap();
        assert_eq!(json, "\"500\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_minor(500));
    }

    #[test]
    fn test_money_deserialization_is_validated() {
        assert!(serde_json::from_str::<Money>("\"-5\"").is_err());
        assert!(serde_json::from_str::<Money>("\"10.5\"").is_err());
        assert!(serde_json::from_str::<Amount>("\"0\"").is_err());
    }
}
