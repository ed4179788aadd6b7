use crate::domain::money::Money;
use crate::error::{PaymentError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Platform commission on `amount` (minor units) at `rate_percent`.
///
/// Rounds to one minor unit, half-up: 999 at 5% is 49.95 and yields 50.
pub fn fee(amount: Decimal, rate_percent: Decimal) -> Result<Money> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(PaymentError::InvalidArgument(format!(
            "commission base must not be negative, got {amount}"
        )));
    }
    if (rate_percent.is_sign_negative() && !rate_percent.is_zero()) || rate_percent > dec!(100) {
        return Err(PaymentError::InvalidArgument(format!(
            "commission rate must be within 0..=100, got {rate_percent}"
        )));
    }

    let raw = amount
        .checked_mul(rate_percent)
        .ok_or_else(|| PaymentError::InvalidArgument("commission overflow".to_string()))?
        / dec!(100);
    Money::new(raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
}
