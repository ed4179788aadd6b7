use crate::domain::commission;
use crate::domain::gateway::{CheckoutSession, SettlementRouting};
use crate::domain::money::{Amount, Currency, Money};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    PartiallyRefunded,
    Refunded,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }

    /// No further transition of any kind leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a payment; everything here is immutable once persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub buyer_id: Uuid,
    pub shop_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub amount: Amount,
    pub currency: Currency,
    pub commission_rate: Decimal,
}

/// One buyer to shop money movement and its gateway correlation ids.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub shop_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub amount: Money,
    pub currency: Currency,
    pub commission_rate: Decimal,
    pub commission_amount: Money,
    pub status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub refund_id: Option<String>,
    /// Connected account the checkout was routed to; `None` for platform-only settlement.
    pub destination_account_id: Option<String>,
    /// Fee actually withheld at the gateway. Zero for platform-only settlement.
    pub application_fee: Money,
    pub refunded_amount: Money,
    /// Reserved by a local refund whose gateway outcome is not recorded yet.
    pub refund_in_flight: Money,
    /// Idempotency key of the reserved refund, replayed verbatim when the call is resumed.
    #[serde(default)]
    pub refund_idempotency_key: Option<String>,
    pub refund_eligible_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every successful update.
    pub version: u64,
}

impl Payment {
    pub fn create(new: NewPayment, now: DateTime<Utc>, refund_window: Duration) -> Result<Self> {
        let commission_amount = commission::fee(new.amount.value(), new.commission_rate)?;
        Ok(Self {
            id: Uuid::new_v4(),
            buyer_id: new.buyer_id,
            shop_id: new.shop_id,
            appointment_id: new.appointment_id,
            service_id: new.service_id,
            amount: new.amount.into(),
            currency: new.currency,
            commission_rate: new.commission_rate,
            commission_amount,
            status: PaymentStatus::Pending,
            checkout_session_id: None,
            payment_intent_id: None,
            charge_id: None,
            refund_id: None,
            destination_account_id: None,
            application_fee: Money::ZERO,
            refunded_amount: Money::ZERO,
            refund_in_flight: Money::ZERO,
            refund_idempotency_key: None,
            refund_eligible_until: now + refund_window,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// What is left to refund once committed and in-flight refunds are accounted for.
    pub fn refundable_remainder(&self) -> Money {
        self.amount
            .saturating_sub(self.refunded_amount + self.refund_in_flight)
    }

    /// Records the gateway identifiers of the checkout session created for this payment.
    pub fn attach_checkout(
        &mut self,
        session: &CheckoutSession,
        routing: &SettlementRouting,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid_state("attach a checkout session"));
        }
        self.checkout_session_id = Some(session.id.clone());
        self.payment_intent_id = session.payment_intent_id.clone();
        match routing {
            SettlementRouting::Platform => {
                self.destination_account_id = None;
                self.application_fee = Money::ZERO;
            }
            SettlementRouting::Destination {
                account_id,
                application_fee,
            } => {
                self.destination_account_id = Some(account_id.clone());
                self.application_fee = *application_fee;
            }
        }
        self.updated_at = now;
        Ok(true)
    }

    /// PENDING -> COMPLETED. Returns `false` when the payment was already confirmed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Completed;
                self.updated_at = now;
                Ok(true)
            }
            PaymentStatus::Completed
            | PaymentStatus::PartiallyRefunded
            | PaymentStatus::Refunded => Ok(false),
            PaymentStatus::Failed | PaymentStatus::Cancelled => Err(self.invalid_state("confirm")),
        }
    }

    /// PENDING -> FAILED.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<bool> {
        self.close(PaymentStatus::Failed, now)
    }

    /// PENDING -> CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool> {
        self.close(PaymentStatus::Cancelled, now)
    }

    fn close(&mut self, target: PaymentStatus, now: DateTime<Utc>) -> Result<bool> {
        if self.status == target {
            return Ok(false);
        }
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid_state(match target {
                PaymentStatus::Failed => "mark failed",
                _ => "cancel",
            }));
        }
        self.status = target;
        self.updated_at = now;
        Ok(true)
    }

    /// Checks the status, window and amount guards for refunding `amount` more.
    pub fn ensure_refundable(&self, amount: Money, now: DateTime<Utc>) -> Result<()> {
        if !self.status.is_refundable() {
            return Err(self.invalid_state("refund"));
        }
        if now >= self.refund_eligible_until {
            return Err(PaymentError::RefundNotEligible(format!(
                "refund window for payment {} closed at {}",
                self.id, self.refund_eligible_until
            )));
        }
        let remaining = self.refundable_remainder();
        if amount > remaining {
            return Err(PaymentError::RefundExceedsAmount {
                requested: amount.value(),
                remaining: remaining.value(),
            });
        }
        Ok(())
    }

    /// Holds `amount` against the refundable remainder ahead of the gateway call.
    ///
    /// Only one refund may be reserved at a time. The reservation carries the idempotency
    /// key under which the gateway call is made, so a retry after an unknown outcome
    /// replays the same request instead of issuing a second refund.
    pub fn reserve_refund(&mut self, amount: Amount, now: DateTime<Utc>) -> Result<bool> {
        if let Some(key) = &self.refund_idempotency_key {
            return Err(PaymentError::Conflict(format!(
                "payment {} has refund {key} in flight",
                self.id
            )));
        }
        self.ensure_refundable(amount.money(), now)?;
        self.refund_in_flight = amount.money();
        self.refund_idempotency_key = Some(format!("refund-{}-{}", self.id, self.version));
        self.updated_at = now;
        Ok(true)
    }

    /// Turns the reservation made under `key` into a committed refund.
    ///
    /// Returns `false` when that reservation is gone, i.e. a gateway notification
    /// already reconciled it.
    pub fn commit_refund(
        &mut self,
        key: &str,
        refund_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if self.refund_idempotency_key.as_deref() != Some(key) {
            return Ok(false);
        }
        self.refunded_amount += self.refund_in_flight;
        self.clear_reservation();
        if refund_id.is_some() {
            self.refund_id = refund_id;
        }
        self.settle_refund_status();
        self.updated_at = now;
        Ok(true)
    }

    /// Gives the reservation made under `key` back after the gateway refused the refund.
    pub fn release_refund(&mut self, key: &str, now: DateTime<Utc>) -> Result<bool> {
        if self.refund_idempotency_key.as_deref() != Some(key) {
            return Ok(false);
        }
        self.clear_reservation();
        self.updated_at = now;
        Ok(true)
    }

    /// Aligns the local record with the gateway's cumulative refunded amount.
    ///
    /// Only the delta over `refunded_amount` is applied, so the notification echoing a
    /// locally issued refund is a no-op. A cumulative amount covering the reservation
    /// settles it, which recovers a refund whose local commit never landed. One that
    /// falls short of the reservation reports a conflict so the notification is retried.
    pub fn apply_external_refund(
        &mut self,
        cumulative_refunded: Money,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if cumulative_refunded <= self.refunded_amount {
            return Ok(false);
        }
        let reserved = self.refund_in_flight;
        let covered = self.refunded_amount + reserved;
        if !reserved.is_zero() && cumulative_refunded < covered {
            return Err(PaymentError::Conflict(format!(
                "payment {} has a local refund in flight",
                self.id
            )));
        }
        let extra = cumulative_refunded.saturating_sub(covered);
        if !extra.is_zero() {
            self.ensure_refundable(extra, now)?;
        }
        self.clear_reservation();
        self.refunded_amount = cumulative_refunded;
        self.settle_refund_status();
        self.updated_at = now;
        Ok(true)
    }

    fn clear_reservation(&mut self) {
        self.refund_in_flight = Money::ZERO;
        self.refund_idempotency_key = None;
    }

    fn settle_refund_status(&mut self) {
        self.status = if self.refunded_amount >= self.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
    }

    fn invalid_state(&self, action: &str) -> PaymentError {
        PaymentError::InvalidState(format!(
            "cannot {action} payment {} in status {}",
            self.id, self.status
        ))
    }
}
