use super::bounded;
use crate::domain::gateway::{CheckoutSession, RefundRequest, SettlementRouting};
use crate::domain::money::{Amount, Money};
use crate::domain::payment::{NewPayment, Payment, PaymentStatus};
use crate::domain::ports::{ClockRef, PaymentGatewayRef, PaymentStoreRef};
use crate::error::{GatewayError, PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How many times a transition re-reads and re-applies after losing a version race.
const MAX_ATTEMPTS: usize = 3;

enum Lookup<'a> {
    Id(Uuid),
    CheckoutSession(&'a str),
    PaymentIntent(&'a str),
}

impl Lookup<'_> {
    fn describe(&self) -> String {
        match self {
            Lookup::Id(id) => format!("payment {id}"),
            Lookup::CheckoutSession(id) => format!("payment for checkout session {id}"),
            Lookup::PaymentIntent(id) => format!("payment for payment intent {id}"),
        }
    }
}

/// Owns every status change of a `Payment`.
///
/// Each transition is a read-modify-write against the store's version check. A lost
/// race re-reads the record and re-evaluates the guard, up to `MAX_ATTEMPTS` times,
/// before surfacing `Conflict`.
pub struct PaymentStateMachine {
    store: PaymentStoreRef,
    gateway: PaymentGatewayRef,
    clock: ClockRef,
    refund_window: Duration,
    gateway_timeout: StdDuration,
}

impl PaymentStateMachine {
    pub fn new(
        store: PaymentStoreRef,
        gateway: PaymentGatewayRef,
        clock: ClockRef,
        refund_window: Duration,
        gateway_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            refund_window,
            gateway_timeout,
        }
    }

    /// Persists a new PENDING payment with its commission and refund window.
    pub async fn create(&self, new: NewPayment) -> Result<Payment> {
        let payment = Payment::create(new, self.clock.now(), self.refund_window)?;
        self.store.insert(payment.clone()).await?;
        info!(payment_id = %payment.id, shop_id = %payment.shop_id, amount = %payment.amount, "payment created");
        Ok(payment)
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment> {
        self.load(&Lookup::Id(payment_id)).await
    }

    pub async fn find_by_appointment(&self, appointment_id: Uuid) -> Result<Option<Payment>> {
        self.store.find_by_appointment(appointment_id).await
    }

    pub async fn all(&self) -> Result<Vec<Payment>> {
        self.store.get_all().await
    }

    /// Stores the gateway's session and payment-intent ids on a PENDING payment.
    pub async fn attach_checkout(
        &self,
        payment_id: Uuid,
        session: &CheckoutSession,
        routing: &SettlementRouting,
    ) -> Result<Payment> {
        let (payment, _) = self
            .transition(Lookup::Id(payment_id), |p, now| {
                p.attach_checkout(session, routing, now)
            })
            .await?;
        Ok(payment)
    }

    /// Confirms the payment behind a completed checkout session.
    ///
    /// An unknown session is `NotFound`, never a new payment. Confirming twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, checkout_session_id: &str) -> Result<Payment> {
        let (payment, applied) = self
            .transition(Lookup::CheckoutSession(checkout_session_id), |p, now| {
                p.complete(now)
            })
            .await?;
        if applied {
            info!(payment_id = %payment.id, "payment confirmed");
        } else {
            info!(payment_id = %payment.id, status = %payment.status, "payment already confirmed");
        }
        Ok(payment)
    }

    /// Refunds `amount` through the gateway, then records it locally.
    ///
    /// The amount is reserved on the record before the gateway call so concurrent
    /// refunds cannot both pass the amount guard. The status only changes after the
    /// gateway accepted the refund.
    #[tracing::instrument(skip(self), fields(amount = %amount))]
    pub async fn refund(&self, payment_id: Uuid, amount: Amount) -> Result<Payment> {
        let (reserved, _) = self
            .transition(Lookup::Id(payment_id), |p, now| p.reserve_refund(amount, now))
            .await?;
        self.settle_reserved_refund(reserved).await
    }

    /// Replays the reserved refund of a payment whose earlier gateway outcome is unknown.
    ///
    /// The original idempotency key is reused, so the gateway refunds at most once.
    #[tracing::instrument(skip(self))]
    pub async fn resume_refund(&self, payment_id: Uuid) -> Result<Payment> {
        let payment = self.get(payment_id).await?;
        self.settle_reserved_refund(payment).await
    }

    async fn settle_reserved_refund(&self, reserved: Payment) -> Result<Payment> {
        let payment_id = reserved.id;
        let Some(key) = reserved.refund_idempotency_key.clone() else {
            return Err(PaymentError::InvalidState(format!(
                "payment {payment_id} has no refund in flight"
            )));
        };

        let Some(payment_intent_id) = reserved.payment_intent_id.clone() else {
            self.release(payment_id, &key).await;
            return Err(PaymentError::InvalidState(format!(
                "payment {payment_id} has no payment intent to refund"
            )));
        };

        let request = RefundRequest {
            payment_intent_id,
            amount: reserved.refund_in_flight,
            connected_account_id: reserved.destination_account_id.clone(),
            idempotency_key: key.clone(),
        };
        let receipt = match bounded(self.gateway_timeout, self.gateway.create_refund(&request)).await
        {
            Ok(receipt) => receipt,
            Err(e @ GatewayError::Rejected { .. }) => {
                warn!(%payment_id, error = %e, "gateway refused refund");
                self.release(payment_id, &key).await;
                return Err(e.into());
            }
            Err(e) => {
                warn!(%payment_id, idempotency_key = %key, error = %e, "refund outcome unknown, reservation kept for resume");
                return Err(e.into());
            }
        };

        let (payment, applied) = self
            .transition(Lookup::Id(payment_id), |p, now| {
                p.commit_refund(&key, Some(receipt.id.clone()), now)
            })
            .await
            .inspect_err(|e| {
                error!(%payment_id, refund_id = %receipt.id, idempotency_key = %key, error = %e, "gateway refund succeeded but could not be recorded")
            })?;
        if applied {
            info!(%payment_id, refund_id = %receipt.id, status = %payment.status, "payment refunded");
        } else {
            info!(%payment_id, refund_id = %receipt.id, "refund already reconciled from gateway notification");
        }
        Ok(payment)
    }

    async fn release(&self, payment_id: Uuid, key: &str) {
        if let Err(e) = self
            .transition(Lookup::Id(payment_id), |p, now| p.release_refund(key, now))
            .await
        {
            error!(%payment_id, error = %e, "failed to release refund reservation");
        }
    }

    /// Records a refund that the gateway reports, without calling the gateway again.
    ///
    /// `cumulative_refunded` is the charge's total refunded amount at the gateway.
    #[tracing::instrument(skip(self), fields(cumulative = %cumulative_refunded))]
    pub async fn mark_refunded_externally(
        &self,
        payment_intent_id: &str,
        cumulative_refunded: Money,
    ) -> Result<Payment> {
        let (payment, applied) = self
            .transition(Lookup::PaymentIntent(payment_intent_id), |p, now| {
                p.apply_external_refund(cumulative_refunded, now)
            })
            .await?;
        if applied {
            info!(payment_id = %payment.id, status = %payment.status, "external refund recorded");
        }
        Ok(payment)
    }

    pub async fn fail(&self, payment_id: Uuid) -> Result<Payment> {
        let (payment, applied) = self
            .transition(Lookup::Id(payment_id), |p, now| p.fail(now))
            .await?;
        if applied {
            info!(payment_id = %payment.id, "payment marked failed");
        }
        Ok(payment)
    }

    /// Cancels the PENDING payment behind an abandoned checkout session.
    pub async fn cancel(&self, checkout_session_id: &str) -> Result<Payment> {
        let (payment, applied) = self
            .transition(Lookup::CheckoutSession(checkout_session_id), |p, now| {
                p.cancel(now)
            })
            .await?;
        if applied {
            info!(payment_id = %payment.id, "payment cancelled");
        }
        Ok(payment)
    }

    /// Marks PENDING payments created more than `older_than` ago as FAILED.
    pub async fn expire_stale(&self, older_than: Duration) -> Result<Vec<Payment>> {
        let cutoff = self.clock.now() - older_than;
        let mut expired = Vec::new();
        for payment in self.store.get_all().await? {
            if payment.status != PaymentStatus::Pending || payment.created_at > cutoff {
                continue;
            }
            match self.fail(payment.id).await {
                Ok(p) if p.status == PaymentStatus::Failed => expired.push(p),
                Ok(_) => {}
                // Confirmed between the scan and the write.
                Err(PaymentError::InvalidState(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    async fn load(&self, lookup: &Lookup<'_>) -> Result<Payment> {
        let found = match lookup {
            Lookup::Id(id) => self.store.get(*id).await?,
            Lookup::CheckoutSession(id) => self.store.find_by_checkout_session(id).await?,
            Lookup::PaymentIntent(id) => self.store.find_by_payment_intent(id).await?,
        };
        found.ok_or_else(|| PaymentError::NotFound(lookup.describe()))
    }

    /// Applies `apply` to the current record and writes it back under the version check.
    ///
    /// `apply` returns `Ok(false)` for a no-op, in which case nothing is written.
    async fn transition<F>(&self, lookup: Lookup<'_>, mut apply: F) -> Result<(Payment, bool)>
    where
        F: FnMut(&mut Payment, DateTime<Utc>) -> Result<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut payment = self.load(&lookup).await?;
            if !apply(&mut payment, self.clock.now())? {
                return Ok((payment, false));
            }
            match self.store.update(payment).await {
                Ok(saved) => return Ok((saved, true)),
                Err(PaymentError::Conflict(reason)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, %reason, "payment changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
