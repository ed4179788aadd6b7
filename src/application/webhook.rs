use super::accounts::ConnectedAccountManager;
use super::bounded;
use super::payments::PaymentStateMachine;
use super::publisher::IntegrationEventPublisher;
use crate::config::Settings;
use crate::domain::event::{EventKind, GatewayEvent};
use crate::domain::ledger::ClaimOutcome;
use crate::domain::payment::Payment;
use crate::domain::ports::{CatalogClientRef, ClockRef, ProcessedEventStoreRef};
use crate::domain::signature::SignatureVerifier;
use crate::error::{PaymentError, Result};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

pub const ACCEPTED_BODY: &str = r#"{"received":true}"#;
pub const FAILED_BODY: &str = r#"{"error":"webhook processing failed"}"#;

/// What a verified delivery amounted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WebhookOutcome {
    /// Effects applied for the given event type.
    Processed(String),
    /// The event id was already processed, or is being processed by another delivery.
    Duplicate,
    /// Event type this service does not react to.
    Ignored(String),
    /// A business rule refused the transition. Acknowledged so the gateway stops
    /// redelivering; needs manual reconciliation.
    Rejected { event_type: String, reason: String },
}

/// Untrusted or malformed deliveries are refused with 4xx. Everything else asks
/// the gateway to redeliver.
fn delivery_status(error: &PaymentError) -> u16 {
    match error {
        PaymentError::Conflict(_) => 409,
        e if !e.is_retryable() => e.http_status(),
        e => e.http_status().max(500),
    }
}

/// HTTP answer to a webhook delivery. The body never carries error details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: &'static str,
}

pub struct WebhookEventProcessor {
    verifier: SignatureVerifier,
    payments: Arc<PaymentStateMachine>,
    accounts: Arc<ConnectedAccountManager>,
    publisher: Arc<IntegrationEventPublisher>,
    ledger: ProcessedEventStoreRef,
    catalog: CatalogClientRef,
    clock: ClockRef,
    ledger_lease: Duration,
    catalog_timeout: StdDuration,
}

impl WebhookEventProcessor {
    pub fn new(
        payments: Arc<PaymentStateMachine>,
        accounts: Arc<ConnectedAccountManager>,
        publisher: Arc<IntegrationEventPublisher>,
        ledger: ProcessedEventStoreRef,
        catalog: CatalogClientRef,
        clock: ClockRef,
        settings: &Settings,
    ) -> Self {
        Self {
            verifier: SignatureVerifier::new(
                settings.webhook.secret.clone(),
                settings.webhook.tolerance(),
            ),
            payments,
            accounts,
            publisher,
            ledger,
            catalog,
            clock,
            ledger_lease: settings.webhook.ledger_lease(),
            catalog_timeout: settings.catalog.timeout(),
        }
    }

    /// Maps `handle` onto the status and generic body the gateway receives.
    pub async fn respond(&self, payload: &[u8], signature_header: &str) -> WebhookResponse {
        match self.handle(payload, signature_header).await {
            Ok(_) => WebhookResponse {
                status: 200,
                body: ACCEPTED_BODY,
            },
            Err(e) => WebhookResponse {
                status: delivery_status(&e),
                body: FAILED_BODY,
            },
        }
    }

    /// Verifies, deduplicates and applies one delivery.
    ///
    /// The ledger entry is completed only once every effect succeeded. A retryable
    /// failure releases the claim and is returned so the gateway redelivers.
    #[tracing::instrument(skip_all)]
    pub async fn handle(&self, payload: &[u8], signature_header: &str) -> Result<WebhookOutcome> {
        self.verifier
            .verify(payload, signature_header, self.clock.now())
            .inspect_err(|e| warn!(error = %e, "webhook signature rejected"))?;

        let event = GatewayEvent::parse(payload)?;
        if let EventKind::Unrecognized(tag) = &event.kind {
            info!(event_id = %event.id, event_type = %tag, "ignoring unhandled event type");
            return Ok(WebhookOutcome::Ignored(tag.clone()));
        }

        let claim = self
            .ledger
            .try_claim(&event.id, &event.event_type, self.clock.now(), self.ledger_lease)
            .await?;
        if claim != ClaimOutcome::Claimed {
            info!(event_id = %event.id, event_type = %event.event_type, ?claim, "duplicate delivery acknowledged");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.dispatch(&event).await {
            Ok(outcome) => {
                self.complete(&event.id).await;
                Ok(outcome)
            }
            Err(e) if e.is_business_rule() => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "webhook refused by payment rules, manual reconciliation required"
                );
                self.complete(&event.id).await;
                Ok(WebhookOutcome::Rejected {
                    event_type: event.event_type.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "webhook processing failed, awaiting redelivery");
                if let Err(release_err) = self.ledger.release(&event.id).await {
                    error!(event_id = %event.id, error = %release_err, "failed to release webhook claim");
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: &GatewayEvent) -> Result<WebhookOutcome> {
        match &event.kind {
            EventKind::CheckoutSessionCompleted { session_id } => {
                let payment = self.payments.confirm(session_id).await?;
                self.publisher.publish_payment_completed(&payment).await;
                self.notify_appointment_paid(&payment).await;
            }
            EventKind::CheckoutSessionExpired { session_id } => {
                self.payments.cancel(session_id).await?;
            }
            EventKind::ChargeRefunded {
                payment_intent_id,
                amount_refunded,
            } => {
                let payment = self
                    .payments
                    .mark_refunded_externally(payment_intent_id, *amount_refunded)
                    .await?;
                self.publisher.publish_payment_refunded(&payment).await;
            }
            EventKind::AccountUpdated { account_id } => {
                self.accounts.sync_account_status(account_id).await?;
            }
            EventKind::PaymentFailed {
                payment_intent_id,
                reason,
            } => {
                warn!(
                    payment_intent_id,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "payment attempt failed"
                );
            }
            EventKind::PaymentSucceeded { payment_intent_id } => {
                info!(payment_intent_id, "payment intent succeeded");
            }
            EventKind::Unrecognized(tag) => return Ok(WebhookOutcome::Ignored(tag.clone())),
        }
        Ok(WebhookOutcome::Processed(event.event_type.clone()))
    }

    async fn complete(&self, event_id: &str) {
        if let Err(e) = self.ledger.complete(event_id, self.clock.now()).await {
            error!(event_id, error = %e, "failed to record webhook as processed");
        }
    }

    /// Best effort; the payment is already confirmed either way.
    async fn notify_appointment_paid(&self, payment: &Payment) {
        let Some(appointment_id) = payment.appointment_id else {
            return;
        };
        match bounded(
            self.catalog_timeout,
            self.catalog.mark_appointment_paid(appointment_id),
        )
        .await
        {
            Ok(()) => info!(payment_id = %payment.id, %appointment_id, "appointment marked paid"),
            Err(e) => {
                warn!(payment_id = %payment.id, %appointment_id, error = %e, "failed to mark appointment paid")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    #[test]
    fn test_delivery_status_mapping() {
        assert_eq!(delivery_status(&PaymentError::InvalidSignature("bad".into())), 400);
        assert_eq!(delivery_status(&PaymentError::InvalidArgument("bad".into())), 400);
        assert_eq!(delivery_status(&PaymentError::Conflict("race".into())), 409);
        // Retryable errors below 500 still ask for redelivery.
        assert_eq!(delivery_status(&PaymentError::NotFound("cs_1".into())), 500);
        assert_eq!(delivery_status(&PaymentError::Storage("down".into())), 500);
        assert_eq!(
            delivery_status(&PaymentError::Gateway(GatewayError::Timeout(
                StdDuration::from_secs(1)
            ))),
            504
        );
    }
}
