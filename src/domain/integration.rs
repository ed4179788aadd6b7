use crate::domain::money::{Currency, Money};
use crate::domain::payment::Payment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationEventType {
    PaymentCompleted,
    PaymentRefunded,
    AppointmentConfirmed,
}

/// Fixed-shape envelope handed to the message bus.
///
/// Consumers receive it at least once and must tolerate duplicates; `event_id` is
/// unique per publication and can serve as their dedup key.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IntegrationEvent {
    pub event_id: Uuid,
    pub event_type: IntegrationEventType,
    pub payment_id: Uuid,
    pub buyer_id: Uuid,
    pub shop_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub amount: Money,
    pub commission_amount: Money,
    pub refunded_amount: Money,
    pub currency: Currency,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl IntegrationEvent {
    pub fn from_payment(
        event_type: IntegrationEventType,
        payment: &Payment,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            payment_id: payment.id,
            buyer_id: payment.buyer_id,
            shop_id: payment.shop_id,
            appointment_id: payment.appointment_id,
            amount: payment.amount,
            commission_amount: payment.commission_amount,
            refunded_amount: payment.refunded_amount,
            currency: payment.currency.clone(),
            checkout_session_id: payment.checkout_session_id.clone(),
            payment_intent_id: payment.payment_intent_id.clone(),
            occurred_at,
        }
    }
}
