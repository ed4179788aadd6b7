use crate::domain::money::Money;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_SESSION_EXPIRED: &str = "checkout.session.expired";
pub const CHARGE_REFUNDED: &str = "charge.refunded";
pub const ACCOUNT_UPDATED: &str = "account.updated";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// The event kinds this service reacts to, with the fields each one needs.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    CheckoutSessionCompleted {
        session_id: String,
    },
    CheckoutSessionExpired {
        session_id: String,
    },
    ChargeRefunded {
        payment_intent_id: String,
        /// Cumulative amount refunded on the charge so far.
        amount_refunded: Money,
    },
    AccountUpdated {
        account_id: String,
    },
    PaymentFailed {
        payment_intent_id: String,
        reason: Option<String>,
    },
    PaymentSucceeded {
        payment_intent_id: String,
    },
    Unrecognized(String),
}

/// A verified inbound gateway notification.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    pub kind: EventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct SessionObject {
    id: String,
}

#[derive(Deserialize)]
struct ChargeObject {
    payment_intent: Option<String>,
    amount_refunded: u64,
}

#[derive(Deserialize)]
struct AccountObject {
    id: String,
}

#[derive(Deserialize)]
struct PaymentIntentObject {
    id: String,
    last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Deserialize)]
struct PaymentErrorObject {
    message: Option<String>,
}

type KindParser = fn(serde_json::Value) -> Result<EventKind>;

/// Tag to parser table. Tags absent from it become `EventKind::Unrecognized`.
const PARSERS: &[(&str, KindParser)] = &[
    (CHECKOUT_SESSION_COMPLETED, parse_session_completed),
    (CHECKOUT_SESSION_EXPIRED, parse_session_expired),
    (CHARGE_REFUNDED, parse_charge_refunded),
    (ACCOUNT_UPDATED, parse_account_updated),
    (PAYMENT_INTENT_FAILED, parse_payment_failed),
    (PAYMENT_INTENT_SUCCEEDED, parse_payment_succeeded),
];

fn parse_session_completed(object: serde_json::Value) -> Result<EventKind> {
    let session: SessionObject = object_as(object)?;
    Ok(EventKind::CheckoutSessionCompleted {
        session_id: session.id,
    })
}

fn parse_session_expired(object: serde_json::Value) -> Result<EventKind> {
    let session: SessionObject = object_as(object)?;
    Ok(EventKind::CheckoutSessionExpired {
        session_id: session.id,
    })
}

fn parse_charge_refunded(object: serde_json::Value) -> Result<EventKind> {
    let charge: ChargeObject = object_as(object)?;
    let payment_intent_id = charge.payment_intent.ok_or_else(|| {
        PaymentError::InvalidArgument("refunded charge carries no payment intent".to_string())
    })?;
    Ok(EventKind::ChargeRefunded {
        payment_intent_id,
        amount_refunded: Money::from_minor(charge.amount_refunded),
    })
}

fn parse_account_updated(object: serde_json::Value) -> Result<EventKind> {
    let account: AccountObject = object_as(object)?;
    Ok(EventKind::AccountUpdated {
        account_id: account.id,
    })
}

fn parse_payment_failed(object: serde_json::Value) -> Result<EventKind> {
    let intent: PaymentIntentObject = object_as(object)?;
    Ok(EventKind::PaymentFailed {
        payment_intent_id: intent.id,
        reason: intent.last_payment_error.and_then(|e| e.message),
    })
}

fn parse_payment_succeeded(object: serde_json::Value) -> Result<EventKind> {
    let intent: PaymentIntentObject = object_as(object)?;
    Ok(EventKind::PaymentSucceeded {
        payment_intent_id: intent.id,
    })
}

fn object_as<T: DeserializeOwned>(object: serde_json::Value) -> Result<T> {
    serde_json::from_value(object)
        .map_err(|e| PaymentError::InvalidArgument(format!("malformed event object: {e}")))
}

impl GatewayEvent {
    /// Parses a raw event body. Call only on payloads whose signature was verified.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::InvalidArgument(format!("malformed event: {e}")))?;

        let kind = match PARSERS.iter().find(|(tag, _)| *tag == raw.event_type) {
            Some((_, parse)) => parse(raw.data.object)?,
            None => EventKind::Unrecognized(raw.event_type.clone()),
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            kind,
        })
    }
}
