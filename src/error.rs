use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the external payment gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Refund not eligible: {0}")]
    RefundNotEligible(String),
    #[error("Refund of {requested} exceeds the refundable remainder of {remaining}")]
    RefundExceedsAmount { requested: Decimal, remaining: Decimal },
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl PaymentError {
    /// HTTP status an inbound adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::InvalidArgument(_) | PaymentError::InvalidSignature(_) => 400,
            PaymentError::NotFound(_) => 404,
            PaymentError::InvalidState(_) | PaymentError::Conflict(_) => 409,
            PaymentError::RefundNotEligible(_) | PaymentError::RefundExceedsAmount { .. } => 422,
            PaymentError::Gateway(GatewayError::Timeout(_)) => 504,
            PaymentError::Gateway(_) => 502,
            _ => 500,
        }
    }

    /// Whether redelivering the same input may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PaymentError::InvalidArgument(_)
                | PaymentError::InvalidSignature(_)
                | PaymentError::InvalidState(_)
                | PaymentError::RefundNotEligible(_)
                | PaymentError::RefundExceedsAmount { .. }
        )
    }

    /// Violations of a payment business rule, as opposed to infrastructure trouble.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            PaymentError::InvalidState(_)
                | PaymentError::RefundNotEligible(_)
                | PaymentError::RefundExceedsAmount { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
