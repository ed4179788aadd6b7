//! Application layer: orchestration of the domain through its ports.
//!
//! Every service here is constructed from `Arc<dyn Port>` handles, so the same code
//! runs against the in-memory adapters in tests and the real adapters in the binary.

pub mod accounts;
pub mod checkout;
pub mod payments;
pub mod publisher;
pub mod webhook;

use crate::error::GatewayError;
use std::future::Future;
use std::time::Duration;

/// Bounds an outbound call; an elapsed deadline becomes `GatewayError::Timeout`.
pub(crate) async fn bounded<T, E, F>(limit: Duration, call: F) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: From<GatewayError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit).into()),
    }
}
