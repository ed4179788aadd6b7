use crate::domain::ports::EventBus;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;

#[derive(Serialize)]
struct Line<'a> {
    exchange: &'a str,
    routing_key: &'a str,
    event: serde_json::Value,
}

/// Event bus that writes each message as one JSON line, used by the CLI in place of a broker.
pub struct JsonLinesEventBus<W: Write + Send> {
    sink: Mutex<W>,
}

impl<W: Write + Send> JsonLinesEventBus<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> EventBus for JsonLinesEventBus<W> {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let event: serde_json::Value = serde_json::from_slice(payload)?;
        let mut line = serde_json::to_vec(&Line {
            exchange,
            routing_key,
            event,
        })?;
        line.push(b'\n');

        let mut sink = self
            .sink
            .lock()
            .map_err(|_| PaymentError::Storage("event sink lock poisoned".to_string()))?;
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }
}
