use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LedgerState {
    /// A worker claimed the event and is applying its effects.
    InProgress,
    /// Effects were applied; redeliveries are acknowledged without reprocessing.
    Completed,
}

/// Dedup ledger entry keyed by the gateway's event id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProcessedEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub state: LedgerState,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of atomically claiming an event id.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyProcessed,
    /// Another delivery of the same event holds a live claim.
    InFlight,
}

impl ProcessedEventRecord {
    pub fn claim(event_id: &str, event_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            state: LedgerState::InProgress,
            claimed_at: now,
            completed_at: None,
        }
    }

    /// An in-progress claim older than `lease` belongs to a worker that died mid-flight.
    pub fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.state == LedgerState::InProgress && now - self.claimed_at >= lease
    }

    /// Decides how a new claim attempt fares against this existing record.
    pub fn contend(&self, now: DateTime<Utc>, lease: Duration) -> ClaimOutcome {
        match self.state {
            LedgerState::Completed => ClaimOutcome::AlreadyProcessed,
            LedgerState::InProgress if self.lease_expired(now, lease) => ClaimOutcome::Claimed,
            LedgerState::InProgress => ClaimOutcome::InFlight,
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = LedgerState::Completed;
        self.completed_at = Some(now);
    }
}
