//! Activity log types for the VaultCore audit trail.
//!
//! Every state transition (request approved, round opened, price updated,
//! batch settled) produces one [`ActivityEvent`]. Events are handed to an
//! [`ActivitySink`], which is append-only and best-effort: a sink failure
//! never rolls back the transition that produced the event.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RequestId;

/// The kind of action an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    PriceUpdated,
    DeviationChanged,
    RoundOpened,
    RoundClosed,
    DepositAdmitted,
    CollateralRegistered,
    CollateralSynced,
    RedemptionSubmitted,
    RedemptionApproved,
    RedemptionRejected,
    RedemptionCancelled,
    RedemptionExpired,
    RedemptionProcessing,
    RedemptionCompleted,
    RedemptionFailed,
    PriorityChanged,
    SettlementCompleted,
    SettlementFailed,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PriceUpdated => "PRICE_UPDATED",
            Self::DeviationChanged => "DEVIATION_CHANGED",
            Self::RoundOpened => "ROUND_OPENED",
            Self::RoundClosed => "ROUND_CLOSED",
            Self::DepositAdmitted => "DEPOSIT_ADMITTED",
            Self::CollateralRegistered => "COLLATERAL_REGISTERED",
            Self::CollateralSynced => "COLLATERAL_SYNCED",
            Self::RedemptionSubmitted => "REDEMPTION_SUBMITTED",
            Self::RedemptionApproved => "REDEMPTION_APPROVED",
            Self::RedemptionRejected => "REDEMPTION_REJECTED",
            Self::RedemptionCancelled => "REDEMPTION_CANCELLED",
            Self::RedemptionExpired => "REDEMPTION_EXPIRED",
            Self::RedemptionProcessing => "REDEMPTION_PROCESSING",
            Self::RedemptionCompleted => "REDEMPTION_COMPLETED",
            Self::RedemptionFailed => "REDEMPTION_FAILED",
            Self::PriorityChanged => "PRIORITY_CHANGED",
            Self::SettlementCompleted => "SETTLEMENT_COMPLETED",
            Self::SettlementFailed => "SETTLEMENT_FAILED",
        };
        f.write_str(name)
    }
}

/// One audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub description: String,
    /// Structured details (amounts, positions, reasons).
    pub metadata: serde_json::Value,
    /// External transaction / settlement reference, if any.
    pub tx_ref: Option<String>,
    pub request_id: Option<RequestId>,
    pub occurred_at: DateTime<Utc>,
}

impl ActivityEvent {
    #[must_use]
    pub fn new(kind: ActivityKind, description: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            description: description.into(),
            metadata: serde_json::Value::Null,
            tx_ref: None,
            request_id: None,
            occurred_at,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_request(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_tx_ref(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }
}

/// Write-only destination for activity events.
pub trait ActivitySink: Send + Sync {
    /// Record one event. Implementations must not panic and must not block
    /// for long; failures are theirs to log.
    fn record(&self, event: ActivityEvent);
}

/// In-memory sink, used by tests and by nodes without an external log.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemoryActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of recorded events of `kind`.
    #[must_use]
    pub fn count(&self, kind: ActivityKind) -> usize {
        self.events
            .lock()
            .map(|g| g.iter().filter(|e| e.kind == kind).count())
            .unwrap_or_default()
    }
}

impl ActivitySink for MemoryActivityLog {
    fn record(&self, event: ActivityEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_kind_display() {
        assert_eq!(ActivityKind::PriceUpdated.to_string(), "PRICE_UPDATED");
        assert_eq!(
            ActivityKind::SettlementCompleted.to_string(),
            "SETTLEMENT_COMPLETED"
        );
    }

    #[test]
    fn memory_log_records_in_order() {
        let log = MemoryActivityLog::new();
        let now = Utc::now();
        log.record(ActivityEvent::new(ActivityKind::RoundOpened, "open", now));
        log.record(
            ActivityEvent::new(ActivityKind::RedemptionApproved, "approve", now)
                .with_request(RequestId::new())
                .with_metadata(serde_json::json!({ "position": 1 })),
        );
        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ActivityKind::RoundOpened);
        assert_eq!(events[1].metadata["position"], 1);
        assert_eq!(log.count(ActivityKind::RedemptionApproved), 1);
    }
}
