//! Activity sinks owned by the node.

use std::sync::Arc;

use vaultcore_types::{ActivityEvent, ActivitySink, DeploymentId};

/// Writes every activity event to the `vaultcore::activity` tracing target
/// as one structured `info` record.
#[derive(Debug, Clone)]
pub struct TracingActivityLog {
    deployment: DeploymentId,
}

impl TracingActivityLog {
    #[must_use]
    pub fn new(deployment: DeploymentId) -> Self {
        Self { deployment }
    }
}

impl ActivitySink for TracingActivityLog {
    fn record(&self, event: ActivityEvent) {
        let request = event.request_id.map(|id| id.to_string());
        tracing::info!(
            target: "vaultcore::activity",
            deployment = %self.deployment,
            kind = %event.kind,
            request = request.as_deref(),
            tx_ref = event.tx_ref.as_deref(),
            metadata = %event.metadata,
            at = %event.occurred_at,
            "{}",
            event.description
        );
    }
}

/// Forwards each event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutActivityLog {
    sinks: Vec<Arc<dyn ActivitySink>>,
}

impl FanoutActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ActivitySink for FanoutActivityLog {
    fn record(&self, event: ActivityEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vaultcore_types::{ActivityKind, MemoryActivityLog};

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemoryActivityLog::new());
        let b = Arc::new(MemoryActivityLog::new());
        let fanout = FanoutActivityLog::new()
            .with(Arc::new(TracingActivityLog::new(DeploymentId::new("test"))))
            .with(a.clone())
            .with(b.clone());

        fanout.record(ActivityEvent::new(ActivityKind::RoundOpened, "open", Utc::now()));
        assert_eq!(a.count(ActivityKind::RoundOpened), 1);
        assert_eq!(b.count(ActivityKind::RoundOpened), 1);
    }

    #[test]
    fn empty_fanout_drops_events() {
        FanoutActivityLog::new().record(ActivityEvent::new(
            ActivityKind::PriceUpdated,
            "nobody listens",
            Utc::now(),
        ));
    }
}
