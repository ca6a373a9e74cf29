//! Usage Metering — append-only invocation log.
//!
//! Writes are fire-and-forget relative to the response path: the entry is
//! handed to a Tokio task after the handler completes, so a slow or
//! failing log write never blocks a caller. The rate limiter keeps its
//! own in-memory counters and does not depend on this log.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::usage::{UsageAggregate, UsageLogEntry, UsageRecord};
use crate::store::UsageStore;

#[derive(Clone)]
pub struct UsageMeter {
    store: Arc<dyn UsageStore>,
}

impl UsageMeter {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Queue one usage record for insertion without blocking the caller.
    pub fn record(&self, record: UsageRecord) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.insert_usage(&record).await {
                tracing::error!(
                    customer_id = %record.customer_id,
                    tool = %record.tool_name,
                    "failed to write usage log: {}",
                    e
                );
            } else {
                tracing::debug!(
                    customer_id = %record.customer_id,
                    tool = %record.tool_name,
                    "usage log recorded"
                );
            }
        });
    }

    /// Raw recent entries, newest first.
    pub async fn recent(&self, customer_id: Uuid, limit: i64) -> anyhow::Result<Vec<UsageLogEntry>> {
        self.store.recent_usage(customer_id, limit.clamp(1, 500)).await
    }

    /// Aggregated counts by tool over a trailing window.
    pub async fn by_tool(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        self.store.usage_by_tool(customer_id, window_hours.clamp(1, 720)).await
    }

    /// Aggregated counts by category over a trailing window.
    pub async fn by_category(
        &self,
        customer_id: Uuid,
        window_hours: i64,
    ) -> anyhow::Result<Vec<UsageAggregate>> {
        self.store
            .usage_by_category(customer_id, window_hours.clamp(1, 720))
            .await
    }
}
