// src/dedup.rs
//
// At-most-once broadcast per source identifier within a retention window,
// backed by Redis. The store is advisory: if it is unreachable, `has`
// answers "absent" and `record` is fire-and-log, so an outage degrades to
// possible duplicates instead of halting broadcasts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classify::AcceptedEvent;

pub const DEDUP_KEY_PREFIX: &str = "deprem:";
pub const DEDUP_TTL_SECS: u64 = 86_400;

pub fn dedup_key(source_id: &str) -> String {
    format!("{DEDUP_KEY_PREFIX}{source_id}")
}

/// Written once per broadcast, never updated. Expires with the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub source_id: String,
    pub region: String,
    pub magnitude: f64,
    pub processed_at: DateTime<Utc>,
    pub published: bool,
}

impl DedupEntry {
    pub fn published_now(event: &AcceptedEvent) -> Self {
        Self {
            source_id: event.source_id.clone(),
            region: event.region.clone(),
            magnitude: event.magnitude,
            processed_at: Utc::now(),
            published: true,
        }
    }
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Does an unexpired entry exist for this identifier? Store errors are
    /// absorbed and answered as `false`.
    async fn has(&self, source_id: &str) -> bool;

    /// Persist the entry with the retention-window expiry. Called after a
    /// successful broadcast; errors are absorbed, the broadcast stands.
    async fn record(&self, entry: &DedupEntry);
}

pub struct RedisDedupStore {
    client: redis::Client,
}

impl RedisDedupStore {
    pub fn connect(url: &str) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client =
            redis::Client::open(url).with_context(|| format!("invalid redis url: {url}"))?;
        Ok(Self { client })
    }

    async fn try_has(&self, source_id: &str) -> anyhow::Result<bool> {
        use anyhow::Context;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("dedup store connect")?;
        let exists: bool = conn
            .exists(dedup_key(source_id))
            .await
            .context("dedup store exists")?;
        Ok(exists)
    }

    async fn try_record(&self, entry: &DedupEntry) -> anyhow::Result<()> {
        use anyhow::Context;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("dedup store connect")?;
        let payload = serde_json::to_string(entry).context("serialize dedup entry")?;
        let _: () = conn
            .set_ex(dedup_key(&entry.source_id), payload, DEDUP_TTL_SECS)
            .await
            .context("dedup store set")?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn has(&self, source_id: &str) -> bool {
        match self.try_has(source_id).await {
            Ok(exists) => exists,
            Err(e) => {
                counter!("dedup_store_errors_total").increment(1);
                warn!(
                    error = ?e,
                    source_id,
                    "dedup lookup failed, treating identifier as new"
                );
                false
            }
        }
    }

    async fn record(&self, entry: &DedupEntry) {
        if let Err(e) = self.try_record(entry).await {
            counter!("dedup_store_errors_total").increment(1);
            warn!(
                error = ?e,
                source_id = %entry.source_id,
                "dedup record failed, identifier may repeat within the window"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_carries_the_store_prefix() {
        assert_eq!(dedup_key("20241118_0000123"), "deprem:20241118_0000123");
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = DedupEntry {
            source_id: "s1".into(),
            region: "WESTERN TURKEY".into(),
            magnitude: 0.4,
            processed_at: Utc::now(),
            published: true,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: DedupEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn retention_window_is_a_day() {
        assert_eq!(DEDUP_TTL_SECS, 24 * 60 * 60);
    }
}
