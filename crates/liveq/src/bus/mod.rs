//! Campaign-keyed pub/sub bus between agents and live viewers.
//!
//! One topic per campaign (the stringified campaign id). Results are
//! broadcast: every current subscriber receives its own copy of every
//! result. Nothing is buffered or replayed; a subscriber only sees results
//! published after it subscribed. Delivery is FIFO per publishing host
//! only.
//!
//! The bus is a capability object passed into whatever needs it, never a
//! process-wide singleton.

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::campaigns::DistributedQueryResult;

/// Per-topic broadcast capacity. Slow subscribers past this many undrained
/// results observe an explicit gap instead of blocking publishers.
const RESULT_BUFFER_SIZE: usize = 256;

/// A query registered for one host, waiting to be polled by its agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingQuery {
    pub campaign_id: u64,
    pub sql: String,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic {0:?} is not a campaign id")]
    BadTopic(String),

    #[error("cannot publish a query to zero hosts")]
    EmptyHostSet,
}

/// Receiving a result can report a gap (subscriber fell behind) or the
/// end of the topic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResultRecvError {
    #[error("subscription lagged, skipped {0} results")]
    Lagged(u64),

    #[error("topic closed")]
    Closed,
}

/// Live handle on one topic. Dropping it unsubscribes.
pub struct ResultSubscription {
    topic: String,
    rx: broadcast::Receiver<DistributedQueryResult>,
}

impl ResultSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next result published on this topic since subscription.
    pub async fn recv(&mut self) -> Result<DistributedQueryResult, ResultRecvError> {
        match self.rx.recv().await {
            Ok(result) => Ok(result),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(ResultRecvError::Lagged(skipped))
            }
            Err(broadcast::error::RecvError::Closed) => Err(ResultRecvError::Closed),
        }
    }
}

/// Query broker: per-host pending-query inboxes on the producer side,
/// per-campaign broadcast topics on the consumer side.
#[derive(Debug, Default)]
pub struct QueryBus {
    /// Host id -> queries waiting to be polled.
    inboxes: DashMap<u64, Vec<PendingQuery>>,

    /// Topic -> broadcast sender for its results.
    topics: DashMap<String, broadcast::Sender<DistributedQueryResult>>,
}

impl QueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query for delivery to the named hosts on `topic`.
    ///
    /// At-least-once hand-off: the inbox entry stays until the agent polls
    /// it; the bus itself never retries.
    pub fn publish(&self, topic: &str, sql: &str, host_ids: &[u64]) -> Result<(), BusError> {
        let campaign_id: u64 = topic
            .parse()
            .map_err(|_| BusError::BadTopic(topic.to_string()))?;
        if host_ids.is_empty() {
            return Err(BusError::EmptyHostSet);
        }

        for &host_id in host_ids {
            self.inboxes.entry(host_id).or_default().push(PendingQuery {
                campaign_id,
                sql: sql.to_string(),
            });
        }
        info!(
            "registered query for campaign {} on {} hosts",
            campaign_id,
            host_ids.len()
        );
        Ok(())
    }

    /// Drain the pending queries for one host. Agents poll this.
    pub fn pending_for_host(&self, host_id: u64) -> Vec<PendingQuery> {
        self.inboxes
            .remove(&host_id)
            .map(|(_, queries)| queries)
            .unwrap_or_default()
    }

    /// Subscribe to a topic from this moment onward.
    ///
    /// Also sweeps topics whose last subscriber left without a further
    /// publish, so abandoned topics cannot accumulate.
    pub fn subscribe(&self, topic: &str) -> ResultSubscription {
        self.topics.retain(|_, tx| tx.receiver_count() > 0);
        let rx = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(RESULT_BUFFER_SIZE).0)
            .subscribe();
        debug!("subscribed to topic {}", topic);
        ResultSubscription {
            topic: topic.to_string(),
            rx,
        }
    }

    /// Fan a result out to every current subscriber of its topic.
    /// Returns how many subscribers received it; zero means the result
    /// was dropped (no replay).
    pub fn publish_result(&self, topic: &str, result: DistributedQueryResult) -> usize {
        let delivered = match self.topics.get(topic) {
            Some(tx) => tx.send(result).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            debug!("dropped result on topic {}: no subscribers", topic);
            // Reap the topic entry once its last subscriber is gone.
            self.topics
                .remove_if(topic, |_, tx| tx.receiver_count() == 0);
        }
        delivered
    }

    /// Topics currently tracked, live or awaiting sweep.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
