//! In-process delayed dispatch queue.
//!
//! The specification treats the dispatch queue as an external collaborator
//! (SQS/Cloud Tasks/a Postgres-backed queue table) reached only through an
//! interface the core consumes. This supplies a concrete implementation of
//! that interface so the single-process deployment — and its test suite —
//! has something to run against: a `tokio::sync::mpsc` channel per named
//! queue, fed by a delay wheel (`BinaryHeap` ordered by release time) that a
//! background task drains once items come due. Payloads are opaque JSON
//! strings, same as a real broker would hand the consumer — `DispatchMessage`
//! parsing happens in `queue::consumer`, not here.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue send failed: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait DelayedQueue: Send + Sync {
    async fn enqueue(&self, queue_name: &str, payload: String, delay: Duration) -> Result<(), QueueError>;
    async fn dequeue(&self, queue_name: &str) -> Option<String>;
}

struct DelayedItem {
    release_at: DateTime<Utc>,
    sequence: u64,
    queue: String,
    payload: String,
}

impl PartialEq for DelayedItem {
    fn eq(&self, other: &Self) -> bool {
        self.release_at == other.release_at && self.sequence == other.sequence
    }
}
impl Eq for DelayedItem {}
impl Ord for DelayedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so the BinaryHeap (a max-heap) pops the soonest release first.
        other
            .release_at
            .cmp(&self.release_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for DelayedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueChannel {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

pub struct InMemoryBroker {
    channels: DashMap<String, Arc<QueueChannel>>,
    delayed: Mutex<BinaryHeap<DelayedItem>>,
    sequence: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            delayed: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn channel_for(&self, queue_name: &str) -> Arc<QueueChannel> {
        self.channels
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                Arc::new(QueueChannel {
                    sender,
                    receiver: Mutex::new(receiver),
                })
            })
            .clone()
    }

    /// Move every item whose release time has passed into its queue's ready
    /// channel. Intended to be driven by a periodic background task.
    pub async fn drain_due(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut heap = self.delayed.lock().await;
            while let Some(item) = heap.peek() {
                if item.release_at > now {
                    break;
                }
                due.push(heap.pop().unwrap());
            }
        }
        for item in due {
            let channel = self.channel_for(&item.queue);
            let _ = channel.sender.send(item.payload);
        }
    }
}

#[async_trait]
impl DelayedQueue for InMemoryBroker {
    async fn enqueue(&self, queue_name: &str, payload: String, delay: Duration) -> Result<(), QueueError> {
        if delay.is_zero() {
            let channel = self.channel_for(queue_name);
            channel
                .sender
                .send(payload)
                .map_err(|e| QueueError::SendFailed(e.to_string()))?;
            return Ok(());
        }

        let release_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let mut heap = self.delayed.lock().await;
        heap.push(DelayedItem {
            release_at,
            sequence,
            queue: queue_name.to_string(),
            payload,
        });
        Ok(())
    }

    async fn dequeue(&self, queue_name: &str) -> Option<String> {
        let channel = self.channel_for(queue_name);
        let mut receiver = channel.receiver.lock().await;
        receiver.recv().await
    }
}
