//! Domain events describing what the bridge did.
//!
//! The orchestration loop and the catalog publish here; the CLI and tests
//! subscribe. Publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A worker's catalog was fetched during discovery
    CatalogDiscovered {
        worker: String,
        tool_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A worker yielded no tools and was left out of the catalog
    WorkerSkipped {
        worker: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation finished (successfully or not)
    ToolInvoked {
        worker: String,
        operation: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning component answered one round
    ResponseGenerated {
        iteration: u32,
        model: String,
        tool_calls: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A top-level request finished
    RequestFinished {
        termination: String,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
