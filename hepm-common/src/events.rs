//! Migration event types and the broadcast event bus
//!
//! Components emit progress events; the health endpoint and log bridges
//! subscribe. Emission never blocks and never fails the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline step identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Step 1: decode legacy input into the mirror
    Ingest,
    /// Step 2: transform, assign identifiers, synchronize relations
    Migrate,
    /// Step 3: republish affected ids to the indexer
    Reindex,
}

impl PipelineStep {
    /// Step number as used on the command line (1, 2, 3)
    pub fn number(self) -> u8 {
        match self {
            PipelineStep::Ingest => 1,
            PipelineStep::Migrate => 2,
            PipelineStep::Reindex => 3,
        }
    }

    /// Parse a command-line step number
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(PipelineStep::Ingest),
            2 => Some(PipelineStep::Migrate),
            3 => Some(PipelineStep::Reindex),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStep::Ingest => write!(f, "ingest"),
            PipelineStep::Migrate => write!(f, "migrate"),
            PipelineStep::Reindex => write!(f, "reindex"),
        }
    }
}

/// Migration events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MigrationEvent {
    /// A pipeline step started
    StepStarted {
        step: PipelineStep,
        timestamp: DateTime<Utc>,
    },

    /// A mirror row was migrated (uuid is absent for merge-only rows)
    RecordMigrated {
        legacy_id: i64,
        uuid: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// A mirror row was marked broken
    RecordBroken {
        legacy_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline step finished
    StepCompleted {
        step: PipelineStep,
        processed: usize,
        migrated: usize,
        broken: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// One continuous-mode cycle finished
    CycleCompleted {
        cycle: u64,
        migrated: usize,
        broken: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus
///
/// ```
/// use hepm_common::events::{EventBus, MigrationEvent};
///
/// let bus = EventBus::new(100);
/// let _rx = bus.subscribe();
/// bus.emit_lossy(MigrationEvent::RecordBroken {
///     legacy_id: 668,
///     error: "bad date".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MigrationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MigrationEvent,
    ) -> Result<usize, broadcast::error::SendError<MigrationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
