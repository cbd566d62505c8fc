//! Event bridge feeding the health endpoint
//!
//! Subscribes to the migration [`EventBus`] and folds events into the
//! cumulative [`MigrationStats`] served by `GET /health`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hepm_common::events::MigrationEvent;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Cumulative counters since service start
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationStats {
    pub migrated: u64,
    pub broken: u64,
    pub cycles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl MigrationStats {
    /// Fold one event into the counters
    pub fn apply(&mut self, event: &MigrationEvent) {
        match event {
            MigrationEvent::RecordMigrated { .. } => self.migrated += 1,
            MigrationEvent::RecordBroken { legacy_id, error, .. } => {
                self.broken += 1;
                self.last_error = Some(format!("record {}: {}", legacy_id, error));
            }
            MigrationEvent::CycleCompleted { cycle, timestamp, .. } => {
                self.cycles = *cycle;
                self.last_cycle_at = Some(*timestamp);
            }
            MigrationEvent::StepStarted { .. } | MigrationEvent::StepCompleted { .. } => {}
        }
    }
}

/// Forward events into `stats` until the bus closes
pub async fn run_event_bridge(
    mut events: broadcast::Receiver<MigrationEvent>,
    stats: Arc<RwLock<MigrationStats>>,
) {
    debug!("Event bridge started");

    loop {
        match events.recv().await {
            Ok(event) => stats.write().await.apply(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event bridge lagged; health counters undercount");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Event bus closed, shutting down bridge");
                break;
            }
        }
    }

    debug!("Event bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hepm_common::events::EventBus;

    #[test]
    fn test_apply_counts_records_and_cycles() {
        let mut stats = MigrationStats::default();
        let now = Utc::now();
        stats.apply(&MigrationEvent::RecordMigrated {
            legacy_id: 666,
            uuid: None,
            timestamp: now,
        });
        stats.apply(&MigrationEvent::RecordBroken {
            legacy_id: 668,
            error: "bad date".to_string(),
            timestamp: now,
        });
        stats.apply(&MigrationEvent::CycleCompleted {
            cycle: 3,
            migrated: 1,
            broken: 1,
            timestamp: now,
        });

        assert_eq!(stats.migrated, 1);
        assert_eq!(stats.broken, 1);
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.last_cycle_at, Some(now));
        assert_eq!(stats.last_error.as_deref(), Some("record 668: bad date"));
    }

    #[tokio::test]
    async fn test_bridge_stops_when_bus_drops() {
        let bus = EventBus::new(16);
        let stats = Arc::new(RwLock::new(MigrationStats::default()));
        let handle = tokio::spawn(run_event_bridge(bus.subscribe(), stats.clone()));

        bus.emit_lossy(MigrationEvent::RecordMigrated {
            legacy_id: 1,
            uuid: None,
            timestamp: Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();

        assert_eq!(stats.read().await.migrated, 1);
    }
}
