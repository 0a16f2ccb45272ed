//! Scheduling primitive
//!
//! Persistent future firings that re-enter the pipeline as `plugin_event`
//! signals. Used by motor for SCHEDULE intents and handed to plugins as a
//! scoped primitive.

pub mod recurrence;
pub mod store;

pub use recurrence::{AnchorDay, Recurrence, RecurrenceRule};
pub use store::{ScheduleStore, SchedulesFile};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, VigilError};

/// One persisted future firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    /// Next firing time, always UTC
    pub fire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    /// Timezone for local-time recurrence rules
    pub timezone: chrono_tz::Tz,
    pub payload: serde_json::Value,
    /// Owner, for scoped cancellation; None for core-owned entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a caller asks the scheduler to do
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub fire_at: DateTime<Utc>,
    pub recurrence: Option<Recurrence>,
    pub timezone: Option<chrono_tz::Tz>,
    pub payload: serde_json::Value,
    pub plugin_id: Option<String>,
}

struct ServiceInner {
    entries: Vec<ScheduleEntry>,
    store: Option<ScheduleStore>,
}

impl ServiceInner {
    fn persist(&self) {
        if let Some(store) = &self.store {
            let file = SchedulesFile {
                schema_version: store::SCHEMA_VERSION,
                entries: self.entries.clone(),
            };
            if let Err(e) = store.save(&file) {
                tracing::error!(error = %e, "failed to persist schedules");
            }
        }
    }
}

/// Shared scheduling service.
///
/// Cloning shares the underlying entry book. All mutation is serialized
/// behind one lock; the due-scan runs on the heartbeat task.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Mutex<ServiceInner>>,
}

impl SchedulerHandle {
    /// In-memory service, used in tests and when persistence is disabled
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceInner {
                entries: Vec::new(),
                store: None,
            })),
        }
    }

    /// File-backed service; existing entries are loaded at construction
    pub fn with_store(store: ScheduleStore) -> Result<Self> {
        let file = store.load().map_err(|e| VigilError::StorageError {
            message: e.to_string(),
        })?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ServiceInner {
                entries: file.entries,
                store: Some(store),
            })),
        })
    }

    /// Register a future firing; returns its id
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Uuid> {
        let entry = ScheduleEntry {
            id: Uuid::new_v4(),
            fire_at: request.fire_at,
            recurrence: request.recurrence,
            timezone: request.timezone.unwrap_or(chrono_tz::UTC),
            payload: request.payload,
            plugin_id: request.plugin_id,
            created_at: Utc::now(),
        };
        // Validate recurrence up front so a bad rule fails loudly now,
        // not silently at fire time
        if let Some(recurrence) = &entry.recurrence {
            recurrence.next_fire(entry.fire_at, entry.timezone)?;
        }
        let id = entry.id;
        let mut inner = self.inner.lock();
        inner.entries.push(entry);
        inner.persist();
        Ok(id)
    }

    /// Cancel by id; returns whether anything was removed
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        let removed = inner.entries.len() < before;
        if removed {
            inner.persist();
        }
        removed
    }

    /// Cancel everything a plugin owns (used at deactivation)
    pub fn cancel_plugin(&self, plugin_id: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| e.plugin_id.as_deref() != Some(plugin_id));
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.persist();
        }
        removed
    }

    pub fn get_schedules(&self) -> Vec<ScheduleEntry> {
        self.inner.lock().entries.clone()
    }

    /// Collect entries due at `now`. One-shot entries are removed; recurring
    /// entries advance to their next firing (skipping missed occurrences).
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ScheduleEntry> {
        let mut inner = self.inner.lock();
        let mut fired = Vec::new();
        let mut keep = Vec::with_capacity(inner.entries.len());

        for mut entry in inner.entries.drain(..) {
            if entry.fire_at > now {
                keep.push(entry);
                continue;
            }
            fired.push(entry.clone());
            if let Some(recurrence) = &entry.recurrence {
                match recurrence.next_fire(now, entry.timezone) {
                    Ok(next) => {
                        entry.fire_at = next;
                        keep.push(entry);
                    }
                    Err(e) => {
                        tracing::warn!(id = %entry.id, error = %e, "dropping recurring entry");
                    }
                }
            }
        }

        inner.entries = keep;
        if !fired.is_empty() {
            inner.persist();
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn request(fire_at: DateTime<Utc>, recurrence: Option<Recurrence>) -> ScheduleRequest {
        ScheduleRequest {
            fire_at,
            recurrence,
            timezone: None,
            payload: serde_json::json!({"k": "v"}),
            plugin_id: None,
        }
    }

    #[test]
    fn one_shot_fires_once_and_disappears() {
        let handle = SchedulerHandle::in_memory();
        let now = Utc::now();
        handle.schedule(request(now - ChronoDuration::seconds(1), None)).unwrap();

        let fired = handle.due(now);
        assert_eq!(fired.len(), 1);
        assert!(handle.get_schedules().is_empty());
        assert!(handle.due(now).is_empty());
    }

    #[test]
    fn recurring_advances_past_now() {
        let handle = SchedulerHandle::in_memory();
        let now = Utc::now();
        handle
            .schedule(request(
                now - ChronoDuration::seconds(1),
                Some(Recurrence::interval_secs(300)),
            ))
            .unwrap();

        let fired = handle.due(now);
        assert_eq!(fired.len(), 1);

        let remaining = handle.get_schedules();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].fire_at > now);
    }

    #[test]
    fn future_entries_do_not_fire() {
        let handle = SchedulerHandle::in_memory();
        let now = Utc::now();
        handle
            .schedule(request(now + ChronoDuration::hours(1), None))
            .unwrap();
        assert!(handle.due(now).is_empty());
        assert_eq!(handle.get_schedules().len(), 1);
    }

    #[test]
    fn cancel_removes_entry() {
        let handle = SchedulerHandle::in_memory();
        let id = handle
            .schedule(request(Utc::now() + ChronoDuration::hours(1), None))
            .unwrap();
        assert!(handle.cancel(id));
        assert!(!handle.cancel(id));
        assert!(handle.get_schedules().is_empty());
    }

    #[test]
    fn plugin_scoped_cancellation() {
        let handle = SchedulerHandle::in_memory();
        let mut req = request(Utc::now() + ChronoDuration::hours(1), None);
        req.plugin_id = Some("news".to_string());
        handle.schedule(req.clone()).unwrap();
        handle.schedule(req).unwrap();
        handle
            .schedule(request(Utc::now() + ChronoDuration::hours(1), None))
            .unwrap();

        assert_eq!(handle.cancel_plugin("news"), 2);
        assert_eq!(handle.get_schedules().len(), 1);
    }

    #[test]
    fn invalid_recurrence_is_rejected_at_registration() {
        let handle = SchedulerHandle::in_memory();
        let result = handle.schedule(request(
            Utc::now(),
            Some(Recurrence::interval_secs(0)),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn file_backed_entries_survive_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = Utc::now();
        {
            let handle =
                SchedulerHandle::with_store(ScheduleStore::new_in(dir.path().to_path_buf()))
                    .unwrap();
            handle
                .schedule(request(now + ChronoDuration::hours(1), None))
                .unwrap();
        }
        let reloaded =
            SchedulerHandle::with_store(ScheduleStore::new_in(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.get_schedules().len(), 1);
    }
}
