use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::db::models::{EntryKey, EntryPatch, ExamSubject, GradingSystem, MarksEntry, Student};
use crate::db::types::EntryStatus;
use crate::repositories;

pub(crate) const CHANGE_CHANNEL: &str = "marks_entries_changed";
const SNAPSHOT_BUFFER: usize = 256;
const LISTENER_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("entry {id} is at revision {actual}, expected {expected}")]
    Conflict { id: String, expected: i64, actual: i64 },
    #[error("entry {id} is {actual}")]
    StatusChanged { id: String, actual: EntryStatus },
}

impl StoreError {
    /// Explains why a guarded update matched no row, given the row as it is now.
    pub(crate) fn rejected_update(
        id: &str,
        stored: Option<&MarksEntry>,
        expected_revision: Option<i64>,
    ) -> Self {
        match stored {
            None => Self::NotFound(id.to_string()),
            Some(entry) => match expected_revision {
                Some(expected) if expected != entry.revision => {
                    Self::Conflict { id: id.to_string(), expected, actual: entry.revision }
                }
                _ => Self::StatusChanged { id: id.to_string(), actual: entry.status },
            },
        }
    }
}

/// Grading systems that may apply to one exam subject.
#[derive(Debug, Clone, Default)]
pub(crate) struct GradingSystems {
    pub(crate) exam: Option<GradingSystem>,
    pub(crate) school_default: Option<GradingSystem>,
}

/// Persistence seen by the marks engine. Every stored change is also published
/// to `subscribe()` receivers, including the caller's own writes.
#[async_trait]
pub(crate) trait MarksStore: Send + Sync {
    async fn find(&self, key: &EntryKey) -> Result<Option<MarksEntry>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<MarksEntry>, StoreError>;

    /// Oldest entry first.
    async fn list_by_status(
        &self,
        school_id: &str,
        status: EntryStatus,
    ) -> Result<Vec<MarksEntry>, StoreError>;

    async fn create(&self, entry: MarksEntry) -> Result<MarksEntry, StoreError>;

    async fn update(
        &self,
        id: &str,
        patch: &EntryPatch,
        expected_revision: Option<i64>,
    ) -> Result<MarksEntry, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<MarksEntry>;

    async fn roster(
        &self,
        school_id: &str,
        class_id: &str,
        section_id: Option<&str>,
    ) -> Result<Vec<Student>, StoreError>;

    async fn subject(
        &self,
        exam_id: &str,
        subject_id: &str,
    ) -> Result<Option<ExamSubject>, StoreError>;

    async fn grading_systems(
        &self,
        school_id: &str,
        exam_system_id: Option<&str>,
    ) -> Result<GradingSystems, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub(crate) struct PgMarksStore {
    pool: PgPool,
    snapshots: broadcast::Sender<MarksEntry>,
}

impl PgMarksStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_BUFFER);
        Self { pool, snapshots }
    }

    /// Forwards `marks_entries_changed` notifications to subscribers until shutdown.
    pub(crate) fn spawn_listener(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move { store.listen(shutdown).await })
    }

    async fn listen(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let mut listener = match self.connect_listener().await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to start marks change listener");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(LISTENER_RETRY) => continue,
                    }
                }
            };
            tracing::info!(channel = CHANGE_CHANNEL, "Listening for marks entry changes");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        tracing::info!("Marks change listener shutting down");
                        return;
                    }
                    notification = listener.recv() => match notification {
                        Ok(notification) => self.publish(notification.payload()).await,
                        Err(err) => {
                            tracing::warn!(error = %err, "Marks change listener lost its connection");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn connect_listener(&self) -> Result<PgListener, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        Ok(listener)
    }

    async fn publish(&self, id: &str) {
        match repositories::marks_entries::find_by_id(&self.pool, id).await {
            Ok(Some(entry)) => {
                // No receivers is fine; nobody has a session open.
                let _ = self.snapshots.send(entry);
            }
            Ok(None) => tracing::debug!(entry_id = %id, "Changed marks entry no longer exists"),
            Err(err) => {
                tracing::warn!(error = %err, entry_id = %id, "Failed to load changed marks entry")
            }
        }
    }
}

#[async_trait]
impl MarksStore for PgMarksStore {
    async fn find(&self, key: &EntryKey) -> Result<Option<MarksEntry>, StoreError> {
        Ok(repositories::marks_entries::find_by_key(&self.pool, key).await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MarksEntry>, StoreError> {
        Ok(repositories::marks_entries::find_by_id(&self.pool, id).await?)
    }

    async fn list_by_status(
        &self,
        school_id: &str,
        status: EntryStatus,
    ) -> Result<Vec<MarksEntry>, StoreError> {
        Ok(repositories::marks_entries::list_by_status(&self.pool, school_id, status).await?)
    }

    async fn create(&self, entry: MarksEntry) -> Result<MarksEntry, StoreError> {
        Ok(repositories::marks_entries::insert(&self.pool, &entry).await?)
    }

    async fn update(
        &self,
        id: &str,
        patch: &EntryPatch,
        expected_revision: Option<i64>,
    ) -> Result<MarksEntry, StoreError> {
        let updated =
            repositories::marks_entries::update(&self.pool, id, patch, expected_revision).await?;
        if let Some(entry) = updated {
            return Ok(entry);
        }

        let stored = repositories::marks_entries::find_by_id(&self.pool, id).await?;
        Err(StoreError::rejected_update(id, stored.as_ref(), expected_revision))
    }

    fn subscribe(&self) -> broadcast::Receiver<MarksEntry> {
        self.snapshots.subscribe()
    }

    async fn roster(
        &self,
        school_id: &str,
        class_id: &str,
        section_id: Option<&str>,
    ) -> Result<Vec<Student>, StoreError> {
        Ok(repositories::students::list_active_for_class(
            &self.pool, school_id, class_id, section_id,
        )
        .await?)
    }

    async fn subject(
        &self,
        exam_id: &str,
        subject_id: &str,
    ) -> Result<Option<ExamSubject>, StoreError> {
        Ok(repositories::exam_subjects::find(&self.pool, exam_id, subject_id).await?)
    }

    async fn grading_systems(
        &self,
        school_id: &str,
        exam_system_id: Option<&str>,
    ) -> Result<GradingSystems, StoreError> {
        let exam = match exam_system_id {
            Some(id) => repositories::grading_systems::find_by_id(&self.pool, id).await?,
            None => None,
        };
        let school_default =
            repositories::grading_systems::find_school_default(&self.pool, school_id).await?;
        Ok(GradingSystems { exam, school_default })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if repositories::health::marks_schema_ready(&self.pool).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound("marks_entries table is missing".to_string()))
        }
    }
}
