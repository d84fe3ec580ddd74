use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::metrics::REMOTE_SNAPSHOTS;
use crate::db::models::MarksEntry;
use crate::services::edit_session::{EditSession, RemoteOutcome};
use crate::services::entry_workflow::Actor;
use crate::services::errors::MarksError;
use crate::services::marks_store::MarksStore;

pub(crate) type SharedSession = Arc<Mutex<EditSession>>;

const RESYNC_RETRY: Duration = Duration::from_secs(1);

struct SessionSlot {
    owner: Option<String>,
    session: SharedSession,
    forwarder: JoinHandle<()>,
    touched: Instant,
}

/// Server-side edit sessions, each fed by the store's snapshot stream.
pub(crate) struct SessionRegistry {
    store: Arc<dyn MarksStore>,
    grace: Duration,
    capacity: usize,
    idle_ttl: Duration,
    slots: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub(crate) fn new(
        store: Arc<dyn MarksStore>,
        grace: Duration,
        capacity: usize,
        idle_ttl: Duration,
    ) -> Self {
        Self { store, grace, capacity, idle_ttl, slots: RwLock::new(HashMap::new()) }
    }

    pub(crate) async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub(crate) async fn open(&self, actor: &Actor) -> Result<(String, SharedSession), MarksError> {
        let mut slots = self.slots.write().await;
        let now = Instant::now();
        if slots.len() >= self.capacity {
            evict_idle(&mut slots, now, self.idle_ttl);
        }
        if slots.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "Marks session limit reached");
            return Err(MarksError::Capacity);
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(EditSession::new(self.grace)));
        let forwarder = tokio::spawn(forward_snapshots(
            id.clone(),
            Arc::clone(&self.store),
            self.store.subscribe(),
            Arc::clone(&session),
        ));

        slots.insert(
            id.clone(),
            SessionSlot {
                owner: actor.user_id.clone(),
                session: Arc::clone(&session),
                forwarder,
                touched: now,
            },
        );
        tracing::info!(session_id = %id, user_id = ?actor.user_id, "Marks session opened");

        Ok((id, session))
    }

    /// Sessions are only visible to the user who opened them.
    pub(crate) async fn get(&self, id: &str, actor: &Actor) -> Result<SharedSession, MarksError> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(id)
            .filter(|slot| slot.owner == actor.user_id)
            .ok_or_else(|| MarksError::NotFound("Marks session not found".to_string()))?;
        slot.touched = Instant::now();
        Ok(Arc::clone(&slot.session))
    }

    pub(crate) async fn close(&self, id: &str, actor: &Actor) -> Result<(), MarksError> {
        let mut slots = self.slots.write().await;
        match slots.get(id) {
            Some(slot) if slot.owner == actor.user_id => {}
            _ => return Err(MarksError::NotFound("Marks session not found".to_string())),
        }
        if let Some(slot) = slots.remove(id) {
            slot.forwarder.abort();
        }
        tracing::info!(session_id = %id, "Marks session closed");
        Ok(())
    }

    pub(crate) async fn close_all(&self) {
        let mut slots = self.slots.write().await;
        for (_, slot) in slots.drain() {
            slot.forwarder.abort();
        }
    }
}

fn evict_idle(slots: &mut HashMap<String, SessionSlot>, now: Instant, idle_ttl: Duration) {
    slots.retain(|id, slot| {
        let idle = now.saturating_duration_since(slot.touched);
        if idle < idle_ttl {
            return true;
        }
        slot.forwarder.abort();
        tracing::info!(session_id = %id, idle_secs = idle.as_secs(), "Idle marks session closed");
        false
    });
}

async fn forward_snapshots(
    session_id: String,
    store: Arc<dyn MarksStore>,
    mut snapshots: broadcast::Receiver<MarksEntry>,
    session: SharedSession,
) {
    loop {
        let due = session.lock().await.resync_due(Instant::now());
        let received = match due {
            Some(at) => tokio::select! {
                received = snapshots.recv() => received,
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {
                    if !resync(&session_id, store.as_ref(), &session).await {
                        tokio::time::sleep(RESYNC_RETRY).await;
                    }
                    continue;
                }
            },
            None => snapshots.recv().await,
        };

        match received {
            Ok(entry) => {
                let outcome = session.lock().await.on_remote_snapshot(&entry, Instant::now());
                metrics::counter!(REMOTE_SNAPSHOTS, "outcome" => outcome.as_str()).increment(1);
                tracing::debug!(
                    session_id = %session_id,
                    entry_id = %entry.id,
                    revision = entry.revision,
                    outcome = outcome.as_str(),
                    "Remote marks snapshot"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(session_id = %session_id, skipped, "Marks session lagged behind");
                session.lock().await.mark_missed();
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Re-reads the selected entry after snapshots were missed. `false` when the read failed.
async fn resync(session_id: &str, store: &dyn MarksStore, session: &SharedSession) -> bool {
    let Some(key) = session.lock().await.key().cloned() else {
        return true;
    };
    match store.find(&key).await {
        Ok(entry) => {
            let outcome = session.lock().await.resync(&key, entry, Instant::now());
            if let Some(outcome) = outcome {
                metrics::counter!(REMOTE_SNAPSHOTS, "outcome" => outcome.as_str()).increment(1);
            }
            tracing::debug!(
                session_id = %session_id,
                outcome = outcome.map(RemoteOutcome::as_str),
                "Marks session resynced"
            );
            true
        }
        Err(err) => {
            tracing::warn!(session_id = %session_id, error = %err, "Marks session resync failed");
            false
        }
    }
}
