use uuid::Uuid;

use crate::core::metrics::{ENTRIES_REVIEWED, ENTRIES_SAVED};
use crate::core::time::primitive_now_utc;
use crate::db::models::{EntryKey, MarksEntry};
use crate::db::types::EntryStatus;
use crate::services::edit_session::{LoadedEntry, SaveTicket};
use crate::services::entry_workflow::{transition, Actor, EntryAction, TransitionError};
use crate::services::errors::MarksError;
use crate::services::grading::GradeTable;
use crate::services::mark_rows::rows_from_roster;
use crate::services::marks_store::{MarksStore, StoreError};

pub(crate) fn validate_key(key: &EntryKey) -> Result<(), MarksError> {
    let missing = [
        ("exam", &key.exam_id),
        ("class", &key.class_id),
        ("subject", &key.subject_id),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    match missing {
        Some((field, _)) => Err(MarksError::Validation(format!("Please select a {field}"))),
        None if key.school_id.trim().is_empty() => {
            Err(MarksError::Validation("School is required".to_string()))
        }
        None => Ok(()),
    }
}

/// Loads the stored entry for `key`, or roster rows when none exists yet.
pub(crate) async fn load_entry(
    store: &dyn MarksStore,
    key: &EntryKey,
    generation: u64,
) -> Result<LoadedEntry, MarksError> {
    validate_key(key)?;

    let subject = store
        .subject(&key.exam_id, &key.subject_id)
        .await?
        .ok_or_else(|| MarksError::NotFound("Subject is not part of this exam".to_string()))?;
    let systems =
        store.grading_systems(&key.school_id, subject.grading_system_id.as_deref()).await?;
    let table = GradeTable::resolve(systems.exam.as_ref(), systems.school_default.as_ref());

    let entry = store.find(key).await?;
    let roster = match entry {
        Some(_) => Vec::new(),
        None => {
            let students =
                store.roster(&key.school_id, &key.class_id, key.section_id.as_deref()).await?;
            rows_from_roster(&students, &subject, &table)
        }
    };

    tracing::debug!(
        exam_id = %key.exam_id,
        class_id = %key.class_id,
        subject_id = %key.subject_id,
        existing = entry.is_some(),
        roster = roster.len(),
        table = ?table.source(),
        "Marks entry loaded"
    );

    Ok(LoadedEntry { generation, entry, roster, table, subject })
}

/// Writes the working rows of a save ticket as a draft or a submission.
pub(crate) async fn persist(
    store: &dyn MarksStore,
    ticket: SaveTicket,
    action: &EntryAction,
    actor: &Actor,
    optimistic_locking: bool,
) -> Result<MarksEntry, MarksError> {
    if !matches!(action, EntryAction::SaveDraft | EntryAction::Submit) {
        return Err(MarksError::Validation(format!("Cannot {} from the editor", action.as_str())));
    }

    // The session copy may be stale while snapshots are suppressed.
    let current = store.find(&ticket.key).await?;

    let now = primitive_now_utc();
    let mut patch = transition(current.as_ref(), action, actor, now)?;
    let row_count = ticket.rows.len();

    let saved = match current {
        Some(existing) => {
            let expected_revision = match (optimistic_locking, ticket.base_revision) {
                (false, _) => None,
                (true, Some(revision)) => Some(revision),
                // Someone created the entry after this session loaded the roster.
                (true, None) => return Err(MarksError::Conflict),
            };
            patch.rows = Some(ticket.rows);
            store
                .update(&existing.id, &patch, expected_revision)
                .await
                .map_err(|err| update_error(err, action))?
        }
        None => {
            let entered_by = actor
                .user_id
                .clone()
                .ok_or(TransitionError::MissingActor(action.as_str()))?;
            let class_name =
                ticket.rows.first().map(|row| row.class_name.clone()).unwrap_or_default();
            let entry = MarksEntry {
                id: Uuid::new_v4().to_string(),
                school_id: ticket.key.school_id,
                exam_id: ticket.key.exam_id,
                exam_name: ticket.subject.exam_name,
                subject_id: ticket.key.subject_id,
                subject_name: ticket.subject.subject_name,
                class_id: ticket.key.class_id,
                class_name,
                section_id: ticket.key.section_id,
                max_marks: ticket.subject.max_marks,
                rows: sqlx::types::Json(ticket.rows),
                entered_by,
                entered_by_role: actor.role,
                entry_date: now,
                status: patch.status,
                approved_by: None,
                approval_date: None,
                rejection_reason: None,
                is_locked: patch.is_locked,
                revision: 0,
                created_at: now,
                updated_at: now,
            };
            store.create(entry).await?
        }
    };

    metrics::counter!(ENTRIES_SAVED, "status" => saved.status.as_str()).increment(1);
    tracing::info!(
        entry_id = %saved.id,
        status = %saved.status,
        revision = saved.revision,
        rows = row_count,
        "Marks entry saved"
    );

    Ok(saved)
}

/// Approves or rejects a submitted entry.
pub(crate) async fn review(
    store: &dyn MarksStore,
    entry_id: &str,
    action: &EntryAction,
    actor: &Actor,
) -> Result<MarksEntry, MarksError> {
    if !matches!(action, EntryAction::Approve | EntryAction::Reject { .. }) {
        return Err(MarksError::Validation(format!("Cannot {} during review", action.as_str())));
    }

    let entry = store
        .find_by_id(entry_id)
        .await?
        .ok_or_else(|| MarksError::NotFound("Marks entry not found".to_string()))?;

    let patch = transition(Some(&entry), action, actor, primitive_now_utc())?;
    let updated =
        store.update(&entry.id, &patch, None).await.map_err(|err| update_error(err, action))?;

    metrics::counter!(ENTRIES_REVIEWED, "action" => action.as_str()).increment(1);
    tracing::info!(
        entry_id = %updated.id,
        action = action.as_str(),
        reviewer = actor.user_id.as_deref().unwrap_or_default(),
        "Marks entry reviewed"
    );

    Ok(updated)
}

/// A concurrent status change surfaces as the transition it made illegal.
fn update_error(err: StoreError, action: &EntryAction) -> MarksError {
    match err {
        StoreError::StatusChanged { actual, .. } => MarksError::Transition(
            TransitionError::NotAllowed { action: action.as_str(), from: actual },
        ),
        other => other.into(),
    }
}

pub(crate) async fn lookup(
    store: &dyn MarksStore,
    key: &EntryKey,
) -> Result<Option<MarksEntry>, MarksError> {
    validate_key(key)?;
    Ok(store.find(key).await?)
}

pub(crate) async fn list_for_review(
    store: &dyn MarksStore,
    school_id: &str,
    status: EntryStatus,
) -> Result<Vec<MarksEntry>, MarksError> {
    Ok(store.list_by_status(school_id, status).await?)
}
