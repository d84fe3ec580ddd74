use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::{EntryKey, EntryPatch, MarksEntry};
use crate::db::types::EntryStatus;

pub(crate) const COLUMNS: &str = "\
    id, school_id, exam_id, exam_name, subject_id, subject_name, class_id, class_name, \
    section_id, max_marks, rows, entered_by, entered_by_role, entry_date, status, \
    approved_by, approval_date, rejection_reason, is_locked, revision, created_at, updated_at";

pub(crate) async fn find_by_key(
    pool: &PgPool,
    key: &EntryKey,
) -> Result<Option<MarksEntry>, sqlx::Error> {
    sqlx::query_as::<_, MarksEntry>(&format!(
        "SELECT {COLUMNS} FROM marks_entries
         WHERE school_id = $1 AND exam_id = $2 AND class_id = $3
           AND section_id IS NOT DISTINCT FROM $4 AND subject_id = $5"
    ))
    .bind(&key.school_id)
    .bind(&key.exam_id)
    .bind(&key.class_id)
    .bind(&key.section_id)
    .bind(&key.subject_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<MarksEntry>, sqlx::Error> {
    sqlx::query_as::<_, MarksEntry>(&format!("SELECT {COLUMNS} FROM marks_entries WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_status(
    pool: &PgPool,
    school_id: &str,
    status: EntryStatus,
) -> Result<Vec<MarksEntry>, sqlx::Error> {
    sqlx::query_as::<_, MarksEntry>(&format!(
        "SELECT {COLUMNS} FROM marks_entries
         WHERE school_id = $1 AND status = $2
         ORDER BY entry_date ASC, id ASC"
    ))
    .bind(school_id)
    .bind(status)
    .fetch_all(pool)
    .await
}

pub(crate) async fn insert(pool: &PgPool, entry: &MarksEntry) -> Result<MarksEntry, sqlx::Error> {
    sqlx::query_as::<_, MarksEntry>(&format!(
        "INSERT INTO marks_entries ({COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                 $18, $19, $20, $21, $22)
         RETURNING {COLUMNS}"
    ))
    .bind(&entry.id)
    .bind(&entry.school_id)
    .bind(&entry.exam_id)
    .bind(&entry.exam_name)
    .bind(&entry.subject_id)
    .bind(&entry.subject_name)
    .bind(&entry.class_id)
    .bind(&entry.class_name)
    .bind(&entry.section_id)
    .bind(entry.max_marks)
    .bind(&entry.rows)
    .bind(&entry.entered_by)
    .bind(entry.entered_by_role)
    .bind(entry.entry_date)
    .bind(entry.status)
    .bind(&entry.approved_by)
    .bind(entry.approval_date)
    .bind(&entry.rejection_reason)
    .bind(entry.is_locked)
    .bind(entry.revision)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .fetch_one(pool)
    .await
}

/// Applies `patch` and bumps the revision. Nothing is written unless the stored
/// status is one of `patch.allowed_from` and, with `expected_revision` set, the
/// stored revision still matches.
pub(crate) async fn update(
    pool: &PgPool,
    id: &str,
    patch: &EntryPatch,
    expected_revision: Option<i64>,
) -> Result<Option<MarksEntry>, sqlx::Error> {
    let allowed_from: Vec<&str> = patch.allowed_from.iter().map(|status| status.as_str()).collect();

    sqlx::query_as::<_, MarksEntry>(&format!(
        "UPDATE marks_entries
         SET rows = COALESCE($2, rows),
             status = $3,
             is_locked = $4,
             approved_by = COALESCE($5, approved_by),
             approval_date = COALESCE($6, approval_date),
             rejection_reason = COALESCE($7, rejection_reason),
             updated_at = $8,
             entry_date = COALESCE($11, entry_date),
             entered_by_role = COALESCE($12, entered_by_role),
             revision = revision + 1
         WHERE id = $1
           AND ($9::BIGINT IS NULL OR revision = $9)
           AND status::TEXT = ANY($10)
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(patch.rows.clone().map(Json))
    .bind(patch.status)
    .bind(patch.is_locked)
    .bind(&patch.approved_by)
    .bind(patch.approval_date)
    .bind(&patch.rejection_reason)
    .bind(patch.updated_at)
    .bind(expected_revision)
    .bind(allowed_from)
    .bind(patch.entry_date)
    .bind(patch.entered_by_role)
    .fetch_optional(pool)
    .await
}
