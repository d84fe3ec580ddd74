use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::{format_optional, format_primitive};
use crate::db::models::{EntryKey, MarkRow, MarksEntry};
use crate::db::types::{AssessmentType, EntryStatus, UserRole};
use crate::services::import_reconcile::{ImportPreview, SheetRow};
use crate::services::mark_rows::MarkField;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct EntryKeyPayload {
    #[serde(default, alias = "schoolId")]
    #[validate(length(max = 128, message = "school_id is too long"))]
    pub(crate) school_id: String,
    #[serde(default, alias = "examId")]
    #[validate(length(max = 128, message = "exam_id is too long"))]
    pub(crate) exam_id: String,
    #[serde(default, alias = "classId")]
    #[validate(length(max = 128, message = "class_id is too long"))]
    pub(crate) class_id: String,
    #[serde(default, alias = "sectionId")]
    pub(crate) section_id: Option<String>,
    #[serde(default, alias = "subjectId")]
    #[validate(length(max = 128, message = "subject_id is too long"))]
    pub(crate) subject_id: String,
}

impl From<EntryKeyPayload> for EntryKey {
    fn from(payload: EntryKeyPayload) -> Self {
        let section_id = payload
            .section_id
            .map(|section| section.trim().to_string())
            .filter(|section| !section.is_empty());
        EntryKey {
            school_id: payload.school_id.trim().to_string(),
            exam_id: payload.exam_id.trim().to_string(),
            class_id: payload.class_id.trim().to_string(),
            section_id,
            subject_id: payload.subject_id.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarkEditRequest {
    pub(crate) field: MarkField,
    /// `null` clears the value back to zero.
    #[serde(default)]
    pub(crate) value: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    /// `null` or blank leaves the grade unset.
    #[serde(default)]
    #[validate(length(max = 8, message = "grade is too long"))]
    pub(crate) grade: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RemarksRequest {
    #[serde(default)]
    #[validate(length(max = 500, message = "remarks must be at most 500 characters"))]
    pub(crate) remarks: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ImportRequest {
    #[validate(length(min = 1, max = 5000, message = "rows must contain 1..5000 items"))]
    pub(crate) rows: Vec<SheetRow>,
    /// Shown in "not found" messages; defaults to "All".
    #[serde(default, alias = "sectionLabel")]
    pub(crate) section_label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum SaveMode {
    #[default]
    Draft,
    Submit,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SaveRequest {
    #[serde(default)]
    pub(crate) mode: SaveMode,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RejectRequest {
    #[validate(length(min = 1, max = 1000, message = "reason must not be empty"))]
    pub(crate) reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RowFilterQuery {
    #[serde(default, alias = "q")]
    pub(crate) search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewQuery {
    #[serde(alias = "schoolId")]
    pub(crate) school_id: String,
    #[serde(default = "default_review_status")]
    pub(crate) status: EntryStatus,
}

fn default_review_status() -> EntryStatus {
    EntryStatus::Submitted
}

#[derive(Debug, Serialize)]
pub(crate) struct MarksEntryResponse {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) exam_id: String,
    pub(crate) exam_name: String,
    pub(crate) subject_id: String,
    pub(crate) subject_name: String,
    pub(crate) class_id: String,
    pub(crate) class_name: String,
    pub(crate) section_id: Option<String>,
    pub(crate) max_marks: f64,
    pub(crate) rows: Vec<MarkRow>,
    pub(crate) entered_by: String,
    pub(crate) entered_by_role: UserRole,
    pub(crate) entry_date: String,
    pub(crate) status: EntryStatus,
    pub(crate) approved_by: Option<String>,
    pub(crate) approval_date: Option<String>,
    pub(crate) rejection_reason: Option<String>,
    pub(crate) is_locked: bool,
    pub(crate) revision: i64,
    pub(crate) updated_at: String,
}

impl From<MarksEntry> for MarksEntryResponse {
    fn from(entry: MarksEntry) -> Self {
        Self {
            id: entry.id,
            school_id: entry.school_id,
            exam_id: entry.exam_id,
            exam_name: entry.exam_name,
            subject_id: entry.subject_id,
            subject_name: entry.subject_name,
            class_id: entry.class_id,
            class_name: entry.class_name,
            section_id: entry.section_id,
            max_marks: entry.max_marks,
            rows: entry.rows.0,
            entered_by: entry.entered_by,
            entered_by_role: entry.entered_by_role,
            entry_date: format_primitive(entry.entry_date),
            status: entry.status,
            approved_by: entry.approved_by,
            approval_date: format_optional(entry.approval_date),
            rejection_reason: entry.rejection_reason,
            is_locked: entry.is_locked,
            revision: entry.revision,
            updated_at: format_primitive(entry.updated_at),
        }
    }
}

/// Summary used by review lists; rows are left out.
#[derive(Debug, Serialize)]
pub(crate) struct MarksEntrySummary {
    pub(crate) id: String,
    pub(crate) exam_name: String,
    pub(crate) subject_name: String,
    pub(crate) class_name: String,
    pub(crate) section_id: Option<String>,
    pub(crate) entered_by: String,
    pub(crate) status: EntryStatus,
    pub(crate) students: usize,
    pub(crate) entry_date: String,
}

impl From<MarksEntry> for MarksEntrySummary {
    fn from(entry: MarksEntry) -> Self {
        Self {
            students: entry.rows.0.len(),
            id: entry.id,
            exam_name: entry.exam_name,
            subject_name: entry.subject_name,
            class_name: entry.class_name,
            section_id: entry.section_id,
            entered_by: entry.entered_by,
            status: entry.status,
            entry_date: format_primitive(entry.entry_date),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionOpened {
    pub(crate) session_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionView {
    pub(crate) session_id: String,
    pub(crate) key: Option<EntryKey>,
    pub(crate) generation: u64,
    pub(crate) loaded: bool,
    pub(crate) state: &'static str,
    pub(crate) editable: bool,
    pub(crate) subject_name: Option<String>,
    pub(crate) max_marks: Option<f64>,
    pub(crate) uses_components: bool,
    pub(crate) assessment_type: AssessmentType,
    pub(crate) grade_table: &'static str,
    pub(crate) rows: Vec<MarkRow>,
    pub(crate) reference: Option<MarksEntryResponse>,
    pub(crate) pending_import: Option<ImportPreview>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImportConfirmed {
    pub(crate) applied: usize,
}
