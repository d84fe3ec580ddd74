use serde::{Deserialize, Deserializer, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AssessmentType, EntryStatus, Grade, UserRole};

/// Lookup key of a marks entry inside one school.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct EntryKey {
    pub(crate) school_id: String,
    pub(crate) exam_id: String,
    pub(crate) class_id: String,
    #[serde(default)]
    pub(crate) section_id: Option<String>,
    pub(crate) subject_id: String,
}

/// One student's marks inside an entry. Stored as JSONB on the entry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MarkRow {
    pub(crate) student_id: String,
    pub(crate) admission_no: String,
    pub(crate) name: String,
    pub(crate) roll_number: String,
    pub(crate) class_name: String,
    pub(crate) total_marks: f64,
    #[serde(default)]
    pub(crate) theory_marks: Option<f64>,
    #[serde(default)]
    pub(crate) practical_marks: Option<f64>,
    #[serde(default)]
    pub(crate) internal_marks: Option<f64>,
    #[serde(default)]
    pub(crate) external_marks: Option<f64>,
    pub(crate) obtained_marks: f64,
    pub(crate) percentage: f64,
    pub(crate) grade: Grade,
    #[serde(default)]
    pub(crate) is_absent: bool,
    #[serde(default)]
    pub(crate) is_na: bool,
    #[serde(default)]
    pub(crate) remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct MarksEntry {
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
    pub(crate) rows: Json<Vec<MarkRow>>,
    pub(crate) entered_by: String,
    pub(crate) entered_by_role: UserRole,
    pub(crate) entry_date: PrimitiveDateTime,
    pub(crate) status: EntryStatus,
    pub(crate) approved_by: Option<String>,
    pub(crate) approval_date: Option<PrimitiveDateTime>,
    pub(crate) rejection_reason: Option<String>,
    pub(crate) is_locked: bool,
    pub(crate) revision: i64,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl MarksEntry {
    pub(crate) fn key(&self) -> EntryKey {
        EntryKey {
            school_id: self.school_id.clone(),
            exam_id: self.exam_id.clone(),
            class_id: self.class_id.clone(),
            section_id: self.section_id.clone(),
            subject_id: self.subject_id.clone(),
        }
    }
}

/// Partial update of an entry. `None` leaves the stored column as it is.
/// The update only applies while the stored status is one of `allowed_from`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntryPatch {
    pub(crate) rows: Option<Vec<MarkRow>>,
    pub(crate) allowed_from: Vec<EntryStatus>,
    pub(crate) status: EntryStatus,
    pub(crate) entry_date: Option<PrimitiveDateTime>,
    pub(crate) entered_by_role: Option<UserRole>,
    pub(crate) is_locked: bool,
    pub(crate) approved_by: Option<String>,
    pub(crate) approval_date: Option<PrimitiveDateTime>,
    pub(crate) rejection_reason: Option<String>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Student {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) admission_no: Option<String>,
    pub(crate) name: String,
    pub(crate) class_id: String,
    pub(crate) class_name: String,
    pub(crate) section_id: Option<String>,
    pub(crate) class_roll_no: Option<String>,
    pub(crate) roll_no: Option<String>,
    pub(crate) is_active: bool,
}

/// Per exam subject configuration the entry is initialised from.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSubject {
    pub(crate) exam_id: String,
    pub(crate) exam_name: String,
    pub(crate) subject_id: String,
    pub(crate) subject_name: String,
    pub(crate) max_marks: f64,
    pub(crate) uses_components: bool,
    pub(crate) grading_system_id: Option<String>,
    #[serde(default)]
    pub(crate) assessment_type: AssessmentType,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct GradingSystem {
    pub(crate) id: String,
    pub(crate) school_id: String,
    pub(crate) name: String,
    pub(crate) is_default: bool,
    pub(crate) ranges: Json<Vec<GradeRange>>,
}

/// Bounds arrive as numbers or numeric strings; unparseable text never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradeRange {
    pub(crate) grade: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub(crate) min: f64,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub(crate) max: f64,
}

impl GradeRange {
    pub(crate) fn new(grade: &str, min: f64, max: f64) -> Self {
        Self { grade: grade.to_string(), min, max }
    }
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Bound {
        Number(f64),
        Text(String),
    }

    Ok(match Bound::deserialize(deserializer)? {
        Bound::Number(value) => value,
        Bound::Text(text) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
    })
}
