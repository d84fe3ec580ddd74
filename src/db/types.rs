use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "marksentrystatus", rename_all = "UPPERCASE")]
pub(crate) enum EntryStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "userrole", rename_all = "UPPERCASE")]
pub(crate) enum UserRole {
    Admin,
    Manager,
    Teacher,
    Staff,
}

impl UserRole {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Self::Admin),
            "MANAGER" => Some(Self::Manager),
            "TEACHER" => Some(Self::Teacher),
            "STAFF" => Some(Self::Staff),
            _ => None,
        }
    }

    pub(crate) fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

/// How a subject is assessed. Grade-only subjects take a chosen letter instead of marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "assessmenttype", rename_all = "UPPERCASE")]
pub(crate) enum AssessmentType {
    #[default]
    Marks,
    Grade,
}

pub(crate) const ABSENT_LABEL: &str = "AB";
pub(crate) const NOT_APPLICABLE_LABEL: &str = "NA";

/// Grade of a single mark row. Rendered to a plain label only when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub(crate) enum Grade {
    Letter(String),
    Absent,
    NotApplicable,
}

impl Grade {
    pub(crate) fn label(&self) -> &str {
        match self {
            Self::Letter(letter) => letter,
            Self::Absent => ABSENT_LABEL,
            Self::NotApplicable => NOT_APPLICABLE_LABEL,
        }
    }
}

impl From<String> for Grade {
    fn from(value: String) -> Self {
        match value.as_str() {
            ABSENT_LABEL => Self::Absent,
            NOT_APPLICABLE_LABEL => Self::NotApplicable,
            _ => Self::Letter(value),
        }
    }
}

impl From<Grade> for String {
    fn from(value: Grade) -> Self {
        match value {
            Grade::Letter(letter) => letter,
            Grade::Absent => ABSENT_LABEL.to_string(),
            Grade::NotApplicable => NOT_APPLICABLE_LABEL.to_string(),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_sentinels_serialize_as_labels() {
        let json = serde_json::to_value([
            Grade::Letter("B+".to_string()),
            Grade::Absent,
            Grade::NotApplicable,
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!(["B+", "AB", "NA"]));
    }

    #[test]
    fn grade_labels_parse_back_into_variants() {
        let grades: Vec<Grade> = serde_json::from_str(r#"["AB","NA","A"]"#).unwrap();
        assert_eq!(grades, vec![Grade::Absent, Grade::NotApplicable, Grade::Letter("A".into())]);
    }

    #[test]
    fn admin_and_manager_are_admins() {
        assert!(UserRole::parse("admin").unwrap().is_admin());
        assert!(UserRole::parse(" MANAGER ").unwrap().is_admin());
        assert!(!UserRole::parse("teacher").unwrap().is_admin());
        assert_eq!(UserRole::parse("principal"), None);
    }

    #[test]
    fn entry_status_uses_uppercase_wire_names() {
        assert_eq!(serde_json::to_value(EntryStatus::Submitted).unwrap(), "SUBMITTED");
        assert_eq!(EntryStatus::Rejected.to_string(), "REJECTED");
    }
}
