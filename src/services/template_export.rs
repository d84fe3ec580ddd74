use serde::Serialize;

use crate::db::models::MarkRow;

/// One line of the downloadable marks template. Header names match the
/// columns the importer looks for first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TemplateRow {
    #[serde(rename = "Admission No")]
    pub(crate) admission_no: String,
    #[serde(rename = "Roll Number")]
    pub(crate) roll_number: String,
    #[serde(rename = "Student Name")]
    pub(crate) student_name: String,
    #[serde(rename = "Obtained Marks")]
    pub(crate) obtained_marks: f64,
    #[serde(rename = "Is Absent (Y/N)")]
    pub(crate) is_absent: &'static str,
}

pub(crate) fn template_rows(rows: &[MarkRow]) -> Vec<TemplateRow> {
    rows.iter()
        .map(|row| TemplateRow {
            admission_no: if row.admission_no.trim().is_empty() {
                row.student_id.clone()
            } else {
                row.admission_no.clone()
            },
            roll_number: row.roll_number.clone(),
            student_name: row.name.clone(),
            obtained_marks: row.obtained_marks,
            is_absent: if row.is_absent { "Y" } else { "N" },
        })
        .collect()
}
