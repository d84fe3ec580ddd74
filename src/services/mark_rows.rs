use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{ExamSubject, MarkRow, Student};
use crate::db::types::{AssessmentType, Grade};
use crate::services::grading::GradeTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MarkField {
    Theory,
    Practical,
    Internal,
    External,
    Obtained,
}

#[derive(Debug, Error, PartialEq)]
pub(crate) enum RowEditError {
    #[error("marks must be a finite, non-negative number (got {0})")]
    InvalidValue(f64),
    #[error("student is marked {0}; clear that flag first")]
    FlagConflict(&'static str),
    #[error("unknown grade {0}")]
    UnknownGrade(String),
}

/// Letters a grade-only subject may be given.
pub(crate) const GRADE_OPTIONS: [&str; 8] = ["A+", "A", "B+", "B", "C", "D", "E", "F"];

/// Component schema is in use when the row carries theory or practical marks.
pub(crate) fn uses_components(row: &MarkRow) -> bool {
    row.theory_marks.is_some() || row.practical_marks.is_some()
}

pub(crate) fn component_sum(row: &MarkRow) -> f64 {
    [row.theory_marks, row.practical_marks, row.internal_marks, row.external_marks]
        .into_iter()
        .map(|value| value.unwrap_or(0.0))
        .sum()
}

pub(crate) fn percentage_of(obtained: f64, total: f64) -> f64 {
    if total > 0.0 {
        obtained / total * 100.0
    } else {
        0.0
    }
}

/// Writes one mark field and re-derives obtained marks, percentage and grade.
pub(crate) fn apply_mark_edit(
    row: &mut MarkRow,
    field: MarkField,
    value: Option<f64>,
    table: &GradeTable,
) -> Result<(), RowEditError> {
    if let Some(value) = value {
        if !value.is_finite() || value < 0.0 {
            return Err(RowEditError::InvalidValue(value));
        }
    }

    match field {
        MarkField::Theory => row.theory_marks = value,
        MarkField::Practical => row.practical_marks = value,
        MarkField::Internal => row.internal_marks = value,
        MarkField::External => row.external_marks = value,
        MarkField::Obtained => {}
    }

    row.obtained_marks = match field {
        MarkField::Obtained => value.unwrap_or(0.0),
        _ => component_sum(row),
    };

    if row.obtained_marks > 0.0 {
        row.is_absent = false;
        row.is_na = false;
    }

    recompute(row, table);
    Ok(())
}

pub(crate) fn toggle_absent(
    row: &mut MarkRow,
    table: &GradeTable,
    assessment: AssessmentType,
) -> Result<(), RowEditError> {
    if row.is_na {
        return Err(RowEditError::FlagConflict("not applicable"));
    }

    row.is_absent = !row.is_absent;
    let flagged = row.is_absent;
    after_flag_toggle(row, flagged, table, assessment);
    Ok(())
}

pub(crate) fn toggle_na(
    row: &mut MarkRow,
    table: &GradeTable,
    assessment: AssessmentType,
) -> Result<(), RowEditError> {
    if row.is_absent {
        return Err(RowEditError::FlagConflict("absent"));
    }

    row.is_na = !row.is_na;
    let flagged = row.is_na;
    after_flag_toggle(row, flagged, table, assessment);
    Ok(())
}

/// Clearing a flag on a grade-only row leaves its letter unset.
fn after_flag_toggle(
    row: &mut MarkRow,
    flagged: bool,
    table: &GradeTable,
    assessment: AssessmentType,
) {
    if flagged {
        zero_marks(row);
    } else if assessment == AssessmentType::Grade {
        row.grade = Grade::Letter(String::new());
    }
    if row.is_absent || row.is_na {
        row.obtained_marks = 0.0;
        row.percentage = 0.0;
    } else if assessment == AssessmentType::Marks {
        row.percentage = percentage_of(row.obtained_marks, row.total_marks);
    }
    regrade_for(row, table, assessment);
}

/// Marks the row absent regardless of its current flags. Used by imports.
pub(crate) fn force_absent(row: &mut MarkRow) {
    row.is_na = false;
    row.is_absent = true;
    zero_marks(row);
    row.grade = Grade::Absent;
}

pub(crate) fn set_remarks(row: &mut MarkRow, remarks: Option<String>) {
    row.remarks = remarks.map(|text| text.trim().to_string()).filter(|text| !text.is_empty());
}

/// Re-derives percentage and grade from the current obtained marks.
pub(crate) fn recompute(row: &mut MarkRow, table: &GradeTable) {
    if row.is_absent || row.is_na {
        row.obtained_marks = 0.0;
        row.percentage = 0.0;
    } else {
        row.percentage = percentage_of(row.obtained_marks, row.total_marks);
    }
    regrade(row, table);
}

/// Grade from the stored percentage; sentinels win for flagged rows.
pub(crate) fn regrade(row: &mut MarkRow, table: &GradeTable) {
    row.grade = if row.is_absent {
        Grade::Absent
    } else if row.is_na {
        Grade::NotApplicable
    } else {
        table.grade_for(row.percentage)
    };
}

/// Grade-only rows keep their chosen letter; only the flag sentinels are derived.
pub(crate) fn regrade_for(row: &mut MarkRow, table: &GradeTable, assessment: AssessmentType) {
    match assessment {
        AssessmentType::Marks => regrade(row, table),
        AssessmentType::Grade => {
            if row.is_absent {
                row.grade = Grade::Absent;
            } else if row.is_na {
                row.grade = Grade::NotApplicable;
            } else if !matches!(row.grade, Grade::Letter(_)) {
                row.grade = Grade::Letter(String::new());
            }
        }
    }
}

/// Sets the letter of a grade-only row. `None` or a blank label clears it.
pub(crate) fn set_grade(row: &mut MarkRow, label: Option<&str>) -> Result<(), RowEditError> {
    if row.is_absent {
        return Err(RowEditError::FlagConflict("absent"));
    }
    if row.is_na {
        return Err(RowEditError::FlagConflict("not applicable"));
    }

    let label = label.map(str::trim).unwrap_or_default().to_ascii_uppercase();
    if !label.is_empty() && !GRADE_OPTIONS.contains(&label.as_str()) {
        return Err(RowEditError::UnknownGrade(label));
    }

    zero_marks(row);
    row.grade = Grade::Letter(label);
    Ok(())
}

fn zero_marks(row: &mut MarkRow) {
    for component in [
        &mut row.theory_marks,
        &mut row.practical_marks,
        &mut row.internal_marks,
        &mut row.external_marks,
    ] {
        if component.is_some() {
            *component = Some(0.0);
        }
    }
    row.obtained_marks = 0.0;
    row.percentage = 0.0;
}

/// Fresh rows for every active student, ordered by roll number.
pub(crate) fn rows_from_roster(
    students: &[Student],
    subject: &ExamSubject,
    table: &GradeTable,
) -> Vec<MarkRow> {
    let mut rows: Vec<MarkRow> = students
        .iter()
        .filter(|student| student.is_active)
        .map(|student| {
            let admission_no = non_blank(student.admission_no.as_deref());
            let roll_number = non_blank(student.class_roll_no.as_deref())
                .or_else(|| non_blank(student.roll_no.as_deref()))
                .or_else(|| admission_no.clone())
                .unwrap_or_else(|| "-".to_string());
            let components = subject.uses_components.then_some(0.0);
            let grade = match subject.assessment_type {
                AssessmentType::Marks => table.grade_for(0.0),
                AssessmentType::Grade => Grade::Letter(String::new()),
            };

            MarkRow {
                student_id: student.id.clone(),
                admission_no: admission_no.unwrap_or_else(|| student.id.clone()),
                name: student.name.clone(),
                roll_number,
                class_name: student.class_name.clone(),
                total_marks: subject.max_marks,
                theory_marks: components,
                practical_marks: components,
                internal_marks: None,
                external_marks: None,
                obtained_marks: 0.0,
                percentage: 0.0,
                grade,
                is_absent: false,
                is_na: false,
                remarks: None,
            }
        })
        .collect();

    rows.sort_by(|a, b| compare_roll_numbers(&a.roll_number, &b.roll_number));
    rows
}

/// Case-insensitive substring match on name or roll number.
pub(crate) fn filter_rows<'a>(rows: &'a [MarkRow], query: &str) -> Vec<&'a MarkRow> {
    let needle = query.trim().to_lowercase();
    rows.iter()
        .filter(|row| {
            needle.is_empty()
                || row.name.to_lowercase().contains(&needle)
                || row.roll_number.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Numeric-aware ordering: "2" < "10", "7A" < "7B", digits compare by value.
pub(crate) fn compare_roll_numbers(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a.trim()).into_iter();
    let mut right = chunks(b.trim()).into_iter();

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(ln), Ok(rn)) => ln.cmp(&rn).then_with(|| l.len().cmp(&r.len())),
                    _ => l.to_lowercase().cmp(&r.to_lowercase()),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn chunks(value: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for ch in value.chars() {
        match parts.last_mut() {
            Some(last) if last.chars().all(|c| c.is_ascii_digit()) == ch.is_ascii_digit() => {
                last.push(ch)
            }
            _ => parts.push(ch.to_string()),
        }
    }
    parts
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|text| !text.is_empty()).map(str::to_string)
}
