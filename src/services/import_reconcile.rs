use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::config::ImportSettings;
use crate::db::models::MarkRow;
use crate::services::grading::GradeTable;
use crate::services::mark_rows::{self, compare_roll_numbers};

/// One parsed spreadsheet row, keyed by its header cells.
pub(crate) type SheetRow = Map<String, Value>;

const ADMISSION_COLUMNS: &[&str] =
    &["Admission No", "Admission Number", "Student ID", "Student ID (DO NOT CHANGE)"];
const ROLL_COLUMNS: &[&str] = &["Roll Number", "Roll No", "Roll #"];
const NAME_COLUMNS: &[&str] = &["Student Name", "Name"];
const MARKS_COLUMNS: &[&str] = &["Obtained Marks", "Marks"];
const ABSENT_COLUMNS: &[&str] = &["Is Absent (Y/N)", "Is Absent", "Absent"];

/// Subject-name fragments that map to the short headers schools use in mark sheets.
const SUBJECT_ABBREVIATIONS: &[(&str, &str)] = &[
    ("Conversation", "ENG. CONV."),
    ("Urdu", "URDU/DEEN."),
    ("Mathematics", "MATHS"),
    ("Environmental", "E V S"),
    ("Knowledge", "G. K."),
];

/// Candidate header names per concern, in priority order.
#[derive(Debug, Clone)]
pub(crate) struct ImportColumns {
    admission: Vec<String>,
    roll: Vec<String>,
    name: Vec<String>,
    marks: Vec<String>,
    absent: Vec<String>,
}

impl ImportColumns {
    pub(crate) fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            admission: with_extras(ADMISSION_COLUMNS, &settings.admission_columns),
            roll: with_extras(ROLL_COLUMNS, &settings.roll_columns),
            name: with_extras(NAME_COLUMNS, &settings.name_columns),
            marks: with_extras(MARKS_COLUMNS, &settings.marks_columns),
            absent: with_extras(ABSENT_COLUMNS, &settings.absent_columns),
        }
    }

    /// Marks columns followed by the synonyms derived from the subject name.
    fn marks_candidates(&self, subject_name: &str) -> Vec<String> {
        let mut candidates = self.marks.clone();
        let subject = subject_name.trim();
        if !subject.is_empty() {
            candidates.push(subject.to_string());
            candidates.extend(
                SUBJECT_ABBREVIATIONS
                    .iter()
                    .filter(|(fragment, _)| subject.contains(fragment))
                    .map(|(_, header)| header.to_string()),
            );
        }
        candidates
    }
}

impl Default for ImportColumns {
    fn default() -> Self {
        Self::from_settings(&ImportSettings::default())
    }
}

fn with_extras(defaults: &[&str], extras: &[String]) -> Vec<String> {
    defaults.iter().map(|name| name.to_string()).chain(extras.iter().cloned()).collect()
}

/// Header comparison key: lower-case alphanumerics only, so "Roll #", "ROLL#"
/// and "roll" are the same column, as are "MATHS" and "Maths".
fn normalize_header(header: &str) -> String {
    header.chars().filter(|ch| ch.is_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// First candidate column with a non-blank cell.
fn lookup(row: &SheetRow, candidates: &[String]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        let wanted = normalize_header(candidate);
        if wanted.is_empty() {
            return None;
        }
        row.iter()
            .filter(|(header, _)| normalize_header(header) == wanted)
            .find_map(|(_, value)| cell_text(value))
    })
}

fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => format!("{}", float as i64),
            _ => number.to_string(),
        },
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// All `\d+(\.\d+)?` tokens in the cell, in order.
pub(crate) fn numeric_tokens(text: &str) -> Vec<f64> {
    number_pattern()
        .find_iter(text)
        .filter_map(|token| token.as_str().parse::<f64>().ok())
        .collect()
}

fn number_pattern() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern compiles"))
}

fn strip_roll(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed.strip_prefix('#').unwrap_or(trimmed).trim()
}

fn squash_whitespace(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn find_by_admission(rows: &[MarkRow], id: &str) -> Option<usize> {
    rows.iter().position(|row| row.admission_no.trim() == id || row.student_id == id)
}

fn find_by_roll(rows: &[MarkRow], roll: &str) -> Option<usize> {
    let wanted = strip_roll(roll);
    rows.iter().position(|row| strip_roll(&row.roll_number) == wanted)
}

fn find_by_name(rows: &[MarkRow], name: &str) -> Option<usize> {
    let wanted = name.trim().to_lowercase();
    rows.iter()
        .position(|row| row.name.trim().to_lowercase() == wanted)
        .or_else(|| {
            let squashed = squash_whitespace(&wanted);
            rows.iter().position(|row| squash_whitespace(&row.name.to_lowercase()) == squashed)
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ImportMatch {
    /// Zero-based position of the row in the uploaded sheet.
    pub(crate) index: usize,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) admission_no: String,
    pub(crate) roll_number: String,
    pub(crate) old_marks: f64,
    pub(crate) new_marks: f64,
    pub(crate) theory: Option<f64>,
    pub(crate) practical: Option<f64>,
    pub(crate) is_absent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct UnmatchedRow {
    /// Spreadsheet line number, counting the header as line 1.
    pub(crate) line: usize,
    pub(crate) attempted: String,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct ImportPreview {
    pub(crate) matches: Vec<ImportMatch>,
    pub(crate) errors: Vec<UnmatchedRow>,
}

/// Matches sheet rows against the working rows without touching them.
pub(crate) fn preview(
    rows: &[MarkRow],
    sheet: &[SheetRow],
    columns: &ImportColumns,
    subject_name: &str,
    section_label: Option<&str>,
) -> ImportPreview {
    let marks_candidates = columns.marks_candidates(subject_name);
    let mut result = ImportPreview::default();

    for (index, sheet_row) in sheet.iter().enumerate() {
        let id = lookup(sheet_row, &columns.admission);
        let roll = lookup(sheet_row, &columns.roll);
        let name = lookup(sheet_row, &columns.name);

        let position = id
            .as_deref()
            .and_then(|id| find_by_admission(rows, id))
            .or_else(|| roll.as_deref().and_then(|roll| find_by_roll(rows, roll)))
            .or_else(|| name.as_deref().and_then(|name| find_by_name(rows, name)));

        let Some(position) = position else {
            let attempted = name.or(id).unwrap_or_else(|| "Unknown".to_string());
            let line = index + 2;
            result.errors.push(UnmatchedRow {
                line,
                message: format!(
                    "Row {line}: Student \"{attempted}\" not found in current Section {}.",
                    section_label.filter(|label| !label.is_empty()).unwrap_or("All")
                ),
                attempted,
            });
            continue;
        };

        let student = &rows[position];
        let raw_marks = lookup(sheet_row, &marks_candidates);
        result.matches.push(extract_marks(index, student, sheet_row, raw_marks, columns));
    }

    result.matches.sort_by(|a, b| {
        compare_roll_numbers(&a.roll_number, &b.roll_number).then_with(|| a.index.cmp(&b.index))
    });
    result
}

fn extract_marks(
    index: usize,
    student: &MarkRow,
    sheet_row: &SheetRow,
    raw_marks: Option<String>,
    columns: &ImportColumns,
) -> ImportMatch {
    let flagged_absent = lookup(sheet_row, &columns.absent)
        .map(|flag| matches!(flag.to_uppercase().as_str(), "Y" | "YES" | "TRUE"))
        .unwrap_or(false);
    let raw_absent = raw_marks
        .as_deref()
        .map(|raw| matches!(raw.to_uppercase().as_str(), "AB" | "A"))
        .unwrap_or(false);
    let is_absent = flagged_absent || raw_absent;

    let mut new_marks = 0.0;
    let mut theory = None;
    let mut practical = None;

    if !is_absent {
        let tokens = raw_marks.as_deref().map(numeric_tokens).unwrap_or_default();
        if tokens.len() >= 2 && mark_rows::uses_components(student) {
            theory = Some(tokens[0]);
            practical = Some(tokens[1]);
            new_marks = tokens[0] + tokens[1];
        } else if let Some(first) = tokens.first() {
            new_marks = first.min(student.total_marks);
            theory = student.theory_marks.map(|_| new_marks);
            practical = student.practical_marks.map(|_| 0.0);
        }
    }

    ImportMatch {
        index,
        student_id: student.student_id.clone(),
        student_name: student.name.clone(),
        admission_no: student.admission_no.clone(),
        roll_number: student.roll_number.clone(),
        old_marks: student.obtained_marks,
        new_marks,
        theory,
        practical,
        is_absent,
    }
}

/// Writes confirmed matches into the working rows; returns how many applied.
pub(crate) fn confirm(rows: &mut [MarkRow], matches: &[ImportMatch], table: &GradeTable) -> usize {
    let mut applied = 0;

    for import in matches {
        let Some(row) = rows.iter_mut().find(|row| row.student_id == import.student_id) else {
            continue;
        };

        if import.is_absent {
            mark_rows::force_absent(row);
        } else {
            if import.theory.is_some() {
                row.theory_marks = import.theory;
            }
            if import.practical.is_some() {
                row.practical_marks = import.practical;
            }
            row.obtained_marks = import.new_marks;
            row.is_absent = false;
            if import.new_marks > 0.0 {
                row.is_na = false;
            }
            mark_rows::recompute(row, table);
        }
        applied += 1;
    }

    applied
}
