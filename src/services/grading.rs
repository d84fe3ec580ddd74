use crate::db::models::{GradeRange, GradingSystem};
use crate::db::types::Grade;

const FAILING_GRADE: &str = "F";

/// Used when neither the exam nor the school configures a grading system.
pub(crate) fn fallback_ranges() -> Vec<GradeRange> {
    vec![
        GradeRange::new("A+", 91.0, 100.0),
        GradeRange::new("A", 81.0, 90.0),
        GradeRange::new("B+", 71.0, 80.0),
        GradeRange::new("B", 61.0, 70.0),
        GradeRange::new("C", 51.0, 60.0),
        GradeRange::new("D", 41.0, 50.0),
        GradeRange::new("E", 33.0, 40.0),
        GradeRange::new("F", 0.0, 32.0),
    ]
}

/// Grade label for `percentage`: ranges are tried by descending `max`, both
/// bounds inclusive, and anything unmatched is "F".
pub(crate) fn grade(percentage: f64, ranges: &[GradeRange]) -> String {
    let mut sorted: Vec<&GradeRange> = ranges.iter().collect();
    sorted.sort_by(|a, b| b.max.total_cmp(&a.max));
    sorted
        .into_iter()
        .find(|range| range.min <= percentage && percentage <= range.max)
        .map(|range| range.grade.clone())
        .unwrap_or_else(|| FAILING_GRADE.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableSource {
    Exam,
    SchoolDefault,
    Fallback,
}

impl TableSource {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Exam => "exam",
            Self::SchoolDefault => "school_default",
            Self::Fallback => "fallback",
        }
    }
}

/// Grading ranges resolved for one entry.
#[derive(Debug, Clone)]
pub(crate) struct GradeTable {
    ranges: Vec<GradeRange>,
    source: TableSource,
}

impl GradeTable {
    pub(crate) fn fallback() -> Self {
        Self::from_ranges(fallback_ranges(), TableSource::Fallback)
    }

    pub(crate) fn resolve(
        exam_system: Option<&GradingSystem>,
        school_default: Option<&GradingSystem>,
    ) -> Self {
        let candidate = exam_system
            .map(|system| (system, TableSource::Exam))
            .or_else(|| school_default.map(|system| (system, TableSource::SchoolDefault)));

        match candidate {
            Some((system, source)) if !system.ranges.0.is_empty() => {
                Self::from_ranges(system.ranges.0.clone(), source)
            }
            _ => Self::fallback(),
        }
    }

    fn from_ranges(ranges: Vec<GradeRange>, source: TableSource) -> Self {
        Self { ranges, source }
    }

    pub(crate) fn source(&self) -> TableSource {
        self.source
    }

    pub(crate) fn label_for(&self, percentage: f64) -> String {
        grade(percentage, &self.ranges)
    }

    pub(crate) fn grade_for(&self, percentage: f64) -> Grade {
        Grade::Letter(self.label_for(percentage))
    }
}

impl Default for GradeTable {
    fn default() -> Self {
        Self::fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn system(id: &str, ranges: Vec<GradeRange>) -> GradingSystem {
        GradingSystem {
            id: id.to_string(),
            school_id: "school-1".to_string(),
            name: id.to_string(),
            is_default: false,
            ranges: Json(ranges),
        }
    }

    #[test]
    fn fallback_bounds_are_inclusive() {
        let ranges = fallback_ranges();
        assert_eq!(grade(91.0, &ranges), "A+");
        assert_eq!(grade(90.0, &ranges), "A");
        assert_eq!(grade(100.0, &ranges), "A+");
        assert_eq!(grade(33.0, &ranges), "E");
        assert_eq!(grade(0.0, &ranges), "F");
    }

    #[test]
    fn gaps_and_out_of_range_values_fall_to_f() {
        let ranges = fallback_ranges();
        assert_eq!(grade(90.5, &ranges), "F");
        assert_eq!(grade(120.0, &ranges), "F");
        assert_eq!(grade(-3.0, &ranges), "F");
    }

    #[test]
    fn input_order_does_not_change_result() {
        let mut shuffled = fallback_ranges();
        shuffled.reverse();
        shuffled.swap(1, 5);

        for p in [0.0, 32.0, 40.0, 45.0, 60.5, 71.0, 80.0, 95.0] {
            assert_eq!(grade(p, &shuffled), grade(p, &fallback_ranges()), "p = {p}");
        }
    }

    #[test]
    fn overlapping_ranges_prefer_higher_max() {
        let ranges = vec![GradeRange::new("PASS", 40.0, 80.0), GradeRange::new("MERIT", 70.0, 100.0)];
        assert_eq!(grade(75.0, &ranges), "MERIT");
        assert_eq!(grade(50.0, &ranges), "PASS");
    }

    #[test]
    fn unparseable_bounds_never_match() {
        let ranges = vec![GradeRange::new("X", f64::NAN, 100.0), GradeRange::new("P", 0.0, 100.0)];
        assert_eq!(grade(50.0, &ranges), "P");
    }

    #[test]
    fn resolve_prefers_exam_then_default_then_fallback() {
        let exam = system("exam", vec![GradeRange::new("PASS", 0.0, 100.0)]);
        let school = system("school", vec![GradeRange::new("OK", 0.0, 100.0)]);

        let table = GradeTable::resolve(Some(&exam), Some(&school));
        assert_eq!(table.source(), TableSource::Exam);
        assert_eq!(table.label_for(10.0), "PASS");

        let table = GradeTable::resolve(None, Some(&school));
        assert_eq!(table.source(), TableSource::SchoolDefault);
        assert_eq!(table.label_for(10.0), "OK");

        let table = GradeTable::resolve(None, None);
        assert_eq!(table.source(), TableSource::Fallback);
        assert_eq!(table.label_for(95.0), "A+");
    }

    #[test]
    fn empty_configured_system_uses_fallback() {
        let exam = system("exam", Vec::new());
        let table = GradeTable::resolve(Some(&exam), None);
        assert_eq!(table.source(), TableSource::Fallback);
        assert_eq!(table.grade_for(85.0), Grade::Letter("A".to_string()));
    }
}
