pub(crate) mod exam_subjects;
pub(crate) mod grading_systems;
pub(crate) mod health;
pub(crate) mod marks_entries;
pub(crate) mod students;
