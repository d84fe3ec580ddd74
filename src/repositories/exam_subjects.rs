use sqlx::PgPool;

use crate::db::models::ExamSubject;

pub(crate) async fn find(
    pool: &PgPool,
    exam_id: &str,
    subject_id: &str,
) -> Result<Option<ExamSubject>, sqlx::Error> {
    sqlx::query_as::<_, ExamSubject>(
        "SELECT exam_id, exam_name, subject_id, subject_name, max_marks, uses_components,
                grading_system_id, assessment_type
         FROM exam_subjects
         WHERE exam_id = $1 AND subject_id = $2",
    )
    .bind(exam_id)
    .bind(subject_id)
    .fetch_optional(pool)
    .await
}
