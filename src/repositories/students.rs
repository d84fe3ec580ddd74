use sqlx::PgPool;

use crate::db::models::Student;

pub(crate) const COLUMNS: &str = "\
    id, school_id, admission_no, name, class_id, class_name, section_id, class_roll_no, \
    roll_no, is_active";

/// Active students of a class; `section_id = None` means the whole class.
pub(crate) async fn list_active_for_class(
    pool: &PgPool,
    school_id: &str,
    class_id: &str,
    section_id: Option<&str>,
) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(&format!(
        "SELECT {COLUMNS} FROM students
         WHERE school_id = $1 AND class_id = $2 AND is_active
           AND ($3::TEXT IS NULL OR section_id = $3)
         ORDER BY name"
    ))
    .bind(school_id)
    .bind(class_id)
    .bind(section_id)
    .fetch_all(pool)
    .await
}
