use sqlx::PgPool;

use crate::db::models::GradingSystem;

const COLUMNS: &str = "id, school_id, name, is_default, ranges";

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<GradingSystem>, sqlx::Error> {
    sqlx::query_as::<_, GradingSystem>(&format!(
        "SELECT {COLUMNS} FROM grading_systems WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_school_default(
    pool: &PgPool,
    school_id: &str,
) -> Result<Option<GradingSystem>, sqlx::Error> {
    sqlx::query_as::<_, GradingSystem>(&format!(
        "SELECT {COLUMNS} FROM grading_systems
         WHERE school_id = $1 AND is_default
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(school_id)
    .fetch_optional(pool)
    .await
}
