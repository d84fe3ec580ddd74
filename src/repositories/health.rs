use sqlx::PgPool;

/// True once the marks schema has been migrated into the connected database.
pub(crate) async fn marks_schema_ready(pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT to_regclass('marks_entries') IS NOT NULL").fetch_one(pool).await
}
