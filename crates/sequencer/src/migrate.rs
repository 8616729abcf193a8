//! Database migrations, embedded at compile time.

/// Migrate `pool` to the latest schema version.
///
/// Uses `sqlx`'s own migration tracking (the `_sqlx_migrations` table)
/// rather than a bespoke migrator, since this crate has no need for the
/// forward/backward, diverging-history migration support a multi-tenant
/// runtime requires — a straight-line embedded migration set is sufficient
/// here.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
