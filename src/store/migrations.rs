// Numbered schema migrations, embedded at build time and applied in order at
// startup. Applied ids are recorded in schema_version; any failure is fatal.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use super::StoreError;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "init", include_str!("../../migrations/0001_init.sql")),
    (
        2,
        "dashboards",
        include_str!("../../migrations/0002_dashboards.sql"),
    ),
];

pub(super) async fn run(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at_ms INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    for &(id, name, sql) in MIGRATIONS {
        let applied = sqlx::query("SELECT id FROM schema_version WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .is_some();
        if applied {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO schema_version (id, name, applied_at_ms)
             VALUES ($1, $2, strftime('%s', 'now') * 1000)",
        )
        .bind(id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(migration = id, name = name, "applied schema migration");
    }

    Ok(())
}

/// Highest applied migration id, for the status page.
pub(super) async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS v FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("v")?)
}
