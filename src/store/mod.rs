// SQLite store. One file holds targets, raw samples, aggregated windows, the
// trigger-maintained stats cache, and dashboards. Timestamps are stored as
// UTC epoch milliseconds; WAL mode keeps readers off the single writer's back.

mod migrations;
pub mod sketch;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::models::{
    AggregatedWindow, Dashboard, DashboardGraph, ProbeKind, RawSample, RawStats, SketchStat,
    Target,
};

pub use sketch::{LatencySketch, SketchError, COMPRESSION};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("corrupt sketch: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

impl From<SketchError> for StoreError {
    fn from(e: SketchError) -> Self {
        match e {
            SketchError::Encode(msg) => StoreError::Serialization(msg),
            SketchError::Decode(msg) => StoreError::Corrupt(msg),
        }
    }
}

fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) and migrate the database at `path`.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(StoreError::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        migrations::current_version(&self.pool).await
    }

    // --- Targets ---

    pub async fn add_target(&self, target: &mut Target) -> Result<i64, StoreError> {
        let interval = target.effective_interval();
        let timeout = target.effective_timeout();
        let res = sqlx::query(
            "INSERT INTO targets (name, address, probe_type, probe_interval, timeout, retention_policies)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&target.name)
        .bind(&target.address)
        .bind(target.probe_type.as_str())
        .bind(interval)
        .bind(timeout)
        .bind(&target.retention_policies)
        .execute(&self.pool)
        .await?;
        target.id = res.last_insert_rowid();
        target.probe_interval = interval;
        target.timeout = timeout;
        Ok(target.id)
    }

    pub async fn update_target(&self, target: &Target) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE targets
             SET name = $1, address = $2, probe_type = $3, probe_interval = $4,
                 timeout = $5, retention_policies = $6
             WHERE id = $7",
        )
        .bind(&target.name)
        .bind(&target.address)
        .bind(target.probe_type.as_str())
        .bind(target.effective_interval())
        .bind(target.effective_timeout())
        .bind(&target.retention_policies)
        .bind(target.id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn get_target(&self, id: i64) -> Result<Target, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, address, probe_type, probe_interval, timeout, retention_policies
             FROM targets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        target_from_row(&row)
    }

    pub async fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, address, probe_type, probe_interval, timeout, retention_policies
             FROM targets ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(target_from_row).collect()
    }

    /// Delete a target and everything derived from it in one transaction.
    #[instrument(skip(self), fields(store = "targets"))]
    pub async fn delete_target(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM raw_results WHERE target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM aggregated_results WHERE target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM dashboard_graph_targets WHERE target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM targets WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // --- Raw samples ---

    /// Append a batch of raw samples atomically: all rows or none.
    #[instrument(skip(self, batch), fields(store = "raw", rows = batch.len()))]
    pub async fn append_raw(&self, batch: &[RawSample]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for sample in batch {
            sqlx::query("INSERT INTO raw_results (time_ms, target_id, latency_ns) VALUES ($1, $2, $3)")
                .bind(to_ms(sample.time))
                .bind(sample.target_id)
                .bind(sample.latency_ns)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Raw samples for a target in `[start, end)`, ascending. Negative limit
    /// means unbounded.
    pub async fn get_raw(
        &self,
        target_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RawSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT time_ms, target_id, latency_ns FROM raw_results
             WHERE target_id = $1 AND time_ms >= $2 AND time_ms < $3
             ORDER BY time_ms ASC LIMIT $4",
        )
        .bind(target_id)
        .bind(to_ms(start))
        .bind(to_ms(end))
        .bind(if limit < 0 { -1 } else { limit })
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(RawSample {
                    time: from_ms(row.try_get("time_ms")?),
                    target_id: row.try_get("target_id")?,
                    latency_ns: row.try_get("latency_ns")?,
                })
            })
            .collect()
    }

    pub async fn earliest_raw_time(
        &self,
        target_id: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT MIN(time_ms) AS t FROM raw_results WHERE target_id = $1")
            .bind(target_id)
            .fetch_one(&self.pool)
            .await?;
        let ms: Option<i64> = row.try_get("t")?;
        Ok(ms.map(from_ms))
    }

    pub async fn delete_raw_before(
        &self,
        target_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM raw_results WHERE target_id = $1 AND time_ms < $2")
            .bind(target_id)
            .bind(to_ms(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    // --- Aggregated windows ---

    /// Upsert a batch of windows atomically. Re-aggregating a window replaces
    /// its sketch and timeout count.
    #[instrument(skip(self, batch), fields(store = "aggregated", rows = batch.len()))]
    pub async fn upsert_aggregated(&self, batch: &[AggregatedWindow]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for window in batch {
            sqlx::query(
                "INSERT INTO aggregated_results (target_id, window_seconds, time_ms, tdigest_data, timeout_count)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (target_id, window_seconds, time_ms) DO UPDATE SET
                     tdigest_data = excluded.tdigest_data,
                     timeout_count = excluded.timeout_count",
            )
            .bind(window.target_id)
            .bind(window.window_seconds)
            .bind(to_ms(window.start))
            .bind(&window.sketch)
            .bind(window.timeout_count)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Windows of one tier for a target in `[start, end)`, ascending.
    pub async fn get_aggregated(
        &self,
        target_id: i64,
        window_seconds: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregatedWindow>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id, window_seconds, time_ms, tdigest_data, timeout_count
             FROM aggregated_results
             WHERE target_id = $1 AND window_seconds = $2 AND time_ms >= $3 AND time_ms < $4
             ORDER BY time_ms ASC",
        )
        .bind(target_id)
        .bind(window_seconds)
        .bind(to_ms(start))
        .bind(to_ms(end))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(AggregatedWindow {
                    start: from_ms(row.try_get("time_ms")?),
                    target_id: row.try_get("target_id")?,
                    window_seconds: row.try_get("window_seconds")?,
                    sketch: row.try_get("tdigest_data")?,
                    timeout_count: row.try_get("timeout_count")?,
                })
            })
            .collect()
    }

    /// Start of the newest stored window for a tier, or None if the tier has
    /// never been rolled up.
    pub async fn last_rollup_time(
        &self,
        target_id: i64,
        window_seconds: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(time_ms) AS t FROM aggregated_results
             WHERE target_id = $1 AND window_seconds = $2",
        )
        .bind(target_id)
        .bind(window_seconds)
        .fetch_one(&self.pool)
        .await?;
        let ms: Option<i64> = row.try_get("t")?;
        Ok(ms.map(from_ms))
    }

    pub async fn delete_aggregated_before(
        &self,
        target_id: i64,
        window_seconds: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            "DELETE FROM aggregated_results
             WHERE target_id = $1 AND window_seconds = $2 AND time_ms < $3",
        )
        .bind(target_id)
        .bind(window_seconds)
        .bind(to_ms(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Drop a whole tier for a target (used when a policy window is removed).
    pub async fn delete_aggregated_by_window(
        &self,
        target_id: i64,
        window_seconds: i64,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            "DELETE FROM aggregated_results WHERE target_id = $1 AND window_seconds = $2",
        )
        .bind(target_id)
        .bind(window_seconds)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    // --- Status / stats cache ---

    pub async fn db_size_bytes(&self) -> Result<i64, StoreError> {
        Ok(self.page_count().await? * self.page_size().await?)
    }

    pub async fn page_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("PRAGMA page_count").fetch_one(&self.pool).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn page_size(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("PRAGMA page_size").fetch_one(&self.pool).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn freelist_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("PRAGMA freelist_count")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Raw-tier totals, straight from the stats cache.
    pub async fn raw_stats(&self) -> Result<RawStats, StoreError> {
        let row = sqlx::query(
            "SELECT row_count, total_bytes FROM data_stats WHERE key = 'raw_count'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => RawStats {
                count: row.try_get("row_count")?,
                total_bytes: row.try_get("total_bytes")?,
            },
            None => RawStats {
                count: 0,
                total_bytes: 0,
            },
        })
    }

    /// Per-target, per-tier sketch totals, straight from the stats cache.
    pub async fn tdigest_stats(&self) -> Result<Vec<SketchStat>, StoreError> {
        let rows = sqlx::query(
            "SELECT key, row_count, total_bytes FROM data_stats
             WHERE key LIKE 'agg:%' AND row_count > 0
             ORDER BY total_bytes DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let names: std::collections::HashMap<i64, String> = self
            .list_targets()
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let Some((target_id, window_seconds)) = parse_agg_key(&key) else {
                continue;
            };
            let count: i64 = row.try_get("row_count")?;
            let total_bytes: i64 = row.try_get("total_bytes")?;
            stats.push(SketchStat {
                target_id,
                target_name: names.get(&target_id).cloned().unwrap_or_default(),
                window_seconds,
                count,
                total_bytes,
                avg_bytes: if count > 0 {
                    total_bytes as f64 / count as f64
                } else {
                    0.0
                },
            });
        }
        Ok(stats)
    }

    /// Reclaim pages after retention deletes.
    pub async fn vacuum(&self) -> Result<(), StoreError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    // --- Dashboards ---

    pub async fn add_dashboard(&self, dashboard: &mut Dashboard) -> Result<i64, StoreError> {
        let res = sqlx::query("INSERT INTO dashboards (name, slug) VALUES ($1, $2)")
            .bind(&dashboard.name)
            .bind(&dashboard.slug)
            .execute(&self.pool)
            .await?;
        dashboard.id = res.last_insert_rowid();
        Ok(dashboard.id)
    }

    pub async fn list_dashboards(&self) -> Result<Vec<Dashboard>, StoreError> {
        let rows = sqlx::query("SELECT id, name, slug FROM dashboards ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(dashboard_from_row).collect()
    }

    pub async fn get_dashboard(&self, id: i64) -> Result<Dashboard, StoreError> {
        let row = sqlx::query("SELECT id, name, slug FROM dashboards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        dashboard_from_row(&row)
    }

    pub async fn get_dashboard_by_slug(&self, slug: &str) -> Result<Dashboard, StoreError> {
        let row = sqlx::query("SELECT id, name, slug FROM dashboards WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        dashboard_from_row(&row)
    }

    pub async fn update_dashboard(&self, dashboard: &Dashboard) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE dashboards SET name = $1 WHERE id = $2")
            .bind(&dashboard.name)
            .bind(dashboard.id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_dashboard(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM dashboard_graph_targets WHERE graph_id IN
                 (SELECT id FROM dashboard_graphs WHERE dashboard_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM dashboard_graphs WHERE dashboard_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM dashboards WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn list_graphs(&self, dashboard_id: i64) -> Result<Vec<DashboardGraph>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, dashboard_id, title, position FROM dashboard_graphs
             WHERE dashboard_id = $1 ORDER BY position, id",
        )
        .bind(dashboard_id)
        .fetch_all(&self.pool)
        .await?;

        let mut graphs = Vec::with_capacity(rows.len());
        for row in rows {
            let mut graph = DashboardGraph {
                id: row.try_get("id")?,
                dashboard_id: row.try_get("dashboard_id")?,
                title: row.try_get("title")?,
                position: row.try_get("position")?,
                target_ids: Vec::new(),
            };
            graph.target_ids = self.graph_targets(graph.id).await?;
            graphs.push(graph);
        }
        Ok(graphs)
    }

    pub async fn add_graph(&self, graph: &mut DashboardGraph) -> Result<i64, StoreError> {
        let res = sqlx::query(
            "INSERT INTO dashboard_graphs (dashboard_id, title, position) VALUES ($1, $2, $3)",
        )
        .bind(graph.dashboard_id)
        .bind(&graph.title)
        .bind(graph.position)
        .execute(&self.pool)
        .await?;
        graph.id = res.last_insert_rowid();
        Ok(graph.id)
    }

    pub async fn update_graph(&self, graph: &DashboardGraph) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE dashboard_graphs SET title = $1, position = $2 WHERE id = $3")
            .bind(&graph.title)
            .bind(graph.position)
            .bind(graph.id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_graph(&self, graph_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dashboard_graph_targets WHERE graph_id = $1")
            .bind(graph_id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM dashboard_graphs WHERE id = $1")
            .bind(graph_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Replace a graph's target set.
    pub async fn set_graph_targets(
        &self,
        graph_id: i64,
        target_ids: &[i64],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dashboard_graph_targets WHERE graph_id = $1")
            .bind(graph_id)
            .execute(&mut *tx)
            .await?;
        for target_id in target_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO dashboard_graph_targets (graph_id, target_id) VALUES ($1, $2)",
            )
            .bind(graph_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn graph_targets(&self, graph_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT target_id FROM dashboard_graph_targets WHERE graph_id = $1 ORDER BY target_id",
        )
        .bind(graph_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("target_id")?))
            .collect()
    }
}

fn target_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Target, StoreError> {
    let kind: String = row.try_get("probe_type")?;
    let probe_type = kind
        .parse::<ProbeKind>()
        .map_err(StoreError::Serialization)?;
    Ok(Target {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        probe_type,
        probe_interval: row.try_get("probe_interval")?,
        timeout: row.try_get("timeout")?,
        retention_policies: row.try_get("retention_policies")?,
    })
}

fn dashboard_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Dashboard, StoreError> {
    Ok(Dashboard {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
    })
}

/// Parse `agg:{target_id}:{window_seconds}` stats-cache keys.
fn parse_agg_key(key: &str) -> Option<(i64, i64)> {
    let rest = key.strip_prefix("agg:")?;
    let (target, window) = rest.split_once(':')?;
    Some((target.parse().ok()?, window.parse().ok()?))
}
