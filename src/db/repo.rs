use super::model::AlertRow;
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For a file-backed SQLite URL, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }
    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match query {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_alert(pool: &Pool, payload: &[u8]) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO alerts (payload) VALUES (?) RETURNING id")
        .bind(payload)
        .fetch_one(pool)
        .await
        .context("failed to persist alert record")?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn delete_alert(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM alerts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete alert record")?;
    Ok(())
}

/// All persisted records in row-id order, i.e. creation order.
#[instrument(skip_all)]
pub async fn load_alerts(pool: &Pool) -> Result<Vec<AlertRow>> {
    let rows = sqlx::query("SELECT id, payload, created_at FROM alerts ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| AlertRow {
            id: row.get("id"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[instrument(skip_all)]
pub async fn count_alerts(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn insert_load_delete_round_trip() {
        let pool = setup_pool().await;
        let a = insert_alert(&pool, b"first").await.unwrap();
        let b = insert_alert(&pool, b"second").await.unwrap();
        assert!(b > a);

        let rows = load_alerts(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, b"first");
        assert_eq!(rows[1].payload, b"second");

        delete_alert(&pool, a).await.unwrap();
        assert_eq!(count_alerts(&pool).await.unwrap(), 1);
        let rows = load_alerts(&pool).await.unwrap();
        assert_eq!(rows[0].id, b);
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(
            prepare_sqlite_url("sqlite::memory:"),
            "sqlite::memory:"
        );
        assert_eq!(
            prepare_sqlite_url("postgres://x"),
            "postgres://x"
        );
        assert_eq!(
            prepare_sqlite_url("sqlite:///tmp/a.db?mode=rwc"),
            "sqlite:///tmp/a.db?mode=rwc"
        );
    }
}
