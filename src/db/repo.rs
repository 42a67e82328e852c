use super::model::SESSION_KEY;
use crate::model::BacklogEntry;
use crate::retry::{run_with_retry, RetryPolicy, Sleeper};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, instrument};

pub type Pool = SqlitePool;

/// Open the pool, retrying transient failures (locked file, missing mount).
pub async fn init_pool(
    database_url: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Pool> {
    let options = SqliteConnectOptions::from_str(&prepare_sqlite_url(database_url))
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = run_with_retry(policy, sleeper, "database connect", |_| {
        let options = options.clone();
        async move {
            SqlitePoolOptions::new()
                .connect_with(options)
                .await
                .context("failed to open database")
        }
    })
    .await?;
    info!("connected to database");
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. Other URLs pass through unchanged.
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

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database schema ensured");
    Ok(())
}

fn entry_from_row(row: &SqliteRow) -> Result<BacklogEntry> {
    let message_id: i64 = row.try_get("message_id")?;
    Ok(BacklogEntry {
        message_id: i32::try_from(message_id)
            .with_context(|| format!("stored message id {message_id} out of range"))?,
        channel_id: row.try_get("channel_id")?,
        post_date: row.try_get("post_date")?,
        content_preview: row.try_get("content_preview")?,
        is_reposted: row.try_get("is_reposted")?,
        reposted_at: row.try_get("reposted_at")?,
    })
}

/// Insert a post or refresh its channel id, date and preview. The publish
/// flag of an existing row is left alone.
#[instrument(skip_all)]
pub async fn upsert_post(
    pool: &Pool,
    message_id: i32,
    channel_id: i64,
    post_date: NaiveDateTime,
    content_preview: Option<&str>,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "INSERT INTO repost_posts (message_id, channel_id, post_date, content_preview) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (message_id) DO UPDATE \
         SET channel_id = excluded.channel_id, \
             post_date = excluded.post_date, \
             content_preview = excluded.content_preview",
    )
    .bind(message_id)
    .bind(channel_id)
    .bind(post_date)
    .bind(content_preview)
    .execute(&mut *conn)
    .await?;
    debug!(message_id, "saved post metadata");
    Ok(())
}

pub async fn fetch_post(pool: &Pool, message_id: i32) -> Result<Option<BacklogEntry>> {
    let mut conn = pool.acquire().await?;
    let row = sqlx::query(
        "SELECT message_id, channel_id, post_date, content_preview, is_reposted, reposted_at \
         FROM repost_posts WHERE message_id = ?",
    )
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(entry_from_row).transpose()
}

/// Pick one unpublished post uniformly at random: draw an index below the
/// unpublished count, then read that row in a stable order.
#[instrument(skip_all)]
pub async fn pick_random_unpublished(pool: &Pool) -> Result<Option<BacklogEntry>> {
    let mut conn = pool.acquire().await?;
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM repost_posts WHERE is_reposted = 0")
            .fetch_one(&mut *conn)
            .await?;
    if remaining == 0 {
        return Ok(None);
    }
    let offset = rand::thread_rng().gen_range(0..remaining);

    let row = sqlx::query(
        "SELECT message_id, channel_id, post_date, content_preview, is_reposted, reposted_at \
         FROM repost_posts WHERE is_reposted = 0 \
         ORDER BY message_id LIMIT 1 OFFSET ?",
    )
    .bind(offset)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(entry_from_row).transpose()
}

/// Flag a post as published. Returns `false` when it was already published
/// (or unknown); the first `reposted_at` is never overwritten.
#[instrument(skip_all)]
pub async fn mark_published(
    pool: &Pool,
    message_id: i32,
    when: Option<DateTime<Utc>>,
) -> Result<bool> {
    let when = when.unwrap_or_else(Utc::now);
    let mut conn = pool.acquire().await?;
    let res = sqlx::query(
        "UPDATE repost_posts SET is_reposted = 1, reposted_at = ? \
         WHERE message_id = ? AND is_reposted = 0",
    )
    .bind(when)
    .bind(message_id)
    .execute(&mut *conn)
    .await?;
    let updated = res.rows_affected() > 0;
    info!(message_id, updated, "post marked reposted");
    Ok(updated)
}

pub async fn count_unpublished(pool: &Pool) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repost_posts WHERE is_reposted = 0")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn count_total(pool: &Pool) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repost_posts")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn latest_published_at(pool: &Pool) -> Result<Option<DateTime<Utc>>> {
    let mut conn = pool.acquire().await?;
    let value: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT reposted_at FROM repost_posts WHERE reposted_at IS NOT NULL \
         ORDER BY reposted_at DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn save_session_bytes(pool: &Pool, data: &[u8]) -> Result<()> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "INSERT INTO repost_session (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(SESSION_KEY)
    .bind(data)
    .execute(&mut *conn)
    .await
    .context("failed to persist user session")?;
    debug!(bytes = data.len(), "user session saved");
    Ok(())
}

pub async fn load_session_bytes(pool: &Pool) -> Result<Option<Vec<u8>>> {
    let mut conn = pool.acquire().await?;
    let value: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT value FROM repost_session WHERE key = ?")
            .bind(SESSION_KEY)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(value)
}

pub async fn set_config(pool: &Pool, key: &str, value: &str) -> Result<()> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "INSERT INTO repost_config (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to persist config value {key}"))?;
    Ok(())
}

pub async fn get_config(pool: &Pool, key: &str) -> Result<Option<String>> {
    let mut conn = pool.acquire().await?;
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM repost_config WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::model::PENDING_CODE_HASH_KEY;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashSet;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn date(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_latest_values() {
        let pool = setup_pool().await;
        upsert_post(&pool, 10, 111, date(1), Some("first")).await.unwrap();
        upsert_post(&pool, 10, -100111, date(2), Some("second"))
            .await
            .unwrap();

        assert_eq!(count_total(&pool).await.unwrap(), 1);
        let entry = fetch_post(&pool, 10).await.unwrap().unwrap();
        assert_eq!(entry.channel_id, -100111);
        assert_eq!(entry.post_date, date(2));
        assert_eq!(entry.content_preview.as_deref(), Some("second"));
        assert!(!entry.is_reposted);
        assert!(entry.reposted_at.is_none());
    }

    #[tokio::test]
    async fn reingest_does_not_reset_publish_flag() {
        let pool = setup_pool().await;
        upsert_post(&pool, 5, -1001, date(1), None).await.unwrap();
        assert!(mark_published(&pool, 5, None).await.unwrap());
        upsert_post(&pool, 5, -1001, date(1), Some("edited")).await.unwrap();

        let entry = fetch_post(&pool, 5).await.unwrap().unwrap();
        assert!(entry.is_reposted);
        assert!(entry.reposted_at.is_some());
        assert_eq!(count_unpublished(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn random_pick_never_returns_published_entries() {
        let pool = setup_pool().await;
        assert!(pick_random_unpublished(&pool).await.unwrap().is_none());

        for id in 1..=4 {
            upsert_post(&pool, id, -1001, date(id as u32), None)
                .await
                .unwrap();
        }
        mark_published(&pool, 1, None).await.unwrap();
        mark_published(&pool, 3, None).await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let entry = pick_random_unpublished(&pool).await.unwrap().unwrap();
            assert!(!entry.is_reposted);
            seen.insert(entry.message_id);
        }
        assert!(seen.is_subset(&HashSet::from([2, 4])));

        mark_published(&pool, 2, None).await.unwrap();
        mark_published(&pool, 4, None).await.unwrap();
        assert!(pick_random_unpublished(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn random_pick_reaches_every_unpublished_entry() {
        let pool = setup_pool().await;
        for id in 1..=3 {
            upsert_post(&pool, id, -1001, date(1), None).await.unwrap();
        }
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(pick_random_unpublished(&pool).await.unwrap().unwrap().message_id);
        }
        assert_eq!(seen, HashSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn mark_published_happens_once() {
        let pool = setup_pool().await;
        upsert_post(&pool, 7, -1001, date(1), None).await.unwrap();
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        assert!(mark_published(&pool, 7, Some(first)).await.unwrap());
        assert!(!mark_published(&pool, 7, Some(later)).await.unwrap());
        assert!(!mark_published(&pool, 999, None).await.unwrap());

        assert_eq!(latest_published_at(&pool).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn latest_published_at_tracks_most_recent() {
        let pool = setup_pool().await;
        assert!(latest_published_at(&pool).await.unwrap().is_none());
        for id in 1..=2 {
            upsert_post(&pool, id, -1001, date(1), None).await.unwrap();
        }
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        mark_published(&pool, 2, Some(b)).await.unwrap();
        mark_published(&pool, 1, Some(a)).await.unwrap();
        assert_eq!(latest_published_at(&pool).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn session_and_config_roundtrip() {
        let pool = setup_pool().await;
        assert!(load_session_bytes(&pool).await.unwrap().is_none());
        save_session_bytes(&pool, b"one").await.unwrap();
        save_session_bytes(&pool, b"two").await.unwrap();
        assert_eq!(load_session_bytes(&pool).await.unwrap(), Some(b"two".to_vec()));

        assert!(get_config(&pool, PENDING_CODE_HASH_KEY).await.unwrap().is_none());
        set_config(&pool, PENDING_CODE_HASH_KEY, "hash").await.unwrap();
        set_config(&pool, PENDING_CODE_HASH_KEY, "").await.unwrap();
        assert_eq!(
            get_config(&pool, PENDING_CODE_HASH_KEY).await.unwrap().as_deref(),
            Some("")
        );
    }

    #[test]
    fn sqlite_urls_are_normalized() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("repost.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", path.display())
        );
        assert!(td.path().join("nested").exists());
    }
}
