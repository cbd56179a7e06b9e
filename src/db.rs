use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use tokio::sync::OnceCell;
use vercel_runtime::Error;

static POOL: OnceCell<MySqlPool> = OnceCell::const_new();

#[derive(Debug, Clone)]
pub struct AccountRow {
  pub id: i64,
  pub user_id: i64,
  pub platform: String,
  pub platform_account_id: String,
  pub username: String,
  pub access_token: Option<String>,
  pub refresh_token: Option<String>,
  pub followers: i64,
  pub total_views: i64,
  pub engagement_rate: f64,
  pub total_posts: i64,
}

#[derive(Debug, Clone)]
pub struct HistoryEntryRow {
  pub dt: NaiveDate,
  pub follower_count: i64,
  pub followers_gained: i64,
  pub impression_count: i64,
  pub impressions_gained: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub total_interactions: i64,
  pub engagement_rate: f64,
  pub watch_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ApiCacheRow {
  pub payload_json: String,
  pub expires_at: DateTime<Utc>,
}

async fn ensure_schema(pool: &MySqlPool) -> Result<(), Error> {
  // Keep schema creation idempotent; the frontend deploy has no migration step.
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        email VARCHAR(255) NOT NULL,
        password_hash VARCHAR(255) NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_users_email (email)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS accounts (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        platform VARCHAR(32) NOT NULL,
        platform_account_id VARCHAR(128) NOT NULL,
        username VARCHAR(255) NOT NULL,
        access_token TEXT NULL,
        refresh_token TEXT NULL,
        followers BIGINT NOT NULL DEFAULT 0,
        total_views BIGINT NOT NULL DEFAULT 0,
        engagement_rate DOUBLE NOT NULL DEFAULT 0,
        total_posts BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_accounts_platform (platform, platform_account_id),
        KEY idx_accounts_user (user_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS analytics_history (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        account_id BIGINT NOT NULL,
        dt DATE NOT NULL,
        follower_count BIGINT NOT NULL DEFAULT 0,
        followers_gained BIGINT NOT NULL DEFAULT 0,
        impression_count BIGINT NOT NULL DEFAULT 0,
        impressions_gained BIGINT NOT NULL DEFAULT 0,
        likes BIGINT NOT NULL DEFAULT 0,
        comments BIGINT NOT NULL DEFAULT 0,
        shares BIGINT NOT NULL DEFAULT 0,
        total_interactions BIGINT NOT NULL DEFAULT 0,
        engagement_rate DOUBLE NOT NULL DEFAULT 0,
        engagement_rate_change DOUBLE NOT NULL DEFAULT 0,
        watch_minutes BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_analytics_history_day (account_id, dt)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS api_cache (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        account_id BIGINT NOT NULL,
        cache_key VARCHAR(128) NOT NULL,
        payload_json MEDIUMTEXT NOT NULL,
        expires_at TIMESTAMP(3) NOT NULL,
        updated_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3) ON UPDATE CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_api_cache_key (account_id, cache_key)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS password_reset_tokens (
        id BIGINT PRIMARY KEY AUTO_INCREMENT,
        user_id BIGINT NOT NULL,
        token_hash VARCHAR(128) NOT NULL,
        expires_at TIMESTAMP(3) NOT NULL,
        created_at TIMESTAMP(3) NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
        UNIQUE KEY uq_password_reset_tokens_hash (token_hash),
        KEY idx_password_reset_tokens_user (user_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn get_pool() -> Result<&'static MySqlPool, Error> {
  POOL
    .get_or_try_init(|| async {
      let url = std::env::var("TIDB_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| -> Error {
          Box::new(std::io::Error::other(
            "Missing TIDB_DATABASE_URL (or DATABASE_URL)",
          ))
        })?;

      let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| -> Error { Box::new(e) })?;

      ensure_schema(&pool).await?;
      Ok::<_, Error>(pool)
    })
    .await
}

type AccountTuple = (
  i64,
  i64,
  String,
  String,
  String,
  Option<String>,
  Option<String>,
  i64,
  i64,
  f64,
  i64,
);

fn account_from_tuple(row: AccountTuple) -> AccountRow {
  let (
    id,
    user_id,
    platform,
    platform_account_id,
    username,
    access_token,
    refresh_token,
    followers,
    total_views,
    engagement_rate,
    total_posts,
  ) = row;
  AccountRow {
    id,
    user_id,
    platform,
    platform_account_id,
    username,
    access_token,
    refresh_token,
    followers,
    total_views,
    engagement_rate,
    total_posts,
  }
}

pub async fn fetch_account(pool: &MySqlPool, account_id: i64) -> Result<Option<AccountRow>, Error> {
  let row = sqlx::query_as::<_, AccountTuple>(
    r#"
      SELECT id, user_id, platform, platform_account_id, username,
             access_token, refresh_token,
             followers, total_views, engagement_rate, total_posts
      FROM accounts
      WHERE id = ?
      LIMIT 1;
    "#,
  )
  .bind(account_id)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(row.map(account_from_tuple))
}

pub async fn fetch_accounts_for_user(pool: &MySqlPool, user_id: i64) -> Result<Vec<AccountRow>, Error> {
  let rows = sqlx::query_as::<_, AccountTuple>(
    r#"
      SELECT id, user_id, platform, platform_account_id, username,
             access_token, refresh_token,
             followers, total_views, engagement_rate, total_posts
      FROM accounts
      WHERE user_id = ?
      ORDER BY id ASC;
    "#,
  )
  .bind(user_id)
  .fetch_all(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(rows.into_iter().map(account_from_tuple).collect())
}

/// Connect (or reconnect) a platform account. Reconnecting an already linked
/// channel refreshes its tokens and username instead of duplicating the row.
pub async fn upsert_account(
  pool: &MySqlPool,
  user_id: i64,
  platform: &str,
  platform_account_id: &str,
  username: &str,
  access_token: &str,
  refresh_token: Option<&str>,
) -> Result<i64, Error> {
  sqlx::query(
    r#"
      INSERT INTO accounts
        (user_id, platform, platform_account_id, username, access_token, refresh_token)
      VALUES
        (?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        user_id = VALUES(user_id),
        username = VALUES(username),
        access_token = VALUES(access_token),
        refresh_token = COALESCE(VALUES(refresh_token), refresh_token),
        updated_at = CURRENT_TIMESTAMP(3);
    "#,
  )
  .bind(user_id)
  .bind(platform)
  .bind(platform_account_id)
  .bind(username)
  .bind(access_token)
  .bind(refresh_token)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let account_id: i64 = sqlx::query_scalar(
    r#"
      SELECT id
      FROM accounts
      WHERE platform = ? AND platform_account_id = ?
      LIMIT 1;
    "#,
  )
  .bind(platform)
  .bind(platform_account_id)
  .fetch_one(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(account_id)
}

pub async fn update_account_access_token(
  pool: &MySqlPool,
  account_id: i64,
  access_token: &str,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      UPDATE accounts
      SET access_token = ?,
          updated_at = CURRENT_TIMESTAMP(3)
      WHERE id = ?;
    "#,
  )
  .bind(access_token)
  .bind(account_id)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn update_account_stats(
  pool: &MySqlPool,
  account_id: i64,
  followers: i64,
  total_views: i64,
  engagement_rate: f64,
  total_posts: i64,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      UPDATE accounts
      SET followers = ?,
          total_views = ?,
          engagement_rate = ?,
          total_posts = ?,
          updated_at = CURRENT_TIMESTAMP(3)
      WHERE id = ?;
    "#,
  )
  .bind(followers)
  .bind(total_views)
  .bind(engagement_rate)
  .bind(total_posts)
  .bind(account_id)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

/// Disconnect an account. History and cache rows are owned exclusively by the
/// account, so they go in the same transaction (no DB-level foreign keys).
pub async fn delete_account(pool: &MySqlPool, account_id: i64) -> Result<(), Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query("DELETE FROM analytics_history WHERE account_id = ?;")
    .bind(account_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query("DELETE FROM api_cache WHERE account_id = ?;")
    .bind(account_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query("DELETE FROM accounts WHERE id = ?;")
    .bind(account_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(())
}

/// History rows for the window, most recent first (callers reverse for charts).
pub async fn fetch_history_range(
  pool: &MySqlPool,
  account_id: i64,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<HistoryEntryRow>, Error> {
  let rows = sqlx::query_as::<_, (NaiveDate, i64, i64, i64, i64, i64, i64, i64, i64, f64, i64)>(
    r#"
      SELECT dt, follower_count, followers_gained,
             impression_count, impressions_gained,
             likes, comments, shares, total_interactions,
             engagement_rate, watch_minutes
      FROM analytics_history
      WHERE account_id = ?
        AND dt BETWEEN ? AND ?
      ORDER BY dt DESC;
    "#,
  )
  .bind(account_id)
  .bind(start_dt)
  .bind(end_dt)
  .fetch_all(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(
    rows
      .into_iter()
      .map(
        |(
          dt,
          follower_count,
          followers_gained,
          impression_count,
          impressions_gained,
          likes,
          comments,
          shares,
          total_interactions,
          engagement_rate,
          watch_minutes,
        )| HistoryEntryRow {
          dt,
          follower_count,
          followers_gained,
          impression_count,
          impressions_gained,
          likes,
          comments,
          shares,
          total_interactions,
          engagement_rate,
          watch_minutes,
        },
      )
      .collect(),
  )
}

pub async fn upsert_history_entry(
  pool: &MySqlPool,
  account_id: i64,
  entry: &HistoryEntryRow,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO analytics_history
        (account_id, dt, follower_count, followers_gained,
         impression_count, impressions_gained,
         likes, comments, shares, total_interactions,
         engagement_rate, watch_minutes)
      VALUES
        (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        follower_count = VALUES(follower_count),
        followers_gained = VALUES(followers_gained),
        impression_count = VALUES(impression_count),
        impressions_gained = VALUES(impressions_gained),
        likes = VALUES(likes),
        comments = VALUES(comments),
        shares = VALUES(shares),
        total_interactions = VALUES(total_interactions),
        engagement_rate = VALUES(engagement_rate),
        watch_minutes = VALUES(watch_minutes);
    "#,
  )
  .bind(account_id)
  .bind(entry.dt)
  .bind(entry.follower_count)
  .bind(entry.followers_gained)
  .bind(entry.impression_count)
  .bind(entry.impressions_gained)
  .bind(entry.likes)
  .bind(entry.comments)
  .bind(entry.shares)
  .bind(entry.total_interactions)
  .bind(entry.engagement_rate)
  .bind(entry.watch_minutes)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn fetch_api_cache(
  pool: &MySqlPool,
  account_id: i64,
  cache_key: &str,
) -> Result<Option<ApiCacheRow>, Error> {
  let row = sqlx::query_as::<_, (String, DateTime<Utc>)>(
    r#"
      SELECT payload_json, expires_at
      FROM api_cache
      WHERE account_id = ? AND cache_key = ?
      LIMIT 1;
    "#,
  )
  .bind(account_id)
  .bind(cache_key)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(row.map(|(payload_json, expires_at)| ApiCacheRow {
    payload_json,
    expires_at,
  }))
}

pub async fn upsert_api_cache(
  pool: &MySqlPool,
  account_id: i64,
  cache_key: &str,
  payload_json: &str,
  expires_at: DateTime<Utc>,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO api_cache
        (account_id, cache_key, payload_json, expires_at)
      VALUES
        (?, ?, ?, ?)
      ON DUPLICATE KEY UPDATE
        payload_json = VALUES(payload_json),
        expires_at = VALUES(expires_at),
        updated_at = CURRENT_TIMESTAMP(3);
    "#,
  )
  .bind(account_id)
  .bind(cache_key)
  .bind(payload_json)
  .bind(expires_at)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn insert_password_reset_token(
  pool: &MySqlPool,
  user_id: i64,
  token_hash: &str,
  expires_at: DateTime<Utc>,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
      VALUES (?, ?, ?);
    "#,
  )
  .bind(user_id)
  .bind(token_hash)
  .bind(expires_at)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

/// Single-use consumption: the row is deleted under the same lock that reads
/// the expiry, so a token can never be redeemed twice.
pub async fn consume_password_reset_token(
  pool: &MySqlPool,
  token_hash: &str,
  now: DateTime<Utc>,
) -> Result<Option<i64>, Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
    r#"
      SELECT user_id, expires_at
      FROM password_reset_tokens
      WHERE token_hash = ?
      LIMIT 1
      FOR UPDATE;
    "#,
  )
  .bind(token_hash)
  .fetch_optional(&mut *tx)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  let Some((user_id, expires_at)) = row else {
    tx.rollback().await.map_err(|e| -> Error { Box::new(e) })?;
    return Ok(None);
  };

  sqlx::query("DELETE FROM password_reset_tokens WHERE token_hash = ?;")
    .bind(token_hash)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;

  if expires_at <= now {
    return Ok(None);
  }

  Ok(Some(user_id))
}
