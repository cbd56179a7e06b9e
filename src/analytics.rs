use chrono::{Duration, NaiveDate, Utc};
use sqlx::MySqlPool;
use vercel_runtime::Error;

use crate::db::{self, AccountRow, HistoryEntryRow};
use crate::providers::youtube::youtube_oauth_client_from_env;
use crate::providers::youtube_analytics::{
  fetch_daily_metrics, youtube_analytics_error_to_vercel_error, ChannelDailyRow,
};
use crate::providers::youtube_api::fetch_channel_snapshot;
use crate::token_guard::ensure_valid_token;

pub const SUPPORTED_PLATFORM: &str = "youtube";

/// Days of reporting lag tolerated before a cached window is considered
/// insufficient. YouTube finalizes analytics rows up to two days late, so a
/// window missing that many trailing days is still served from cache rather
/// than refetched.
pub const CACHE_TOLERANCE_DAYS: i64 = 2;

pub fn should_serve_from_cache(cached_rows: usize, days: i64) -> bool {
  cached_rows as i64 >= days - CACHE_TOLERANCE_DAYS
}

/// One day of an account's series: cumulative totals as of that day plus the
/// day's own movement. Charts need both.
#[derive(Debug, Clone, PartialEq)]
pub struct DayStat {
  pub date: NaiveDate,
  pub views: i64,
  pub daily_views: i64,
  pub followers: i64,
  pub followers_gained: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub interactions: i64,
  pub engagement_rate: f64,
  pub watch_time_hours: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDayStat {
  pub date: NaiveDate,
  pub views: i64,
  pub followers: i64,
  pub followers_gained: i64,
  pub daily_views: i64,
  pub interactions: i64,
  pub engagement_rate: f64,
}

#[derive(Debug, Clone)]
pub struct AccountStats {
  pub followers: i64,
  pub views: i64,
  pub engagement_rate: f64,
  pub total_posts: i64,
}

fn engagement_rate(interactions: i64, daily_views: i64) -> f64 {
  if daily_views > 0 {
    interactions as f64 / daily_views as f64 * 100.0
  } else {
    0.0
  }
}

/// Some channels report zero estimatedMinutesWatched; estimate from the
/// average view duration in that case.
pub fn effective_watch_minutes(row: &ChannelDailyRow) -> i64 {
  if row.estimated_minutes_watched > 0 {
    row.estimated_minutes_watched
  } else {
    ((row.avg_view_duration_seconds * row.views) as f64 / 60.0).round() as i64
  }
}

/// Derive per-day cumulative totals from the source's delta-only rows.
///
/// The Analytics API reports only forward-looking movement per day, so the
/// walk runs newest-to-oldest seeded with the channel's current cumulative
/// totals: record the running totals against the day, then subtract that
/// day's deltas before stepping to the prior day. Output is chronological.
pub fn reconstruct_history(
  current_total_subs: i64,
  current_total_views: i64,
  rows: &[ChannelDailyRow],
) -> Vec<DayStat> {
  let mut running_views = current_total_views;
  let mut running_subs = current_total_subs;

  let mut history = Vec::with_capacity(rows.len());
  for row in rows.iter().rev() {
    let daily_views = row.views;
    let net_subs = row.subscribers_gained - row.subscribers_lost;
    let interactions = row.likes + row.comments + row.shares;
    let watch_minutes = effective_watch_minutes(row);

    history.push(DayStat {
      date: row.dt,
      views: running_views,
      daily_views,
      followers: running_subs,
      followers_gained: net_subs,
      likes: row.likes,
      comments: row.comments,
      shares: row.shares,
      interactions,
      engagement_rate: engagement_rate(interactions, daily_views),
      watch_time_hours: watch_minutes as f64 / 60.0,
    });

    running_views -= daily_views;
    running_subs -= net_subs;
  }

  history.reverse();
  history
}

fn day_stat_from_history_row(row: &HistoryEntryRow) -> DayStat {
  DayStat {
    date: row.dt,
    views: row.impression_count,
    daily_views: row.impressions_gained,
    followers: row.follower_count,
    followers_gained: row.followers_gained,
    likes: row.likes,
    comments: row.comments,
    shares: row.shares,
    interactions: row.total_interactions,
    engagement_rate: row.engagement_rate,
    watch_time_hours: row.watch_minutes as f64 / 60.0,
  }
}

fn history_row_from_day_stat(stat: &DayStat) -> HistoryEntryRow {
  HistoryEntryRow {
    dt: stat.date,
    follower_count: stat.followers,
    followers_gained: stat.followers_gained,
    impression_count: stat.views,
    impressions_gained: stat.daily_views,
    likes: stat.likes,
    comments: stat.comments,
    shares: stat.shares,
    total_interactions: stat.interactions,
    engagement_rate: stat.engagement_rate,
    watch_minutes: (stat.watch_time_hours * 60.0).round() as i64,
  }
}

async fn refresh_history(
  pool: &MySqlPool,
  account: &AccountRow,
  access_token: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<DayStat>, Error> {
  let snapshot = fetch_channel_snapshot(access_token)
    .await
    .map_err(|e| Box::new(e) as Error)?;

  let rows = fetch_daily_metrics(
    access_token,
    &account.platform_account_id,
    start_dt,
    end_dt,
  )
  .await
  .map_err(youtube_analytics_error_to_vercel_error)?;

  let history = reconstruct_history(snapshot.subscriber_count, snapshot.view_count, &rows);

  // Keyed on (account, date): a retry or overlapping window overwrites
  // instead of duplicating.
  for stat in history.iter() {
    db::upsert_history_entry(pool, account.id, &history_row_from_day_stat(stat)).await?;
  }

  Ok(history)
}

/// Per-account daily series for the trailing window, oldest first.
///
/// External failures never escape this boundary: the dashboard prefers "no
/// data" over an error page, so every failure path logs and returns an empty
/// series.
pub async fn get_account_analytics(
  pool: &MySqlPool,
  account_id: i64,
  days: i64,
  force_refresh: bool,
) -> Vec<DayStat> {
  let end_dt = Utc::now().date_naive();
  let start_dt = end_dt - Duration::days(days);

  if !force_refresh {
    match db::fetch_history_range(pool, account_id, start_dt, end_dt).await {
      Ok(cached) if should_serve_from_cache(cached.len(), days) => {
        let mut stats: Vec<DayStat> = cached.iter().map(day_stat_from_history_row).collect();
        stats.reverse();
        return stats;
      }
      Ok(_) => {}
      Err(err) => {
        eprintln!("history cache read failed for account {account_id}: {err}");
      }
    }
  }

  let account = match db::fetch_account(pool, account_id).await {
    Ok(Some(account)) => account,
    Ok(None) => return vec![],
    Err(err) => {
      eprintln!("account lookup failed for account {account_id}: {err}");
      return vec![];
    }
  };

  let has_access_token = account
    .access_token
    .as_deref()
    .is_some_and(|t| !t.trim().is_empty());
  if account.platform != SUPPORTED_PLATFORM
    || !has_access_token
    || account.platform_account_id.trim().is_empty()
  {
    return vec![];
  }

  let oauth = match youtube_oauth_client_from_env() {
    Ok((client, _)) => client,
    Err(err) => {
      eprintln!("oauth client unavailable: {err}");
      return vec![];
    }
  };

  let access_token = match ensure_valid_token(pool, &oauth, &account).await {
    Ok(token) => token,
    Err(err) => {
      eprintln!("failed to validate token for account {}: {err}", account.id);
      return vec![];
    }
  };

  match refresh_history(pool, &account, &access_token, start_dt, end_dt).await {
    Ok(history) => history,
    Err(err) => {
      eprintln!("YouTube API error for account {}: {err}", account.id);
      vec![]
    }
  }
}

/// Pure reduction over per-account histories into per-date totals. Every date
/// in `[end_dt - days + 1, end_dt]` gets a bucket even when no account has
/// data for it; entries outside the window are dropped so a malformed source
/// date can never grow the output.
pub fn aggregate_histories(
  end_dt: NaiveDate,
  days: i64,
  histories: &[Vec<DayStat>],
) -> Vec<AggregateDayStat> {
  use std::collections::BTreeMap;

  let mut buckets: BTreeMap<NaiveDate, AggregateDayStat> = BTreeMap::new();
  for i in 0..days.max(0) {
    let date = end_dt - Duration::days(days - 1 - i);
    buckets.insert(
      date,
      AggregateDayStat {
        date,
        views: 0,
        followers: 0,
        followers_gained: 0,
        daily_views: 0,
        interactions: 0,
        engagement_rate: 0.0,
      },
    );
  }

  for history in histories {
    for entry in history {
      let Some(bucket) = buckets.get_mut(&entry.date) else {
        continue;
      };
      bucket.views += entry.views;
      bucket.followers += entry.followers;
      bucket.followers_gained += entry.followers_gained;
      bucket.daily_views += entry.daily_views;
      bucket.interactions += entry.likes.max(0) + entry.comments.max(0) + entry.shares.max(0);
    }
  }

  buckets
    .into_values()
    .map(|mut bucket| {
      bucket.engagement_rate = engagement_rate(bucket.interactions, bucket.daily_views);
      bucket
    })
    .collect()
}

/// Totals across all of a user's connected accounts, one bucket per date.
pub async fn get_aggregate_analytics(pool: &MySqlPool, user_id: i64, days: i64) -> Vec<AggregateDayStat> {
  let accounts = match db::fetch_accounts_for_user(pool, user_id).await {
    Ok(accounts) => accounts,
    Err(err) => {
      eprintln!("account list failed for user {user_id}: {err}");
      vec![]
    }
  };

  let mut handles = Vec::with_capacity(accounts.len());
  for account in accounts {
    let pool = pool.clone();
    handles.push(tokio::spawn(async move {
      get_account_analytics(&pool, account.id, days, false).await
    }));
  }

  let mut histories = Vec::with_capacity(handles.len());
  for handle in handles {
    match handle.await {
      Ok(history) => histories.push(history),
      Err(err) => eprintln!("per-account history task failed: {err}"),
    }
  }

  aggregate_histories(Utc::now().date_naive(), days, &histories)
}

/// Force-refresh the trailing 30 days and persist the latest cumulative
/// totals onto the account row. Operator-facing: errors bubble.
pub async fn refresh_account_stats(pool: &MySqlPool, account_id: i64) -> Result<AccountStats, Error> {
  let account = db::fetch_account(pool, account_id)
    .await?
    .ok_or_else(|| Box::new(std::io::Error::other("account not found")) as Error)?;

  let (oauth, _) = youtube_oauth_client_from_env()?;
  let access_token = ensure_valid_token(pool, &oauth, &account)
    .await
    .map_err(|e| Box::new(e) as Error)?;

  let snapshot = fetch_channel_snapshot(&access_token)
    .await
    .map_err(|e| Box::new(e) as Error)?;

  let history = get_account_analytics(pool, account_id, 30, true).await;

  let Some(latest) = history.last() else {
    return Ok(AccountStats {
      followers: 0,
      views: 0,
      engagement_rate: 0.0,
      total_posts: snapshot.video_count,
    });
  };

  db::update_account_stats(
    pool,
    account_id,
    latest.followers,
    latest.views,
    latest.engagement_rate,
    snapshot.video_count,
  )
  .await?;

  Ok(AccountStats {
    followers: latest.followers,
    views: latest.views,
    engagement_rate: latest.engagement_rate,
    total_posts: snapshot.video_count,
  })
}
