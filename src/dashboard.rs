use std::collections::{BTreeSet, HashMap};

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::MySqlPool;
use vercel_runtime::Error;

use crate::analytics::SUPPORTED_PLATFORM;
use crate::db;
use crate::providers::youtube::youtube_oauth_client_from_env;
use crate::providers::youtube_analytics::{
  self as yta, ChannelOverview, ShortsRatios, SubscriberVideoRow, TopVideoRow, YoutubeAnalyticsError,
};
use crate::providers::youtube_api::{fetch_channel_snapshot, ChannelSnapshot};
use crate::providers::youtube_videos::{fetch_video_details, VideoDetails};
use crate::token_guard::ensure_valid_token;

/// Dashboard payloads are expensive to assemble (a dozen report calls), so
/// they are cached a full day; the history series has its own finer cache.
pub const DASHBOARD_CACHE_TTL_HOURS: i64 = 24;

const TOP_LIST_LIMIT: i64 = 10;
const COUNTRY_LIMIT: i64 = 10;

pub fn dashboard_cache_key(days: i64) -> String {
  format!("youtube_dashboard_{days}d")
}

fn report<T>(result: Result<T, YoutubeAnalyticsError>, name: &str, unavailable: &mut Vec<String>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(err) => {
      eprintln!("dashboard report {name} failed: {err}");
      unavailable.push(name.to_string());
      None
    }
  }
}

fn channel_json(snap: &ChannelSnapshot) -> Value {
  let url = match snap.custom_url.as_deref() {
    Some(handle) if !handle.is_empty() => format!("https://youtube.com/{handle}"),
    _ => format!("https://youtube.com/channel/{}", snap.channel_id),
  };
  json!({
    "title": snap.title,
    "handle": snap.custom_url,
    "avatar": snap.thumbnail_url.clone().unwrap_or_default(),
    "url": url,
    "subscriberCount": snap.subscriber_count,
    "videoCount": snap.video_count,
    "viewCount": snap.view_count,
  })
}

fn overview_json(overview: &ChannelOverview) -> Value {
  json!({
    "views": overview.views,
    "watchTimeHours": overview.estimated_minutes_watched as f64 / 60.0,
    "avgViewDurationSeconds": overview.avg_view_duration_seconds,
    "subscribersGained": overview.subscribers_gained,
    "subscribersLost": overview.subscribers_lost,
    "likes": overview.likes,
    "comments": overview.comments,
    "shares": overview.shares,
  })
}

fn ratios_json(ratios: &ShortsRatios) -> Value {
  json!({
    "shortsViews": ratios.shorts_views,
    "longformViews": ratios.longform_views,
    "shortsWatchMinutes": ratios.shorts_watch_minutes,
    "longformWatchMinutes": ratios.longform_watch_minutes,
    "shortsViewShare": ratios.shorts_view_share(),
  })
}

fn title_of(details: &HashMap<String, VideoDetails>, video_id: &str) -> String {
  details
    .get(video_id)
    .map(|d| d.title.clone())
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| "Unknown Video".to_string())
}

fn thumbnail_of(details: &HashMap<String, VideoDetails>, video_id: &str) -> String {
  details
    .get(video_id)
    .and_then(|d| d.thumbnail_url.clone())
    .unwrap_or_default()
}

fn video_json(row: &TopVideoRow, details: &HashMap<String, VideoDetails>) -> Value {
  json!({
    "id": row.video_id,
    "title": title_of(details, &row.video_id),
    "thumbnail": thumbnail_of(details, &row.video_id),
    "views": row.views,
    "engagedViews": row.engaged_views,
    "likes": row.likes,
    "comments": row.comments,
    "shares": row.shares,
    "avgViewPercentage": row.avg_view_percentage,
    "subscribersGained": row.subscribers_gained,
    "avgDuration": row.avg_view_duration_seconds,
    "watchTimeHours": row.estimated_minutes_watched as f64 / 60.0,
  })
}

fn subscriber_video_json(row: &SubscriberVideoRow, details: &HashMap<String, VideoDetails>) -> Value {
  json!({
    "id": row.video_id,
    "title": title_of(details, &row.video_id),
    "thumbnail": thumbnail_of(details, &row.video_id),
    "views": row.views,
    "engagedViews": row.engaged_views,
    "subscribersGained": row.subscribers_gained,
    "subscribersLost": row.subscribers_lost,
    "avgViewPercentage": row.avg_view_percentage,
  })
}

fn top_by_views_json(row: &Option<TopVideoRow>, details: &HashMap<String, VideoDetails>) -> Value {
  match row {
    Some(row) => json!({
      "id": row.video_id,
      "title": title_of(details, &row.video_id),
      "thumbnail": thumbnail_of(details, &row.video_id),
      "views": row.views,
      "engagedViews": row.engaged_views,
    }),
    None => Value::Null,
  }
}

fn top_by_subs_json(row: &Option<TopVideoRow>, details: &HashMap<String, VideoDetails>) -> Value {
  match row {
    Some(row) => json!({
      "id": row.video_id,
      "title": title_of(details, &row.video_id),
      "thumbnail": thumbnail_of(details, &row.video_id),
      "subscribersGained": row.subscribers_gained,
    }),
    None => Value::Null,
  }
}

fn top_by_watch_json(row: &Option<TopVideoRow>, details: &HashMap<String, VideoDetails>) -> Value {
  match row {
    Some(row) => json!({
      "id": row.video_id,
      "title": title_of(details, &row.video_id),
      "thumbnail": thumbnail_of(details, &row.video_id),
      "watchTimeHours": row.estimated_minutes_watched as f64 / 60.0,
    }),
    None => Value::Null,
  }
}

/// Distinct video ids referenced anywhere in the composed payload, for the
/// single batched details lookup.
fn collect_video_ids(
  video_lists: &[&[TopVideoRow]],
  subscriber_lists: &[&[SubscriberVideoRow]],
  singles: &[&Option<TopVideoRow>],
) -> Vec<String> {
  let mut ids = BTreeSet::new();
  for list in video_lists {
    for row in list.iter() {
      ids.insert(row.video_id.clone());
    }
  }
  for list in subscriber_lists {
    for row in list.iter() {
      ids.insert(row.video_id.clone());
    }
  }
  for single in singles {
    if let Some(row) = single {
      ids.insert(row.video_id.clone());
    }
  }
  ids.into_iter().collect()
}

/// Composed dashboard payload for one account, served from `api_cache` while
/// fresh. Unlike the history series this path may bubble errors: the page
/// behind it shows an explicit error state.
pub async fn get_youtube_dashboard(pool: &MySqlPool, account_id: i64, days: i64) -> Result<Value, Error> {
  let cache_key = dashboard_cache_key(days);

  if let Some(cached) = db::fetch_api_cache(pool, account_id, &cache_key).await? {
    if cached.expires_at > Utc::now() {
      match serde_json::from_str::<Value>(&cached.payload_json) {
        Ok(payload) => return Ok(payload),
        Err(err) => {
          // Corrupt cache rows are disposable; recompute below.
          eprintln!("dashboard cache for account {account_id} is unreadable: {err}");
        }
      }
    }
  }

  let account = db::fetch_account(pool, account_id)
    .await?
    .ok_or_else(|| Box::new(std::io::Error::other("YouTube account not found")) as Error)?;

  if account.platform != SUPPORTED_PLATFORM {
    return Err(Box::new(std::io::Error::other("YouTube account not found")) as Error);
  }

  let (oauth, _) = youtube_oauth_client_from_env()?;
  let token = ensure_valid_token(pool, &oauth, &account)
    .await
    .map_err(|e| Box::new(e) as Error)?;

  let snapshot = fetch_channel_snapshot(&token)
    .await
    .map_err(|e| Box::new(e) as Error)?;

  let end_dt = Utc::now().date_naive();
  let start_dt = end_dt - Duration::days(days);
  let base = yta::ANALYTICS_BASE_URL;
  let channel = account.platform_account_id.as_str();

  // Independent read-only reports; none of them may abort the others.
  let (
    top_videos,
    top_sub_videos,
    demographics,
    traffic_sources,
    countries,
    overview,
    shorts_ratios,
    top_shorts,
    top_sub_shorts,
    top_video_by_views,
    top_video_by_subs,
    top_video_by_watch,
    top_short_by_views,
    top_short_by_subs,
    top_short_by_watch,
  ) = tokio::join!(
    yta::fetch_top_videos_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-views",
      TOP_LIST_LIMIT,
      Some(yta::LONGFORM_FILTER),
    ),
    yta::fetch_subscriber_videos_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      TOP_LIST_LIMIT,
      Some(yta::LONGFORM_FILTER),
    ),
    yta::fetch_demographics_with_base_url(&token, base, channel, start_dt, end_dt),
    yta::fetch_traffic_sources_with_base_url(&token, base, channel, start_dt, end_dt),
    yta::fetch_top_countries_with_base_url(&token, base, channel, start_dt, end_dt, COUNTRY_LIMIT),
    yta::fetch_overview_with_base_url(&token, base, channel, start_dt, end_dt),
    yta::fetch_shorts_ratios_with_base_url(&token, base, channel, start_dt, end_dt),
    yta::fetch_top_videos_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-views",
      TOP_LIST_LIMIT,
      Some(yta::SHORTS_FILTER),
    ),
    yta::fetch_subscriber_videos_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      TOP_LIST_LIMIT,
      Some(yta::SHORTS_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-views",
      Some(yta::LONGFORM_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-subscribersGained",
      Some(yta::LONGFORM_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-estimatedMinutesWatched",
      Some(yta::LONGFORM_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-views",
      Some(yta::SHORTS_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-subscribersGained",
      Some(yta::SHORTS_FILTER),
    ),
    yta::fetch_single_top_video_with_base_url(
      &token,
      base,
      channel,
      start_dt,
      end_dt,
      "-estimatedMinutesWatched",
      Some(yta::SHORTS_FILTER),
    ),
  );

  let mut unavailable: Vec<String> = Vec::new();

  let top_videos = report(top_videos, "topVideos", &mut unavailable).unwrap_or_default();
  let top_sub_videos = report(top_sub_videos, "topSubscriberVideos", &mut unavailable).unwrap_or_default();
  let demographics = report(demographics, "demographics", &mut unavailable).unwrap_or_default();
  let traffic_sources = report(traffic_sources, "trafficSources", &mut unavailable).unwrap_or_default();
  let countries = report(countries, "countries", &mut unavailable).unwrap_or_default();
  let overview = report(overview, "overview", &mut unavailable).flatten();
  let shorts_ratios = report(shorts_ratios, "shortsRatios", &mut unavailable);
  let top_shorts = report(top_shorts, "topShortsVideos", &mut unavailable).unwrap_or_default();
  let top_sub_shorts = report(top_sub_shorts, "topSubscriberShorts", &mut unavailable).unwrap_or_default();
  let top_video_by_views = report(top_video_by_views, "topVideoByViews", &mut unavailable).flatten();
  let top_video_by_subs = report(top_video_by_subs, "topVideoBySubs", &mut unavailable).flatten();
  let top_video_by_watch =
    report(top_video_by_watch, "topVideoByEstimatedMinutesWatched", &mut unavailable).flatten();
  let top_short_by_views = report(top_short_by_views, "topShortByViews", &mut unavailable).flatten();
  let top_short_by_subs = report(top_short_by_subs, "topShortBySubs", &mut unavailable).flatten();
  let top_short_by_watch =
    report(top_short_by_watch, "topShortByEstimatedMinutesWatched", &mut unavailable).flatten();

  let video_ids = collect_video_ids(
    &[&top_videos, &top_shorts],
    &[&top_sub_videos, &top_sub_shorts],
    &[
      &top_video_by_views,
      &top_video_by_subs,
      &top_video_by_watch,
      &top_short_by_views,
      &top_short_by_subs,
      &top_short_by_watch,
    ],
  );

  let details = match fetch_video_details(&token, &video_ids).await {
    Ok(details) => details,
    Err(err) => {
      // Titles degrade to "Unknown Video"; not worth failing the page over.
      eprintln!("video details lookup failed for account {account_id}: {err}");
      unavailable.push("videoDetails".to_string());
      HashMap::new()
    }
  };

  let payload = json!({
    "channel": channel_json(&snapshot),
    "overview": overview.as_ref().map(overview_json).unwrap_or(Value::Null),
    "topVideos": top_videos.iter().map(|r| video_json(r, &details)).collect::<Vec<_>>(),
    "topSubscriberVideos": top_sub_videos.iter().map(|r| subscriber_video_json(r, &details)).collect::<Vec<_>>(),
    "demographics": demographics.iter().map(|r| json!({
      "age": r.age_group,
      "gender": r.gender,
      "percentage": r.viewer_percentage,
    })).collect::<Vec<_>>(),
    "trafficSources": traffic_sources.iter().map(|r| json!({
      "source": r.source_type,
      "views": r.views,
    })).collect::<Vec<_>>(),
    "countries": countries.iter().map(|r| json!({
      "code": r.country_code,
      "views": r.views,
    })).collect::<Vec<_>>(),
    "shortsRatios": shorts_ratios.as_ref().map(ratios_json).unwrap_or(Value::Null),
    "topShortsVideos": top_shorts.iter().map(|r| video_json(r, &details)).collect::<Vec<_>>(),
    "topSubscriberShorts": top_sub_shorts.iter().map(|r| subscriber_video_json(r, &details)).collect::<Vec<_>>(),
    "topVideoByViews": top_by_views_json(&top_video_by_views, &details),
    "topVideoBySubs": top_by_subs_json(&top_video_by_subs, &details),
    "topVideoByEstimatedMinutesWatched": top_by_watch_json(&top_video_by_watch, &details),
    "topShortByViews": top_by_views_json(&top_short_by_views, &details),
    "topShortBySubs": top_by_subs_json(&top_short_by_subs, &details),
    "topShortByEstimatedMinutesWatched": top_by_watch_json(&top_short_by_watch, &details),
    "unavailable": unavailable,
  });

  let expires_at = Utc::now() + Duration::hours(DASHBOARD_CACHE_TTL_HOURS);
  let payload_json = serde_json::to_string(&payload).map_err(|e| -> Error { Box::new(e) })?;
  db::upsert_api_cache(pool, account_id, &cache_key, &payload_json, expires_at).await?;

  Ok(payload)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn top_row(video_id: &str) -> TopVideoRow {
    TopVideoRow {
      video_id: video_id.to_string(),
      views: 100,
      engaged_views: 80,
      likes: 10,
      comments: 2,
      shares: 1,
      avg_view_percentage: 40.0,
      subscribers_gained: 3,
      avg_view_duration_seconds: 90,
      estimated_minutes_watched: 120,
    }
  }

  fn sub_row(video_id: &str) -> SubscriberVideoRow {
    SubscriberVideoRow {
      video_id: video_id.to_string(),
      views: 50,
      engaged_views: 40,
      subscribers_gained: 5,
      subscribers_lost: 1,
      avg_view_percentage: 30.0,
    }
  }

  #[test]
  fn cache_key_scopes_by_window() {
    assert_eq!(dashboard_cache_key(30), "youtube_dashboard_30d");
    assert_eq!(dashboard_cache_key(7), "youtube_dashboard_7d");
  }

  #[test]
  fn collect_video_ids_dedups_across_lists() {
    let videos = vec![top_row("a"), top_row("b")];
    let shorts = vec![top_row("b"), top_row("c")];
    let subs = vec![sub_row("a"), sub_row("d")];
    let single = Some(top_row("e"));
    let none: Option<TopVideoRow> = None;

    let ids = collect_video_ids(&[&videos, &shorts], &[&subs], &[&single, &none]);
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
  }

  #[test]
  fn video_json_falls_back_to_unknown_title() {
    let details = HashMap::new();
    let value = video_json(&top_row("vid1"), &details);
    assert_eq!(value["title"], "Unknown Video");
    assert_eq!(value["thumbnail"], "");
    assert_eq!(value["views"], 100);
    assert_eq!(value["watchTimeHours"], 2.0);
  }

  #[test]
  fn video_json_uses_resolved_details() {
    let mut details = HashMap::new();
    details.insert(
      "vid1".to_string(),
      VideoDetails {
        title: "First".to_string(),
        thumbnail_url: Some("https://img.example/1.jpg".to_string()),
      },
    );

    let value = video_json(&top_row("vid1"), &details);
    assert_eq!(value["title"], "First");
    assert_eq!(value["thumbnail"], "https://img.example/1.jpg");
  }

  #[test]
  fn single_top_cards_render_null_when_absent() {
    let details = HashMap::new();
    assert_eq!(top_by_views_json(&None, &details), Value::Null);
    assert_eq!(top_by_subs_json(&None, &details), Value::Null);
    assert_eq!(top_by_watch_json(&None, &details), Value::Null);
  }

  #[test]
  fn single_top_cards_expose_their_sort_metric() {
    let details = HashMap::new();
    let row = Some(top_row("vid1"));

    let by_views = top_by_views_json(&row, &details);
    assert_eq!(by_views["views"], 100);
    assert!(by_views.get("subscribersGained").is_none());

    let by_subs = top_by_subs_json(&row, &details);
    assert_eq!(by_subs["subscribersGained"], 3);

    let by_watch = top_by_watch_json(&row, &details);
    assert_eq!(by_watch["watchTimeHours"], 2.0);
  }

  #[test]
  fn channel_json_builds_handle_url() {
    let snap = ChannelSnapshot {
      channel_id: "UC123".to_string(),
      title: "Synth".to_string(),
      custom_url: Some("@synth".to_string()),
      thumbnail_url: None,
      subscriber_count: 10,
      view_count: 100,
      video_count: 3,
    };
    let value = channel_json(&snap);
    assert_eq!(value["url"], "https://youtube.com/@synth");

    let snap = ChannelSnapshot {
      custom_url: None,
      ..snap
    };
    let value = channel_json(&snap);
    assert_eq!(value["url"], "https://youtube.com/channel/UC123");
  }
}
