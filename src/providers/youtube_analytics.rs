use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, AUTHORIZATION};
use hyper::{Method, Request, StatusCode};
use serde_json::Value;
use vercel_runtime::Error;

pub const ANALYTICS_BASE_URL: &str = "https://youtubeanalytics.googleapis.com/";

/// One day of channel-level deltas. The Analytics API only reports
/// forward-looking per-day movement; cumulative totals come from the Data API
/// snapshot and are reconstructed by the analytics service.
#[derive(Debug, Clone)]
pub struct ChannelDailyRow {
  pub dt: NaiveDate,
  pub views: i64,
  pub subscribers_gained: i64,
  pub subscribers_lost: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub estimated_minutes_watched: i64,
  pub avg_view_duration_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct ChannelOverview {
  pub views: i64,
  pub estimated_minutes_watched: i64,
  pub avg_view_duration_seconds: i64,
  pub subscribers_gained: i64,
  pub subscribers_lost: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
}

#[derive(Debug, Clone)]
pub struct TopVideoRow {
  pub video_id: String,
  pub views: i64,
  pub engaged_views: i64,
  pub likes: i64,
  pub comments: i64,
  pub shares: i64,
  pub avg_view_percentage: f64,
  pub subscribers_gained: i64,
  pub avg_view_duration_seconds: i64,
  pub estimated_minutes_watched: i64,
}

#[derive(Debug, Clone)]
pub struct SubscriberVideoRow {
  pub video_id: String,
  pub views: i64,
  pub engaged_views: i64,
  pub subscribers_gained: i64,
  pub subscribers_lost: i64,
  pub avg_view_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct DemographicsRow {
  pub age_group: String,
  pub gender: String,
  pub viewer_percentage: f64,
}

#[derive(Debug, Clone)]
pub struct TrafficSourceRow {
  pub source_type: String,
  pub views: i64,
}

#[derive(Debug, Clone)]
pub struct CountryRow {
  pub country_code: String,
  pub views: i64,
}

/// Share of shorts vs. long-form consumption over the window, derived from a
/// creatorContentType-dimensioned report.
#[derive(Debug, Clone, Default)]
pub struct ShortsRatios {
  pub shorts_views: i64,
  pub longform_views: i64,
  pub shorts_watch_minutes: i64,
  pub longform_watch_minutes: i64,
}

impl ShortsRatios {
  pub fn shorts_view_share(&self) -> f64 {
    let total = self.shorts_views + self.longform_views;
    if total > 0 {
      self.shorts_views as f64 / total as f64 * 100.0
    } else {
      0.0
    }
  }
}

pub const SHORTS_FILTER: &str = "creatorContentType==SHORTS";
pub const LONGFORM_FILTER: &str = "creatorContentType==VIDEO_ON_DEMAND";

const VIDEO_LIST_METRICS: &str =
  "views,engagedViews,likes,comments,shares,averageViewPercentage,subscribersGained,averageViewDuration,estimatedMinutesWatched";
const SUBSCRIBER_LIST_METRICS: &str =
  "views,engagedViews,subscribersGained,subscribersLost,averageViewPercentage";
const DAILY_METRICS: &str =
  "views,subscribersGained,subscribersLost,likes,comments,shares,estimatedMinutesWatched,averageViewDuration";
const OVERVIEW_METRICS: &str =
  "views,estimatedMinutesWatched,averageViewDuration,subscribersGained,subscribersLost,likes,comments,shares";

#[derive(Debug)]
pub struct YoutubeAnalyticsError {
  pub status: Option<u16>,
  pub message: String,
}

impl std::fmt::Display for YoutubeAnalyticsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if let Some(status) = self.status {
      write!(f, "YouTube Analytics error (status {status}): {}", self.message)
    } else {
      write!(f, "YouTube Analytics error: {}", self.message)
    }
  }
}

impl std::error::Error for YoutubeAnalyticsError {}

impl YoutubeAnalyticsError {
  pub fn is_unauthorized(&self) -> bool {
    self.status == Some(401)
  }
}

pub fn youtube_analytics_error_to_vercel_error(err: YoutubeAnalyticsError) -> Error {
  Box::new(err) as Error
}

#[allow(clippy::too_many_arguments)]
fn build_report_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  metrics: &str,
  dimensions: Option<&str>,
  sort: Option<&str>,
  max_results: Option<i64>,
  filters: Option<&str>,
) -> String {
  let base = base_url.trim_end_matches('/');
  let mut url = format!(
    "{base}/v2/reports?ids=channel=={}&startDate={}&endDate={}&metrics={metrics}",
    channel_id.trim(),
    start_dt,
    end_dt,
  );
  if let Some(dimensions) = dimensions {
    url.push_str(&format!("&dimensions={dimensions}"));
  }
  if let Some(sort) = sort {
    url.push_str(&format!("&sort={sort}"));
  }
  if let Some(max_results) = max_results {
    url.push_str(&format!("&maxResults={max_results}"));
  }
  if let Some(filters) = filters {
    url.push_str(&format!("&filters={filters}"));
  }
  url
}

pub fn build_daily_metrics_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    DAILY_METRICS,
    Some("day"),
    Some("day"),
    None,
    None,
  )
}

pub fn build_overview_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  build_report_url(base_url, channel_id, start_dt, end_dt, OVERVIEW_METRICS, None, None, None, None)
}

pub fn build_top_videos_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  sort: &str,
  limit: i64,
  filters: Option<&str>,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    VIDEO_LIST_METRICS,
    Some("video"),
    Some(sort),
    Some(limit.clamp(1, 200)),
    filters,
  )
}

pub fn build_subscriber_videos_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  limit: i64,
  filters: Option<&str>,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    SUBSCRIBER_LIST_METRICS,
    Some("video"),
    Some("-subscribersGained"),
    Some(limit.clamp(1, 200)),
    filters,
  )
}

pub fn build_demographics_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    "viewerPercentage",
    Some("ageGroup,gender"),
    Some("ageGroup"),
    None,
    None,
  )
}

pub fn build_traffic_sources_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    "views",
    Some("insightTrafficSourceType"),
    Some("-views"),
    None,
    None,
  )
}

pub fn build_top_countries_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  limit: i64,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    "views",
    Some("country"),
    Some("-views"),
    Some(limit.clamp(1, 200)),
    None,
  )
}

pub fn build_content_type_url(
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> String {
  build_report_url(
    base_url,
    channel_id,
    start_dt,
    end_dt,
    "views,estimatedMinutesWatched",
    Some("creatorContentType"),
    None,
    None,
    None,
  )
}

fn header_index(json: &Value) -> Vec<(String, usize)> {
  json
    .get("columnHeaders")
    .and_then(|v| v.as_array())
    .map(|headers| {
      headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| {
          h.get("name")
            .and_then(|v| v.as_str())
            .map(|name| (name.to_string(), i))
        })
        .collect()
    })
    .unwrap_or_default()
}

fn idx_of(index: &[(String, usize)], name: &str) -> Option<usize> {
  index.iter().find(|(n, _)| n == name).map(|(_, i)| *i)
}

fn rows_of(json: &Value) -> Vec<Value> {
  json
    .get("rows")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default()
}

fn cell_i64(arr: &[Value], idx: Option<usize>) -> i64 {
  idx
    .and_then(|i| arr.get(i))
    .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|n| n as i64)))
    .unwrap_or(0)
    .max(0)
}

fn cell_f64(arr: &[Value], idx: Option<usize>) -> f64 {
  idx
    .and_then(|i| arr.get(i))
    .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    .unwrap_or(0.0)
    .max(0.0)
}

fn cell_str(arr: &[Value], idx: Option<usize>) -> String {
  idx
    .and_then(|i| arr.get(i))
    .and_then(|v| v.as_str())
    .unwrap_or("")
    .to_string()
}

fn parse_daily_rows(json: &Value) -> Vec<ChannelDailyRow> {
  let index = header_index(json);
  let Some(idx_day) = idx_of(&index, "day") else {
    return vec![];
  };

  let idx_views = idx_of(&index, "views");
  let idx_gained = idx_of(&index, "subscribersGained");
  let idx_lost = idx_of(&index, "subscribersLost");
  let idx_likes = idx_of(&index, "likes");
  let idx_comments = idx_of(&index, "comments");
  let idx_shares = idx_of(&index, "shares");
  let idx_minutes = idx_of(&index, "estimatedMinutesWatched");
  let idx_duration = idx_of(&index, "averageViewDuration");

  let rows = rows_of(json);
  let mut out = Vec::with_capacity(rows.len());

  for row in rows {
    let arr = match row.as_array() {
      Some(a) => a,
      None => continue,
    };

    let day_str = arr.get(idx_day).and_then(|v| v.as_str()).unwrap_or("");
    let dt = match NaiveDate::parse_from_str(day_str, "%Y-%m-%d") {
      Ok(d) => d,
      Err(_) => continue,
    };

    out.push(ChannelDailyRow {
      dt,
      views: cell_i64(arr, idx_views),
      subscribers_gained: cell_i64(arr, idx_gained),
      subscribers_lost: cell_i64(arr, idx_lost),
      likes: cell_i64(arr, idx_likes),
      comments: cell_i64(arr, idx_comments),
      shares: cell_i64(arr, idx_shares),
      estimated_minutes_watched: cell_i64(arr, idx_minutes),
      avg_view_duration_seconds: cell_i64(arr, idx_duration),
    });
  }

  out
}

fn parse_overview(json: &Value) -> Option<ChannelOverview> {
  let index = header_index(json);
  let rows = rows_of(json);
  let arr = rows.first()?.as_array()?;

  Some(ChannelOverview {
    views: cell_i64(arr, idx_of(&index, "views")),
    estimated_minutes_watched: cell_i64(arr, idx_of(&index, "estimatedMinutesWatched")),
    avg_view_duration_seconds: cell_i64(arr, idx_of(&index, "averageViewDuration")),
    subscribers_gained: cell_i64(arr, idx_of(&index, "subscribersGained")),
    subscribers_lost: cell_i64(arr, idx_of(&index, "subscribersLost")),
    likes: cell_i64(arr, idx_of(&index, "likes")),
    comments: cell_i64(arr, idx_of(&index, "comments")),
    shares: cell_i64(arr, idx_of(&index, "shares")),
  })
}

fn parse_video_rows(json: &Value) -> Vec<TopVideoRow> {
  let index = header_index(json);
  let Some(idx_video) = idx_of(&index, "video") else {
    return vec![];
  };

  let rows = rows_of(json);
  let mut out = Vec::with_capacity(rows.len());

  for row in rows {
    let arr = match row.as_array() {
      Some(a) => a,
      None => continue,
    };

    let video_id = cell_str(arr, Some(idx_video));
    if video_id.is_empty() {
      continue;
    }

    out.push(TopVideoRow {
      video_id,
      views: cell_i64(arr, idx_of(&index, "views")),
      engaged_views: cell_i64(arr, idx_of(&index, "engagedViews")),
      likes: cell_i64(arr, idx_of(&index, "likes")),
      comments: cell_i64(arr, idx_of(&index, "comments")),
      shares: cell_i64(arr, idx_of(&index, "shares")),
      avg_view_percentage: cell_f64(arr, idx_of(&index, "averageViewPercentage")),
      subscribers_gained: cell_i64(arr, idx_of(&index, "subscribersGained")),
      avg_view_duration_seconds: cell_i64(arr, idx_of(&index, "averageViewDuration")),
      estimated_minutes_watched: cell_i64(arr, idx_of(&index, "estimatedMinutesWatched")),
    });
  }

  out
}

fn parse_subscriber_video_rows(json: &Value) -> Vec<SubscriberVideoRow> {
  let index = header_index(json);
  let Some(idx_video) = idx_of(&index, "video") else {
    return vec![];
  };

  let rows = rows_of(json);
  let mut out = Vec::with_capacity(rows.len());

  for row in rows {
    let arr = match row.as_array() {
      Some(a) => a,
      None => continue,
    };

    let video_id = cell_str(arr, Some(idx_video));
    if video_id.is_empty() {
      continue;
    }

    out.push(SubscriberVideoRow {
      video_id,
      views: cell_i64(arr, idx_of(&index, "views")),
      engaged_views: cell_i64(arr, idx_of(&index, "engagedViews")),
      subscribers_gained: cell_i64(arr, idx_of(&index, "subscribersGained")),
      subscribers_lost: cell_i64(arr, idx_of(&index, "subscribersLost")),
      avg_view_percentage: cell_f64(arr, idx_of(&index, "averageViewPercentage")),
    });
  }

  out
}

fn parse_demographics_rows(json: &Value) -> Vec<DemographicsRow> {
  let index = header_index(json);
  let (Some(idx_age), Some(idx_gender)) = (idx_of(&index, "ageGroup"), idx_of(&index, "gender")) else {
    return vec![];
  };
  let idx_pct = idx_of(&index, "viewerPercentage");

  rows_of(json)
    .iter()
    .filter_map(|row| {
      let arr = row.as_array()?;
      let age_group = cell_str(arr, Some(idx_age));
      let gender = cell_str(arr, Some(idx_gender));
      if age_group.is_empty() {
        return None;
      }
      Some(DemographicsRow {
        age_group,
        gender,
        viewer_percentage: cell_f64(arr, idx_pct),
      })
    })
    .collect()
}

fn parse_dimension_views_rows(json: &Value, dimension: &str) -> Vec<(String, i64)> {
  let index = header_index(json);
  let Some(idx_dim) = idx_of(&index, dimension) else {
    return vec![];
  };
  let idx_views = idx_of(&index, "views");

  rows_of(json)
    .iter()
    .filter_map(|row| {
      let arr = row.as_array()?;
      let key = cell_str(arr, Some(idx_dim));
      if key.is_empty() {
        return None;
      }
      Some((key, cell_i64(arr, idx_views)))
    })
    .collect()
}

fn shorts_ratios_from_json(json: &Value) -> ShortsRatios {
  let index = header_index(json);
  let Some(idx_type) = idx_of(&index, "creatorContentType") else {
    return ShortsRatios::default();
  };
  let idx_views = idx_of(&index, "views");
  let idx_minutes = idx_of(&index, "estimatedMinutesWatched");

  let mut ratios = ShortsRatios::default();
  for row in rows_of(json) {
    let Some(arr) = row.as_array() else { continue };
    let views = cell_i64(arr, idx_views);
    let minutes = cell_i64(arr, idx_minutes);
    match cell_str(arr, Some(idx_type)).as_str() {
      "SHORTS" => {
        ratios.shorts_views += views;
        ratios.shorts_watch_minutes += minutes;
      }
      "VIDEO_ON_DEMAND" => {
        ratios.longform_views += views;
        ratios.longform_watch_minutes += minutes;
      }
      _ => {}
    }
  }
  ratios
}

async fn fetch_report_json_by_url(access_token: &str, url: &str) -> Result<Value, YoutubeAnalyticsError> {
  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| YoutubeAnalyticsError {
      status: None,
      message: e.to_string(),
    })?
    .https_or_http()
    .enable_http1()
    .build();

  let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let req = Request::builder()
    .method(Method::GET)
    .uri(url)
    .header(AUTHORIZATION, format!("Bearer {}", access_token))
    .header(ACCEPT, "application/json")
    .body(Empty::<Bytes>::new())
    .map_err(|e| YoutubeAnalyticsError {
      status: None,
      message: e.to_string(),
    })?;

  let resp = client
    .request(req)
    .await
    .map_err(|e| YoutubeAnalyticsError {
      status: None,
      message: e.to_string(),
    })?;

  let status = resp.status();
  let body_bytes = resp
    .into_body()
    .collect()
    .await
    .map_err(|e| YoutubeAnalyticsError {
      status: Some(status.as_u16()),
      message: e.to_string(),
    })?
    .to_bytes();

  if status != StatusCode::OK {
    let msg = String::from_utf8_lossy(&body_bytes).to_string();
    return Err(YoutubeAnalyticsError {
      status: Some(status.as_u16()),
      message: format!("{msg} (url: {url})"),
    });
  }

  serde_json::from_slice::<Value>(&body_bytes).map_err(|e| YoutubeAnalyticsError {
    status: Some(status.as_u16()),
    message: format!("invalid json response: {e}"),
  })
}

fn require_channel_id(channel_id: &str) -> Result<&str, YoutubeAnalyticsError> {
  let channel_id = channel_id.trim();
  if channel_id.is_empty() {
    return Err(YoutubeAnalyticsError {
      status: None,
      message: "missing channel_id".to_string(),
    });
  }
  Ok(channel_id)
}

pub async fn fetch_daily_metrics_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<ChannelDailyRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_daily_metrics_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(parse_daily_rows(&json))
}

pub async fn fetch_daily_metrics(
  access_token: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<ChannelDailyRow>, YoutubeAnalyticsError> {
  fetch_daily_metrics_with_base_url(access_token, ANALYTICS_BASE_URL, channel_id, start_dt, end_dt).await
}

pub async fn fetch_overview_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Option<ChannelOverview>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_overview_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(parse_overview(&json))
}

#[allow(clippy::too_many_arguments)]
pub async fn fetch_top_videos_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  sort: &str,
  limit: i64,
  filters: Option<&str>,
) -> Result<Vec<TopVideoRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_top_videos_url(base_url, channel_id, start_dt, end_dt, sort, limit, filters);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(parse_video_rows(&json))
}

/// maxResults=1 variant used by the "best performer" cards.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_single_top_video_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  sort: &str,
  filters: Option<&str>,
) -> Result<Option<TopVideoRow>, YoutubeAnalyticsError> {
  let rows =
    fetch_top_videos_with_base_url(access_token, base_url, channel_id, start_dt, end_dt, sort, 1, filters).await?;
  Ok(rows.into_iter().next())
}

pub async fn fetch_subscriber_videos_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  limit: i64,
  filters: Option<&str>,
) -> Result<Vec<SubscriberVideoRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_subscriber_videos_url(base_url, channel_id, start_dt, end_dt, limit, filters);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(parse_subscriber_video_rows(&json))
}

pub async fn fetch_demographics_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<DemographicsRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_demographics_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(parse_demographics_rows(&json))
}

pub async fn fetch_traffic_sources_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<Vec<TrafficSourceRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_traffic_sources_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(
    parse_dimension_views_rows(&json, "insightTrafficSourceType")
      .into_iter()
      .map(|(source_type, views)| TrafficSourceRow { source_type, views })
      .collect(),
  )
}

pub async fn fetch_top_countries_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
  limit: i64,
) -> Result<Vec<CountryRow>, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_top_countries_url(base_url, channel_id, start_dt, end_dt, limit);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(
    parse_dimension_views_rows(&json, "country")
      .into_iter()
      .map(|(country_code, views)| CountryRow { country_code, views })
      .collect(),
  )
}

pub async fn fetch_shorts_ratios_with_base_url(
  access_token: &str,
  base_url: &str,
  channel_id: &str,
  start_dt: NaiveDate,
  end_dt: NaiveDate,
) -> Result<ShortsRatios, YoutubeAnalyticsError> {
  let channel_id = require_channel_id(channel_id)?;
  let url = build_content_type_url(base_url, channel_id, start_dt, end_dt);
  let json = fetch_report_json_by_url(access_token, &url).await?;
  Ok(shorts_ratios_from_json(&json))
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn;
  use hyper::{Request, Response, StatusCode};
  use hyper_util::rt::TokioIo;
  use tokio::net::TcpListener;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  #[test]
  fn build_daily_metrics_url_includes_expected_params() {
    let url = build_daily_metrics_url(ANALYTICS_BASE_URL, "UC123", d(2026, 1, 1), d(2026, 1, 7));

    assert!(url.contains("/v2/reports?"));
    assert!(url.contains("ids=channel==UC123"));
    assert!(url.contains("startDate=2026-01-01"));
    assert!(url.contains("endDate=2026-01-07"));
    assert!(url.contains("metrics=views,subscribersGained,subscribersLost,likes,comments,shares,estimatedMinutesWatched,averageViewDuration"));
    assert!(url.contains("dimensions=day"));
    assert!(url.contains("sort=day"));
  }

  #[test]
  fn build_top_videos_url_supports_sort_and_shorts_filter() {
    let url = build_top_videos_url(
      ANALYTICS_BASE_URL,
      "UC123",
      d(2026, 1, 1),
      d(2026, 1, 7),
      "-views",
      10,
      Some(SHORTS_FILTER),
    );

    assert!(url.contains("dimensions=video"));
    assert!(url.contains("sort=-views"));
    assert!(url.contains("maxResults=10"));
    assert!(url.contains("filters=creatorContentType==SHORTS"));
  }

  #[test]
  fn build_demographics_url_uses_age_and_gender_dimensions() {
    let url = build_demographics_url(ANALYTICS_BASE_URL, "UC123", d(2026, 1, 1), d(2026, 1, 7));
    assert!(url.contains("metrics=viewerPercentage"));
    assert!(url.contains("dimensions=ageGroup,gender"));
  }

  #[test]
  fn build_overview_url_has_no_dimensions() {
    let url = build_overview_url(ANALYTICS_BASE_URL, "UC123", d(2026, 1, 1), d(2026, 1, 7));
    assert!(!url.contains("dimensions="));
    assert!(url.contains("metrics=views,estimatedMinutesWatched"));
  }

  #[test]
  fn parse_daily_rows_reads_by_header_name_and_clamps_negatives() {
    // Column order differs from the request on purpose; parsing must go by
    // header name, not position.
    let json: Value = serde_json::from_str(
      r#"
      {
        "columnHeaders": [
          {"name":"day","columnType":"DIMENSION","dataType":"STRING"},
          {"name":"subscribersGained","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"views","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"subscribersLost","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"likes","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"comments","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"shares","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"estimatedMinutesWatched","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"averageViewDuration","columnType":"METRIC","dataType":"INTEGER"}
        ],
        "rows": [
          ["2026-01-02", 5, 300, 1, 20, -3, 2, 900, 180],
          ["not-a-date", 1, 1, 0, 0, 0, 0, 0, 0],
          ["2026-01-03", 3, 200, 0, 10, 1, 0, 0, 120]
        ]
      }
      "#,
    )
    .unwrap();

    let rows = parse_daily_rows(&json);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].dt, d(2026, 1, 2));
    assert_eq!(rows[0].views, 300);
    assert_eq!(rows[0].subscribers_gained, 5);
    assert_eq!(rows[0].subscribers_lost, 1);
    assert_eq!(rows[0].comments, 0); // -3 clamped
    assert_eq!(rows[0].estimated_minutes_watched, 900);
    assert_eq!(rows[1].avg_view_duration_seconds, 120);
  }

  #[test]
  fn parse_video_rows_skips_rows_without_video_id() {
    let json: Value = serde_json::from_str(
      r#"
      {
        "columnHeaders": [
          {"name":"video","columnType":"DIMENSION","dataType":"STRING"},
          {"name":"views","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"engagedViews","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"subscribersGained","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"averageViewPercentage","columnType":"METRIC","dataType":"FLOAT"},
          {"name":"estimatedMinutesWatched","columnType":"METRIC","dataType":"INTEGER"}
        ],
        "rows": [
          ["vid1", 200, 150, 4, 55.5, 600],
          ["", 100, 80, 1, 10.0, 50]
        ]
      }
      "#,
    )
    .unwrap();

    let rows = parse_video_rows(&json);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].video_id, "vid1");
    assert_eq!(rows[0].engaged_views, 150);
    assert!((rows[0].avg_view_percentage - 55.5).abs() < 1e-9);
    assert_eq!(rows[0].estimated_minutes_watched, 600);
  }

  #[test]
  fn parse_demographics_rows_extracts_buckets() {
    let json: Value = serde_json::from_str(
      r#"
      {
        "columnHeaders": [
          {"name":"ageGroup","columnType":"DIMENSION","dataType":"STRING"},
          {"name":"gender","columnType":"DIMENSION","dataType":"STRING"},
          {"name":"viewerPercentage","columnType":"METRIC","dataType":"FLOAT"}
        ],
        "rows": [
          ["age18-24", "female", 12.5],
          ["age18-24", "male", 30.0]
        ]
      }
      "#,
    )
    .unwrap();

    let rows = parse_demographics_rows(&json);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].age_group, "age18-24");
    assert_eq!(rows[0].gender, "female");
    assert!((rows[1].viewer_percentage - 30.0).abs() < 1e-9);
  }

  #[test]
  fn shorts_ratios_split_by_content_type() {
    let json: Value = serde_json::from_str(
      r#"
      {
        "columnHeaders": [
          {"name":"creatorContentType","columnType":"DIMENSION","dataType":"STRING"},
          {"name":"views","columnType":"METRIC","dataType":"INTEGER"},
          {"name":"estimatedMinutesWatched","columnType":"METRIC","dataType":"INTEGER"}
        ],
        "rows": [
          ["SHORTS", 300, 60],
          ["VIDEO_ON_DEMAND", 700, 900],
          ["LIVE_STREAM", 50, 200]
        ]
      }
      "#,
    )
    .unwrap();

    let ratios = shorts_ratios_from_json(&json);
    assert_eq!(ratios.shorts_views, 300);
    assert_eq!(ratios.longform_views, 700);
    assert_eq!(ratios.shorts_watch_minutes, 60);
    assert_eq!(ratios.longform_watch_minutes, 900);
    assert!((ratios.shorts_view_share() - 30.0).abs() < 1e-9);
  }

  #[test]
  fn shorts_view_share_is_zero_without_views() {
    assert_eq!(ShortsRatios::default().shorts_view_share(), 0.0);
  }

  async fn serve_daily_report(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let io = TokioIo::new(stream);
    http1::Builder::new()
      .serve_connection(
        io,
        service_fn(|req: Request<Incoming>| async move {
          let auth = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
          if auth != "Bearer token123" {
            let body = r#"{ "error": { "code": 401, "message": "Invalid Credentials" } }"#;
            return Ok::<_, hyper::Error>(
              Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap(),
            );
          }

          let body = r#"
            {
              "columnHeaders": [
                {"name":"day","columnType":"DIMENSION","dataType":"STRING"},
                {"name":"views","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"subscribersGained","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"subscribersLost","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"likes","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"comments","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"shares","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"estimatedMinutesWatched","columnType":"METRIC","dataType":"INTEGER"},
                {"name":"averageViewDuration","columnType":"METRIC","dataType":"INTEGER"}
              ],
              "rows": [
                ["2026-01-01", 200, 3, 0, 10, 2, 1, 400, 120],
                ["2026-01-02", 300, 5, 1, 15, 3, 2, 600, 130]
              ]
            }
          "#;
          Ok::<_, hyper::Error>(
            Response::builder()
              .status(StatusCode::OK)
              .header("content-type", "application/json")
              .body(Full::new(Bytes::from(body)))
              .unwrap(),
          )
        }),
      )
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn fetches_daily_metrics_against_mock_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    let task = tokio::spawn(serve_daily_report(listener));

    let rows = fetch_daily_metrics_with_base_url("token123", &base_url, "UC123", d(2026, 1, 1), d(2026, 1, 2))
      .await
      .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].dt, d(2026, 1, 1));
    assert_eq!(rows[1].views, 300);
    assert_eq!(rows[1].subscribers_gained, 5);

    task.await.unwrap();
  }

  #[tokio::test]
  async fn daily_metrics_surface_unauthorized_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    let task = tokio::spawn(serve_daily_report(listener));

    let err = fetch_daily_metrics_with_base_url("expired", &base_url, "UC123", d(2026, 1, 1), d(2026, 1, 2))
      .await
      .unwrap_err();
    assert!(err.is_unauthorized());

    task.await.unwrap();
  }

  #[test]
  fn missing_channel_id_is_rejected() {
    let err = tokio::runtime::Runtime::new()
      .unwrap()
      .block_on(fetch_daily_metrics("token", "  ", d(2026, 1, 1), d(2026, 1, 2)))
      .unwrap_err();
    assert!(err.message.contains("missing channel_id"));
  }
}
