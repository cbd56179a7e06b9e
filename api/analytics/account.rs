use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use synqlo_rust::analytics::{get_account_analytics, DayStat};
use synqlo_rust::db::get_pool;

fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

fn has_tidb_url() -> bool {
  std::env::var("TIDB_DATABASE_URL")
    .or_else(|_| std::env::var("DATABASE_URL"))
    .map(|v| !v.is_empty())
    .unwrap_or(false)
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
  let q = query?;
  for pair in q.split('&') {
    let mut it = pair.splitn(2, '=');
    let k = it.next().unwrap_or("");
    let v = it.next().unwrap_or("");
    if k == key {
      return Some(v.replace('+', " "));
    }
  }
  None
}

fn day_stat_json(stat: &DayStat) -> serde_json::Value {
  serde_json::json!({
    "date": stat.date.to_string(),
    "views": stat.views,
    "dailyViews": stat.daily_views,
    "followers": stat.followers,
    "followersGained": stat.followers_gained,
    "likes": stat.likes,
    "comments": stat.comments,
    "shares": stat.shares,
    "interactions": stat.interactions,
    "engagementRate": stat.engagement_rate,
    "watchTimeHours": stat.watch_time_hours,
  })
}

async fn handle_account(method: &Method, headers: &HeaderMap, uri: &hyper::Uri) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let expected = std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default();
  let provided = bearer_token(headers.get("authorization").and_then(|v| v.to_str().ok())).unwrap_or("");

  if expected.is_empty() || provided != expected {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  if !has_tidb_url() {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let account_id = query_param(uri.query(), "account_id")
    .and_then(|v| v.parse::<i64>().ok())
    .unwrap_or(0);
  if account_id <= 0 {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "account_id is required"}),
    );
  }

  let days = query_param(uri.query(), "days")
    .and_then(|v| v.parse::<i64>().ok())
    .unwrap_or(30)
    .clamp(1, 365);

  let force_refresh = query_param(uri.query(), "force")
    .map(|v| v == "1" || v == "true")
    .unwrap_or(false);

  let pool = get_pool().await?;
  let history = get_account_analytics(pool, account_id, days, force_refresh).await;

  // An empty series means "no data available", never an error.
  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "days": days,
      "history": history.iter().map(day_stat_json).collect::<Vec<_>>(),
    }),
  )
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let _bytes = req.into_body().collect().await?.to_bytes();
  handle_account(&method, &headers, &uri).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_param_extracts_values() {
    assert_eq!(
      query_param(Some("account_id=5&days=7"), "days").as_deref(),
      Some("7")
    );
    assert_eq!(query_param(Some("account_id=5"), "days"), None);
  }

  #[test]
  fn day_stat_json_uses_iso_date() {
    let stat = DayStat {
      date: chrono::NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
      views: 50000,
      daily_views: 300,
      followers: 1000,
      followers_gained: 4,
      likes: 15,
      comments: 3,
      shares: 2,
      interactions: 20,
      engagement_rate: 6.67,
      watch_time_hours: 10.0,
    };
    let value = day_stat_json(&stat);
    assert_eq!(value["date"], "2026-01-02");
    assert_eq!(value["followersGained"], 4);
  }

  #[tokio::test]
  async fn returns_unauthorized_when_missing_internal_token() {
    std::env::set_var("RUST_INTERNAL_TOKEN", "secret");

    let headers = HeaderMap::new();
    let uri: hyper::Uri = "/api/analytics/account?account_id=1&days=7".parse().unwrap();
    let response = handle_account(&Method::GET, &headers, &uri).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }
}
