use http_body_util::BodyExt;
use hyper::StatusCode;
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use synqlo_rust::analytics::{get_account_analytics, SUPPORTED_PLATFORM};
use synqlo_rust::db::{get_pool, update_account_stats, upsert_account};
use synqlo_rust::providers::youtube::{exchange_code_for_tokens, youtube_oauth_client_from_env};
use synqlo_rust::providers::youtube_api::{fetch_channel_snapshot, fetch_my_channel_id};

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

#[derive(Deserialize)]
struct ExchangeRequest {
  user_id: i64,
  code: String,
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  if req.method() != "POST" {
    return json_response(
      StatusCode::METHOD_NOT_ALLOWED,
      serde_json::json!({"ok": false, "error": "method_not_allowed"}),
    );
  }

  let expected = std::env::var("RUST_INTERNAL_TOKEN").unwrap_or_default();
  let provided = bearer_token(
    req
      .headers()
      .get("authorization")
      .and_then(|v| v.to_str().ok()),
  )
  .unwrap_or("");

  if expected.is_empty() || provided != expected {
    return json_response(
      StatusCode::UNAUTHORIZED,
      serde_json::json!({"ok": false, "error": "unauthorized"}),
    );
  }

  let has_tidb_url = std::env::var("TIDB_DATABASE_URL")
    .or_else(|_| std::env::var("DATABASE_URL"))
    .map(|v| !v.is_empty())
    .unwrap_or(false);
  if !has_tidb_url {
    return json_response(
      StatusCode::NOT_IMPLEMENTED,
      serde_json::json!({"ok": false, "error": "not_configured", "message": "Missing TIDB_DATABASE_URL (or DATABASE_URL)"}),
    );
  }

  let bytes = req.into_body().collect().await?.to_bytes();
  let parsed: ExchangeRequest = serde_json::from_slice(&bytes).map_err(|e| -> Error {
    Box::new(std::io::Error::other(format!("invalid json body: {e}")))
  })?;

  if parsed.user_id <= 0 || parsed.code.is_empty() {
    return json_response(
      StatusCode::BAD_REQUEST,
      serde_json::json!({"ok": false, "error": "bad_request", "message": "user_id and code are required"}),
    );
  }

  let (client, _redirect) = youtube_oauth_client_from_env()?;
  let tokens = exchange_code_for_tokens(&client, &parsed.code).await?;
  let channel_id = fetch_my_channel_id(&tokens.access_token).await?;
  let snapshot = fetch_channel_snapshot(&tokens.access_token)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  let username = snapshot
    .custom_url
    .clone()
    .filter(|handle| !handle.is_empty())
    .unwrap_or_else(|| snapshot.title.clone());

  let pool = get_pool().await?;
  let account_id = upsert_account(
    pool,
    parsed.user_id,
    SUPPORTED_PLATFORM,
    &channel_id,
    &username,
    &tokens.access_token,
    tokens.refresh_token.as_deref(),
  )
  .await?;

  // Warm the history cache right after connect so the first dashboard render
  // has a full series to chart.
  let history = get_account_analytics(pool, account_id, 30, true).await;
  if let Some(latest) = history.last() {
    update_account_stats(
      pool,
      account_id,
      latest.followers,
      latest.views,
      latest.engagement_rate,
      snapshot.video_count,
    )
    .await?;
  }

  json_response(
    StatusCode::OK,
    serde_json::json!({
      "ok": true,
      "account_id": account_id,
      "channel_id": channel_id,
      "username": username,
      "history_days": history.len(),
    }),
  )
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  run(service_fn(handler)).await
}
