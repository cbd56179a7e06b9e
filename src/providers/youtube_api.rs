use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, AUTHORIZATION};
use hyper::{Method, Request, StatusCode};
use serde_json::Value;
use vercel_runtime::Error;

#[derive(Debug, Clone)]
pub struct YoutubeApiError {
  pub status: Option<u16>,
  pub message: String,
}

impl std::fmt::Display for YoutubeApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.status {
      Some(code) => write!(f, "YouTube Data API error (status {code}): {}", self.message),
      None => write!(f, "YouTube Data API error: {}", self.message),
    }
  }
}

impl std::error::Error for YoutubeApiError {}

impl YoutubeApiError {
  pub fn is_unauthorized(&self) -> bool {
    self.status == Some(401)
  }
}

/// Current cumulative channel totals plus the identity fields the dashboard
/// header shows. Doubles as the Token Guard's probe response.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
  pub channel_id: String,
  pub title: String,
  pub custom_url: Option<String>,
  pub thumbnail_url: Option<String>,
  pub subscriber_count: i64,
  pub view_count: i64,
  pub video_count: i64,
}

fn parse_count(statistics: &Value, key: &str) -> i64 {
  // The Data API reports statistics as decimal strings.
  statistics
    .get(key)
    .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_i64()))
    .unwrap_or(0)
    .max(0)
}

fn best_thumbnail_url(snippet: &Value) -> Option<String> {
  let thumbs = snippet.get("thumbnails")?;
  for key in ["medium", "default", "high"] {
    if let Some(url) = thumbs.get(key).and_then(|v| v.get("url")).and_then(|v| v.as_str()) {
      let url = url.trim();
      if !url.is_empty() {
        return Some(url.to_string());
      }
    }
  }
  None
}

fn parse_channel_snapshot(json: &Value) -> Result<ChannelSnapshot, YoutubeApiError> {
  let item = json
    .get("items")
    .and_then(|v| v.as_array())
    .and_then(|items| items.first())
    .ok_or_else(|| YoutubeApiError {
      status: Some(404),
      message: "no channel found for this token".to_string(),
    })?;

  let channel_id = item
    .get("id")
    .and_then(|v| v.as_str())
    .unwrap_or("")
    .to_string();
  if channel_id.is_empty() {
    return Err(YoutubeApiError {
      status: None,
      message: "channel item missing id".to_string(),
    });
  }

  let snippet = item.get("snippet").cloned().unwrap_or_else(|| serde_json::json!({}));
  let statistics = item.get("statistics").cloned().unwrap_or_else(|| serde_json::json!({}));

  Ok(ChannelSnapshot {
    channel_id,
    title: snippet
      .get("title")
      .and_then(|v| v.as_str())
      .unwrap_or("")
      .to_string(),
    custom_url: snippet
      .get("customUrl")
      .and_then(|v| v.as_str())
      .map(|v| v.to_string()),
    thumbnail_url: best_thumbnail_url(&snippet),
    subscriber_count: parse_count(&statistics, "subscriberCount"),
    view_count: parse_count(&statistics, "viewCount"),
    video_count: parse_count(&statistics, "videoCount"),
  })
}

pub async fn fetch_channel_snapshot_with_base_url(
  access_token: &str,
  base_url: &str,
) -> Result<ChannelSnapshot, YoutubeApiError> {
  let base = base_url.trim_end_matches('/');
  let url = format!("{base}/youtube/v3/channels?part=snippet,statistics&mine=true");

  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| YoutubeApiError {
      status: None,
      message: e.to_string(),
    })?
    .https_or_http()
    .enable_http1()
    .build();

  let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let req = Request::builder()
    .method(Method::GET)
    .uri(&url)
    .header(AUTHORIZATION, format!("Bearer {}", access_token))
    .header(ACCEPT, "application/json")
    .body(Empty::<Bytes>::new())
    .map_err(|e| YoutubeApiError {
      status: None,
      message: e.to_string(),
    })?;

  let resp = client.request(req).await.map_err(|e| YoutubeApiError {
    status: None,
    message: e.to_string(),
  })?;

  let status = resp.status();
  let body_bytes = resp
    .into_body()
    .collect()
    .await
    .map_err(|e| YoutubeApiError {
      status: Some(status.as_u16()),
      message: e.to_string(),
    })?
    .to_bytes();

  if status != StatusCode::OK {
    let msg = String::from_utf8_lossy(&body_bytes).to_string();
    return Err(YoutubeApiError {
      status: Some(status.as_u16()),
      message: msg,
    });
  }

  let json = serde_json::from_slice::<Value>(&body_bytes).map_err(|e| YoutubeApiError {
    status: Some(status.as_u16()),
    message: format!("invalid json response: {e}"),
  })?;

  parse_channel_snapshot(&json)
}

pub async fn fetch_channel_snapshot(access_token: &str) -> Result<ChannelSnapshot, YoutubeApiError> {
  fetch_channel_snapshot_with_base_url(access_token, "https://youtube.googleapis.com/").await
}

pub async fn fetch_my_channel_id_with_base_url(access_token: &str, base_url: &str) -> Result<String, Error> {
  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?
    .https_or_http()
    .enable_http1()
    .build();

  let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let mut hub = google_youtube3::YouTube::new(client, access_token.to_string());
  hub.base_url(base_url.to_string());
  hub.root_url(base_url.to_string());

  let (_, response) = hub
    .channels()
    .list(&vec!["id".into()])
    .mine(true)
    .doit()
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  let channel_id = response
    .items
    .unwrap_or_default()
    .into_iter()
    .find_map(|c| c.id)
    .ok_or_else(|| Box::new(std::io::Error::other("No channel_id found for this token")) as Error)?;

  Ok(channel_id)
}

pub async fn fetch_my_channel_id(access_token: &str) -> Result<String, Error> {
  fetch_my_channel_id_with_base_url(access_token, "https://youtube.googleapis.com/").await
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

  #[test]
  fn parse_channel_snapshot_reads_statistics_strings() {
    let json: Value = serde_json::from_str(
      r#"
      {
        "items": [{
          "id": "UC123",
          "snippet": {
            "title": "Synth Channel",
            "customUrl": "@synth",
            "thumbnails": {"medium": {"url": "https://img.example/m.jpg"}}
          },
          "statistics": {
            "subscriberCount": "1000",
            "viewCount": "50000",
            "videoCount": "42"
          }
        }]
      }
      "#,
    )
    .unwrap();

    let snap = parse_channel_snapshot(&json).unwrap();
    assert_eq!(snap.channel_id, "UC123");
    assert_eq!(snap.title, "Synth Channel");
    assert_eq!(snap.custom_url.as_deref(), Some("@synth"));
    assert_eq!(snap.thumbnail_url.as_deref(), Some("https://img.example/m.jpg"));
    assert_eq!(snap.subscriber_count, 1000);
    assert_eq!(snap.view_count, 50000);
    assert_eq!(snap.video_count, 42);
  }

  #[test]
  fn parse_channel_snapshot_rejects_empty_items() {
    let json: Value = serde_json::from_str(r#"{"items": []}"#).unwrap();
    let err = parse_channel_snapshot(&json).unwrap_err();
    assert_eq!(err.status, Some(404));
  }

  async fn serve_one(listener: TcpListener) {
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
            return Ok::<_, hyper::Error>(
              Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Full::new(Bytes::from_static(b"unauthorized")))
                .unwrap(),
            );
          }

          let body = r#"
            {
              "items": [{
                "id": "UC123",
                "snippet": {"title": "Synth Channel"},
                "statistics": {"subscriberCount": "1000", "viewCount": "50000", "videoCount": "7"}
              }]
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
  async fn fetches_snapshot_against_mock_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    let task = tokio::spawn(serve_one(listener));

    let snap = fetch_channel_snapshot_with_base_url("token123", &base_url).await.unwrap();
    assert_eq!(snap.channel_id, "UC123");
    assert_eq!(snap.subscriber_count, 1000);
    assert_eq!(snap.view_count, 50000);

    task.await.unwrap();
  }

  #[tokio::test]
  async fn snapshot_surfaces_unauthorized_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    let task = tokio::spawn(serve_one(listener));

    let err = fetch_channel_snapshot_with_base_url("wrong", &base_url).await.unwrap_err();
    assert!(err.is_unauthorized());

    task.await.unwrap();
  }

  #[tokio::test]
  async fn fetches_channel_id_via_sdk_against_mock_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    let task = tokio::spawn(serve_one(listener));

    let channel_id = fetch_my_channel_id_with_base_url("token123", &base_url).await.unwrap();
    assert_eq!(channel_id, "UC123");

    task.await.unwrap();
  }
}
