use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, AUTHORIZATION};
use hyper::{Method, Request, StatusCode};
use serde_json::Value;
use std::collections::HashMap;

pub const DATA_API_BASE_URL: &str = "https://youtube.googleapis.com/";

// The Data API caps the `id` parameter at 50 ids per call.
const MAX_IDS_PER_REQUEST: usize = 50;

#[derive(Debug, Clone)]
pub struct YoutubeVideoError {
  pub status: Option<u16>,
  pub message: String,
}

impl std::fmt::Display for YoutubeVideoError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.status {
      Some(code) => write!(f, "youtube video error (status={}): {}", code, self.message),
      None => write!(f, "youtube video error: {}", self.message),
    }
  }
}

impl std::error::Error for YoutubeVideoError {}

#[derive(Debug, Clone)]
pub struct VideoDetails {
  pub title: String,
  pub thumbnail_url: Option<String>,
}

fn best_thumbnail_url(snippet: &Value) -> Option<String> {
  let thumbs = snippet.get("thumbnails")?;
  for key in ["maxres", "standard", "high", "medium", "default"] {
    if let Some(url) = thumbs.get(key).and_then(|v| v.get("url")).and_then(|v| v.as_str()) {
      let url = url.trim();
      if !url.is_empty() {
        return Some(url.to_string());
      }
    }
  }
  None
}

fn parse_video_details(json: &Value) -> HashMap<String, VideoDetails> {
  let items = json
    .get("items")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default();

  let mut out = HashMap::with_capacity(items.len());
  for item in items {
    let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
      continue;
    };
    let snippet = item.get("snippet").cloned().unwrap_or_else(|| serde_json::json!({}));
    let title = snippet
      .get("title")
      .and_then(|v| v.as_str())
      .unwrap_or("")
      .to_string();

    out.insert(
      id.to_string(),
      VideoDetails {
        title,
        thumbnail_url: best_thumbnail_url(&snippet),
      },
    );
  }
  out
}

async fn fetch_json(access_token: &str, url: &str) -> Result<Value, YoutubeVideoError> {
  let connector = hyper_rustls::HttpsConnectorBuilder::new()
    .with_native_roots()
    .map_err(|e| YoutubeVideoError {
      status: None,
      message: e.to_string(),
    })?
    .https_or_http()
    .enable_http1()
    .build();

  let client =
    hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector);

  let req = Request::builder()
    .method(Method::GET)
    .uri(url)
    .header(AUTHORIZATION, format!("Bearer {}", access_token))
    .header(ACCEPT, "application/json")
    .body(Empty::<Bytes>::new())
    .map_err(|e| YoutubeVideoError {
      status: None,
      message: e.to_string(),
    })?;

  let resp = client.request(req).await.map_err(|e| YoutubeVideoError {
    status: None,
    message: e.to_string(),
  })?;

  let status = resp.status();
  let body_bytes = resp
    .into_body()
    .collect()
    .await
    .map_err(|e| YoutubeVideoError {
      status: Some(status.as_u16()),
      message: e.to_string(),
    })?
    .to_bytes();

  if status != StatusCode::OK {
    let msg = String::from_utf8_lossy(&body_bytes).to_string();
    return Err(YoutubeVideoError {
      status: Some(status.as_u16()),
      message: msg,
    });
  }

  serde_json::from_slice::<Value>(&body_bytes).map_err(|e| YoutubeVideoError {
    status: Some(status.as_u16()),
    message: format!("invalid json response: {e}"),
  })
}

/// Resolve titles/thumbnails for a set of video ids in as few batched calls as
/// the API allows. Unknown ids are simply absent from the result map.
pub async fn fetch_video_details_with_base_url(
  access_token: &str,
  base_url: &str,
  video_ids: &[String],
) -> Result<HashMap<String, VideoDetails>, YoutubeVideoError> {
  let base = base_url.trim_end_matches('/');
  let mut out = HashMap::with_capacity(video_ids.len());

  for chunk in video_ids.chunks(MAX_IDS_PER_REQUEST) {
    let ids: Vec<&str> = chunk
      .iter()
      .map(|id| id.trim())
      .filter(|id| !id.is_empty())
      .collect();
    if ids.is_empty() {
      continue;
    }

    let url = format!("{base}/youtube/v3/videos?part=snippet&id={}", ids.join(","));
    let json = fetch_json(access_token, &url).await?;
    out.extend(parse_video_details(&json));
  }

  Ok(out)
}

pub async fn fetch_video_details(
  access_token: &str,
  video_ids: &[String],
) -> Result<HashMap<String, VideoDetails>, YoutubeVideoError> {
  fetch_video_details_with_base_url(access_token, DATA_API_BASE_URL, video_ids).await
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
  fn best_thumbnail_prefers_maxres_then_falls_back() {
    let snippet: Value = serde_json::from_str(
      r#"
      {
        "thumbnails": {
          "default": {"url": "https://img.example/d.jpg"},
          "high": {"url": "https://img.example/h.jpg"}
        }
      }
      "#,
    )
    .unwrap();
    assert_eq!(best_thumbnail_url(&snippet).as_deref(), Some("https://img.example/h.jpg"));
  }

  #[test]
  fn parse_video_details_maps_by_id() {
    let json: Value = serde_json::from_str(
      r#"
      {
        "items": [
          {"id": "vid1", "snippet": {"title": "First", "thumbnails": {"maxres": {"url": "https://img.example/1.jpg"}}}},
          {"id": "vid2", "snippet": {"title": "Second"}},
          {"snippet": {"title": "no id, skipped"}}
        ]
      }
      "#,
    )
    .unwrap();

    let details = parse_video_details(&json);
    assert_eq!(details.len(), 2);
    assert_eq!(details["vid1"].title, "First");
    assert_eq!(details["vid1"].thumbnail_url.as_deref(), Some("https://img.example/1.jpg"));
    assert!(details["vid2"].thumbnail_url.is_none());
  }

  async fn serve_details(listener: TcpListener, max_connections: usize) {
    for _ in 0..max_connections {
      let (stream, _) = listener.accept().await.unwrap();
      let io = TokioIo::new(stream);
      http1::Builder::new()
        .serve_connection(
          io,
          service_fn(|req: Request<Incoming>| async move {
            let query = req.uri().query().unwrap_or("");
            let ids = query
              .split('&')
              .find_map(|pair| pair.strip_prefix("id="))
              .unwrap_or("");

            let items: Vec<Value> = ids
              .split(',')
              .filter(|id| !id.is_empty())
              .map(|id| {
                serde_json::json!({
                  "id": id,
                  "snippet": {"title": format!("Title {id}")}
                })
              })
              .collect();

            let body = serde_json::json!({"items": items}).to_string();
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
  }

  #[tokio::test]
  async fn batches_requests_over_the_fifty_id_limit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/", addr);

    // 60 ids means two chunked calls.
    let task = tokio::spawn(serve_details(listener, 2));

    let ids: Vec<String> = (0..60).map(|i| format!("vid{i}")).collect();
    let details = fetch_video_details_with_base_url("token123", &base_url, &ids)
      .await
      .unwrap();

    assert_eq!(details.len(), 60);
    assert_eq!(details["vid0"].title, "Title vid0");
    assert_eq!(details["vid59"].title, "Title vid59");

    task.await.unwrap();
  }
}
