use vercel_runtime::Error;

use synqlo_rust::analytics::{get_account_analytics, refresh_account_stats};
use synqlo_rust::db::get_pool;

fn validate_database_url() -> Result<(), Error> {
  let url = std::env::var("TIDB_DATABASE_URL")
    .or_else(|_| std::env::var("DATABASE_URL"))
    .unwrap_or_default();
  let trimmed = url.trim();
  if trimmed.is_empty() {
    return Err(Box::new(std::io::Error::other(
      "Missing TIDB_DATABASE_URL (or DATABASE_URL)",
    )) as Error);
  }
  if !trimmed.contains("://") {
    return Err(Box::new(std::io::Error::other(
      "Invalid TIDB_DATABASE_URL/DATABASE_URL (expected URL scheme like mysql://...)",
    )) as Error);
  }
  Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  validate_database_url()?;
  let args: Vec<String> = std::env::args().collect();

  let account_id = parse_flag_value(&args, "--account-id")
    .or_else(|| parse_flag_value(&args, "--account"))
    .and_then(|v| v.parse::<i64>().ok())
    .unwrap_or(0);
  if account_id <= 0 {
    eprintln!("Missing required --account-id");
    eprintln!("Example: cargo run --bin local_refresh_once -- --account-id 42 --days 30");
    return Ok(());
  }

  let days = parse_flag_value(&args, "--days")
    .and_then(|v| v.parse::<i64>().ok())
    .unwrap_or(30)
    .clamp(1, 365);
  let force = args.iter().any(|a| a == "--force");
  let with_stats = args.iter().any(|a| a == "--stats");

  let pool = get_pool().await?;

  let history = get_account_analytics(pool, account_id, days, force).await;
  if history.is_empty() {
    println!("ok=true rows=0 (no data; check connection and token)");
    return Ok(());
  }

  let first = history.first().unwrap();
  let last = history.last().unwrap();
  println!(
    "ok=true rows={} window={}..{} latest_followers={} latest_views={}",
    history.len(),
    first.date,
    last.date,
    last.followers,
    last.views
  );

  if with_stats {
    let stats = refresh_account_stats(pool, account_id).await?;
    println!(
      "stats_updated followers={} views={} engagement_rate={:.2} total_posts={}",
      stats.followers, stats.views, stats.engagement_rate, stats.total_posts
    );
  }

  Ok(())
}
