#[tokio::main]
async fn main() {
  match wellness_insight_lib::run().await {
    Ok(summary) => {
      println!(
        "Re-analyzed {} user(s), {} failed",
        summary.succeeded.len(),
        summary.failed.len()
      );
      for (user_id, error) in &summary.failed {
        eprintln!("  user {}: {}", user_id, error);
      }
    }
    Err(e) => {
      eprintln!("wellness-insight failed: {}", e);
      std::process::exit(1);
    }
  }
}
