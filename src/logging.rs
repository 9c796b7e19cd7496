use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

pub const DEFAULT_LOG_DIRECTIVES: &str = "info,wellness::insight=debug";

/// Install the global subscriber once; later calls are no-ops
///
/// `RUST_LOG` overrides the default directives.
pub fn init_logging() {
  LOGGER_INIT.get_or_init(|| {
    let env_filter = EnvFilter::try_from_default_env()
      .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))
      .unwrap_or_else(|_| EnvFilter::new("info"));

    // Another subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().with_target(true))
      .try_init();
  });
}
