use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Initializes the logging and tracing system.
///
/// Supports two modes based on the `APP_ENV` environment variable:
/// - `development` (default): Pretty-printed, colored logs for console.
/// - `production`: JSON-formatted logs for aggregation.
///
/// When `log_dir` is given, a daily-rolling JSON file is written there as well.
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_logging(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("clear_urls_service=info,tower_http=info,axum=info"));

    let env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "clear-urls-service.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = if env == "production" {
        fmt::layer().json().with_thread_ids(true).with_target(true).boxed()
    } else {
        fmt::layer().pretty().with_thread_ids(true).with_target(true).boxed()
    };

    Registry::default()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(env = %env, file_logging = guard.is_some(), "Logging system initialized");
    guard
}

/// Debugging utility for tracking execution time of a block/future.
pub struct Timer {
    label: &'static str,
    start: std::time::Instant,
}

impl Timer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        tracing::debug!(
            label = %self.label,
            duration_ms = %duration.as_millis(),
            "Operation completed"
        );
    }
}
