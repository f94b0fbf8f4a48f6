//! Logging Infrastructure
//!
//! - Console output (pretty for development, JSON for production)
//! - Daily rotating application logs (deleted after 14 days)
//! - Permanent audit logs for stock movements and order transitions (never deleted)

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const APP_LOG_RETENTION_DAYS: i64 = 14;

/// Clean up old application log files (older than 14 days)
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<()> {
    use chrono::{Local, TimeZone};

    let cutoff = Local::now() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);

    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        // app.YYYY-MM-DD
        if let Some(date_part) = name.strip_prefix("app.")
            && let Ok(naive_date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            && let Some(midnight) = naive_date.and_hms_opt(0, 0, 0)
            && let Some(local_datetime) = Local.from_local_datetime(&midnight).single()
            && local_datetime < cutoff
        {
            fs::remove_file(&path)?;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(())
}

fn file_layer(dir: PathBuf, prefix: &str, json: bool, audit: bool) -> BoxedLayer {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);
    let target_filter = tracing_subscriber::filter::filter_fn(move |meta| {
        (meta.target() == "audit") == audit
    });

    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::sync::Mutex::new(appender))
            .with_filter(target_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(appender))
            .with_filter(target_filter)
            .boxed()
    }
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn"); `RUST_LOG` wins when set
/// * `json_format` - Whether to use JSON format
/// * `log_dir` - Optional directory for file logging (e.g., Some("./work_dir/logs"))
///
/// Must be called inside a tokio runtime when `log_dir` is set (spawns the
/// hourly cleanup task).
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer: BoxedLayer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let mut layers = vec![console_layer];

    if let Some(log_dir) = log_dir {
        let app_log_dir = log_dir.join("app");
        let audit_log_dir = log_dir.join("audit");
        fs::create_dir_all(&app_log_dir)?;
        fs::create_dir_all(&audit_log_dir)?;

        layers.push(file_layer(app_log_dir, "app", json_format, false));
        layers.push(file_layer(audit_log_dir, "audit", json_format, true));

        tokio::spawn(periodic_cleanup(log_dir.to_path_buf()));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Initialize the logging system (console only)
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    init_logger_with_file(level, json_format, None)
}

/// Periodic cleanup task - runs every hour to clean old logs
async fn periodic_cleanup(log_dir: PathBuf) {
    use tokio::time::{Duration, sleep};

    loop {
        sleep(Duration::from_secs(3600)).await;

        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}

/// Audit log helper - records stock movements and order transitions
///
/// ```ignore
/// audit_log!("operator-7", "scrap", "inventory:42", "damaged packaging");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($actor:expr, $action:expr, $resource:expr) => {
        tracing::info!(
            target: "audit",
            actor = %$actor,
            action = %$action,
            resource = %$resource,
            timestamp = chrono::Local::now().to_rfc3339(),
            "AUDIT"
        );
    };
    ($actor:expr, $action:expr, $resource:expr, $details:expr) => {
        tracing::info!(
            target: "audit",
            actor = %$actor,
            action = %$action,
            resource = %$resource,
            details = %$details,
            timestamp = chrono::Local::now().to_rfc3339(),
            "AUDIT"
        );
    };
}
