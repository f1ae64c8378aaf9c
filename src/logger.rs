use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;

const LOG_DIR: &str = "logs";

static LOG_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

pub fn init_logger(cfg: &Config) -> Result<(), String> {
    let log_dir = PathBuf::from(LOG_DIR);
    fs::create_dir_all(&log_dir).map_err(|e| format!("create log dir failed: {e}"))?;

    let removed = cleanup_old_logs(&log_dir, &cfg.log_max_files);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));

    let (server_writer, server_guard) =
        tracing_appender::non_blocking(rolling::daily(&log_dir, "server.log"));
    let (error_writer, error_guard) =
        tracing_appender::non_blocking(rolling::daily(&log_dir, "error.log"));

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stdout);

    let server_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_current_span(true)
        .with_writer(server_writer);

    let error_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(error_writer)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(server_layer)
        .with(error_layer)
        .try_init()
        .map_err(|e| format!("install tracing subscriber failed: {e}"))?;

    let _ = LOG_GUARDS.set(vec![server_guard, error_guard]);
    install_panic_hook();

    if removed > 0 {
        tracing::info!("[LOG] removed {} expired log file(s)", removed);
    }
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic occurred".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %payload, location = %location, backtrace = %backtrace, "[PANIC] thread panicked");
    }));
}

/// Removes files in `log_dir` whose mtime is older than the retention window.
/// Returns how many were removed.
fn cleanup_old_logs(log_dir: &Path, max_files: &str) -> usize {
    let keep_days = parse_keep_days(max_files);
    if keep_days == 0 {
        return 0;
    }
    let Some(cutoff) = SystemTime::now().checked_sub(Duration::from_secs(keep_days * 24 * 3600)) else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| modified < cutoff)
                .unwrap_or(false)
        })
        .filter(|entry| fs::remove_file(entry.path()).is_ok())
        .count()
}

fn parse_keep_days(value: &str) -> u64 {
    let raw = value.trim().to_lowercase();
    raw.strip_suffix('d').unwrap_or(&raw).trim().parse::<u64>().unwrap_or(0)
}
