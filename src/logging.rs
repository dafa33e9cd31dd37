use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 持有到进程退出，drop 时刷新缓冲的日志
pub struct LogGuard(#[allow(dead_code)] Option<WorkerGuard>);

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// `--log-dir`；缺省为 `<data_dir>/logs`
    pub dir: Option<PathBuf>,
    pub filter: Option<String>,
}

pub const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";
const LOG_FILE: &str = "audiocache.log";
const FALLBACK_DIR: &str = "audiocache-logs";

/// 日志目录不可用时的记录，订阅者装好之后再报告
struct DirFallback {
    wanted: PathBuf,
    err: io::Error,
}

fn resolve_log_dir(data_dir: &Path, dir: Option<PathBuf>) -> (PathBuf, Option<DirFallback>) {
    let wanted = dir.unwrap_or_else(|| data_dir.join("logs"));
    match fs::create_dir_all(&wanted) {
        Ok(()) => (wanted, None),
        Err(err) => {
            let fallback = std::env::temp_dir().join(FALLBACK_DIR);
            let _ = fs::create_dir_all(&fallback);
            (fallback, Some(DirFallback { wanted, err }))
        }
    }
}

/// 过滤器非法时退回默认值并返回错误文本
fn build_filter(filter: Option<String>) -> (EnvFilter, Option<String>) {
    match filter {
        Some(s) if !s.trim().is_empty() => match EnvFilter::try_new(&s) {
            Ok(f) => (f, None),
            Err(e) => (EnvFilter::new(DEFAULT_FILTER), Some(format!("{s}: {e}"))),
        },
        _ => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
            None,
        ),
    }
}

pub fn init(data_dir: &Path, cfg: LogConfig) -> LogGuard {
    let (log_dir, fallback) = resolve_log_dir(data_dir, cfg.dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let (filter, bad_filter) = build_filter(cfg.filter);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init();

    if let Some(DirFallback { wanted, err }) = fallback {
        tracing::warn!(
            wanted = %wanted.display(),
            err = %err,
            "日志目录不可用，改写到临时目录"
        );
    }
    if let Some(bad) = bad_filter {
        tracing::warn!(filter = %bad, "日志过滤器无效，使用默认值");
    }
    tracing::info!(log_dir = %log_dir.display(), "tracing 已初始化");

    LogGuard(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_defaults_under_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let (dir, fallback) = resolve_log_dir(tmp.path(), None);
        assert_eq!(dir, tmp.path().join("logs"));
        assert!(dir.is_dir());
        assert!(fallback.is_none());
    }

    #[test]
    fn test_unusable_log_dir_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        let (dir, fallback) = resolve_log_dir(tmp.path(), Some(file.join("logs")));
        assert_eq!(dir, std::env::temp_dir().join(FALLBACK_DIR));
        assert_eq!(fallback.unwrap().wanted, file.join("logs"));
    }

    #[test]
    fn test_bad_filter_reported() {
        let (_, bad) = build_filter(Some("info,audiocache=loud".to_owned()));
        assert!(bad.is_some());
        let (_, ok) = build_filter(Some("debug,reqwest=warn".to_owned()));
        assert!(ok.is_none());
    }
}
