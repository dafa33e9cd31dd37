use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SettingsError;
use crate::net::HttpConfig;
use crate::queue::QueueConfig;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    // 命名空间
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default = "default_audio_cache_name")]
    pub audio_cache_name: String,
    #[serde(default = "default_cache_limit")]
    pub audio_cache_limit: usize,
    #[serde(default = "default_cache_limit")]
    pub api_cache_limit: usize,
    /// 设置后 API 走带时效的缓存优先
    #[serde(default)]
    pub api_cache_max_age_secs: Option<u64>,

    // 预取队列
    #[serde(default = "default_max_parallel_loads")]
    pub max_parallel_loads: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    // 网络
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_http_connect_timeout_secs")]
    pub http_connect_timeout_secs: u64,
    #[serde(default)]
    pub cookie: Option<String>,

    #[serde(default)]
    pub development: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            audio_cache_name: default_audio_cache_name(),
            audio_cache_limit: default_cache_limit(),
            api_cache_limit: default_cache_limit(),
            api_cache_max_age_secs: None,

            max_parallel_loads: default_max_parallel_loads(),
            queue_capacity: default_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),

            http_timeout_secs: default_http_timeout_secs(),
            http_connect_timeout_secs: default_http_connect_timeout_secs(),
            cookie: None,

            development: false,
        }
    }
}

// 默认值函数（用于 serde default）
fn default_path_prefix() -> String { "/".to_owned() }
fn default_audio_cache_name() -> String { "audio".to_owned() }
fn default_cache_limit() -> usize { 1000 }
fn default_max_parallel_loads() -> usize { 2 }
fn default_queue_capacity() -> usize { 4096 }
fn default_ping_interval_secs() -> u64 { 10 }
fn default_http_timeout_secs() -> u64 { 30 }
fn default_http_connect_timeout_secs() -> u64 { 10 }

impl AppSettings {
    /// 以环境变量默认值为底，覆盖设置文件里的值
    pub fn worker_config(&self) -> WorkerConfig {
        let base = WorkerConfig::default();
        WorkerConfig {
            path_prefix: self.path_prefix.clone(),
            audio_cache_name: self.audio_cache_name.clone(),
            audio_cache_limit: self.audio_cache_limit.max(1),
            api_cache_limit: self.api_cache_limit.max(1),
            api_cache_max_age: self
                .api_cache_max_age_secs
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .or(base.api_cache_max_age),
            development: self.development,
            ..base
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_parallel_loads: self.max_parallel_loads.max(1),
            queue_capacity: self.queue_capacity.max(1),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            audio_cache_name: self.audio_cache_name.clone(),
            path_prefix: self.path_prefix.clone(),
            ..QueueConfig::default()
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        let base = HttpConfig::default();
        HttpConfig {
            timeout_secs: self.http_timeout_secs,
            connect_timeout_secs: self.http_connect_timeout_secs,
            cookie: self.cookie.clone().or(base.cookie),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.path_prefix.starts_with('/') || !self.path_prefix.ends_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "path_prefix 必须以 / 开头和结尾: {}",
                self.path_prefix
            )));
        }
        if self.audio_cache_name.is_empty() {
            return Err(SettingsError::InvalidValue("audio_cache_name 不能为空".to_owned()));
        }
        Ok(())
    }
}

/// 系统的本地数据目录，取不到时退回临时目录
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "audiocache", "audiocache")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("audiocache"))
}

pub fn load_settings(data_dir: &Path) -> AppSettings {
    let p = settings_path(data_dir);
    let Ok(bytes) = fs::read(&p) else {
        return AppSettings::default();
    };
    match serde_json::from_slice::<AppSettings>(&bytes) {
        Ok(s) if s.validate().is_ok() => s,
        _ => {
            tracing::warn!(path = %p.display(), "设置文件无效，使用默认设置");
            AppSettings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, s: &AppSettings) -> Result<(), SettingsError> {
    s.validate()?;
    fs::create_dir_all(data_dir).map_err(|source| SettingsError::Save { source })?;
    let p = settings_path(data_dir);
    let tmp = p.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(s).map_err(|source| SettingsError::Parse { source })?;
    fs::write(&tmp, bytes).map_err(|source| SettingsError::Save { source })?;
    if let Err(e) = fs::rename(&tmp, &p) {
        let _ = fs::remove_file(&p);
        fs::rename(&tmp, &p).map_err(|_| SettingsError::Save { source: e })?;
    }
    Ok(())
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}
