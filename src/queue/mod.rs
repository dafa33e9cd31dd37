//! 页面侧预取队列控制器
//!
//! 维护本地优先级队列和“进行中”记录，限制并发，通过心跳与 worker 对账。

mod actor;
mod controller;
mod heartbeat;
mod item;
mod listeners;

pub use actor::{QueueCommand, QueueHandle, spawn_queue_controller};
pub use controller::QueueController;
pub use heartbeat::{Heartbeat, HeartbeatState};
pub use item::{PlaybackPosition, PrefetchRequest, QueueItem};
pub use listeners::{CacheListener, ListenerId, ListenerRegistry, SizeListener};

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// 同时交给 worker 的预取数
    pub max_parallel_loads: usize,
    /// 本地队列硬上限，满了直接拒绝
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    /// 连续多少次“空闲 Pong”后停止轮询
    pub idle_pongs_before_stop: u32,
    /// 与 worker 一致的音频命名空间
    pub audio_cache_name: String,
    pub path_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_parallel_loads: env::var("AUDIOCACHE_MAX_PARALLEL_LOADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(2),
            queue_capacity: 4096,
            ping_interval: Duration::from_secs(10),
            idle_pongs_before_stop: 3,
            audio_cache_name: "audio".to_owned(),
            path_prefix: "/".to_owned(),
        }
    }
}
