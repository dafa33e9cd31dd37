use serde::{Deserialize, Serialize};

/// 页面 -> worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// 后台拉取并缓存
    Prefetch {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        folder_position: Option<u32>,
    },
    /// 取消路径前缀下正在进行的拉取；`path_prefix` 是解码后的路径
    AbortLoads {
        path_prefix: String,
        #[serde(default)]
        keep_direct: bool,
    },
    /// 存活探测
    Ping,
}

/// worker -> 页面
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    /// worker 侧权威的进行中 key 列表
    Pong { pending_audio: Vec<String> },
    PrefetchCached(CachedItem),
    ActualCached(CachedItem),
    Skipped(CachedItem),
    Deleted(CachedItem),
    PrefetchError {
        cached_url: String,
        original_url: String,
        error: PrefetchFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedItem {
    pub cached_url: String,
    pub original_url: String,
}

impl CachedItem {
    pub fn new(cached_url: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            cached_url: cached_url.into(),
            original_url: original_url.into(),
        }
    }
}

/// 跨边界传递的失败描述，保留“是否为取消”的身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PrefetchFailure {
    pub fn is_abort(&self) -> bool {
        matches!(self.kind, FailureKind::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FailureKind {
    Aborted,
    Http { status: u16 },
    Network,
    /// 拉取成功但写入持久缓存失败
    Cache,
}
