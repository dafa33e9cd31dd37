//! 网络请求相关错误

use reqwest::StatusCode;

use crate::messages::{FailureKind, PrefetchFailure};

/// 单次 fetch 的错误类型
///
/// 取消（`Aborted`）不是故障，调用方需要用 [`FetchError::is_abort`] 区分后降级日志。
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// 取消令牌已触发
    #[error("请求已取消")]
    Aborted,

    /// 上游返回非 2xx
    #[error("HTTP 状态码 {status}: {url}")]
    Http { status: StatusCode, url: String },

    /// 网络层失败（连接、超时、读取 body）
    #[error("网络请求失败: {0}")]
    Network(String),

    /// URL 无法解析
    #[error("URL 无效: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_abort(&self) -> bool {
        matches!(self, FetchError::Aborted)
    }

    pub fn to_failure(&self) -> PrefetchFailure {
        let kind = match self {
            FetchError::Aborted => FailureKind::Aborted,
            FetchError::Http { status, .. } => FailureKind::Http {
                status: status.as_u16(),
            },
            FetchError::Network(_) | FetchError::InvalidUrl(_) => FailureKind::Network,
        };
        PrefetchFailure {
            kind,
            message: self.to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}
