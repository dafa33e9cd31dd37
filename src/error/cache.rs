//! 持久缓存相关错误

/// 缓存操作错误类型
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 缓存目录不可用
    #[error("缓存目录不可用: {0}")]
    DirUnavailable(String),

    /// 命名空间名称非法（为空或包含路径分隔符）
    #[error("缓存命名空间名称非法: {0:?}")]
    InvalidName(String),

    /// 索引中有记录但负载文件丢失
    #[error("缓存负载丢失: {key}")]
    MissingPayload { key: String },

    /// 响应头无法持久化/还原
    #[error("响应头无效: {0}")]
    BadHeader(String),

    /// 文件操作失败
    #[error("文件操作失败: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化失败
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::DirUnavailable("/nope".to_owned());
        assert!(err.to_string().contains("/nope"));
    }

    #[test]
    fn test_missing_payload_error() {
        let err = CacheError::MissingPayload {
            key: "http://h/1/audio/a.mp3".to_owned(),
        };
        assert!(err.to_string().contains("a.mp3"));
    }
}
