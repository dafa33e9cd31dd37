//! 统一错误处理模块
//!
//! 每个关注点一个结构化错误类型，跨上下文边界时再降级为可序列化的 `PrefetchFailure`。

mod app;
mod cache;
mod fetch;

pub use app::{AppError, SettingsError};
pub use cache::CacheError;
pub use fetch::FetchError;
