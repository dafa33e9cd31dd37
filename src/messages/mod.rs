//! 页面上下文与后台 worker 之间的消息协议
//!
//! 两侧只通过这里定义的封闭枚举通信；投递无序、可能重复，接收方必须容忍。

mod events;
mod protocol;

pub use events::{CacheEvent, EventType};
pub use protocol::{CachedItem, ClientMessage, FailureKind, PrefetchFailure, WorkerMessage};
