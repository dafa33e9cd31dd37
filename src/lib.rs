//! 音频预取缓存
//!
//! 两个独立运行的部分通过消息通道协作：
//! - [`worker::CacheWorker`]：拉取、持久缓存、淘汰、取消，并拦截播放请求；
//! - [`queue::QueueController`]：页面侧的优先级队列、并发控制与心跳对账。

pub mod cli;
pub mod error;
pub mod logging;
pub mod messages;
pub mod net;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod worker;
