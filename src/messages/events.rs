use super::protocol::CachedItem;

/// 通知给页面监听者的缓存事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    FileCached,
    FileDeleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub kind: EventType,
    pub item: CachedItem,
}

impl CacheEvent {
    pub fn cached(item: CachedItem) -> Self {
        Self {
            kind: EventType::FileCached,
            item,
        }
    }

    pub fn deleted(item: CachedItem) -> Self {
        Self {
            kind: EventType::FileDeleted,
            item,
        }
    }
}
