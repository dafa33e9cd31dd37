//! 缓存事件与队列长度的订阅者

use std::sync::Arc;

use crate::messages::CacheEvent;

pub type CacheListener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;
pub type SizeListener = Arc<dyn Fn(usize) + Send + Sync>;

/// 取消订阅用的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    events: Vec<(ListenerId, CacheListener)>,
    sizes: Vec<(ListenerId, SizeListener)>,
}

impl ListenerRegistry {
    fn next(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn add(&mut self, listener: CacheListener) -> ListenerId {
        let id = self.next();
        self.events.push((id, listener));
        id
    }

    pub fn add_size(&mut self, listener: SizeListener) -> ListenerId {
        let id = self.next();
        self.sizes.push((id, listener));
        id
    }

    /// 两类订阅共用 id 空间
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.events.len() + self.sizes.len();
        self.events.retain(|(i, _)| *i != id);
        self.sizes.retain(|(i, _)| *i != id);
        before != self.events.len() + self.sizes.len()
    }

    pub fn emit(&self, event: &CacheEvent) {
        for (_, l) in &self.events {
            l(event);
        }
    }

    pub fn emit_size(&self, size: usize) {
        for (_, l) in &self.sizes {
            l(size);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.sizes.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
