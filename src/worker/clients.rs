//! 已连接页面的注册表（相当于 `clients.matchAll`）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::messages::WorkerMessage;

pub type ClientId = u64;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, mpsc::UnboundedSender<WorkerMessage>>>,
}

impl ClientRegistry {
    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, mpsc::UnboundedSender<WorkerMessage>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients().insert(id, tx);
        (id, rx)
    }

    /// 发给所有页面，顺带清理已关闭的连接
    pub fn broadcast(&self, msg: WorkerMessage) {
        let mut clients = self.clients();
        clients.retain(|id, tx| {
            tracing::debug!(client = id, msg = ?msg, "广播消息");
            tx.send(msg.clone()).is_ok()
        });
    }

    pub fn send_to(&self, id: ClientId, msg: WorkerMessage) -> bool {
        let mut clients = self.clients();
        let Some(tx) = clients.get(&id) else {
            return false;
        };
        if tx.send(msg).is_ok() {
            return true;
        }
        clients.remove(&id);
        false
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    pub fn clear(&self) {
        self.clients().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_prunes_closed() {
        let registry = ClientRegistry::default();
        let (_a, mut rx_a) = registry.register();
        let (_b, rx_b) = registry.register();
        drop(rx_b);

        registry.broadcast(WorkerMessage::Pong {
            pending_audio: Vec::new(),
        });
        assert!(rx_a.try_recv().is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_to_only_target() {
        let registry = ClientRegistry::default();
        let (a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        assert!(registry.send_to(
            a,
            WorkerMessage::Pong {
                pending_audio: Vec::new()
            }
        ));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(!registry.send_to(99, WorkerMessage::Pong { pending_audio: Vec::new() }));
    }
}
