//! 心跳状态机 {Idle, Polling}
//!
//! worker 可能被宿主静默重启，页面侧必须定期用 Pong 对账。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Polling,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    state: HeartbeatState,
    idle_pongs: u32,
    max_idle_pongs: u32,
}

impl Heartbeat {
    pub fn new(max_idle_pongs: u32) -> Self {
        Self {
            state: HeartbeatState::Idle,
            idle_pongs: 0,
            max_idle_pongs: max_idle_pongs.max(1),
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn is_polling(&self) -> bool {
        self.state == HeartbeatState::Polling
    }

    /// Idle -> Polling；已在轮询时返回 false
    pub fn start(&mut self) -> bool {
        self.idle_pongs = 0;
        if self.is_polling() {
            return false;
        }
        self.state = HeartbeatState::Polling;
        true
    }

    pub fn stop(&mut self) {
        self.state = HeartbeatState::Idle;
        self.idle_pongs = 0;
    }

    /// 记录一次 Pong；`idle` 表示双方都没有待办。返回是否因此停止轮询
    pub fn on_pong(&mut self, idle: bool) -> bool {
        if !self.is_polling() {
            return false;
        }
        if !idle {
            self.idle_pongs = 0;
            return false;
        }
        self.idle_pongs += 1;
        if self.idle_pongs >= self.max_idle_pongs {
            self.stop();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_after_consecutive_idle_pongs() {
        let mut hb = Heartbeat::new(3);
        assert!(hb.start());
        assert!(!hb.start());
        assert!(!hb.on_pong(true));
        assert!(!hb.on_pong(true));
        assert!(hb.on_pong(true));
        assert_eq!(hb.state(), HeartbeatState::Idle);
    }

    #[test]
    fn test_busy_pong_resets_counter() {
        let mut hb = Heartbeat::new(3);
        hb.start();
        hb.on_pong(true);
        hb.on_pong(true);
        hb.on_pong(false);
        assert!(!hb.on_pong(true));
        assert!(!hb.on_pong(true));
        assert!(hb.is_polling());
    }

    #[test]
    fn test_pong_ignored_when_idle() {
        let mut hb = Heartbeat::new(1);
        assert!(!hb.on_pong(true));
        assert_eq!(hb.state(), HeartbeatState::Idle);
    }
}
