//! 网络连接状态
//!
//! 订阅者总能读到最新状态，并收到之后的每一次变化。

use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// 更新状态，只有真正变化时才通知订阅者
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "网络状态变化");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
