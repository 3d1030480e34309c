//! 按 key 加锁
//!
//! 同一 key 的持有者互斥，不同 key 互不影响。最后一个持有者释放时清理条目，
//! map 大小只与当前并发的 key 数量相关。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 获取 key 对应的锁，等待期间不占用 map 分片
    pub(crate) async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 只剩 map 自身的引用时说明没有其他等待者
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
