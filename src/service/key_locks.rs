use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按 SKU 键加锁：同键写入串行，不同键互不阻塞
///
/// 释放时若没有其他任务在等同一个键，就把条目从表里移除，表的大小只跟
/// 同时在写的键数有关。
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// 持有期间独占某个键；drop 时解锁并尝试回收条目
#[derive(Debug)]
pub struct KeyGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // 先克隆 Arc 再 await，不持有 DashMap 分片锁
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: &self.locks,
        }
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // 先放锁 (guard 里也持有一份 Arc)，剩下表里那一份时说明没有等待者
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
impl KeyLocks {
    fn len(&self) -> usize {
        self.locks.len()
    }
}
