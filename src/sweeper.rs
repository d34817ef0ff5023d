use crate::storage::LockStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 后台清理过期锁。正确性不依赖它：获取锁时会再次检查过期，
/// 它只是让列表查询不再返回已过期的记录。
pub struct ExpirySweeper;

impl ExpirySweeper {
    pub fn spawn(store: Arc<dyn LockStore>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(store.as_ref()).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            log::debug!("[CLEANUP] Expiry sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// 执行一次清理，返回清理的数量；存储错误只记录日志
pub async fn sweep_once(store: &dyn LockStore) -> usize {
    match store.evict_expired().await {
        Ok(evicted) => {
            if !evicted.is_empty() {
                log::info!("[CLEANUP] Evicted {} expired locks", evicted.len());
            }
            evicted.len()
        }
        Err(e) => {
            log::error!("Failed to cleanup expired locks: {}", e);
            0
        }
    }
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            log::warn!("Expiry sweeper ended abnormally: {}", e);
        }
    }
}
