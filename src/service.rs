use crate::models::{AcquireOutcome, Holder, LockRecord, LockSettings, RenewOutcome};
use crate::storage::LockStore;
use anyhow::Result;
use std::sync::Arc;

/// 请求处理层：把存储层的结果翻译成调用方关心的成功/冲突
pub struct LockService {
    store: Arc<dyn LockStore>,
    settings: LockSettings,
}

impl LockService {
    pub fn new(store: Arc<dyn LockStore>, settings: LockSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    pub async fn acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome> {
        log::info!(
            "[ACQUIRE] Attempting to acquire lock - resource: {}, user_id: {}, user_name: {}",
            resource, holder.id, holder.name
        );

        let outcome = self.store.try_acquire(resource, holder).await?;
        match &outcome {
            AcquireOutcome::Granted(record) => log::info!(
                "[ACQUIRE SUCCESS] Lock acquired - lock_id: {}, resource: {}, user_id: {}, user_name: {}",
                record.lock_id, record.resource, record.holder_id, record.holder_name
            ),
            AcquireOutcome::Conflict(detail) => log::info!(
                "[ACQUIRE FAILED] Lock already held - resource: {}, current_holder: {} (user_id: {}), locked_at: {}, requested_by: {} (user_id: {})",
                resource, detail.holder_name, detail.holder_id, detail.acquired_at, holder.name, holder.id
            ),
        }
        Ok(outcome)
    }

    /// 心跳失败只记录日志，由调用方决定是否放弃
    pub async fn heartbeat(&self, resource: &str, holder: &Holder) -> Result<RenewOutcome> {
        let outcome = self.store.renew(resource, &holder.id).await?;
        match outcome {
            RenewOutcome::Renewed => log::debug!(
                "Heartbeat updated - resource: {}, user_id: {}",
                resource, holder.id
            ),
            RenewOutcome::NotOwner => log::warn!(
                "[HEARTBEAT] Lock held by someone else - resource: {}, user_id: {}",
                resource, holder.id
            ),
            RenewOutcome::NotFound => log::warn!(
                "[HEARTBEAT] Lock not found or expired - resource: {}, user_id: {}",
                resource, holder.id
            ),
        }
        Ok(outcome)
    }

    /// 释放锁，对调用方总是成功；存储故障由 TTL 兜底
    pub async fn unlock(&self, resource: &str, holder: &Holder) -> bool {
        match self.store.release(resource, &holder.id).await {
            Ok(released) => {
                if released {
                    log::info!(
                        "[RELEASE SUCCESS] Lock released - resource: {}, user_id: {}",
                        resource, holder.id
                    );
                } else {
                    log::info!(
                        "[RELEASE] Nothing to release - resource: {}, user_id: {}",
                        resource, holder.id
                    );
                }
                released
            }
            Err(e) => {
                log::error!(
                    "Failed to release lock - resource: {}, user_id: {}: {}",
                    resource, holder.id, e
                );
                false
            }
        }
    }

    pub async fn list_locks(&self) -> Result<Vec<LockRecord>> {
        self.store.list_all().await
    }

    pub async fn list_mine(&self, holder: &Holder) -> Result<Vec<LockRecord>> {
        self.store.list_by_holder(&holder.id).await
    }

    /// 管理员操作：清空所有锁
    pub async fn reset_all(&self, admin: &Holder) -> Result<usize> {
        let cleared = self.store.force_release_all().await?;
        log::warn!(
            "[RESET] All locks cleared by {} (user_id: {}) - cleared: {}",
            admin.name, admin.id, cleared
        );
        Ok(cleared)
    }
}
