pub mod memory;
pub mod redis;

use crate::models::{AcquireOutcome, Holder, LockRecord, RenewOutcome};
use anyhow::Result;
use async_trait::async_trait;

/// 锁表的权威存储。冲突、非持有人、不存在都是正常返回值，
/// 只有存储本身不可用时才返回 Err。
#[async_trait]
pub trait LockStore: Send + Sync {
    /// 尝试获取锁；已过期的记录视为不存在
    async fn try_acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome>;

    /// 更新心跳，仅当前持有人可以续期
    async fn renew(&self, resource: &str, holder_id: &str) -> Result<RenewOutcome>;

    /// 释放锁，幂等；返回是否真的删除了记录
    async fn release(&self, resource: &str, holder_id: &str) -> Result<bool>;

    /// 所有未过期的锁
    async fn list_all(&self) -> Result<Vec<LockRecord>>;

    /// 某个持有人名下未过期的锁
    async fn list_by_holder(&self, holder_id: &str) -> Result<Vec<LockRecord>>;

    /// 无条件清空锁表，返回清除的数量
    async fn force_release_all(&self) -> Result<usize>;

    /// 清理过期锁，返回被清理的记录
    async fn evict_expired(&self) -> Result<Vec<LockRecord>>;
}
