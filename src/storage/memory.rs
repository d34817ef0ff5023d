use crate::clock::{Clock, SystemClock};
use crate::models::{AcquireOutcome, Holder, LockRecord, RenewOutcome};
use crate::storage::LockStore;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct MemoryStore {
    locks: RwLock<HashMap<String, LockRecord>>, // resource -> LockRecord
    ttl: Duration,
    clock: Arc<dyn Clock>,
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            ttl,
            clock,
            persist_path: None,
        }
    }

    pub fn with_persistence(mut self, persist_path: PathBuf) -> Self {
        self.persist_path = Some(persist_path);
        self
    }

    /// 从磁盘加载数据
    pub async fn load_from_disk(&self) -> Result<usize> {
        let path = match &self.persist_path {
            Some(p) => p,
            None => return Ok(0),
        };

        if !fs::try_exists(path).await? {
            log::info!("[PERSISTENCE] No persistence file found at {:?}", path);
            return Ok(0);
        }

        let mut file = fs::File::open(path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let data: Vec<LockRecord> = serde_json::from_str(&contents)?;
        let now = self.clock.now();
        let mut locks = self.locks.write();
        let mut loaded_count = 0;

        for record in data {
            // 只加载未过期的锁
            if record.is_expired(now, self.ttl) {
                continue;
            }
            let keep = match locks.get(&record.resource) {
                Some(existing) => existing.last_activity < record.last_activity,
                None => true,
            };
            if keep {
                locks.insert(record.resource.clone(), record);
                loaded_count += 1;
            }
        }

        log::info!(
            "[PERSISTENCE] Loaded {} locks from disk (file: {:?})",
            loaded_count,
            path
        );
        Ok(loaded_count)
    }

    /// 持久化数据到磁盘
    pub async fn persist_to_disk(&self) -> Result<usize> {
        let path = match &self.persist_path {
            Some(p) => p,
            None => return Ok(0),
        };

        let records = self.snapshot(|_| true);
        let count = records.len();
        let json = serde_json::to_string_pretty(&records)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 写入临时文件，然后重命名（原子操作）
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(temp_path, path).await?;

        log::debug!(
            "[PERSISTENCE] Persisted {} locks to disk (file: {:?})",
            count,
            path
        );
        Ok(count)
    }

    /// 在读锁下取一致快照，过滤掉已过期的记录
    fn snapshot(&self, filter: impl Fn(&LockRecord) -> bool) -> Vec<LockRecord> {
        let now = self.clock.now();
        let locks = self.locks.read();
        let mut records: Vec<LockRecord> = locks
            .values()
            .filter(|record| !record.is_expired(now, self.ttl) && filter(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.resource.cmp(&b.resource));
        records
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome> {
        let now = self.clock.now();
        let mut locks = self.locks.write();

        if let Some(existing) = locks.get_mut(resource) {
            if existing.is_expired(now, self.ttl) {
                log::info!(
                    "[EXPIRED] Lock expired and reclaimed - lock_id: {}, resource: {}, user_id: {}, user_name: {}",
                    existing.lock_id, existing.resource, existing.holder_id, existing.holder_name
                );
            } else if existing.is_held_by(&holder.id) {
                // 同一个用户重复申请，更新心跳时间并返回现有锁
                existing.last_activity = now;
                log::info!(
                    "[REENTRANT] Same user re-acquiring lock - lock_id: {}, resource: {}, user_id: {}, user_name: {}",
                    existing.lock_id, existing.resource, existing.holder_id, existing.holder_name
                );
                return Ok(AcquireOutcome::Granted(existing.clone()));
            } else {
                return Ok(AcquireOutcome::Conflict(existing.conflict_detail()));
            }
        }

        let record = LockRecord::new(resource, holder, now);
        locks.insert(resource.to_string(), record.clone());
        Ok(AcquireOutcome::Granted(record))
    }

    async fn renew(&self, resource: &str, holder_id: &str) -> Result<RenewOutcome> {
        let now = self.clock.now();
        let mut locks = self.locks.write();

        let expired = match locks.get_mut(resource) {
            None => return Ok(RenewOutcome::NotFound),
            Some(record) if record.is_expired(now, self.ttl) => true,
            Some(record) if !record.is_held_by(holder_id) => return Ok(RenewOutcome::NotOwner),
            Some(record) => {
                record.last_activity = now;
                return Ok(RenewOutcome::Renewed);
            }
        };

        if expired {
            if let Some(record) = locks.remove(resource) {
                log::info!(
                    "[EXPIRED] Heartbeat arrived after expiry - lock_id: {}, resource: {}, user_id: {}",
                    record.lock_id, record.resource, record.holder_id
                );
            }
        }
        Ok(RenewOutcome::NotFound)
    }

    async fn release(&self, resource: &str, holder_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut locks = self.locks.write();

        let removable = match locks.get(resource) {
            Some(record) => record.is_held_by(holder_id) || record.is_expired(now, self.ttl),
            None => false,
        };
        if !removable {
            return Ok(false);
        }

        match locks.remove(resource) {
            Some(record) => {
                log::info!(
                    "[RELEASE] Releasing lock - lock_id: {}, resource: {}, user_id: {}, user_name: {}",
                    record.lock_id, record.resource, record.holder_id, record.holder_name
                );
                Ok(record.is_held_by(holder_id))
            }
            None => Ok(false),
        }
    }

    async fn list_all(&self) -> Result<Vec<LockRecord>> {
        Ok(self.snapshot(|_| true))
    }

    async fn list_by_holder(&self, holder_id: &str) -> Result<Vec<LockRecord>> {
        Ok(self.snapshot(|record| record.is_held_by(holder_id)))
    }

    async fn force_release_all(&self) -> Result<usize> {
        let mut locks = self.locks.write();
        let cleared = locks.len();
        locks.clear();
        Ok(cleared)
    }

    async fn evict_expired(&self) -> Result<Vec<LockRecord>> {
        let now = self.clock.now();
        let mut locks = self.locks.write();

        let expired: Vec<String> = locks
            .values()
            .filter(|record| record.is_expired(now, self.ttl))
            .map(|record| record.resource.clone())
            .collect();

        let evicted: Vec<LockRecord> = expired
            .iter()
            .filter_map(|resource| locks.remove(resource))
            .collect();

        for record in &evicted {
            log::info!(
                "[EXPIRED CLEANUP] Removed expired lock - lock_id: {}, resource: {}, user_id: {}, user_name: {}, locked_at: {}",
                record.lock_id, record.resource, record.holder_id, record.holder_name, record.acquired_at
            );
        }
        Ok(evicted)
    }
}
