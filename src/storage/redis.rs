use crate::clock::{Clock, SystemClock};
use crate::models::{AcquireOutcome, Holder, LockRecord, RenewOutcome};
use crate::storage::LockStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// KEYS[1] = 锁 key
// ARGV = holder_id, holder_name, lock_id, now_ms, ttl_ms, resource
// 返回 {状态, 记录}: 1 新获取, 2 同一用户重入, 0 被他人持有
const ACQUIRE_SCRIPT: &str = r#"
local holder = redis.call('HGET', KEYS[1], 'holder_id')
if holder then
  if holder == ARGV[1] then
    redis.call('HSET', KEYS[1], 'last_activity', ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[5])
    return {2, redis.call('HGETALL', KEYS[1])}
  end
  return {0, redis.call('HGETALL', KEYS[1])}
end
redis.call('HSET', KEYS[1],
  'resource', ARGV[6],
  'holder_id', ARGV[1],
  'holder_name', ARGV[2],
  'lock_id', ARGV[3],
  'acquired_at', ARGV[4],
  'last_activity', ARGV[4])
redis.call('PEXPIRE', KEYS[1], ARGV[5])
return {1, redis.call('HGETALL', KEYS[1])}
"#;

// KEYS[1] = 锁 key; ARGV = holder_id, now_ms, ttl_ms
// 返回 1 续期成功, 2 非持有人, 0 不存在
const RENEW_SCRIPT: &str = r#"
local holder = redis.call('HGET', KEYS[1], 'holder_id')
if not holder then
  return 0
end
if holder ~= ARGV[1] then
  return 2
end
redis.call('HSET', KEYS[1], 'last_activity', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

// KEYS[1] = 锁 key; ARGV = holder_id
const RELEASE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder_id') == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis 存储。每个 pericope 一个 hash，过期交给 Redis 的 PEXPIRE，
/// 所有写操作都在 Lua 脚本里原子执行。
pub struct RedisStore {
    client: ConnectionManager,
    prefix: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    acquire_script: Script,
    renew_script: Script,
    release_script: Script,
}

impl RedisStore {
    pub async fn new(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
        ttl: Duration,
    ) -> Result<Self> {
        // 构建连接信息
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        let connection = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self {
            client: connection,
            prefix: "pericope-lock:".to_string(),
            ttl,
            clock: Arc::new(SystemClock),
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock_key(&self, resource: &str) -> String {
        data_key(&self.prefix, resource)
    }

    fn ttl_millis(&self) -> u64 {
        self.ttl.as_millis().clamp(1, u64::MAX as u128) as u64
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.client.clone();
        let pattern = format!("{}data:*", self.prefix);
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<String> = conn.scan_match(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn load_records(&self, filter: impl Fn(&LockRecord) -> bool) -> Result<Vec<LockRecord>> {
        let keys = self.scan_keys().await?;
        let mut conn = self.client.clone();
        let mut records = Vec::with_capacity(keys.len());

        for key in keys {
            let fields: HashMap<String, String> = conn.hgetall(&key).await?;
            // 扫描和读取之间 key 可能已过期
            if fields.is_empty() {
                continue;
            }
            match record_from_fields(&fields) {
                Ok(record) if filter(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => log::warn!("[REDIS] Skipping malformed lock record {}: {}", key, e),
            }
        }
        records.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(records)
    }
}

fn data_key(prefix: &str, resource: &str) -> String {
    format!("{}data:{}", prefix, resource)
}

fn millis_to_datetime(value: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = value.parse()?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {}", millis))
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing field {}", name))
}

fn record_from_fields(fields: &HashMap<String, String>) -> Result<LockRecord> {
    Ok(LockRecord {
        lock_id: Uuid::parse_str(field(fields, "lock_id")?)?,
        resource: field(fields, "resource")?.to_string(),
        holder_id: field(fields, "holder_id")?.to_string(),
        holder_name: field(fields, "holder_name")?.to_string(),
        acquired_at: millis_to_datetime(field(fields, "acquired_at")?)?,
        last_activity: millis_to_datetime(field(fields, "last_activity")?)?,
    })
}

fn outcome_from_script(status: i64, fields: &HashMap<String, String>) -> Result<AcquireOutcome> {
    let record = record_from_fields(fields)?;
    match status {
        1 | 2 => Ok(AcquireOutcome::Granted(record)),
        0 => Ok(AcquireOutcome::Conflict(record.conflict_detail())),
        other => Err(anyhow!("unexpected acquire script status {}", other)),
    }
}

fn renew_outcome(status: i64) -> Result<RenewOutcome> {
    match status {
        1 => Ok(RenewOutcome::Renewed),
        2 => Ok(RenewOutcome::NotOwner),
        0 => Ok(RenewOutcome::NotFound),
        other => Err(anyhow!("unexpected renew script status {}", other)),
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn try_acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome> {
        let mut conn = self.client.clone();
        let now_ms = self.clock.now().timestamp_millis();
        let lock_id = Uuid::new_v4().to_string();

        let (status, fields): (i64, HashMap<String, String>) = self
            .acquire_script
            .key(self.lock_key(resource))
            .arg(&holder.id)
            .arg(&holder.name)
            .arg(&lock_id)
            .arg(now_ms)
            .arg(self.ttl_millis())
            .arg(resource)
            .invoke_async(&mut conn)
            .await?;

        if status == 2 {
            log::info!(
                "[REENTRANT] Same user re-acquiring lock - resource: {}, user_id: {}, user_name: {}",
                resource, holder.id, holder.name
            );
        }
        outcome_from_script(status, &fields)
    }

    async fn renew(&self, resource: &str, holder_id: &str) -> Result<RenewOutcome> {
        let mut conn = self.client.clone();
        let now_ms = self.clock.now().timestamp_millis();

        let status: i64 = self
            .renew_script
            .key(self.lock_key(resource))
            .arg(holder_id)
            .arg(now_ms)
            .arg(self.ttl_millis())
            .invoke_async(&mut conn)
            .await?;
        renew_outcome(status)
    }

    async fn release(&self, resource: &str, holder_id: &str) -> Result<bool> {
        let mut conn = self.client.clone();
        let removed: i64 = self
            .release_script
            .key(self.lock_key(resource))
            .arg(holder_id)
            .invoke_async(&mut conn)
            .await?;

        if removed > 0 {
            log::info!(
                "[RELEASE] Releasing lock - resource: {}, user_id: {}",
                resource, holder_id
            );
        }
        Ok(removed > 0)
    }

    async fn list_all(&self) -> Result<Vec<LockRecord>> {
        self.load_records(|_| true).await
    }

    async fn list_by_holder(&self, holder_id: &str) -> Result<Vec<LockRecord>> {
        self.load_records(|record| record.is_held_by(holder_id)).await
    }

    async fn force_release_all(&self) -> Result<usize> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.client.clone();
        let removed: usize = conn.del(&keys).await?;
        Ok(removed)
    }

    async fn evict_expired(&self) -> Result<Vec<LockRecord>> {
        // Redis 会自动清理过期的键，无需手动清理
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("resource".to_string(), "Ruth 1:1-5".to_string());
        fields.insert("holder_id".to_string(), "a".to_string());
        fields.insert("holder_name".to_string(), "Alice".to_string());
        fields.insert(
            "lock_id".to_string(),
            "550e8400-e29b-41d4-a716-446655440000".to_string(),
        );
        fields.insert("acquired_at".to_string(), "1700000000000".to_string());
        fields.insert("last_activity".to_string(), "1700000030000".to_string());
        fields
    }

    #[test]
    fn data_key_embeds_resource_verbatim() {
        assert_eq!(
            data_key("pericope-lock:", "Ruth 1:1-5"),
            "pericope-lock:data:Ruth 1:1-5"
        );
    }

    #[test]
    fn parses_record_from_hash_fields() {
        let record = record_from_fields(&sample_fields()).unwrap();
        assert_eq!(record.resource, "Ruth 1:1-5");
        assert_eq!(record.holder_name, "Alice");
        assert_eq!(record.acquired_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(
            (record.last_activity - record.acquired_at).num_seconds(),
            30
        );
    }

    #[test]
    fn missing_field_is_reported() {
        let mut fields = sample_fields();
        fields.remove("holder_name");
        let err = record_from_fields(&fields).unwrap_err();
        assert!(err.to_string().contains("holder_name"));
    }

    #[test]
    fn script_status_maps_to_outcomes() {
        let fields = sample_fields();
        assert!(matches!(
            outcome_from_script(1, &fields).unwrap(),
            AcquireOutcome::Granted(_)
        ));
        assert!(matches!(
            outcome_from_script(2, &fields).unwrap(),
            AcquireOutcome::Granted(_)
        ));
        match outcome_from_script(0, &fields).unwrap() {
            AcquireOutcome::Conflict(detail) => assert_eq!(detail.holder_name, "Alice"),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(outcome_from_script(7, &fields).is_err());

        assert_eq!(renew_outcome(1).unwrap(), RenewOutcome::Renewed);
        assert_eq!(renew_outcome(2).unwrap(), RenewOutcome::NotOwner);
        assert_eq!(renew_outcome(0).unwrap(), RenewOutcome::NotFound);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn live_redis_enforces_mutual_exclusion() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisStore::new(&url, None, None, None, Duration::from_secs(30))
            .await
            .unwrap();
        store.force_release_all().await.unwrap();

        let alice = Holder::new("a", "Alice");
        let bob = Holder::new("b", "Bob");
        assert!(matches!(
            store.try_acquire("Ruth 1:1-5", &alice).await.unwrap(),
            AcquireOutcome::Granted(_)
        ));
        assert!(matches!(
            store.try_acquire("Ruth 1:1-5", &bob).await.unwrap(),
            AcquireOutcome::Conflict(_)
        ));
        assert_eq!(store.renew("Ruth 1:1-5", "b").await.unwrap(), RenewOutcome::NotOwner);
        assert_eq!(store.list_by_holder("a").await.unwrap().len(), 1);

        assert!(store.release("Ruth 1:1-5", "a").await.unwrap());
        assert!(!store.release("Ruth 1:1-5", "a").await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());
    }
}
