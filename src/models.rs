use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

/// 锁持有人身份，由上游身份层提供
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Holder {
    #[schema(example = "user123")]
    pub id: String,
    #[schema(example = "张三")]
    pub name: String,
}

impl Holder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 锁记录：某个 pericope 的独占所有权
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LockRecord {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub lock_id: Uuid,
    #[schema(example = "Ruth 1:1-5")]
    pub resource: String,
    #[schema(example = "user123")]
    pub holder_id: String,
    #[schema(example = "张三")]
    pub holder_name: String,
    pub acquired_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl LockRecord {
    pub fn new(resource: &str, holder: &Holder, now: DateTime<Utc>) -> Self {
        Self {
            lock_id: Uuid::new_v4(),
            resource: resource.to_string(),
            holder_id: holder.id.clone(),
            holder_name: holder.name.clone(),
            acquired_at: now,
            last_activity: now,
        }
    }

    /// 距上次心跳已满 TTL 即视为过期
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let elapsed = now.signed_duration_since(self.last_activity);
        elapsed >= ttl_as_chrono(ttl)
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }

    pub fn conflict_detail(&self) -> ConflictDetail {
        ConflictDetail {
            holder_id: self.holder_id.clone(),
            holder_name: self.holder_name.clone(),
            acquired_at: self.acquired_at,
        }
    }
}

pub(crate) fn ttl_as_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// 申请锁被拒绝时返回的当前持有人信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConflictDetail {
    #[schema(example = "user456")]
    pub holder_id: String,
    #[schema(example = "李四")]
    pub holder_name: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Granted(LockRecord),
    Conflict(ConflictDetail),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewOutcome {
    Renewed,
    NotOwner,
    NotFound,
}

/// 释放结果
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ReleaseLockResult {
    pub released: bool,
}

/// 心跳结果
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HeartbeatResult {
    pub renewed: bool,
}

/// 锁列表
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct LockListResult {
    pub locks: Vec<LockRecord>,
}

/// 管理员清空结果
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ResetLocksResult {
    pub cleared: usize,
}

/// 列表查询参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListLocksQuery {
    /// 只返回当前持有人的锁
    #[serde(default)]
    pub mine: bool,
}

/// 客户端需要遵守的心跳节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct LockSettings {
    #[schema(example = 30)]
    pub heartbeat_interval_seconds: u64,
    #[schema(example = 90)]
    pub lock_ttl_seconds: u64,
}

/// 统一响应结构
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            success: true,
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
            success: false,
        }
    }

    pub fn failure_with(code: i32, message: String, data: T) -> Self {
        Self {
            code,
            message,
            data: Some(data),
            success: false,
        }
    }
}

/// 响应错误码
pub mod codes {
    pub const LOCK_CONFLICT: i32 = 1001;
    pub const HEARTBEAT_NOT_FOUND: i32 = 2001;
    pub const HEARTBEAT_NOT_OWNER: i32 = 2002;
    pub const MISSING_IDENTITY: i32 = 4000;
    pub const ADMIN_REQUIRED: i32 = 4003;
    pub const STORAGE_FAILURE: i32 = 5000;
}
