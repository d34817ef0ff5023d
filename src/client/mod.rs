//! 客户端：编辑界面通过 [`ClientLockSession`] 持有锁并保持心跳。
//!
//! 会话只依赖 [`LockApi`]，既可以直接调用进程内的 [`LockService`]，
//! 也可以通过 [`HttpLockClient`] 访问远端服务。

pub mod http;
pub mod session;

pub use http::HttpLockClient;
pub use session::{ClientLockSession, SessionState};

use crate::error::ClientError;
use crate::models::{AcquireOutcome, Holder, LockRecord, RenewOutcome};
use crate::service::LockService;
use async_trait::async_trait;

/// 会话所需的锁服务操作
#[async_trait]
pub trait LockApi: Send + Sync + 'static {
    async fn acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome, ClientError>;

    async fn heartbeat(&self, resource: &str, holder: &Holder) -> Result<RenewOutcome, ClientError>;

    async fn unlock(&self, resource: &str, holder: &Holder) -> Result<(), ClientError>;

    async fn list_mine(&self, holder: &Holder) -> Result<Vec<LockRecord>, ClientError>;
}

#[async_trait]
impl LockApi for LockService {
    async fn acquire(&self, resource: &str, holder: &Holder) -> Result<AcquireOutcome, ClientError> {
        Ok(LockService::acquire(self, resource, holder).await?)
    }

    async fn heartbeat(&self, resource: &str, holder: &Holder) -> Result<RenewOutcome, ClientError> {
        Ok(LockService::heartbeat(self, resource, holder).await?)
    }

    async fn unlock(&self, resource: &str, holder: &Holder) -> Result<(), ClientError> {
        LockService::unlock(self, resource, holder).await;
        Ok(())
    }

    async fn list_mine(&self, holder: &Holder) -> Result<Vec<LockRecord>, ClientError> {
        Ok(LockService::list_mine(self, holder).await?)
    }
}
