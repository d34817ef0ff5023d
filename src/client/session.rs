//! 单个客户端的锁会话状态机。
//!
//! `Idle → Acquiring → Held → (Releasing | Expired) → Idle`
//!
//! 连续多次心跳被告知锁记在别人名下时，会话转入 `Contested`，
//! 心跳继续重试，续期成功后回到 `Held`。
//!
//! 持有锁期间后台任务按固定间隔发送心跳。单次心跳失败不会结束会话，
//! 服务端的 TTL 会吸收偶尔丢失的心跳；只有服务端明确表示锁已不存在时，
//! 会话才转入 `Expired` 并通过 [`ClientLockSession::subscribe`] 通知界面。
//! 进程崩溃时没有任何清理代码能运行，服务端 TTL 是最终兜底。

use crate::client::LockApi;
use crate::error::ClientError;
use crate::models::{AcquireOutcome, Holder, LockRecord, LockSettings, RenewOutcome};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    /// 启动时查询自己名下是否还有锁
    Restoring,
    Acquiring { resource: String },
    Held { record: LockRecord },
    /// 心跳连续被拒绝：服务端记录的持有人已经不是自己
    Contested { record: LockRecord },
    Releasing { resource: String },
    /// 锁已被服务端回收，编辑内容可能不再受保护
    Expired { resource: String },
}

impl SessionState {
    pub fn resource(&self) -> Option<&str> {
        match self {
            SessionState::Idle | SessionState::Restoring => None,
            SessionState::Held { record } | SessionState::Contested { record } => {
                Some(&record.resource)
            }
            SessionState::Acquiring { resource }
            | SessionState::Releasing { resource }
            | SessionState::Expired { resource } => Some(resource),
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(self, SessionState::Held { .. })
    }

    pub fn is_contested(&self) -> bool {
        matches!(self, SessionState::Contested { .. })
    }
}

/// 连续 NotOwner 达到该次数后转入 `Contested`
const CONTESTED_AFTER: u32 = 3;

struct HeartbeatTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    fn cancel(self) {
        let _ = self.stop.send(true);
    }
}

struct Inner {
    // 每次进入或离开 Held 都会递增，用来丢弃过期的心跳结果
    generation: u64,
    heartbeat: Option<HeartbeatTask>,
    not_owner_streak: u32,
}

struct Shared {
    state: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn stop_heartbeat(inner: &mut Inner) {
        inner.generation += 1;
        inner.not_owner_streak = 0;
        if let Some(task) = inner.heartbeat.take() {
            task.cancel();
        }
    }

    /// 处理一次心跳结果，返回是否继续心跳
    fn on_heartbeat(
        &self,
        generation: u64,
        resource: &str,
        holder: &Holder,
        result: Result<RenewOutcome, ClientError>,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            log::debug!(
                "Ignoring stale heartbeat result - resource: {}, user_id: {}",
                resource, holder.id
            );
            return false;
        }

        match result {
            Ok(RenewOutcome::Renewed) => {
                log::debug!("Heartbeat renewed - resource: {}, user_id: {}", resource, holder.id);
                inner.not_owner_streak = 0;
                if let SessionState::Contested { record } = self.current() {
                    log::info!(
                        "[HEARTBEAT] Ownership confirmed again - resource: {}, user_id: {}",
                        resource, holder.id
                    );
                    self.set(SessionState::Held { record });
                }
                true
            }
            Ok(RenewOutcome::NotOwner) => {
                inner.not_owner_streak += 1;
                log::warn!(
                    "[HEARTBEAT] Lock recorded under another holder, retrying next tick - resource: {}, user_id: {}, attempts: {}",
                    resource, holder.id, inner.not_owner_streak
                );
                if inner.not_owner_streak >= CONTESTED_AFTER {
                    if let SessionState::Held { record } = self.current() {
                        log::warn!(
                            "[CONTESTED] Lock appears to belong to someone else - resource: {}, user_id: {}",
                            resource, holder.id
                        );
                        self.set(SessionState::Contested { record });
                    }
                }
                true
            }
            Ok(RenewOutcome::NotFound) => {
                log::warn!(
                    "[LOST] Lock no longer exists, edits are no longer protected - resource: {}, user_id: {}",
                    resource, holder.id
                );
                inner.generation += 1;
                // 在心跳任务内部，直接丢弃句柄即可
                inner.heartbeat = None;
                self.set(SessionState::Expired {
                    resource: resource.to_string(),
                });
                false
            }
            Err(e) => {
                log::warn!(
                    "[HEARTBEAT] Heartbeat failed, retrying next tick - resource: {}, user_id: {}: {}",
                    resource, holder.id, e
                );
                true
            }
        }
    }
}

/// 客户端锁会话
pub struct ClientLockSession<A: LockApi> {
    api: Arc<A>,
    holder: Holder,
    heartbeat_interval: Duration,
    shared: Arc<Shared>,
}

impl<A: LockApi> ClientLockSession<A> {
    pub fn new(api: Arc<A>, holder: Holder, heartbeat_interval: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            api,
            holder,
            heartbeat_interval,
            shared: Arc::new(Shared {
                state,
                inner: Mutex::new(Inner {
                    generation: 0,
                    heartbeat: None,
                    not_owner_streak: 0,
                }),
            }),
        }
    }

    pub fn with_settings(api: Arc<A>, holder: Holder, settings: LockSettings) -> Self {
        Self::new(api, holder, Duration::from_secs(settings.heartbeat_interval_seconds))
    }

    pub fn holder(&self) -> &Holder {
        &self.holder
    }

    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    /// 订阅状态变化，界面据此提示冲突或锁丢失
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// 页面重新加载后调用：若自己名下仍有锁，直接进入 Held 并恢复心跳，
    /// 返回该锁以便调用方恢复对应的编辑内容
    pub async fn restore(&self) -> Result<Option<LockRecord>, ClientError> {
        {
            let _inner = self.shared.inner.lock();
            if self.shared.current() != SessionState::Idle {
                return Err(ClientError::Busy("restore is only possible from Idle"));
            }
            self.shared.set(SessionState::Restoring);
        }

        let mut mine = match self.api.list_mine(&self.holder).await {
            Ok(mine) => mine,
            Err(e) => {
                self.shared.set(SessionState::Idle);
                return Err(e);
            }
        };

        // 同一用户有多把锁时，恢复最近活跃的那一把
        mine.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        let mut owned = mine.into_iter();
        let Some(record) = owned.next() else {
            self.shared.set(SessionState::Idle);
            return Ok(None);
        };
        for other in owned {
            log::info!(
                "[RESTORE] Leaving additional lock to expire - resource: {}, user_id: {}",
                other.resource, other.holder_id
            );
        }

        log::info!(
            "[RESTORE] Reattached to existing lock - lock_id: {}, resource: {}, user_id: {}",
            record.lock_id, record.resource, record.holder_id
        );
        self.enter_held(record.clone());
        Ok(Some(record))
    }

    /// 申请锁。冲突时回到 Idle 并返回持有人信息；网络故障直接返回错误，由用户重试
    pub async fn acquire(&self, resource: &str) -> Result<AcquireOutcome, ClientError> {
        {
            let _inner = self.shared.inner.lock();
            match self.shared.current() {
                SessionState::Held { record } if record.resource == resource => {
                    return Ok(AcquireOutcome::Granted(record));
                }
                SessionState::Held { record } | SessionState::Contested { record } => {
                    return Err(ClientError::AlreadyHolding(record.resource));
                }
                SessionState::Restoring
                | SessionState::Acquiring { .. }
                | SessionState::Releasing { .. } => {
                    return Err(ClientError::Busy("another lock operation is in progress"));
                }
                SessionState::Idle | SessionState::Expired { .. } => {}
            }
            self.shared.set(SessionState::Acquiring {
                resource: resource.to_string(),
            });
        }

        match self.api.acquire(resource, &self.holder).await {
            Ok(AcquireOutcome::Granted(record)) => {
                self.enter_held(record.clone());
                Ok(AcquireOutcome::Granted(record))
            }
            Ok(AcquireOutcome::Conflict(detail)) => {
                log::info!(
                    "[CONFLICT] {} is locked by {} (user_id: {})",
                    resource, detail.holder_name, detail.holder_id
                );
                self.shared.set(SessionState::Idle);
                Ok(AcquireOutcome::Conflict(detail))
            }
            Err(e) => {
                log::warn!("Failed to acquire lock on {}: {}", resource, e);
                self.shared.set(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// 完成或放弃编辑。无论服务端调用是否成功都回到 Idle
    pub async fn release(&self) {
        let resource = {
            let mut inner = self.shared.inner.lock();
            match self.shared.current() {
                SessionState::Held { record } | SessionState::Contested { record } => {
                    Shared::stop_heartbeat(&mut inner);
                    self.shared.set(SessionState::Releasing {
                        resource: record.resource.clone(),
                    });
                    record.resource
                }
                SessionState::Expired { .. } => {
                    self.shared.set(SessionState::Idle);
                    return;
                }
                _ => return,
            }
        };

        if let Err(e) = self.api.unlock(&resource, &self.holder).await {
            log::warn!(
                "Failed to release lock, leaving it to expire - resource: {}, user_id: {}: {}",
                resource, self.holder.id, e
            );
        }
        self.shared.set(SessionState::Idle);
    }

    fn enter_held(&self, record: LockRecord) {
        let mut inner = self.shared.inner.lock();
        Shared::stop_heartbeat(&mut inner);
        let generation = inner.generation;
        inner.heartbeat = Some(self.spawn_heartbeat(generation, record.resource.clone()));
        self.shared.set(SessionState::Held { record });
    }

    fn spawn_heartbeat(&self, generation: u64, resource: String) -> HeartbeatTask {
        let (stop, mut stop_rx) = watch::channel(false);
        let api = self.api.clone();
        let holder = self.holder.clone();
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            // 上一次心跳未返回时错过的 tick 直接跳过，避免请求堆积
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let result = tokio::select! {
                    _ = stop_rx.changed() => break,
                    result = api.heartbeat(&resource, &holder) => result,
                };

                let Some(state) = shared.upgrade() else { break };
                if !state.on_heartbeat(generation, &resource, &holder, result) {
                    break;
                }
            }
            log::debug!("Heartbeat stopped - resource: {}, user_id: {}", resource, holder.id);
        });

        HeartbeatTask { stop, handle }
    }
}

impl<A: LockApi> Drop for ClientLockSession<A> {
    fn drop(&mut self) {
        // 不在这里释放锁：服务端 TTL 会回收，调用方需要释放时应显式调用 release
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        if let Some(task) = inner.heartbeat.take() {
            task.handle.abort();
        }
    }
}
