//! 连接管理
//!
//! 负责把一个账号接到远端存储上：
//! - 校验账号状态（异步裁定，失败走统一的状态错误回调）
//! - 解析 Private / Shared 两个分区
//! - 在 Private 分区定位专用 Zone，不存在则创建
//! - 为两个分区安装变更订阅（安装失败只记日志，轮询照常可用）
//!
//! 其余组件触达连接前必须先过就绪门禁（[`Connector::readiness`] /
//! [`Connector::assured`]）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{GameSyncError, Result};
use crate::remote::store::AccountStatus;
use crate::remote::{Record, RemoteStore, Scope, Subscription, Zone, ZoneId};

/// 订阅 ID
pub mod subscription_ids {
    pub const PRIVATE: &str = "gamesync-private-games";
    pub const SHARED: &str = "gamesync-shared-games";
}

/// 解析后的分区句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub scope: Scope,
}

/// 就绪后各组件依赖的值束：每个字段都已就位才发放
#[derive(Debug, Clone)]
pub struct AssuredValues {
    pub container: String,
    pub private_subscription: Subscription,
    pub private_database: DatabaseRef,
    pub shared_database: DatabaseRef,
    pub private_zone: Zone,
}

/// 就绪检查结果
#[derive(Debug, Clone)]
pub enum Readiness {
    Ready(AssuredValues),
    NotReady { missing: Vec<&'static str> },
}

#[derive(Default)]
struct ConnectorState {
    container: Option<String>,
    private_database: Option<DatabaseRef>,
    shared_database: Option<DatabaseRef>,
    private_subscription: Option<Subscription>,
    shared_subscription: Option<Subscription>,
    private_zone: Option<Zone>,
    shared_zones: Vec<ZoneId>,
    local_user: Option<Record>,
}

impl ConnectorState {
    fn readiness(&self) -> Readiness {
        let mut missing = Vec::new();
        if self.container.is_none() {
            missing.push("container");
        }
        if self.private_database.is_none() {
            missing.push("private_database");
        }
        if self.shared_database.is_none() {
            missing.push("shared_database");
        }
        if self.private_subscription.is_none() {
            missing.push("private_subscription");
        }
        if self.private_zone.is_none() {
            missing.push("private_zone");
        }
        if missing.is_empty() {
            Readiness::Ready(AssuredValues {
                container: self.container.clone().expect("checked"),
                private_subscription: self.private_subscription.clone().expect("checked"),
                private_database: self.private_database.expect("checked"),
                shared_database: self.shared_database.expect("checked"),
                private_zone: self.private_zone.clone().expect("checked"),
            })
        } else {
            Readiness::NotReady { missing }
        }
    }
}

/// 状态错误回调类型
pub type StateErrorCallback = Box<dyn Fn(&GameSyncError) + Send + Sync>;

/// 连接管理器
pub struct Connector {
    store: Arc<dyn RemoteStore>,
    state: Arc<RwLock<ConnectorState>>,
    state_error: Arc<RwLock<Option<StateErrorCallback>>>,
}

impl Connector {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            state: Arc::new(RwLock::new(ConnectorState::default())),
            state_error: Arc::new(RwLock::new(None)),
        }
    }

    /// 注册状态错误回调（连接阶段错误与 BadState 都从这里出去）
    pub async fn on_state_error<F>(&self, callback: F)
    where
        F: Fn(&GameSyncError) + Send + Sync + 'static,
    {
        let mut cb = self.state_error.write().await;
        *cb = Some(Box::new(callback));
    }

    async fn report(&self, error: GameSyncError) -> GameSyncError {
        let cb = self.state_error.read().await;
        if let Some(cb) = cb.as_ref() {
            cb(&error);
        }
        error
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// 建立连接
    ///
    /// 账号状态异步裁定，所有失败分类后统一走状态错误回调，
    /// 同时作为返回值交给调用方。
    pub async fn connect(
        &self,
        container: &str,
        zone_name: &str,
        record_type: &str,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.container = Some(container.to_string());
        }

        let status = match self.store.account_status().await {
            Ok(status) => status,
            Err(e) => return Err(self.report(classify_connect_error(e)).await),
        };

        match status {
            AccountStatus::Available => {}
            AccountStatus::NoAccount => {
                return Err(self.report(GameSyncError::SignInRequired).await)
            }
            AccountStatus::Restricted => {
                return Err(self.report(GameSyncError::AccountRestricted).await)
            }
            AccountStatus::CouldNotDetermine => {
                return Err(self.report(GameSyncError::StatusUndetermined).await)
            }
        }

        // 账号可用：两个分区即告解析，取用户记录确定 Zone 持有者
        let user = match self.store.user_record().await {
            Ok(user) => user,
            Err(e) => return Err(self.report(classify_connect_error(e)).await),
        };
        {
            let mut state = self.state.write().await;
            state.private_database = Some(DatabaseRef {
                scope: Scope::Private,
            });
            state.shared_database = Some(DatabaseRef {
                scope: Scope::Shared,
            });
            state.local_user = Some(user);
        }

        self.continue_connection(zone_name, record_type).await;
        Ok(())
    }

    /// 连接后半程：Zone 定位/创建、共享 Zone 列表、订阅安装
    async fn continue_connection(&self, zone_name: &str, record_type: &str) {
        let account = match self.local_account().await {
            Some(account) => account,
            None => return,
        };
        let zone_id = ZoneId::new(zone_name, account);

        match self.store.fetch_zone(Scope::Private, &zone_id).await {
            Ok(zone) => {
                let mut state = self.state.write().await;
                state.private_zone = Some(zone);
            }
            Err(GameSyncError::ZoneNotFound(_)) => {
                match self.store.create_zone(&zone_id).await {
                    Ok(zone) => {
                        info!(zone = %zone.zone_id, "专用 Zone 已创建");
                        let mut state = self.state.write().await;
                        state.private_zone = Some(zone);
                    }
                    Err(e) => warn!(error = %e, "创建专用 Zone 失败"),
                }
            }
            Err(e) => warn!(error = %e, "获取专用 Zone 失败"),
        }

        match self.store.list_zones(Scope::Shared).await {
            Ok(zones) => {
                let mut state = self.state.write().await;
                state.shared_zones = zones;
            }
            Err(e) => warn!(error = %e, "列出共享 Zone 失败"),
        }

        // 订阅安装失败不致命：没有推送还有轮询
        match self
            .store
            .install_subscription(Scope::Private, subscription_ids::PRIVATE, record_type)
            .await
        {
            Ok(subscription) => {
                info!(subscription = %subscription.id, "Subscription created");
                let mut state = self.state.write().await;
                state.private_subscription = Some(subscription);
            }
            Err(e) => warn!(error = %e, "安装 Private 订阅失败（轮询兜底）"),
        }
        match self
            .store
            .install_subscription(Scope::Shared, subscription_ids::SHARED, record_type)
            .await
        {
            Ok(subscription) => {
                info!(subscription = %subscription.id, "Subscription created");
                let mut state = self.state.write().await;
                state.shared_subscription = Some(subscription);
            }
            Err(e) => warn!(error = %e, "安装 Shared 订阅失败（轮询兜底）"),
        }
    }

    /// 就绪检查，带标签的结果由调用方分支
    pub async fn readiness(&self) -> Readiness {
        self.state.read().await.readiness()
    }

    /// 就绪门禁：未就绪时走状态错误回调并返回 None
    pub async fn assured(&self) -> Option<AssuredValues> {
        match self.readiness().await {
            Readiness::Ready(values) => Some(values),
            Readiness::NotReady { missing } => {
                self.report(GameSyncError::BadState(
                    missing.iter().map(|s| s.to_string()).collect(),
                ))
                .await;
                None
            }
        }
    }

    /// 与 assured 相同的检查，但以 Result 形式返回（组件内部用 `?` 传播）
    pub async fn assured_or_err(&self) -> Result<AssuredValues> {
        match self.readiness().await {
            Readiness::Ready(values) => Ok(values),
            Readiness::NotReady { missing } => {
                let missing: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
                Err(self.report(GameSyncError::BadState(missing)).await)
            }
        }
    }

    /// 本地账号标识（用户记录的 ID）
    pub async fn local_account(&self) -> Option<String> {
        let state = self.state.read().await;
        state.local_user.as_ref().map(|u| u.id.0.clone())
    }

    /// 本地账号的用户记录
    pub async fn local_user(&self) -> Option<Record> {
        let state = self.state.read().await;
        state.local_user.clone()
    }

    /// 当前可见的共享 Zone
    pub async fn shared_zones(&self) -> Vec<ZoneId> {
        let state = self.state.read().await;
        state.shared_zones.clone()
    }

    /// 接受共享授权并刷新共享 Zone 列表
    pub async fn accept_share(&self, zone_id: &ZoneId) -> Result<()> {
        self.store.accept_share(zone_id).await?;
        if let Ok(zones) = self.store.list_zones(Scope::Shared).await {
            let mut state = self.state.write().await;
            state.shared_zones = zones;
        }
        Ok(())
    }
}

/// 连接阶段错误分类
fn classify_connect_error(error: GameSyncError) -> GameSyncError {
    match error {
        GameSyncError::Transport(e) => GameSyncError::TransientRetryable(e),
        GameSyncError::SignInRequired
        | GameSyncError::AccountRestricted
        | GameSyncError::StatusUndetermined
        | GameSyncError::BadContainer(_)
        | GameSyncError::VersionIncompatible(_)
        | GameSyncError::BadConfiguration(_)
        | GameSyncError::TransientRetryable(_) => error,
        other => GameSyncError::Other(other.to_string()),
    }
}
