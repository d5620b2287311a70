//! 统一 SDK 入口 - GameSyncSDK
//!
//! 分层组装：
//! ```text
//! GameSyncSDK
//!   ├── Connector        (账号校验、分区解析、就绪门禁)
//!   ├── StorageManager   (sled 缓存：记录镜像 + 同步游标)
//!   ├── DeltaSyncEngine  (库级 + Zone 级增量拉取)
//!   ├── RecordWriter     (乐观写与冲突提取)
//!   ├── SessionManager   (对局会话域层)
//!   ├── SyncScheduler    (重试 / 退避 / 轮询)
//!   └── EventManager     (会话事件广播)
//! ```
//!
//! SDK 是显式的上下文对象：一个实例对应一个账号会话，进程内可以
//! 并存多个互不相干的实例（测试里两名玩家各一个）。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::GameSyncConfig;
use crate::connector::Connector;
use crate::error::{GameSyncError, Result};
use crate::events::EventManager;
use crate::remote::{RemoteStore, Scope};
use crate::session::{SessionManager, SESSION_RECORD_TYPE};
use crate::storage::StorageManager;
use crate::sync::{DeltaSyncEngine, RecordWriter, SyncScheduler, SyncStatus};
use crate::version::SDK_VERSION;

/// SDK 主入口
pub struct GameSyncSDK {
    config: GameSyncConfig,
    storage: Arc<StorageManager>,
    connector: Arc<Connector>,
    sessions: Arc<SessionManager>,
    scheduler: Arc<SyncScheduler>,
    events: Arc<EventManager>,
    poll_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl GameSyncSDK {
    /// 组装 SDK（打开本地存储，不触网；连接另走 [`connect`](Self::connect)）
    pub async fn initialize(
        config: GameSyncConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Self>> {
        info!(version = SDK_VERSION, data_dir = %config.data_dir.display(), "初始化 GameSync SDK");
        let storage = Arc::new(StorageManager::init(&config.data_dir).await?);
        let connector = Arc::new(Connector::new(remote));
        let engine = Arc::new(DeltaSyncEngine::new(connector.clone(), storage.clone()));
        let writer = Arc::new(RecordWriter::new(connector.clone()));
        let events = Arc::new(EventManager::new(config.event_capacity));
        let sessions = Arc::new(SessionManager::new(
            connector.clone(),
            engine.clone(),
            writer,
            storage.clone(),
            events.clone(),
        ));
        let scheduler = Arc::new(SyncScheduler::new(
            engine,
            sessions.clone(),
            config.retry.clone(),
        ));
        Ok(Arc::new(Self {
            config,
            storage,
            connector,
            sessions,
            scheduler,
            events,
            poll_handle: tokio::sync::Mutex::new(None),
        }))
    }

    /// 建立连接（账号校验、Zone 定位/创建、订阅安装）
    pub async fn connect(&self) -> Result<()> {
        self.connector
            .connect(
                &self.config.container,
                &self.config.zone_name,
                SESSION_RECORD_TYPE,
            )
            .await
    }

    pub fn config(&self) -> &GameSyncConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// 当前同步状态
    pub async fn sync_status(&self) -> SyncStatus {
        self.scheduler.status().await
    }

    /// 注册连接状态错误回调
    pub async fn on_state_error<F>(&self, callback: F)
    where
        F: Fn(&GameSyncError) + Send + Sync + 'static,
    {
        self.connector.on_state_error(callback).await;
    }

    /// 远端订阅通知到达时调用：对指定分区做一次带重试的增量消化
    pub async fn handle_remote_notification(&self, scope: Scope) -> Result<()> {
        self.scheduler.poll_once(scope).await.map(|_| ())
    }

    /// 启动后台轮询（订阅装不上时的兜底路径，装上了也无妨）
    pub async fn start_polling(&self) {
        let mut handle = self.poll_handle.lock().await;
        if handle.is_some() {
            return;
        }
        *handle = Some(self.scheduler.start(self.config.poll_interval));
    }

    /// 停止轮询并把缓存落盘
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown();
        let mut handle = self.poll_handle.lock().await;
        if let Some(handle) = handle.take() {
            handle.abort();
        }
        self.storage.flush().await?;
        info!("GameSync SDK 已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryCloud;
    use tempfile::TempDir;

    #[tokio::test]
    async fn initialize_connect_and_shutdown() {
        let cloud = MemoryCloud::new();
        cloud.register_account("p1", "Player One").await;
        let dir = TempDir::new().unwrap();
        let config = GameSyncConfig::builder()
            .data_dir(dir.path())
            .container("test-container")
            .build()
            .unwrap();
        let sdk = GameSyncSDK::initialize(config, Arc::new(cloud.store_for("p1")))
            .await
            .unwrap();

        sdk.connect().await.unwrap();
        let session = sdk.sessions().create_session("Match 1").await.unwrap();
        assert_eq!(session.title(), "Match 1");

        // 订阅通知映射为一次增量消化
        sdk.handle_remote_notification(Scope::Private).await.unwrap();
        sdk.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn two_independent_instances_coexist() {
        let cloud = MemoryCloud::new();
        cloud.register_account("p1", "Player One").await;
        cloud.register_account("p2", "Player Two").await;
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();

        let sdk1 = GameSyncSDK::initialize(
            GameSyncConfig::builder().data_dir(dir1.path()).build().unwrap(),
            Arc::new(cloud.store_for("p1")),
        )
        .await
        .unwrap();
        let sdk2 = GameSyncSDK::initialize(
            GameSyncConfig::builder().data_dir(dir2.path()).build().unwrap(),
            Arc::new(cloud.store_for("p2")),
        )
        .await
        .unwrap();

        sdk1.connect().await.unwrap();
        sdk2.connect().await.unwrap();
        sdk1.sessions().create_session("Match 1").await.unwrap();

        // 各自独立的缓存与连接状态
        assert_eq!(sdk1.sessions().cached_sessions().await.unwrap().len(), 1);
        assert!(sdk2.sessions().cached_sessions().await.unwrap().is_empty());

        sdk1.shutdown().await.unwrap();
        sdk2.shutdown().await.unwrap();
    }
}
