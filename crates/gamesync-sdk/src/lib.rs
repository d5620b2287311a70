//! GameSync SDK - 双人对局会话的云端增量同步
//!
//! 在带私有/共享可见性的远端记录存储之上，维护一份最终一致的本地镜像：
//! - 🔄 游标驱动的增量同步：库级 + Zone 级双层游标，整轮成功才推进
//! - ⚔️ 乐观写冲突处理：冲突错误携带服务器当前版本作为合并基准
//! - 💾 可恢复：游标与记录镜像持久化，重启后从检查点续拉
//! - 🎮 会话域层：所有者/对手双人模型、版本化对局数据信封
//! - ⚙️ 事件系统：加入 / 数据保存 / 删除 / 移除参与者四类通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gamesync_sdk::{GameSyncConfig, GameSyncSDK, MemoryCloud};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 远端存储（示例用内存实现，生产环境接真实后端）
//!     let cloud = MemoryCloud::new();
//!     cloud.register_account("alice", "Alice").await;
//!
//!     let config = GameSyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .container("my-app.sessions")
//!         .build()?;
//!     let sdk = GameSyncSDK::initialize(config, Arc::new(cloud.store_for("alice"))).await?;
//!
//!     sdk.connect().await?;
//!     let session = sdk.sessions().create_session("Match 1").await?;
//!     println!("created session: {}", session.id());
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod remote;
pub mod sdk;
pub mod session;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod version;

pub use config::{GameSyncConfig, GameSyncConfigBuilder, DEFAULT_CONTAINER, DEFAULT_ZONE_NAME};
pub use connector::{AssuredValues, Connector, DatabaseRef, Readiness};
pub use error::{GameSyncError, Result};
pub use events::{EventManager, EventStats, SessionEvent};
pub use remote::{
    AccountStatus, ChangeToken, DeletedRecord, FieldValue, MemoryCloud, MemoryStore, Record,
    RecordId, RemoteStore, Scope, Subscription, Zone, ZoneId,
};
pub use sdk::GameSyncSDK;
pub use session::{CloudPlayer, GameSession, SessionManager, SESSION_RECORD_TYPE};
pub use storage::{CachedRecord, KvStore, RecordCache, StorageManager, TokenCache};
pub use sync::{
    ChangeRound, DeltaSyncEngine, RecordWriter, RetryPolicy, RoundConsumer, SyncPhase,
    SyncScheduler, SyncStatus,
};
pub use version::{API_VERSION, SDK_VERSION};
