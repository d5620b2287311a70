//! 远端存储接口
//!
//! 连接管理、增量同步与写路径都只通过这个 trait 触达远端，
//! 不关心传输细节；测试与本地开发用 [`super::MemoryCloud`] 实现。

use async_trait::async_trait;

use crate::error::Result;
use crate::remote::{
    ChangeToken, DatabaseChanges, ModifyResponse, Record, RecordId, Scope, Subscription, Zone,
    ZoneId, ZoneChanges,
};

/// 账号状态
///
/// 远端账号校验是异步的，状态由服务端裁定后返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// 已登录且可用
    Available,
    /// 未登录
    NoAccount,
    /// 账号受限（家长控制等）
    Restricted,
    /// 状态无法确定，稍后可重试
    CouldNotDetermine,
}

/// 远端记录存储
///
/// ## NOTE: 接口不做重试
///
/// All retry / backoff policies live in `sync::SyncScheduler`. Implementations
/// report each failure once and must not retry internally, otherwise a delete
/// or save without an idempotency key may execute twice.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 查询当前账号状态
    async fn account_status(&self) -> Result<AccountStatus>;

    /// 取当前账号的用户记录（本地玩家快照的数据来源）
    async fn user_record(&self) -> Result<Record>;

    /// 按 ID 取 Zone；不存在时返回 `ZoneNotFound`
    async fn fetch_zone(&self, scope: Scope, zone_id: &ZoneId) -> Result<Zone>;

    /// 在 Private 分区创建 Zone
    async fn create_zone(&self, zone_id: &ZoneId) -> Result<Zone>;

    /// 列出分区内对本账号可见的全部 Zone
    async fn list_zones(&self, scope: Scope) -> Result<Vec<ZoneId>>;

    /// 安装库级变更订阅，返回安装后的订阅
    async fn install_subscription(
        &self,
        scope: Scope,
        subscription_id: &str,
        record_type: &str,
    ) -> Result<Subscription>;

    /// 库级增量拉取：自 `since` 以来发生变化/被删除的 Zone 及新库级游标。
    /// `since` 为 None 表示全量（所有 Zone 视作有变化）。
    async fn fetch_database_changes(
        &self,
        scope: Scope,
        since: Option<&ChangeToken>,
    ) -> Result<DatabaseChanges>;

    /// Zone 级增量拉取：自 `since` 以来变化的记录与删除引用及新 Zone 游标。
    /// `since` 为 None 表示该 Zone 全量。
    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone_id: &ZoneId,
        since: Option<&ChangeToken>,
    ) -> Result<ZoneChanges>;

    /// 写入：保存一条记录或删除一个 ID（二选一，由调用方保证）。
    /// 版本不匹配时返回 `Conflict`，错误中携带服务器当前版本。
    async fn modify(
        &self,
        scope: Scope,
        record: Option<Record>,
        delete: Option<RecordId>,
    ) -> Result<ModifyResponse>;

    /// 按 ID 读取单条记录的当前版本
    async fn fetch_record(&self, scope: Scope, record_id: &RecordId) -> Result<Record>;

    /// 接受一次共享授权（对方 Zone 自此出现在本账号的 Shared 分区）
    async fn accept_share(&self, zone_id: &ZoneId) -> Result<()>;
}
