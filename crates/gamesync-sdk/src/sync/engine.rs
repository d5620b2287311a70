//! 增量同步引擎
//!
//! 一轮拉取 = 一次库级变更拉取 + 对每个变化 Zone 的一次 Zone 级拉取。
//! Zone 级拉取在拿到 Zone 列表后并发执行，但游标推进是整轮的屏障点：
//! 只有库级与全部 Zone 级拉取都成功，才把本轮全部游标一次性落盘。
//! 任何一步失败立即返回错误、游标原样不动，下一次调用从同一检查点
//! 安全重试（可能重复投递，绝不丢数据）。取消同理：在提交点之前放弃
//! 这轮的 future 不会推进任何游标。
//!
//! ## NOTE: Engine 不做重试
//!
//! The engine does not retry. All retry / backoff / polling policies live in
//! [`super::SyncScheduler`]; without it the sync system only moves when the
//! caller polls.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::connector::Connector;
use crate::error::{GameSyncError, Result};
use crate::remote::{ChangeToken, DeletedRecord, Record, RemoteStore, Scope, ZoneId};
use crate::storage::StorageManager;

/// 一轮增量拉取的聚合结果（不可变，取代逐回调累加）
#[derive(Debug, Clone)]
pub struct ChangeRound {
    pub scope: Scope,
    /// 变化的记录（带分区，分区无法从记录本身恢复）
    pub changed: Vec<(Record, Scope)>,
    /// 删除的记录引用
    pub deleted: Vec<(DeletedRecord, Scope)>,
    /// 整个被删除的 Zone
    pub deleted_zones: Vec<ZoneId>,
    /// 本轮是否为全量拉取（入参游标为空）
    pub full_resync: bool,
}

/// 增量同步引擎
pub struct DeltaSyncEngine {
    connector: Arc<Connector>,
    storage: Arc<StorageManager>,
}

impl DeltaSyncEngine {
    pub fn new(connector: Arc<Connector>, storage: Arc<StorageManager>) -> Self {
        Self { connector, storage }
    }

    /// 从上次持久化的库级游标继续拉取
    pub async fn fetch_latest_changes(&self, scope: Scope) -> Result<ChangeRound> {
        let token = self.storage.tokens().database_token(scope).await?;
        self.fetch_changes(scope, token).await
    }

    /// 按给定库级游标拉取一轮增量
    ///
    /// `token` 为 None 时是全量拉取：服务器把所有 Zone 视作有变化，
    /// 本轮也忽略已持久化的 Zone 游标，让每个 Zone 重放完整状态。
    pub async fn fetch_changes(
        &self,
        scope: Scope,
        token: Option<ChangeToken>,
    ) -> Result<ChangeRound> {
        self.connector.assured_or_err().await?;
        let store = self.connector.store().clone();
        let full_resync = token.is_none();

        let db_changes = store.fetch_database_changes(scope, token.as_ref()).await?;
        debug!(
            scope = %scope,
            changed_zones = db_changes.changed_zones.len(),
            deleted_zones = db_changes.deleted_zones.len(),
            full_resync,
            "库级变更拉取完成"
        );

        let zone_tokens = if full_resync {
            HashMap::new()
        } else {
            self.storage.tokens().zone_tokens(scope).await?
        };

        // Zone 级拉取相互独立，并发执行；任何一个失败整轮失败
        let zone_fetches = db_changes.changed_zones.iter().map(|zone_id| {
            let store = store.clone();
            let since = zone_tokens.get(zone_id).cloned();
            let zone_id = zone_id.clone();
            async move {
                let changes = store
                    .fetch_zone_changes(scope, &zone_id, since.as_ref())
                    .await?;
                Ok::<_, GameSyncError>((zone_id, changes))
            }
        });
        let zone_results = try_join_all(zone_fetches).await?;

        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        let mut zone_token_updates = HashMap::new();
        for (zone_id, changes) in zone_results {
            changed.extend(changes.changed_records.into_iter().map(|r| (r, scope)));
            deleted.extend(changes.deleted_records.into_iter().map(|d| (d, scope)));
            zone_token_updates.insert(zone_id, changes.change_token);
        }

        // 屏障点：整轮成功后才推进游标。被删除的 Zone 不拉记录，
        // 但它的游标清理和新库级游标一样要在这轮提交里生效。
        self.storage
            .tokens()
            .commit_round(
                scope,
                db_changes.change_token,
                zone_token_updates,
                &db_changes.deleted_zones,
            )
            .await?;

        info!(
            scope = %scope,
            changed = changed.len(),
            deleted = deleted.len(),
            "增量拉取一轮完成"
        );
        Ok(ChangeRound {
            scope,
            changed,
            deleted,
            deleted_zones: db_changes.deleted_zones,
            full_resync,
        })
    }

    /// 跨两个分区全量拉取所有记录
    pub async fn fetch_all_records(&self) -> Result<Vec<(Record, Scope)>> {
        let mut all = Vec::new();
        for scope in Scope::ALL {
            let round = self.fetch_changes(scope, None).await?;
            all.extend(round.changed);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::store::{AccountStatus, RemoteStore};
    use crate::remote::{
        DatabaseChanges, FieldValue, MemoryCloud, MemoryStore, ModifyResponse, RecordId,
        Subscription, Zone, ZoneChanges,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    const ZONE: &str = "Games";
    const RECORD_TYPE: &str = "GameSession";

    /// 包装 MemoryStore，按开关让 Zone 级拉取失败（模拟半途断网）
    struct FlakyStore {
        inner: MemoryStore,
        fail_zone_fetch: AtomicBool,
        zone_fetch_calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_zone_fetch: AtomicBool::new(false),
                zone_fetch_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn account_status(&self) -> crate::error::Result<AccountStatus> {
            self.inner.account_status().await
        }
        async fn user_record(&self) -> crate::error::Result<Record> {
            self.inner.user_record().await
        }
        async fn fetch_zone(&self, scope: Scope, zone_id: &ZoneId) -> crate::error::Result<Zone> {
            self.inner.fetch_zone(scope, zone_id).await
        }
        async fn create_zone(&self, zone_id: &ZoneId) -> crate::error::Result<Zone> {
            self.inner.create_zone(zone_id).await
        }
        async fn list_zones(&self, scope: Scope) -> crate::error::Result<Vec<ZoneId>> {
            self.inner.list_zones(scope).await
        }
        async fn install_subscription(
            &self,
            scope: Scope,
            subscription_id: &str,
            record_type: &str,
        ) -> crate::error::Result<Subscription> {
            self.inner
                .install_subscription(scope, subscription_id, record_type)
                .await
        }
        async fn fetch_database_changes(
            &self,
            scope: Scope,
            since: Option<&ChangeToken>,
        ) -> crate::error::Result<DatabaseChanges> {
            self.inner.fetch_database_changes(scope, since).await
        }
        async fn fetch_zone_changes(
            &self,
            scope: Scope,
            zone_id: &ZoneId,
            since: Option<&ChangeToken>,
        ) -> crate::error::Result<ZoneChanges> {
            self.zone_fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_zone_fetch.load(Ordering::SeqCst) {
                return Err(GameSyncError::Transport("simulated outage".to_string()));
            }
            self.inner.fetch_zone_changes(scope, zone_id, since).await
        }
        async fn modify(
            &self,
            scope: Scope,
            record: Option<Record>,
            delete: Option<RecordId>,
        ) -> crate::error::Result<ModifyResponse> {
            self.inner.modify(scope, record, delete).await
        }
        async fn fetch_record(
            &self,
            scope: Scope,
            record_id: &RecordId,
        ) -> crate::error::Result<Record> {
            self.inner.fetch_record(scope, record_id).await
        }
        async fn accept_share(&self, zone_id: &ZoneId) -> crate::error::Result<()> {
            self.inner.accept_share(zone_id).await
        }
    }

    struct Rig {
        cloud: MemoryCloud,
        store: Arc<FlakyStore>,
        engine: DeltaSyncEngine,
        storage: Arc<StorageManager>,
        _dir: TempDir,
    }

    async fn rig() -> Rig {
        let cloud = MemoryCloud::new();
        cloud.register_account("p1", "Player One").await;
        let store = Arc::new(FlakyStore::new(cloud.store_for("p1")));
        let connector = Arc::new(Connector::new(store.clone()));
        connector
            .connect("test-container", ZONE, RECORD_TYPE)
            .await
            .unwrap();
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::init(dir.path()).await.unwrap());
        let engine = DeltaSyncEngine::new(connector, storage.clone());
        Rig {
            cloud,
            store,
            engine,
            storage,
            _dir: dir,
        }
    }

    fn token_value(token: &ChangeToken) -> u64 {
        u64::from_be_bytes(token.as_bytes().try_into().unwrap())
    }

    async fn save_session(rig: &Rig, title: &str) -> Record {
        let mut record = Record::new(RECORD_TYPE, ZoneId::new(ZONE, "p1"));
        record.set_field("title", FieldValue::Text(title.to_string()));
        rig.store
            .modify(Scope::Private, Some(record), None)
            .await
            .unwrap()
            .saved
            .unwrap()
    }

    #[tokio::test]
    async fn full_then_incremental_round() {
        let rig = rig().await;
        let saved = save_session(&rig, "Match 1").await;

        let round = rig.engine.fetch_changes(Scope::Private, None).await.unwrap();
        assert!(round.full_resync);
        assert_eq!(round.changed.len(), 1);
        assert_eq!(round.changed[0].0.id, saved.id);
        let first_token = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap()
            .expect("token persisted after success");

        // 没有新变化的增量轮：记录为空，游标照常推进
        let round = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();
        assert!(!round.full_resync);
        assert!(round.changed.is_empty());

        // 新写入后，下一轮只带增量，且游标严格超越上一轮
        save_session(&rig, "Match 2").await;
        let round = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();
        assert_eq!(round.changed.len(), 1);
        let second_token = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap()
            .unwrap();
        assert!(token_value(&second_token) > token_value(&first_token));
    }

    #[tokio::test]
    async fn failed_round_leaves_tokens_unchanged() {
        let rig = rig().await;
        save_session(&rig, "Match 1").await;
        rig.engine.fetch_changes(Scope::Private, None).await.unwrap();
        let before = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap();
        let zones_before = rig.storage.tokens().zone_tokens(Scope::Private).await.unwrap();

        save_session(&rig, "Match 2").await;
        rig.store.fail_zone_fetch.store(true, Ordering::SeqCst);
        let err = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap_err();
        assert!(matches!(err, GameSyncError::Transport(_)));

        // fetch_fails ⇒ tokens_unchanged
        let after = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(
            zones_before,
            rig.storage.tokens().zone_tokens(Scope::Private).await.unwrap()
        );

        // 崩溃后重试：同一检查点重新拉取，上一轮的更新一条不少
        rig.store.fail_zone_fetch.store(false, Ordering::SeqCst);
        let retried = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();
        let titles: Vec<_> = retried
            .changed
            .iter()
            .filter_map(|(r, _)| r.field("title").and_then(|v| v.as_text()))
            .collect();
        assert!(titles.contains(&"Match 2"));
    }

    #[tokio::test]
    async fn deleted_zone_still_advances_database_token() {
        let rig = rig().await;
        save_session(&rig, "Match 1").await;
        rig.engine.fetch_changes(Scope::Private, None).await.unwrap();
        let before = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap()
            .unwrap();
        assert!(!rig
            .storage
            .tokens()
            .zone_tokens(Scope::Private)
            .await
            .unwrap()
            .is_empty());

        rig.cloud.delete_zone(&ZoneId::new(ZONE, "p1")).await.unwrap();
        let round = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();
        assert_eq!(round.deleted_zones, vec![ZoneId::new(ZONE, "p1")]);
        assert!(round.changed.is_empty());

        let after = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap()
            .unwrap();
        assert!(token_value(&after) > token_value(&before));
        // 被删除 Zone 的游标随本轮提交清理
        assert!(rig
            .storage
            .tokens()
            .zone_tokens(Scope::Private)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_superset_not_loss() {
        let rig = rig().await;
        rig.engine.fetch_changes(Scope::Private, None).await.unwrap();
        let checkpoint_db = rig
            .storage
            .tokens()
            .database_token(Scope::Private)
            .await
            .unwrap()
            .unwrap();
        let checkpoint_zones = rig.storage.tokens().zone_tokens(Scope::Private).await.unwrap();

        let saved = save_session(&rig, "Match 1").await;
        let first = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();

        // 模拟提交前崩溃：把库级与 Zone 级游标整体回滚到检查点，重放这一轮
        rig.storage
            .tokens()
            .commit_round(Scope::Private, checkpoint_db, checkpoint_zones, &[])
            .await
            .unwrap();
        let replay = rig.engine.fetch_latest_changes(Scope::Private).await.unwrap();

        let first_ids: Vec<_> = first.changed.iter().map(|(r, _)| r.id.clone()).collect();
        let replay_ids: Vec<_> = replay.changed.iter().map(|(r, _)| r.id.clone()).collect();
        assert!(first_ids.contains(&saved.id));
        for id in &first_ids {
            assert!(replay_ids.contains(id), "重放不允许丢失更新");
        }
    }
}
