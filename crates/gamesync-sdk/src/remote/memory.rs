//! 内存版远端存储
//!
//! 在进程内模拟带版本与共享授权的多账号记录存储，供测试、示例与本地开发使用。
//! 语义与真实服务端一致：
//! - 全局单调时钟，每次变更推进一格；游标即时钟值的不透明编码
//! - 保存时校验 change_tag，不匹配返回冲突并携带服务器当前版本
//! - Zone 删除与记录删除都会留下墓碑，供增量拉取回放
//!
//! 一个 [`MemoryCloud`] 是一台"服务器"，[`MemoryCloud::store_for`] 为每个账号
//! 发一个实现 [`RemoteStore`] 的句柄。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{GameSyncError, Result};
use crate::remote::store::{AccountStatus, RemoteStore};
use crate::remote::{
    ChangeToken, DatabaseChanges, FieldValue, ModifyResponse, Record, RecordId, Scope,
    Subscription, Zone, ZoneChanges, ZoneId,
};

const USER_RECORD_TYPE: &str = "Users";
const DISPLAY_NAME_FIELD: &str = "displayName";

struct AccountInfo {
    display_name: String,
    status: AccountStatus,
}

struct StoredRecord {
    record: Record,
    /// 最后一次变更时的时钟值
    changed_at: u64,
}

struct Tombstone {
    at: u64,
    id: RecordId,
    record_type: String,
}

#[derive(Default)]
struct ZoneState {
    records: HashMap<RecordId, StoredRecord>,
    tombstones: Vec<Tombstone>,
    last_change: u64,
}

struct DeletedZone {
    at: u64,
    zone_id: ZoneId,
    grantees: HashSet<String>,
}

#[derive(Default)]
struct CloudState {
    clock: u64,
    accounts: HashMap<String, AccountInfo>,
    zones: HashMap<ZoneId, ZoneState>,
    /// zone -> 已接受共享的账号
    grants: HashMap<ZoneId, HashSet<String>>,
    /// zone -> 已邀请但未接受的账号
    pending_invites: HashMap<ZoneId, HashSet<String>>,
    deleted_zones: Vec<DeletedZone>,
    subscriptions: Vec<(String, Subscription)>,
}

impl CloudState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// 分区内对账号可见的 Zone
    fn visible_zones(&self, account: &str, scope: Scope) -> Vec<ZoneId> {
        self.zones
            .keys()
            .filter(|zone_id| self.is_visible(account, scope, zone_id))
            .cloned()
            .collect()
    }

    fn is_visible(&self, account: &str, scope: Scope, zone_id: &ZoneId) -> bool {
        match scope {
            Scope::Private => zone_id.owner == account,
            Scope::Shared => self
                .grants
                .get(zone_id)
                .map(|g| g.contains(account))
                .unwrap_or(false),
        }
    }
}

fn encode_clock(clock: u64) -> ChangeToken {
    ChangeToken::new(clock.to_be_bytes().to_vec())
}

fn decode_clock(token: Option<&ChangeToken>) -> Result<u64> {
    match token {
        None => Ok(0),
        Some(token) => {
            let bytes: [u8; 8] = token
                .as_bytes()
                .try_into()
                .map_err(|_| GameSyncError::Transport("malformed change token".to_string()))?;
            Ok(u64::from_be_bytes(bytes))
        }
    }
}

/// 进程内"服务器"。Clone 共享同一份状态。
#[derive(Clone)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState::default())),
        }
    }

    /// 注册账号，默认状态为已登录
    pub async fn register_account(&self, account: &str, display_name: &str) {
        let mut state = self.state.lock().await;
        state.accounts.insert(
            account.to_string(),
            AccountInfo {
                display_name: display_name.to_string(),
                status: AccountStatus::Available,
            },
        );
    }

    /// 调整账号状态（模拟未登录/受限等场景）
    pub async fn set_account_status(&self, account: &str, status: AccountStatus) {
        let mut state = self.state.lock().await;
        if let Some(info) = state.accounts.get_mut(account) {
            info.status = status;
        }
    }

    /// 为账号发一个 RemoteStore 句柄
    pub fn store_for(&self, account: &str) -> MemoryStore {
        MemoryStore {
            cloud: self.clone(),
            account: account.to_string(),
        }
    }

    /// 邀请账号共享一个 Zone（待对方 accept_share 后生效）
    pub async fn invite(&self, zone_id: &ZoneId, account: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.zones.contains_key(zone_id) {
            return Err(GameSyncError::ZoneNotFound(zone_id.to_string()));
        }
        state
            .pending_invites
            .entry(zone_id.clone())
            .or_default()
            .insert(account.to_string());
        Ok(())
    }

    /// 邀请并直接接受（测试便捷入口）
    pub async fn share_zone(&self, zone_id: &ZoneId, account: &str) -> Result<()> {
        self.invite(zone_id, account).await?;
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending_invites.get_mut(zone_id) {
            pending.remove(account);
        }
        state
            .grants
            .entry(zone_id.clone())
            .or_default()
            .insert(account.to_string());
        // 授权本身算一次变更，让对方的下一轮库级拉取能看到这个 Zone
        let clock = state.tick();
        if let Some(zone) = state.zones.get_mut(zone_id) {
            zone.last_change = clock;
        }
        Ok(())
    }

    /// 删除整个 Zone（记录内容随之不可恢复，增量拉取方收到 Zone 删除）
    pub async fn delete_zone(&self, zone_id: &ZoneId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.zones.remove(zone_id).is_none() {
            return Err(GameSyncError::ZoneNotFound(zone_id.to_string()));
        }
        let grantees = state.grants.remove(zone_id).unwrap_or_default();
        state.pending_invites.remove(zone_id);
        let at = state.tick();
        state.deleted_zones.push(DeletedZone {
            at,
            zone_id: zone_id.clone(),
            grantees,
        });
        Ok(())
    }
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

/// 单个账号视角的远端存储句柄
#[derive(Clone)]
pub struct MemoryStore {
    cloud: MemoryCloud,
    account: String,
}

impl MemoryStore {
    pub fn account(&self) -> &str {
        &self.account
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn account_status(&self) -> Result<AccountStatus> {
        let state = self.cloud.state.lock().await;
        Ok(state
            .accounts
            .get(&self.account)
            .map(|info| info.status)
            .unwrap_or(AccountStatus::NoAccount))
    }

    async fn user_record(&self) -> Result<Record> {
        let state = self.cloud.state.lock().await;
        let info = state
            .accounts
            .get(&self.account)
            .ok_or(GameSyncError::SignInRequired)?;
        let mut record = Record::new(
            USER_RECORD_TYPE,
            ZoneId::new("_users", self.account.clone()),
        );
        record.id = RecordId(self.account.clone());
        record.modified_at = Some(Utc::now());
        record.set_field(
            DISPLAY_NAME_FIELD,
            FieldValue::Text(info.display_name.clone()),
        );
        Ok(record)
    }

    async fn fetch_zone(&self, scope: Scope, zone_id: &ZoneId) -> Result<Zone> {
        let state = self.cloud.state.lock().await;
        if state.zones.contains_key(zone_id) && state.is_visible(&self.account, scope, zone_id) {
            Ok(Zone {
                zone_id: zone_id.clone(),
            })
        } else {
            Err(GameSyncError::ZoneNotFound(zone_id.to_string()))
        }
    }

    async fn create_zone(&self, zone_id: &ZoneId) -> Result<Zone> {
        if zone_id.owner != self.account {
            return Err(GameSyncError::InvalidArgument(format!(
                "zone owner {} is not the calling account",
                zone_id.owner
            )));
        }
        let mut state = self.cloud.state.lock().await;
        let clock = state.tick();
        let zone = state.zones.entry(zone_id.clone()).or_default();
        zone.last_change = clock;
        debug!(zone = %zone_id, "memory cloud: zone created");
        Ok(Zone {
            zone_id: zone_id.clone(),
        })
    }

    async fn list_zones(&self, scope: Scope) -> Result<Vec<ZoneId>> {
        let state = self.cloud.state.lock().await;
        Ok(state.visible_zones(&self.account, scope))
    }

    async fn install_subscription(
        &self,
        scope: Scope,
        subscription_id: &str,
        record_type: &str,
    ) -> Result<Subscription> {
        let subscription = Subscription {
            id: subscription_id.to_string(),
            scope,
            record_type: record_type.to_string(),
        };
        let mut state = self.cloud.state.lock().await;
        state
            .subscriptions
            .push((self.account.clone(), subscription.clone()));
        Ok(subscription)
    }

    async fn fetch_database_changes(
        &self,
        scope: Scope,
        since: Option<&ChangeToken>,
    ) -> Result<DatabaseChanges> {
        let since = decode_clock(since)?;
        let state = self.cloud.state.lock().await;
        let changed_zones = state
            .zones
            .iter()
            .filter(|(zone_id, zone)| {
                zone.last_change > since && state.is_visible(&self.account, scope, zone_id)
            })
            .map(|(zone_id, _)| zone_id.clone())
            .collect();
        let deleted_zones = state
            .deleted_zones
            .iter()
            .filter(|dz| {
                dz.at > since
                    && match scope {
                        Scope::Private => dz.zone_id.owner == self.account,
                        Scope::Shared => dz.grantees.contains(&self.account),
                    }
            })
            .map(|dz| dz.zone_id.clone())
            .collect();
        Ok(DatabaseChanges {
            changed_zones,
            deleted_zones,
            change_token: encode_clock(state.clock),
        })
    }

    async fn fetch_zone_changes(
        &self,
        scope: Scope,
        zone_id: &ZoneId,
        since: Option<&ChangeToken>,
    ) -> Result<ZoneChanges> {
        let since = decode_clock(since)?;
        let state = self.cloud.state.lock().await;
        if !state.is_visible(&self.account, scope, zone_id) {
            return Err(GameSyncError::ZoneNotFound(zone_id.to_string()));
        }
        let zone = state
            .zones
            .get(zone_id)
            .ok_or_else(|| GameSyncError::ZoneNotFound(zone_id.to_string()))?;
        let changed_records = zone
            .records
            .values()
            .filter(|stored| stored.changed_at > since)
            .map(|stored| stored.record.clone())
            .collect();
        let deleted_records = zone
            .tombstones
            .iter()
            .filter(|t| t.at > since)
            .map(|t| crate::remote::DeletedRecord {
                id: t.id.clone(),
                record_type: t.record_type.clone(),
            })
            .collect();
        Ok(ZoneChanges {
            changed_records,
            deleted_records,
            change_token: encode_clock(state.clock),
        })
    }

    async fn modify(
        &self,
        scope: Scope,
        record: Option<Record>,
        delete: Option<RecordId>,
    ) -> Result<ModifyResponse> {
        let mut state = self.cloud.state.lock().await;

        if let Some(mut record) = record {
            if !state.is_visible(&self.account, scope, &record.zone) {
                return Err(GameSyncError::ZoneNotFound(record.zone.to_string()));
            }
            let clock = state.tick();
            let zone = state
                .zones
                .get_mut(&record.zone)
                .ok_or_else(|| GameSyncError::ZoneNotFound(record.zone.to_string()))?;

            if let Some(stored) = zone.records.get(&record.id) {
                // 乐观并发：提交必须基于服务器当前版本
                if record.change_tag != stored.record.change_tag {
                    return Err(GameSyncError::Conflict {
                        server_record: Box::new(stored.record.clone()),
                    });
                }
                record.created_at = stored.record.created_at;
            } else {
                record.created_at = Some(Utc::now());
            }

            record.modified_at = Some(Utc::now());
            record.modified_by = Some(self.account.clone());
            record.change_tag = Some(clock.to_string());
            zone.records.insert(
                record.id.clone(),
                StoredRecord {
                    record: record.clone(),
                    changed_at: clock,
                },
            );
            zone.last_change = clock;
            return Ok(ModifyResponse {
                saved: Some(record),
                deleted: None,
            });
        }

        if let Some(record_id) = delete {
            // 删除只在持有者的 Private 分区定位记录：遍历可见 Zone
            let zone_id = state
                .zones
                .iter()
                .find(|(zone_id, zone)| {
                    zone.records.contains_key(&record_id)
                        && state.is_visible(&self.account, scope, zone_id)
                })
                .map(|(zone_id, _)| zone_id.clone())
                .ok_or_else(|| GameSyncError::RecordNotFound(record_id.to_string()))?;
            let clock = state.tick();
            let zone = state.zones.get_mut(&zone_id).expect("zone exists");
            let stored = zone.records.remove(&record_id).expect("record exists");
            zone.tombstones.push(Tombstone {
                at: clock,
                id: record_id.clone(),
                record_type: stored.record.record_type,
            });
            zone.last_change = clock;
            return Ok(ModifyResponse {
                saved: None,
                deleted: Some(record_id),
            });
        }

        Err(GameSyncError::InvalidArgument(
            "modify requires a record to save or an id to delete".to_string(),
        ))
    }

    async fn fetch_record(&self, scope: Scope, record_id: &RecordId) -> Result<Record> {
        let state = self.cloud.state.lock().await;
        state
            .zones
            .iter()
            .filter(|(zone_id, _)| state.is_visible(&self.account, scope, zone_id))
            .find_map(|(_, zone)| zone.records.get(record_id))
            .map(|stored| stored.record.clone())
            .ok_or_else(|| GameSyncError::RecordNotFound(record_id.to_string()))
    }

    async fn accept_share(&self, zone_id: &ZoneId) -> Result<()> {
        let mut state = self.cloud.state.lock().await;
        let invited = state
            .pending_invites
            .get_mut(zone_id)
            .map(|pending| pending.remove(&self.account))
            .unwrap_or(false);
        if !invited {
            return Err(GameSyncError::InvalidOperation(format!(
                "no pending share invite for zone {}",
                zone_id
            )));
        }
        state
            .grants
            .entry(zone_id.clone())
            .or_default()
            .insert(self.account.clone());
        let clock = state.tick();
        if let Some(zone) = state.zones.get_mut(zone_id) {
            zone.last_change = clock;
        }
        Ok(())
    }
}
