//! 对局会话域模型
//!
//! 把通用记录收窄成"双人对局会话"：所有者在创建时落位且不再变更，
//! 对手从无到有只发生一次，对局数据放在版本化信封里的 cachedData 字段。
//! 玩家以反规范化快照内嵌在会话记录里（省一次往返，可能相对账号
//! 资料过期）。
//!
//! [`SessionManager`] 是域层入口：建会话、全量加载、读写对局数据、
//! 消化增量轮并对外发事件。

pub mod envelope;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connector::Connector;
use crate::error::{GameSyncError, Result};
use crate::events::{now_secs, EventManager, SessionEvent};
use crate::remote::{FieldValue, Record, RecordId, RemoteStore, Scope};
use crate::storage::StorageManager;
use crate::sync::engine::{ChangeRound, DeltaSyncEngine};
use crate::sync::writer::RecordWriter;
use crate::sync::RoundConsumer;

/// 会话记录类型标签
pub const SESSION_RECORD_TYPE: &str = "GameSession";

/// 会话记录的字段名
mod keys {
    pub const TITLE: &str = "title";
    pub const OWNER: &str = "owner";
    pub const OPPONENT: &str = "opponent";
    pub const CACHED_DATA: &str = "cachedData";
    pub const DISPLAY_NAME: &str = "displayName";
}

/// 玩家快照（内嵌在会话记录里，非引用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudPlayer {
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(rename = "playerID")]
    pub player_id: Option<String>,
    #[serde(rename = "modificationDate")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl CloudPlayer {
    /// 从账号的用户记录取快照
    pub fn from_user_record(record: &Record) -> Self {
        Self {
            display_name: record
                .field(keys::DISPLAY_NAME)
                .and_then(|v| v.as_text())
                .map(String::from),
            player_id: Some(record.id.0.clone()),
            modified_at: record.modified_at,
        }
    }
}

/// 双人对局会话：通用记录上的类型化门面
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    record: Record,
    scope: Scope,
}

impl GameSession {
    /// 从记录构造；类型不符返回 None
    pub fn from_record(record: Record, scope: Scope) -> Option<Self> {
        if record.record_type != SESSION_RECORD_TYPE {
            return None;
        }
        Some(Self { record, scope })
    }

    pub fn id(&self) -> &RecordId {
        &self.record.id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn title(&self) -> String {
        self.record
            .field(keys::TITLE)
            .and_then(|v| v.as_text())
            .unwrap_or_default()
            .to_string()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.record.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.record.modified_at
    }

    fn player_field(&self, key: &str) -> Option<CloudPlayer> {
        let bytes = self.record.field(key)?.as_bytes()?;
        match serde_json::from_slice(bytes) {
            Ok(player) => Some(player),
            Err(e) => {
                debug!(session = %self.record.id, key, error = %e, "玩家快照解码失败");
                None
            }
        }
    }

    /// 所有者（创建时落位，不再变更）
    pub fn owner(&self) -> Option<CloudPlayer> {
        self.player_field(keys::OWNER)
    }

    /// 对手（第二名玩家加入前为 None）
    pub fn opponent(&self) -> Option<CloudPlayer> {
        self.player_field(keys::OPPONENT)
    }

    /// 按加入顺序列出玩家
    pub fn players(&self) -> Vec<CloudPlayer> {
        let mut players = Vec::new();
        if let Some(owner) = self.owner() {
            players.push(owner);
            if let Some(opponent) = self.opponent() {
                players.push(opponent);
            }
        }
        players
    }

    /// 对手是否已加入（派生信号）
    pub fn remote_player_joined(&self) -> bool {
        self.opponent().is_some()
    }

    /// 信封包装前的原始对局数据字节
    pub fn cached_data(&self) -> Option<&[u8]> {
        self.record.field(keys::CACHED_DATA).and_then(|v| v.as_bytes())
    }

    /// 解码当前会话里的对局数据
    pub fn game_data<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .cached_data()
            .ok_or_else(|| GameSyncError::DecodeFailure("session has no game data".to_string()))?;
        envelope::decode(data)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    fn set_player_field(&mut self, key: &str, player: Option<&CloudPlayer>) -> Result<()> {
        match player {
            Some(player) => {
                let bytes = serde_json::to_vec(player)
                    .map_err(|e| GameSyncError::EncodeFailure(e.to_string()))?;
                self.record.set_field(key, FieldValue::Bytes(bytes));
            }
            None => {
                self.record.remove_field(key);
            }
        }
        Ok(())
    }

    fn set_owner(&mut self, player: &CloudPlayer) -> Result<()> {
        self.set_player_field(keys::OWNER, Some(player))
    }

    fn set_opponent(&mut self, player: Option<&CloudPlayer>) -> Result<()> {
        self.set_player_field(keys::OPPONENT, player)
    }
}

/// 会话管理器
pub struct SessionManager {
    connector: Arc<Connector>,
    engine: Arc<DeltaSyncEngine>,
    writer: Arc<RecordWriter>,
    storage: Arc<StorageManager>,
    events: Arc<EventManager>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<Connector>,
        engine: Arc<DeltaSyncEngine>,
        writer: Arc<RecordWriter>,
        storage: Arc<StorageManager>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            connector,
            engine,
            writer,
            storage,
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// 本地玩家快照；连接未带出用户记录时报 LocalPlayerNotSignedIn
    pub async fn local_player(&self) -> Result<CloudPlayer> {
        let user = self
            .connector
            .local_user()
            .await
            .ok_or(GameSyncError::LocalPlayerNotSignedIn)?;
        Ok(CloudPlayer::from_user_record(&user))
    }

    /// 创建会话：所有者 = 本地玩家，落在 Private 分区的专用 Zone
    pub async fn create_session(&self, title: &str) -> Result<GameSession> {
        let values = self.connector.assured_or_err().await?;
        let player = self.local_player().await?;

        let mut record = Record::new(SESSION_RECORD_TYPE, values.private_zone.zone_id.clone());
        record.set_field(keys::TITLE, FieldValue::Text(title.to_string()));
        let mut session =
            GameSession::from_record(record, Scope::Private).expect("type tag matches");
        session.set_owner(&player)?;

        let saved = self.writer.save(session.record.clone(), Scope::Private).await?;
        // 缓存写成功后才算成功
        self.storage.records().put(&saved, Scope::Private).await?;
        session.record = saved;
        Ok(session)
    }

    /// 跨两个分区全量加载会话
    ///
    /// 整体清掉再重建本地缓存（丢弃陈旧条目），
    /// 按修改时间倒序返回（并列时稳定排序）。
    pub async fn load_sessions(&self) -> Result<Vec<GameSession>> {
        self.connector.assured_or_err().await?;
        let all = self.engine.fetch_all_records().await?;
        let session_records: Vec<(Record, Scope)> = all
            .into_iter()
            .filter(|(record, _)| record.record_type == SESSION_RECORD_TYPE)
            .collect();
        self.storage.records().replace_all(&session_records).await?;

        let mut sessions: Vec<GameSession> = session_records
            .into_iter()
            .filter_map(|(record, scope)| GameSession::from_record(record, scope))
            .collect();
        sessions.sort_by(|a, b| b.modified_at().cmp(&a.modified_at()));
        Ok(sessions)
    }

    /// 本地缓存里的会话（不触网），同样按修改时间倒序
    pub async fn cached_sessions(&self) -> Result<Vec<GameSession>> {
        let mut sessions: Vec<GameSession> = self
            .storage
            .records()
            .get_all()
            .await?
            .into_iter()
            .filter_map(|entry| GameSession::from_record(entry.record, entry.scope))
            .collect();
        sessions.sort_by(|a, b| b.modified_at().cmp(&a.modified_at()));
        Ok(sessions)
    }

    /// 保存对局数据（版本化信封包装）
    ///
    /// 成功返回服务器确认后的载荷。版本冲突时，会话与缓存先更新到
    /// 服务器当前版本（权威合并基准，`session.game_data()` 即服务器载荷），
    /// 再返回 `Conflict` 错误，由调用方决定是否基于新版本重试。
    pub async fn save_game_data<T>(&self, session: &mut GameSession, payload: &T) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let data = envelope::encode(payload)?;
        let mut record = session.record.clone();
        record.set_field(keys::CACHED_DATA, FieldValue::Bytes(data));

        match self.writer.save(record, session.scope).await {
            Ok(saved) => {
                self.storage.records().put(&saved, session.scope).await?;
                session.record = saved;
                session.game_data()
            }
            Err(GameSyncError::Conflict { server_record }) => {
                self.storage
                    .records()
                    .put(&server_record, session.scope)
                    .await?;
                session.record = (*server_record).clone();
                // 服务器载荷解不开时按解码错误上报（对方写入的数据已损坏）
                if let Err(decode_err) = session.game_data::<T>() {
                    return Err(decode_err);
                }
                Err(GameSyncError::Conflict { server_record })
            }
            Err(e) => Err(e),
        }
    }

    /// 拉取会话记录的最新版本并解码对局数据
    pub async fn load_game_data<T: DeserializeOwned>(
        &self,
        session: &mut GameSession,
    ) -> Result<T> {
        self.connector.assured_or_err().await?;
        let record = self
            .connector
            .store()
            .fetch_record(session.scope, session.id())
            .await?;
        self.storage.records().put(&record, session.scope).await?;
        session.record = record;
        session.game_data()
    }

    /// 删除会话：远端与本地缓存一起移除
    pub async fn delete_session(&self, session: &GameSession) -> Result<()> {
        self.connector.assured_or_err().await?;
        self.writer
            .delete(session.id().clone(), session.scope)
            .await?;
        self.storage.records().remove(session.id()).await?;
        Ok(())
    }

    /// 移除非所有者参与者（本域恰好一名对手；没有对手是调用错误）
    pub async fn remove_participant(&self, session: &mut GameSession) -> Result<CloudPlayer> {
        self.connector.assured_or_err().await?;
        let opponent = session.opponent().ok_or_else(|| {
            GameSyncError::InvalidOperation("session has no non-owner participant".to_string())
        })?;

        let mut record = session.record.clone();
        record.remove_field(keys::OPPONENT);
        let saved = self.writer.save(record, session.scope).await?;
        self.storage.records().put(&saved, session.scope).await?;
        session.record = saved;

        self.events
            .emit(SessionEvent::ParticipantRemoved {
                session: session.clone(),
                player: opponent.clone(),
                timestamp: now_secs(),
            })
            .await;
        Ok(opponent)
    }

    /// 拉一轮指定分区的增量并消化（订阅通知到达或轮询触发时调用）
    pub async fn update_for_changes(&self, scope: Scope) -> Result<()> {
        let round = self.engine.fetch_latest_changes(scope).await?;
        self.apply_round(round).await
    }

    /// 消化一轮增量：更新缓存、判定加入/数据/删除事件
    pub async fn apply_round(&self, round: ChangeRound) -> Result<()> {
        for (record, scope) in round.changed {
            self.apply_changed_record(record, scope).await?;
        }
        for (deleted, _scope) in round.deleted {
            if deleted.record_type != SESSION_RECORD_TYPE {
                continue;
            }
            // 删除事件的恰好一次：只有确实从缓存移除时才发
            if self.storage.records().remove(&deleted.id).await? {
                self.events
                    .emit(SessionEvent::SessionDeleted {
                        session_id: deleted.id,
                        timestamp: now_secs(),
                    })
                    .await;
            }
        }
        for zone in &round.deleted_zones {
            // Zone 整体删除：没有逐条墓碑，按缓存里属于该 Zone 的条目清
            let entries = self.storage.records().get_all().await?;
            for entry in entries {
                if &entry.record.zone != zone {
                    continue;
                }
                let is_session = entry.record.record_type == SESSION_RECORD_TYPE;
                if self.storage.records().remove(&entry.record.id).await? && is_session {
                    self.events
                        .emit(SessionEvent::SessionDeleted {
                            session_id: entry.record.id,
                            timestamp: now_secs(),
                        })
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn apply_changed_record(&self, record: Record, scope: Scope) -> Result<()> {
        let mut session = match GameSession::from_record(record, scope) {
            Some(session) => session,
            None => {
                debug!("非会话记录，跳过");
                return Ok(());
            }
        };
        let prev_opponent = self
            .storage
            .records()
            .get(session.id())
            .await?
            .and_then(|entry| GameSession::from_record(entry.record, entry.scope))
            .and_then(|prev| prev.opponent());
        let local_account = self.connector.local_account().await;
        let local_is_modifier = session.record.modified_by.is_some()
            && session.record.modified_by == local_account;

        // 加入判定：共享分区里，上个已知版本还没有对手
        if scope == Scope::Shared && prev_opponent.is_none() {
            if let Some(opponent) = session.opponent() {
                // 字段对比显示对手新落位（对方设置，或本机另一个设备加入）
                self.storage.records().put(session.record(), scope).await?;
                self.events
                    .emit(SessionEvent::SessionJoined {
                        session: session.clone(),
                        player: opponent,
                        timestamp: now_secs(),
                    })
                    .await;
                return Ok(());
            }
            if !local_is_modifier {
                // 新共享进来、还没有对手的会话：本地玩家补位并回写
                let player = match self.local_player().await {
                    Ok(player) => player,
                    Err(e) => {
                        warn!(session = %session.id(), error = %e, "无法加入会话：本地玩家缺失");
                        return Ok(());
                    }
                };
                session.set_opponent(Some(&player))?;
                match self.writer.save(session.record.clone(), scope).await {
                    Ok(saved) => session.record = saved,
                    Err(GameSyncError::Conflict { server_record }) => {
                        // 对方抢先一步；以服务器版本为准
                        session.record = *server_record;
                    }
                    Err(e) => warn!(session = %session.id(), error = %e, "回写对手加入失败"),
                }
                self.storage.records().put(session.record(), scope).await?;
                self.events
                    .emit(SessionEvent::SessionJoined {
                        session: session.clone(),
                        player,
                        timestamp: now_secs(),
                    })
                    .await;
                return Ok(());
            }
        }

        self.storage.records().put(session.record(), scope).await?;

        if local_is_modifier {
            // 自己先前写入的回声：只更新缓存，不发事件
            return Ok(());
        }

        let player = match session
            .players()
            .into_iter()
            .find(|p| p.player_id.as_deref() == session.record.modified_by.as_deref())
        {
            Some(player) => player,
            None => {
                warn!(session = %session.id(), "找不到与修改者对应的玩家快照");
                return Ok(());
            }
        };
        let data = match session.cached_data() {
            Some(data) => data,
            // 对手加入等无数据更新，不发数据事件
            None => return Ok(()),
        };
        match envelope::decode::<serde_json::Value>(data) {
            Ok(payload) => {
                self.events
                    .emit(SessionEvent::SessionDataSaved {
                        session: session.clone(),
                        player,
                        payload,
                        timestamp: now_secs(),
                    })
                    .await;
            }
            Err(e) => warn!(session = %session.id(), error = %e, "对方保存的数据无法解码"),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RoundConsumer for SessionManager {
    async fn apply_round(&self, round: ChangeRound) -> Result<()> {
        SessionManager::apply_round(self, round).await
    }
}
