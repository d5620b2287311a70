//! 事件系统模块 - 会话变更通知
//!
//! 同步层消化一轮增量后，通过这里把结果通知给上层：
//! - 对手加入会话
//! - 远端玩家保存了对局数据
//! - 会话被删除
//! - 参与者被移除
//!
//! 同一会话的连续更新按拉取顺序投递；不同类型事件之间不保证顺序。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::remote::RecordId;
use crate::session::{CloudPlayer, GameSession};

/// 会话事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// 对手加入了会话（opponent 字段从无到有，只会触发一次）
    SessionJoined {
        session: GameSession,
        player: CloudPlayer,
        timestamp: u64,
    },
    /// 远端玩家保存了对局数据
    SessionDataSaved {
        session: GameSession,
        player: CloudPlayer,
        /// 信封内的对局载荷（apiData）
        payload: serde_json::Value,
        timestamp: u64,
    },
    /// 会话被删除（内容不可恢复，只剩标识）
    SessionDeleted {
        session_id: RecordId,
        timestamp: u64,
    },
    /// 参与者被移除
    ParticipantRemoved {
        session: GameSession,
        player: CloudPlayer,
        timestamp: u64,
    },
}

impl SessionEvent {
    /// 事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionJoined { .. } => "session_joined",
            SessionEvent::SessionDataSaved { .. } => "session_data_saved",
            SessionEvent::SessionDeleted { .. } => "session_deleted",
            SessionEvent::ParticipantRemoved { .. } => "participant_removed",
        }
    }

    /// 事件关联的会话 ID
    pub fn session_id(&self) -> &RecordId {
        match self {
            SessionEvent::SessionJoined { session, .. } => session.id(),
            SessionEvent::SessionDataSaved { session, .. } => session.id(),
            SessionEvent::SessionDeleted { session_id, .. } => session_id,
            SessionEvent::ParticipantRemoved { session, .. } => session.id(),
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            SessionEvent::SessionJoined { timestamp, .. } => *timestamp,
            SessionEvent::SessionDataSaved { timestamp, .. } => *timestamp,
            SessionEvent::SessionDeleted { timestamp, .. } => *timestamp,
            SessionEvent::ParticipantRemoved { timestamp, .. } => *timestamp,
        }
    }
}

/// 当前 UNIX 秒（事件时间戳用）
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub listener_count: usize,
    pub last_event_time: Option<u64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SessionEvent>,
    /// 按事件类型注册的监听器，"*" 为通配
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SessionEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 广播（无订阅者时 send 失败属正常场景，仅打 debug）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// 注册监听器；event_type 传 "*" 监听全部
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();
        let mut stats = self.stats.write().await;
        stats.listener_count = 0;
    }

    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
