//! 远端记录存储的数据模型
//!
//! 本模块定义与远端存储交互的全部线上类型：
//! - 可见性分区（Scope）与分区内的 Zone
//! - 记录（Record）及其字段值
//! - 不透明的增量游标（ChangeToken）
//! - 增量拉取与写入的请求/响应聚合
//!
//! 所有类型都是纯数据（serde 可序列化），真正的远端操作见 [`store::RemoteStore`]。

pub mod memory;
pub mod store;

pub use memory::{MemoryCloud, MemoryStore};
pub use store::{AccountStatus, RemoteStore};

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::short_hash;

/// 可见性分区
///
/// Private：本账号独占；Shared：他人所有、通过共享授权对本账号可见。
/// 记录一经创建，分区不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Private,
    Shared,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Private => "private",
            Scope::Shared => "shared",
        }
    }

    /// 两个分区，遍历用
    pub const ALL: [Scope; 2] = [Scope::Private, Scope::Shared];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Zone 标识
///
/// 同名 Zone 由不同账号持有时是不同的 Zone，所以标识里必须带持有者。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    pub name: String,
    pub owner: String,
}

impl ZoneId {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// 记录标识，客户端创建时分配（UUID v4）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 服务器签发的不透明增量游标
///
/// 客户端只负责持久化与回传，永远不解析其内容。
/// 空游标（None）表示全量拉取。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 游标内容不透明，打印短哈希便于比对
        write!(f, "ChangeToken({})", short_hash(&self.0))
    }
}

/// 记录字段值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// 远端存储中的一条带版本记录
///
/// `change_tag` 为服务器在每次保存时签发的版本标记，乐观写用它判断
/// 客户端提交是否基于最新版本；客户端同样不解析其内容。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub zone: ZoneId,
    pub record_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// 最后修改者的账号标识
    pub modified_by: Option<String>,
    pub change_tag: Option<String>,
    pub fields: HashMap<String, FieldValue>,
}

impl Record {
    /// 以新生成的 ID 创建一条尚未保存的记录
    pub fn new(record_type: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            id: RecordId::generate(),
            zone,
            record_type: record_type.into(),
            created_at: None,
            modified_at: None,
            modified_by: None,
            change_tag: None,
            fields: HashMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }
}

/// 已删除记录的引用（内容不可恢复，只剩 ID 与类型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: RecordId,
    pub record_type: String,
}

/// 库级增量拉取结果：发生变化/被删除的 Zone 与新的库级游标
#[derive(Debug, Clone)]
pub struct DatabaseChanges {
    pub changed_zones: Vec<ZoneId>,
    pub deleted_zones: Vec<ZoneId>,
    pub change_token: ChangeToken,
}

/// Zone 级增量拉取结果：变化的记录、删除的记录引用与新的 Zone 游标
#[derive(Debug, Clone)]
pub struct ZoneChanges {
    pub changed_records: Vec<Record>,
    pub deleted_records: Vec<DeletedRecord>,
    pub change_token: ChangeToken,
}

/// 写入操作（保存或删除）的响应
///
/// 保存成功时 `saved` 为服务器确认后的记录（带新 change_tag）；
/// 删除成功时 `deleted` 为被删除的 ID。两者也可能都为空，
/// 写路径会把这种情况映射为 Unknown（见 `sync::writer`）。
#[derive(Debug, Clone, Default)]
pub struct ModifyResponse {
    pub saved: Option<Record>,
    pub deleted: Option<RecordId>,
}

/// 变更订阅（安装后远端会在记录变化时通知客户端）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub scope: Scope,
    pub record_type: String,
}

/// Zone 元信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: ZoneId,
}
