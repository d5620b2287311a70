//! 实体缓存 - 远端记录的本地镜像
//!
//! 键为记录 ID，值为信封包装的 `CachedRecord`。分区信息无法从记录本身
//! 恢复，所以和记录一起缓存。单条损坏的缓存不允许拖垮整个扫描：
//! get_all 跳过解不开的条目并记日志，其余照常返回。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::remote::{Record, RecordId, Scope};
use crate::session::envelope;
use crate::storage::kv::{namespaces, KvStore};

const KEY_PREFIX: &str = "record:";

/// 缓存条目：记录加上它所在的分区
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub scope: Scope,
    pub record: Record,
}

/// 记录缓存
pub struct RecordCache {
    kv: Arc<KvStore>,
}

impl RecordCache {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(id: &RecordId) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }

    /// 写入或覆盖一条缓存
    pub async fn put(&self, record: &Record, scope: Scope) -> Result<()> {
        let entry = CachedRecord {
            scope,
            record: record.clone(),
        };
        let bytes = envelope::encode(&entry)?;
        self.kv
            .set_raw(namespaces::RECORD_CACHE, &Self::key(&record.id), &bytes)
            .await
    }

    /// 按 ID 读取；条目损坏按缓存缺失处理（记日志）
    pub async fn get(&self, id: &RecordId) -> Result<Option<CachedRecord>> {
        let bytes = self
            .kv
            .get_raw(namespaces::RECORD_CACHE, &Self::key(id))
            .await?;
        match bytes {
            None => Ok(None),
            Some(bytes) => match envelope::decode::<CachedRecord>(&bytes) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    warn!(record = %id, error = %e, "缓存条目损坏，按缺失处理");
                    Ok(None)
                }
            },
        }
    }

    /// 全量扫描；单条损坏跳过，不影响其余条目
    pub async fn get_all(&self) -> Result<Vec<CachedRecord>> {
        let raw = self
            .kv
            .scan_prefix_raw(namespaces::RECORD_CACHE, KEY_PREFIX)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, bytes) in raw {
            match envelope::decode::<CachedRecord>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(key = %key, error = %e, "缓存条目损坏，跳过");
                    continue;
                }
            }
        }
        Ok(entries)
    }

    /// 删除一条缓存，返回是否存在
    pub async fn remove(&self, id: &RecordId) -> Result<bool> {
        self.kv
            .delete(namespaces::RECORD_CACHE, &Self::key(id))
            .await
    }

    /// 清空缓存
    pub async fn clear(&self) -> Result<()> {
        self.kv.clear(namespaces::RECORD_CACHE).await
    }

    /// 清空后整体重建（load_sessions 丢弃陈旧条目用）
    pub async fn replace_all(&self, entries: &[(Record, Scope)]) -> Result<()> {
        self.clear().await?;
        let mut inserts = Vec::with_capacity(entries.len());
        for (record, scope) in entries {
            let entry = CachedRecord {
                scope: *scope,
                record: record.clone(),
            };
            inserts.push((Self::key(&record.id), envelope::encode(&entry)?));
        }
        self.kv
            .apply_batch(namespaces::RECORD_CACHE, inserts, vec![])
            .await
    }

    /// 写入损坏字节（测试损坏容忍路径用）
    #[cfg(test)]
    pub async fn corrupt_for_test(&self, id: &RecordId) -> Result<()> {
        self.kv
            .set_raw(namespaces::RECORD_CACHE, &Self::key(id), b"\xff not json")
            .await
    }
}
