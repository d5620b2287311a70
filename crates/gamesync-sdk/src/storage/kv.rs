//! KV 存储模块 - 基于 sled 的本地字节存储
//!
//! 本模块提供：
//! - 按命名空间（sled Tree）隔离的键值存储
//! - 序列化读写与前缀扫描
//! - 一轮游标提交所需的原子批量写入
//!
//! 游标与实体缓存都落在"可再生数据"区：丢失后可以全量重拉恢复，
//! 不参与系统备份（策略标记，行为上与普通区无差别）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tokio::sync::RwLock;

use crate::error::{GameSyncError, Result};

/// 常用命名空间
pub mod namespaces {
    /// 同步游标（可再生，不备份）
    pub const SYNC_TOKENS: &str = "sync_tokens";
    /// 实体缓存（可再生，不备份）
    pub const RECORD_CACHE: &str = "record_cache";
}

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    #[allow(dead_code)]
    base_path: PathBuf,
    db: Arc<Db>,
    /// 已打开的命名空间 Tree
    trees: Arc<RwLock<HashMap<String, Tree>>>,
}

impl KvStore {
    /// 打开 KV 存储
    ///
    /// 同一目录的旧实例可能刚释放文件锁（进程内重建 SDK 的场景），
    /// 打开失败时带退避重试多次。
    pub async fn open(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| GameSyncError::IO(format!("create kv directory failed: {}", e)))?;

        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<sled::Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            GameSyncError::KvStore(
                last_err
                    .map(|e| format!("open sled database failed: {}", e))
                    .unwrap_or_else(|| "open sled database failed".to_string()),
            )
        })?;

        Ok(Self {
            base_path,
            db: Arc::new(db),
            trees: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 取命名空间对应的 Tree，不存在则打开
    async fn tree(&self, namespace: &str) -> Result<Tree> {
        {
            let trees = self.trees.read().await;
            if let Some(tree) = trees.get(namespace) {
                return Ok(tree.clone());
            }
        }
        let tree = self
            .db
            .open_tree(namespace)
            .map_err(|e| GameSyncError::KvStore(format!("open tree failed: {}", e)))?;
        let mut trees = self.trees.write().await;
        trees.insert(namespace.to_string(), tree.clone());
        Ok(tree)
    }

    /// 写入键值对
    pub async fn set<V>(&self, namespace: &str, key: &str, value: &V) -> Result<()>
    where
        V: Serialize,
    {
        let tree = self.tree(namespace).await?;
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| GameSyncError::Serialization(format!("serialize value failed: {}", e)))?;
        tree.insert(key, value_bytes)
            .map_err(|e| GameSyncError::KvStore(format!("set failed: {}", e)))?;
        Ok(())
    }

    /// 读取键值对
    pub async fn get<V>(&self, namespace: &str, key: &str) -> Result<Option<V>>
    where
        V: for<'de> Deserialize<'de>,
    {
        let tree = self.tree(namespace).await?;
        let result = tree
            .get(key)
            .map_err(|e| GameSyncError::KvStore(format!("get failed: {}", e)))?;
        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes).map_err(|e| {
                    GameSyncError::Serialization(format!("deserialize value failed: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 读取原始字节（损坏容忍的扫描路径用）
    pub async fn get_raw(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let tree = self.tree(namespace).await?;
        let result = tree
            .get(key)
            .map_err(|e| GameSyncError::KvStore(format!("get failed: {}", e)))?;
        Ok(result.map(|v| v.to_vec()))
    }

    /// 写入原始字节
    pub async fn set_raw(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let tree = self.tree(namespace).await?;
        tree.insert(key, value)
            .map_err(|e| GameSyncError::KvStore(format!("set failed: {}", e)))?;
        Ok(())
    }

    /// 删除键，返回是否存在
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let tree = self.tree(namespace).await?;
        let removed = tree
            .remove(key)
            .map_err(|e| GameSyncError::KvStore(format!("delete failed: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 检查键是否存在
    pub async fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        let tree = self.tree(namespace).await?;
        tree.contains_key(key)
            .map_err(|e| GameSyncError::KvStore(format!("contains_key failed: {}", e)))
    }

    /// 指定前缀的所有键值对（原始字节，由调用方自行解码并决定损坏策略）
    pub async fn scan_prefix_raw(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let tree = self.tree(namespace).await?;
        let mut results = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (key, value_bytes) =
                item.map_err(|e| GameSyncError::KvStore(format!("scan prefix failed: {}", e)))?;
            let key = String::from_utf8_lossy(&key).to_string();
            results.push((key, value_bytes.to_vec()));
        }
        Ok(results)
    }

    /// 批量写入与删除，整体原子生效
    pub async fn apply_batch(
        &self,
        namespace: &str,
        inserts: Vec<(String, Vec<u8>)>,
        removals: Vec<String>,
    ) -> Result<()> {
        let tree = self.tree(namespace).await?;
        let mut batch = sled::Batch::default();
        for (key, value) in inserts {
            batch.insert(key.as_bytes(), value);
        }
        for key in removals {
            batch.remove(key.as_bytes());
        }
        tree.apply_batch(batch)
            .map_err(|e| GameSyncError::KvStore(format!("apply batch failed: {}", e)))?;
        Ok(())
    }

    /// 清空命名空间
    pub async fn clear(&self, namespace: &str) -> Result<()> {
        let tree = self.tree(namespace).await?;
        tree.clear()
            .map_err(|e| GameSyncError::KvStore(format!("clear failed: {}", e)))?;
        Ok(())
    }

    /// 落盘（关闭前调用）
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| GameSyncError::KvStore(format!("flush failed: {}", e)))?;
        Ok(())
    }
}
