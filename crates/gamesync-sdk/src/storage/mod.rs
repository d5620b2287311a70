//! 存储模块 - 本地持久化层
//!
//! 分层：
//! - StorageManager: 统一入口，打开底层 KV 并持有两个缓存
//! - KvStore: sled 字节存储，按命名空间隔离
//! - RecordCache: 远端记录的本地镜像（记录 + 分区）
//! - TokenCache: 同步游标（库级 + Zone 级）

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

pub mod kv;
pub mod record_cache;
pub mod token_cache;

pub use kv::KvStore;
pub use record_cache::{CachedRecord, RecordCache};
pub use token_cache::TokenCache;

/// 存储管理器
pub struct StorageManager {
    kv: Arc<KvStore>,
    records: RecordCache,
    tokens: TokenCache,
}

impl StorageManager {
    /// 在数据目录下打开存储
    pub async fn init(data_dir: &Path) -> Result<Self> {
        let kv = Arc::new(KvStore::open(data_dir).await?);
        let records = RecordCache::new(kv.clone());
        let tokens = TokenCache::new(kv.clone());
        Ok(Self {
            kv,
            records,
            tokens,
        })
    }

    pub fn records(&self) -> &RecordCache {
        &self.records
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn kv(&self) -> &Arc<KvStore> {
        &self.kv
    }

    /// 落盘（关闭前调用）
    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }
}
