//! 同步游标存储
//!
//! 键格式：库级游标 `db_token:{scope}`，Zone 级游标合并存一条
//! `zone_tokens:{scope}`（zone -> token 的集合记录）。
//! 一轮拉取的游标推进必须整体生效，所以 commit_round 用一个 sled 批次
//! 同时写库级游标与 Zone 映射。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::remote::{ChangeToken, Scope, ZoneId};
use crate::session::envelope;
use crate::storage::kv::{namespaces, KvStore};

const DB_PREFIX: &str = "db_token";
const ZONES_PREFIX: &str = "zone_tokens";

/// Zone 游标集合记录里的一项（map 的键是结构体，落盘用条目数组）
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoneTokenEntry {
    zone: ZoneId,
    token: ChangeToken,
}

/// 游标缓存
pub struct TokenCache {
    kv: Arc<KvStore>,
}

impl TokenCache {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn db_key(scope: Scope) -> String {
        format!("{}:{}", DB_PREFIX, scope.as_str())
    }

    fn zones_key(scope: Scope) -> String {
        format!("{}:{}", ZONES_PREFIX, scope.as_str())
    }

    /// 分区的库级游标
    pub async fn database_token(&self, scope: Scope) -> Result<Option<ChangeToken>> {
        let bytes = self
            .kv
            .get_raw(namespaces::SYNC_TOKENS, &Self::db_key(scope))
            .await?;
        match bytes {
            None => Ok(None),
            Some(bytes) => Ok(Some(envelope::decode::<ChangeToken>(&bytes)?)),
        }
    }

    /// 分区内全部 Zone 游标
    pub async fn zone_tokens(&self, scope: Scope) -> Result<HashMap<ZoneId, ChangeToken>> {
        let bytes = self
            .kv
            .get_raw(namespaces::SYNC_TOKENS, &Self::zones_key(scope))
            .await?;
        match bytes {
            None => Ok(HashMap::new()),
            Some(bytes) => {
                let entries: Vec<ZoneTokenEntry> = envelope::decode(&bytes)?;
                Ok(entries.into_iter().map(|e| (e.zone, e.token)).collect())
            }
        }
    }

    /// 单个 Zone 的游标
    pub async fn zone_token(&self, scope: Scope, zone: &ZoneId) -> Result<Option<ChangeToken>> {
        Ok(self.zone_tokens(scope).await?.remove(zone))
    }

    /// 提交一轮成功拉取的全部游标推进
    ///
    /// 库级游标、各 Zone 的新游标与被删除 Zone 的游标清理在一个批次里
    /// 原子落盘。一轮中任何拉取失败时不要调用本方法。
    pub async fn commit_round(
        &self,
        scope: Scope,
        database_token: ChangeToken,
        zone_updates: HashMap<ZoneId, ChangeToken>,
        deleted_zones: &[ZoneId],
    ) -> Result<()> {
        let mut zones = self.zone_tokens(scope).await?;
        for (zone, token) in zone_updates {
            zones.insert(zone, token);
        }
        for zone in deleted_zones {
            zones.remove(zone);
        }
        let entries: Vec<ZoneTokenEntry> = zones
            .into_iter()
            .map(|(zone, token)| ZoneTokenEntry { zone, token })
            .collect();

        debug!(
            scope = %scope,
            database_token = ?database_token,
            zones = entries.len(),
            "提交游标推进"
        );
        let inserts = vec![
            (Self::db_key(scope), envelope::encode(&database_token)?),
            (Self::zones_key(scope), envelope::encode(&entries)?),
        ];
        self.kv
            .apply_batch(namespaces::SYNC_TOKENS, inserts, vec![])
            .await
    }

    /// 清空全部游标（下一轮即全量拉取）
    pub async fn clear(&self) -> Result<()> {
        self.kv.clear(namespaces::SYNC_TOKENS).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(n: u8) -> ChangeToken {
        ChangeToken::new(vec![n; 4])
    }

    async fn cache(dir: &TempDir) -> TokenCache {
        let kv = Arc::new(KvStore::open(dir.path()).await.unwrap());
        TokenCache::new(kv)
    }

    #[test]
    fn key_format() {
        assert_eq!(TokenCache::db_key(Scope::Private), "db_token:private");
        assert_eq!(TokenCache::db_key(Scope::Shared), "db_token:shared");
        assert_eq!(TokenCache::zones_key(Scope::Private), "zone_tokens:private");
    }

    #[tokio::test]
    async fn empty_cache_means_full_resync() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        assert!(cache.database_token(Scope::Private).await.unwrap().is_none());
        assert!(cache.zone_tokens(Scope::Private).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_round_persists_all_cursors() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let zone_a = ZoneId::new("Games", "p1");
        let zone_b = ZoneId::new("Games", "p2");

        let mut updates = HashMap::new();
        updates.insert(zone_a.clone(), token(1));
        updates.insert(zone_b.clone(), token(2));
        cache
            .commit_round(Scope::Shared, token(9), updates, &[])
            .await
            .unwrap();

        assert_eq!(
            cache.database_token(Scope::Shared).await.unwrap(),
            Some(token(9))
        );
        assert_eq!(
            cache.zone_token(Scope::Shared, &zone_a).await.unwrap(),
            Some(token(1))
        );
        // 各分区互不影响
        assert!(cache.database_token(Scope::Private).await.unwrap().is_none());

        // 后续一轮推进库级游标、更新一个 Zone、清理一个被删除的 Zone
        let mut updates = HashMap::new();
        updates.insert(zone_a.clone(), token(3));
        cache
            .commit_round(Scope::Shared, token(10), updates, &[zone_b.clone()])
            .await
            .unwrap();
        assert_eq!(
            cache.database_token(Scope::Shared).await.unwrap(),
            Some(token(10))
        );
        assert_eq!(
            cache.zone_token(Scope::Shared, &zone_a).await.unwrap(),
            Some(token(3))
        );
        assert!(cache.zone_token(Scope::Shared, &zone_b).await.unwrap().is_none());
    }
}
