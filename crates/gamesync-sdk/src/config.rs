//! SDK 配置

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GameSyncError, Result};
use crate::sync::RetryPolicy;

/// 默认账号容器
pub const DEFAULT_CONTAINER: &str = "gamesync.sessions";
/// 默认专用 Zone 名
pub const DEFAULT_ZONE_NAME: &str = "Games";

/// SDK 配置
#[derive(Debug, Clone)]
pub struct GameSyncConfig {
    /// 本地数据目录（sled 缓存落在这下面）
    pub data_dir: PathBuf,
    /// 账号容器标识
    pub container: String,
    /// Private 分区里专用 Zone 的名字
    pub zone_name: String,
    /// 事件广播通道容量
    pub event_capacity: usize,
    /// 后台轮询周期
    pub poll_interval: Duration,
    /// 拉取重试策略（调度层用，引擎自身不重试）
    pub retry: RetryPolicy,
}

impl GameSyncConfig {
    pub fn builder() -> GameSyncConfigBuilder {
        GameSyncConfigBuilder::default()
    }
}

/// 配置构建器
#[derive(Debug, Clone)]
pub struct GameSyncConfigBuilder {
    data_dir: Option<PathBuf>,
    container: String,
    zone_name: String,
    event_capacity: usize,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl Default for GameSyncConfigBuilder {
    fn default() -> Self {
        Self {
            data_dir: None,
            container: DEFAULT_CONTAINER.to_string(),
            zone_name: DEFAULT_ZONE_NAME.to_string(),
            event_capacity: 256,
            poll_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl GameSyncConfigBuilder {
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn zone_name(mut self, zone_name: impl Into<String>) -> Self {
        self.zone_name = zone_name.into();
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<GameSyncConfig> {
        let data_dir = self
            .data_dir
            .ok_or_else(|| GameSyncError::BadConfiguration("data_dir is required".to_string()))?;
        if self.zone_name.is_empty() {
            return Err(GameSyncError::BadConfiguration(
                "zone_name must not be empty".to_string(),
            ));
        }
        Ok(GameSyncConfig {
            data_dir,
            container: self.container,
            zone_name: self.zone_name,
            event_capacity: self.event_capacity,
            poll_interval: self.poll_interval,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = GameSyncConfig::builder().data_dir("/tmp/x").build().unwrap();
        assert_eq!(config.container, DEFAULT_CONTAINER);
        assert_eq!(config.zone_name, DEFAULT_ZONE_NAME);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn builder_requires_data_dir() {
        let err = GameSyncConfig::builder().build().unwrap_err();
        assert!(matches!(err, GameSyncError::BadConfiguration(_)));
    }
}
