//! 同步编排
//!
//! 引擎与写路径都不做重试，所有重试 / 退避 / 轮询策略集中在这里：
//! - poll_once：一次带指数退避（含抖动）的有界重试拉取，消化到会话层
//! - start：后台轮询两个分区，shutdown 后停止
//!
//! 只有可重试类错误（瞬时 / 传输 / 状态未定）才会触发退避重试，
//! 其余错误立刻上抛。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::Scope;
use crate::sync::engine::{ChangeRound, DeltaSyncEngine};
use crate::sync::{SyncPhase, SyncStatus};

/// 一轮增量结果的消费方（会话层实现）
#[async_trait]
pub trait RoundConsumer: Send + Sync {
    async fn apply_round(&self, round: ChangeRound) -> Result<()>;
}

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次退避时长
    pub base_delay: Duration,
    /// 退避封顶
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次失败后的退避时长：指数增长、封顶、带抖动
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// 同步调度器
pub struct SyncScheduler {
    engine: Arc<DeltaSyncEngine>,
    consumer: Arc<dyn RoundConsumer>,
    policy: RetryPolicy,
    status: Arc<RwLock<SyncStatus>>,
    shutdown: watch::Sender<bool>,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<DeltaSyncEngine>,
        consumer: Arc<dyn RoundConsumer>,
        policy: RetryPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            consumer,
            policy,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            shutdown,
        }
    }

    /// 当前同步状态
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    async fn set_status(&self, phase: SyncPhase, message: Option<String>) {
        let mut status = self.status.write().await;
        *status = SyncStatus { phase, message };
    }

    /// 拉取并消化一轮增量，带有界退避重试
    pub async fn poll_once(&self, scope: Scope) -> Result<ChangeRound> {
        self.set_status(SyncPhase::Running, None).await;
        let mut attempt = 0u32;
        loop {
            match self.engine.fetch_latest_changes(scope).await {
                Ok(round) => {
                    self.consumer.apply_round(round.clone()).await?;
                    self.set_status(SyncPhase::Idle, None).await;
                    return Ok(round);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        scope = %scope,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "拉取失败，退避后重试"
                    );
                    self.set_status(SyncPhase::BackingOff, Some(e.to_string())).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.set_status(SyncPhase::Error, Some(e.to_string())).await;
                    return Err(e);
                }
            }
        }
    }

    /// 启动后台轮询（两个分区轮流），返回任务句柄
    pub fn start(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        info!(interval_ms = interval.as_millis() as u64, "同步轮询启动");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for scope in Scope::ALL {
                            if *shutdown.borrow() {
                                break;
                            }
                            if let Err(e) = scheduler.poll_once(scope).await {
                                debug!(scope = %scope, error = %e, "本轮轮询失败，等下个周期");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("同步轮询停止");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// 通知后台轮询停止
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
