//! 增量同步模块
//!
//! 职责：
//! - 按分区执行库级 + Zone 级的游标增量拉取（engine）
//! - 乐观写与冲突提取（writer）
//! - 重试 / 退避 / 轮询编排（scheduler，引擎与写路径自身永不重试）

pub mod engine;
pub mod scheduler;
pub mod writer;

pub use engine::{ChangeRound, DeltaSyncEngine};
pub use scheduler::{RetryPolicy, RoundConsumer, SyncScheduler};
pub use writer::RecordWriter;

/// 同步阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncPhase {
    /// 空闲
    Idle,
    /// 正在同步
    Running,
    /// 退避中（等待重试）
    BackingOff,
    /// 错误
    Error,
}

/// 同步状态
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub message: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            message: None,
        }
    }
}
