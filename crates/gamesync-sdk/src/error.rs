use std::fmt;

use crate::remote::Record;

#[derive(Debug)]
pub enum GameSyncError {
    // 连接阶段错误（账号状态）
    SignInRequired,
    AccountRestricted,
    StatusUndetermined,
    BadContainer(String),
    VersionIncompatible(String),
    BadConfiguration(String),
    TransientRetryable(String),
    // 就绪门禁：连接尚未完成时调用了依赖连接的操作
    BadState(Vec<String>),
    // 远端存储错误
    ZoneNotFound(String),
    RecordNotFound(String),
    // 乐观写冲突：携带服务器当前版本，调用方以它为合并基准
    Conflict { server_record: Box<Record> },
    // 写回调竞态：无错误但也无确认记录（见 RecordWriter，保留原有语义）
    Unknown,
    NotConnected,
    InvalidArgument(String),
    InvalidOperation(String),
    LocalPlayerNotSignedIn,
    // 域层编解码错误
    EncodeFailure(String),
    DecodeFailure(String),
    // 本地持久化错误
    CacheFailure(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    Transport(String),
    ShuttingDown,
    Other(String),
}

impl fmt::Display for GameSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameSyncError::SignInRequired => write!(f, "Sign in required"),
            GameSyncError::AccountRestricted => write!(f, "Account restricted"),
            GameSyncError::StatusUndetermined => write!(f, "Could not determine account status"),
            GameSyncError::BadContainer(e) => write!(f, "Bad container: {}", e),
            GameSyncError::VersionIncompatible(e) => write!(f, "Version incompatible: {}", e),
            GameSyncError::BadConfiguration(e) => write!(f, "Bad configuration: {}", e),
            GameSyncError::TransientRetryable(e) => write!(f, "Transient error (retryable): {}", e),
            GameSyncError::BadState(missing) => {
                write!(f, "Bad state, missing: {}", missing.join(", "))
            }
            GameSyncError::ZoneNotFound(e) => write!(f, "Zone not found: {}", e),
            GameSyncError::RecordNotFound(e) => write!(f, "Record not found: {}", e),
            GameSyncError::Conflict { server_record } => {
                write!(f, "Version conflict, server has {}", server_record.id)
            }
            GameSyncError::Unknown => write!(f, "Unknown outcome"),
            GameSyncError::NotConnected => write!(f, "Not connected"),
            GameSyncError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            GameSyncError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            GameSyncError::LocalPlayerNotSignedIn => write!(f, "Local player not signed in"),
            GameSyncError::EncodeFailure(e) => write!(f, "Encode failure: {}", e),
            GameSyncError::DecodeFailure(e) => write!(f, "Decode failure: {}", e),
            GameSyncError::CacheFailure(e) => write!(f, "Cache failure: {}", e),
            GameSyncError::KvStore(e) => write!(f, "KV store error: {}", e),
            GameSyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            GameSyncError::IO(e) => write!(f, "IO error: {}", e),
            GameSyncError::Transport(e) => write!(f, "Transport error: {}", e),
            GameSyncError::ShuttingDown => write!(f, "Shutting down"),
            GameSyncError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for GameSyncError {}

impl From<serde_json::Error> for GameSyncError {
    fn from(error: serde_json::Error) -> Self {
        GameSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for GameSyncError {
    fn from(error: std::io::Error) -> Self {
        GameSyncError::IO(error.to_string())
    }
}

impl GameSyncError {
    /// 是否为乐观写冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, GameSyncError::Conflict { .. })
    }

    /// 取出冲突错误中携带的服务器当前版本
    pub fn server_record(&self) -> Option<&Record> {
        match self {
            GameSyncError::Conflict { server_record } => Some(server_record),
            _ => None,
        }
    }

    /// 连接阶段错误是否值得稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GameSyncError::TransientRetryable(_)
                | GameSyncError::Transport(_)
                | GameSyncError::StatusUndetermined
        )
    }
}

pub type Result<T> = std::result::Result<T, GameSyncError>;
