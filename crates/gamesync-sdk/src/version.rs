//! SDK 版本与运行时元信息
//!
//! SDK Version → Cargo.toml（唯一权威源）。

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 载荷信封的 API 版本（见 `session::envelope`）
pub const API_VERSION: i32 = 1;
