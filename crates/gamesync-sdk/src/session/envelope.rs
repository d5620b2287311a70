//! 版本化载荷信封
//!
//! 所有落到远端字段或本地缓存的序列化载荷都包一层
//! `{ "apiVersion": <int>, "apiData": <T> }`。
//! 解码先单独校验 apiVersion，与期望常量不符时在触碰 apiData 之前失败。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GameSyncError, Result};
use crate::version::API_VERSION;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "apiVersion")]
    api_version: i32,
    #[serde(rename = "apiData")]
    api_data: T,
}

/// 只读版本号的探针，其余字段一概不看
#[derive(Deserialize)]
struct VersionProbe {
    #[serde(rename = "apiVersion")]
    api_version: i32,
}

/// 编码为版本化信封字节
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        api_version: API_VERSION,
        api_data: value,
    };
    serde_json::to_vec(&envelope).map_err(|e| GameSyncError::EncodeFailure(e.to_string()))
}

/// 从版本化信封字节解码
///
/// 版本不匹配与载荷损坏都报 `DecodeFailure`，但前者发生在 apiData 解码之前。
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| GameSyncError::DecodeFailure(format!("bad envelope: {}", e)))?;
    if probe.api_version != API_VERSION {
        return Err(GameSyncError::DecodeFailure(format!(
            "api version mismatch: expected {}, found {}",
            API_VERSION, probe.api_version
        )));
    }
    let envelope: Envelope<T> = serde_json::from_slice(bytes)
        .map_err(|e| GameSyncError::DecodeFailure(e.to_string()))?;
    Ok(envelope.api_data)
}
