//! 杂项工具

use sha2::{Digest, Sha256};

/// 不透明字节串的短哈希，调试打印用（游标、版本标记等不可解析的值）
pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}
