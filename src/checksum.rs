//! 파일 체크섬 (SHA-256, hex)

use sha2::{Digest, Sha256};

/// `data`의 SHA-256을 hex 문자열로 반환
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// 체크섬 비교 (대소문자 무시)
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
