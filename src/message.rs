//! 프로토콜 프레임 정의
//!
//! 송신 → 수신: transfer-start, file-start, file-chunk, file-end
//! 수신 → 송신: chunk-ack
//!
//! 와이어 포맷: magic(4, LE) + version(1) + crc32(4, LE) + bincode 페이로드

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkIndex, FileId};
use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 프레임 헤더 길이 (magic + version + crc32)
pub const FRAME_HEADER_LEN: usize = 9;

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 배치 시작 (파일 N개 예고)
    TransferStart = 1,

    /// 파일 시작
    FileStart = 2,

    /// 데이터 청크
    FileChunk = 3,

    /// 청크 수신 확인
    ChunkAck = 4,

    /// 파일 종료 (체크섬 포함)
    FileEnd = 5,
}

/// 채널로 오가는 프레임
///
/// 필드 이름은 직렬화 시 `fileId`, `fileSize` 등 camelCase로 고정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frame {
    #[serde(rename_all = "camelCase")]
    TransferStart { total_files: u32 },

    #[serde(rename_all = "camelCase")]
    FileStart {
        filename: String,
        file_size: u64,
        file_id: FileId,
    },

    #[serde(rename_all = "camelCase")]
    FileChunk {
        file_id: FileId,
        index: ChunkIndex,
        chunk: Bytes,
        /// 전송 시각 (마이크로초, UNIX epoch)
        timestamp: u64,
    },

    #[serde(rename_all = "camelCase")]
    ChunkAck { file_id: FileId, index: ChunkIndex },

    #[serde(rename_all = "camelCase")]
    FileEnd { file_id: FileId, checksum: String },
}

impl Frame {
    /// 현재 시각으로 청크 프레임 생성
    pub fn chunk(file_id: FileId, index: ChunkIndex, chunk: Bytes) -> Self {
        Frame::FileChunk {
            file_id,
            index,
            chunk,
            timestamp: now_micros(),
        }
    }

    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            Frame::TransferStart { .. } => MessageType::TransferStart,
            Frame::FileStart { .. } => MessageType::FileStart,
            Frame::FileChunk { .. } => MessageType::FileChunk,
            Frame::ChunkAck { .. } => MessageType::ChunkAck,
            Frame::FileEnd { .. } => MessageType::FileEnd,
        }
    }

    /// 프레임이 속한 전송 ID
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            Frame::TransferStart { .. } => None,
            Frame::FileStart { file_id, .. }
            | Frame::FileChunk { file_id, .. }
            | Frame::ChunkAck { file_id, .. }
            | Frame::FileEnd { file_id, .. } => Some(*file_id),
        }
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let crc32 = crc32fast::hash(&payload);

        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
        buf.push(PROTOCOL_VERSION);
        buf.extend_from_slice(&crc32.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    ///
    /// 매직 넘버, 버전, CRC를 모두 확인한 뒤 페이로드를 해석
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(Error::TruncatedFrame { len: bytes.len() });
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC_NUMBER {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_NUMBER,
                got: magic,
            });
        }

        let version = bytes[4];
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidVersion {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let expected = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let payload = &bytes[FRAME_HEADER_LEN..];
        let got = crc32fast::hash(payload);
        if got != expected {
            return Err(Error::CrcMismatch { expected, got });
        }

        Ok(bincode::deserialize(payload)?)
    }
}

/// 현재 시각 (마이크로초)
pub fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_frame_codec() {
        let frame = Frame::chunk(42, 3, Bytes::from(vec![1, 2, 3, 4, 5]));

        let bytes = frame.encode().unwrap();
        let restored = Frame::decode(&bytes).unwrap();

        assert_eq!(frame, restored);
        assert_eq!(restored.msg_type(), MessageType::FileChunk);
        assert_eq!(restored.file_id(), Some(42));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let frame = Frame::FileEnd {
            file_id: 1,
            checksum: "ab".repeat(32),
        };
        let mut bytes = frame.encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = Frame::TransferStart { total_files: 2 }.encode().unwrap();
        bytes[4] = PROTOCOL_VERSION + 1;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::InvalidVersion { .. })
        ));

        bytes[0] = 0;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(Error::InvalidMagicNumber { .. })
        ));

        assert!(matches!(
            Frame::decode(&bytes[..4]),
            Err(Error::TruncatedFrame { len: 4 })
        ));
    }
}
