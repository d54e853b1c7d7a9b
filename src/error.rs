//! 에러 타입 정의

use thiserror::Error;

use crate::chunk::{ChunkIndex, FileId};

/// PFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("잘린 프레임: {len} bytes")]
    TruncatedFrame { len: usize },

    #[error("프레임 크기 초과: {len} bytes (최대 {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("재전송 한도 초과: file_id={file_id:016x}, index={index}, attempts={attempts}")]
    RetriesExhausted {
        file_id: FileId,
        index: ChunkIndex,
        attempts: u32,
    },

    #[error("파일 전송 중단: {filename} (완료된 파일 {completed}개)")]
    FileAborted {
        filename: String,
        completed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("불완전한 전송: file_id={file_id:016x}, expected {expected} bytes, got {actual}")]
    IncompleteTransfer {
        file_id: FileId,
        expected: u64,
        actual: u64,
    },

    #[error("체크섬 불일치: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("유효하지 않은 파일 이름: {0}")]
    InvalidFilename(String),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("채널 종료")]
    ChannelClosed,

    #[error("이미 드레인 루프가 실행 중")]
    DrainInProgress,

    #[error("태스크 에러: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// 재시도 불가능한 전송 중단인지 여부
    pub fn is_fatal_abort(&self) -> bool {
        match self {
            Error::RetriesExhausted { .. } => true,
            Error::FileAborted { source, .. } => source.is_fatal_abort(),
            _ => false,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
