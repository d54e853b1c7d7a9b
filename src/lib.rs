//! # PFT (Pipelined File Transfer)
//!
//! 메시지 채널 위의 ACK 기반 윈도우 청크 전송 프로토콜
//!
//! ## 핵심 특징
//! - **청크 분할**: 파일을 인덱스가 붙은 청크로 분할, 청크 크기는 전송 중 가변
//! - **윈도우 파이프라인**: `window_size`개 청크를 동시에 전송하고 ACK 대기
//! - **재전송**: 타임아웃 청크는 다음 배치에서 재전송, 한도 초과 시 전송 중단
//! - **AIMD 전송률 제어**: 타임아웃 시 급감, 처리율 향상 시 점진 증가
//! - **순서 무관 조립**: 도착 순서와 무관하게 인덱스 순서로 재조립
//! - **무결성 검증**: SHA-256 체크섬으로 파일 단위 검증
//!
//! 채널은 순서 보장, 손실, 중복 여부와 관계없이 동작함

pub mod channel;
pub mod checksum;
pub mod chunk;
pub mod config;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod output;
pub mod peer;
pub mod rate;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod stats;
pub mod transport;

pub use channel::{Delivery, FrameSink, Link, LinkConditions, MemoryChannel};
pub use chunk::{Chunk, ChunkIndex, FileId, Segmenter, TransferDescriptor};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Frame, MessageType};
pub use orchestrator::{BatchReport, FileQueue, FileSource, Orchestrator};
pub use output::{DirectoryOutput, MemoryOutput, OutputSink};
pub use peer::Peer;
pub use rate::{RateAdapter, RateChange};
pub use receiver::{Reassembler, ReceiveEvent, ReceiverState};
pub use report::{LogReporter, Progress, Reporter, Role, TransferStatus};
pub use sender::{AckRouter, FileReport, SendWindow};
pub use stats::{ProgressMeter, TransferStats};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 262_144; // 256KB

/// 최소 청크 크기
pub const MIN_CHUNK_SIZE: usize = 32_768; // 32KB

/// 최대 청크 크기
pub const MAX_CHUNK_SIZE: usize = 1_048_576; // 1MB

/// 기본 윈도우 크기
pub const DEFAULT_WINDOW_SIZE: usize = 4;

/// 최소 윈도우 크기
pub const MIN_WINDOW_SIZE: usize = 1;

/// 최대 윈도우 크기
pub const MAX_WINDOW_SIZE: usize = 16;

/// 청크별 최대 재시도 횟수
pub const MAX_RETRIES: u32 = 3;

/// 매직 넘버 (프레임 식별용)
pub const MAGIC_NUMBER: u32 = 0x50465446; // "PFTF"
