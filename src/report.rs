//! 진행률/상태 보고 인터페이스
//!
//! 프로토콜 루프가 표시 계층을 호출하는 경계. 구현체는 블로킹하면 안 됨.

use std::time::Duration;

use tracing::{info, warn};

use crate::chunk::FileId;

/// 보고 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sending,
    Receiving,
}

/// 진행률
#[derive(Debug, Clone)]
pub struct Progress {
    pub role: Role,
    pub file_id: FileId,
    pub filename: String,
    pub transferred: u64,
    pub total: u64,
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

impl Progress {
    /// 진행률 (0.0 ~ 100.0)
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.transferred as f64 / self.total as f64 * 100.0
    }
}

/// 전송 종료 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// 송신 완료 또는 수신 검증 성공
    Completed { role: Role, filename: String },
    /// 체크섬 불일치로 폐기
    ChecksumFailed { filename: String },
    /// 선언된 크기와 조립 크기가 다름
    Incomplete { filename: String },
    /// 검증은 통과했지만 출력 대상에 저장 실패
    DeliveryFailed { filename: String, reason: String },
    /// 재전송 한도 초과 등 치명적 중단
    Aborted { filename: String, reason: String },
}

/// 표시 계층 콜백
pub trait Reporter: Send + Sync {
    fn progress(&self, progress: &Progress);
    fn status(&self, status: &TransferStatus);
}

/// tracing 로그로 보고
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn progress(&self, p: &Progress) {
        let verb = match p.role {
            Role::Sending => "Sending",
            Role::Receiving => "Receiving",
        };
        info!(
            "{} {}: {}/{} bytes ({:.1}%) | {:.2} MB/s | ETA: {}",
            verb,
            p.filename,
            p.transferred,
            p.total,
            p.percent(),
            p.bytes_per_sec / 1_000_000.0,
            p.eta
                .map(|eta| format!("{:.1}s", eta.as_secs_f64()))
                .unwrap_or_else(|| "-".into()),
        );
    }

    fn status(&self, status: &TransferStatus) {
        match status {
            TransferStatus::Completed { role, filename } => {
                info!("{:?} 완료: {}", role, filename)
            }
            TransferStatus::ChecksumFailed { filename } => {
                warn!("체크섬 불일치, 파일 폐기: {}", filename)
            }
            TransferStatus::Incomplete { filename } => {
                warn!("불완전한 전송, 파일 폐기: {}", filename)
            }
            TransferStatus::DeliveryFailed { filename, reason } => {
                warn!("파일 저장 실패: {} ({})", filename, reason)
            }
            TransferStatus::Aborted { filename, reason } => {
                warn!("전송 중단: {} ({})", filename, reason)
            }
        }
    }
}

/// 아무것도 하지 않는 보고자
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&self, _progress: &Progress) {}
    fn status(&self, _status: &TransferStatus) {}
}
