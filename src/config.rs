//! 프로토콜 설정

use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE, MAX_CHUNK_SIZE, MAX_RETRIES,
    MAX_WINDOW_SIZE, MIN_CHUNK_SIZE, MIN_WINDOW_SIZE,
};

/// PFT 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 첫 청크 크기 (바이트)
    pub initial_chunk_size: usize,

    /// 최소 청크 크기
    pub min_chunk_size: usize,

    /// 최대 청크 크기
    pub max_chunk_size: usize,

    /// 첫 윈도우 크기 (동시 전송 청크 수)
    pub initial_window_size: usize,

    /// 최소 윈도우 크기
    pub min_window_size: usize,

    /// 최대 윈도우 크기
    /// 송신 큐는 이 값의 2배를 넘지 않음
    pub max_window_size: usize,

    /// ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 청크별 최대 재시도 횟수
    pub max_retries: u32,

    /// 전송률 재조정 최소 간격 (밀리초)
    pub adjust_interval_ms: u64,

    /// 파일 사이 대기 시간 (밀리초)
    pub settle_delay_ms: u64,

    /// 진행률 보고 간격 (밀리초)
    pub progress_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_chunk_size: DEFAULT_CHUNK_SIZE, // 256KB
            min_chunk_size: MIN_CHUNK_SIZE,         // 32KB
            max_chunk_size: MAX_CHUNK_SIZE,         // 1MB
            initial_window_size: DEFAULT_WINDOW_SIZE,
            min_window_size: MIN_WINDOW_SIZE,
            max_window_size: MAX_WINDOW_SIZE,
            ack_timeout_ms: 5000,       // 5초
            max_retries: MAX_RETRIES,
            adjust_interval_ms: 2000,   // 2초 히스테리시스
            settle_delay_ms: 1000,      // 1초
            progress_interval_ms: 500,  // 0.5초
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 큐 백프레셔 한도 (청크 수)
    pub fn backpressure_limit(&self) -> usize {
        self.max_window_size * 2
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn adjust_interval(&self) -> Duration {
        Duration::from_millis(self.adjust_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size == 0 || self.min_chunk_size > self.max_chunk_size {
            return Err(Error::InvalidConfig(format!(
                "청크 크기 범위 오류: min={}, max={}",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if self.max_chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "최대 청크 크기 초과: {} > {}",
                self.max_chunk_size, MAX_CHUNK_SIZE
            )));
        }
        if !(self.min_chunk_size..=self.max_chunk_size).contains(&self.initial_chunk_size) {
            return Err(Error::InvalidConfig(format!(
                "초기 청크 크기가 범위 밖: {}",
                self.initial_chunk_size
            )));
        }
        if self.min_window_size == 0 || self.min_window_size > self.max_window_size {
            return Err(Error::InvalidConfig(format!(
                "윈도우 크기 범위 오류: min={}, max={}",
                self.min_window_size, self.max_window_size
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfig("max_retries는 1 이상이어야 함".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("ack_timeout_ms는 0보다 커야 함".into()));
        }
        Ok(())
    }

    /// 이름으로 프리셋 선택 (`default`, `unstable`, `fast`)
    pub fn from_profile(name: &str) -> Result<Self> {
        match name {
            "default" => Ok(Self::default()),
            "unstable" => Ok(Self::unstable_network()),
            "fast" => Ok(Self::high_performance()),
            other => Err(Error::InvalidConfig(format!("알 수 없는 프로파일: {}", other))),
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            initial_chunk_size: 64 * 1024,   // 작은 청크
            min_chunk_size: 16 * 1024,
            max_chunk_size: 256 * 1024,
            initial_window_size: 2,
            min_window_size: 1,
            max_window_size: 8,
            ack_timeout_ms: 10_000,
            max_retries: 6,
            adjust_interval_ms: 3000,
            settle_delay_ms: 1500,
            progress_interval_ms: 1000,
        }
    }

    /// 고성능 링크용 설정
    pub fn high_performance() -> Self {
        Self {
            initial_chunk_size: 512 * 1024,
            min_chunk_size: 64 * 1024,
            max_chunk_size: MAX_CHUNK_SIZE,
            initial_window_size: 8,
            min_window_size: 2,
            max_window_size: 32,
            ack_timeout_ms: 3000,
            max_retries: MAX_RETRIES,
            adjust_interval_ms: 1000,
            settle_delay_ms: 500,
            progress_interval_ms: 500,
        }
    }
}
