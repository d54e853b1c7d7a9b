//! AIMD 전송률 제어
//!
//! 배치가 끝날 때마다 호출되며, `adjust_interval` 이내의 재호출은 무시함.
//! - 타임아웃 발생: 청크 크기 절반, 윈도우 -2 (곱셈 감소)
//! - 처리율 향상: 윈도우 +1, 청크 크기 +10% (덧셈 증가)

use std::time::Duration;

use tokio::time::Instant;

use crate::Config;

/// 조정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateChange {
    /// 히스테리시스 구간, 아무것도 하지 않음
    Skipped,
    /// 평가했지만 변경 없음
    Unchanged,
    /// 타임아웃으로 감소
    Decreased { chunk_size: usize, window_size: usize },
    /// 처리율 향상으로 증가
    Increased { chunk_size: usize, window_size: usize },
}

#[derive(Debug)]
pub struct RateAdapter {
    chunk_size: usize,
    window_size: usize,

    min_chunk_size: usize,
    max_chunk_size: usize,
    min_window_size: usize,
    max_window_size: usize,
    interval: Duration,

    /// 마지막 조정 이후 타임아웃 수
    timeouts: u32,
    delivered_bytes: u64,
    delivered_prev: u64,
    last_ts: Instant,
    /// 직전 조정 시점의 처리율 (bytes/sec)
    last_throughput: f64,
}

impl RateAdapter {
    pub fn new(config: &Config) -> Self {
        Self::with_start(config, Instant::now())
    }

    pub fn with_start(config: &Config, now: Instant) -> Self {
        Self {
            chunk_size: config
                .initial_chunk_size
                .clamp(config.min_chunk_size, config.max_chunk_size),
            window_size: config
                .initial_window_size
                .clamp(config.min_window_size, config.max_window_size),
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            min_window_size: config.min_window_size,
            max_window_size: config.max_window_size,
            interval: config.adjust_interval(),
            timeouts: 0,
            delivered_bytes: 0,
            delivered_prev: 0,
            last_ts: now,
            last_throughput: 0.0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn pending_timeouts(&self) -> u32 {
        self.timeouts
    }

    /// 직전 조정 시점의 처리율 (bytes/sec)
    pub fn last_throughput(&self) -> f64 {
        self.last_throughput
    }

    /// 마지막 조정 이후 ACK된 바이트
    pub fn delivered_since_adjust(&self) -> u64 {
        self.delivered_bytes - self.delivered_prev
    }

    // 호출 위치: ACK 수신 시
    pub fn on_ack(&mut self, bytes: usize) {
        self.delivered_bytes += bytes as u64;
    }

    // 호출 위치: ACK 타임아웃 시
    pub fn on_timeout(&mut self) {
        self.timeouts += 1;
    }

    // 호출 위치: 배치 완료 시
    pub fn update(&mut self, now: Instant) -> RateChange {
        let dt = now.saturating_duration_since(self.last_ts);
        if dt < self.interval {
            return RateChange::Skipped;
        }

        let delivered = self.delivered_since_adjust();
        let throughput = delivered as f64 / dt.as_secs_f64().max(0.000_001);

        let change = if self.timeouts > 0 {
            self.chunk_size = (self.chunk_size / 2).max(self.min_chunk_size);
            self.window_size = self
                .window_size
                .saturating_sub(2)
                .max(self.min_window_size);
            self.timeouts = 0;
            RateChange::Decreased {
                chunk_size: self.chunk_size,
                window_size: self.window_size,
            }
        } else if throughput > self.last_throughput && self.window_size < self.max_window_size {
            self.window_size += 1;
            self.chunk_size = (self.chunk_size + self.chunk_size / 10).min(self.max_chunk_size);
            RateChange::Increased {
                chunk_size: self.chunk_size,
                window_size: self.window_size,
            }
        } else {
            RateChange::Unchanged
        };

        self.delivered_prev = self.delivered_bytes;
        self.last_throughput = throughput;
        self.last_ts = now;
        change
    }
}
