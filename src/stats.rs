//! 전송 통계

use std::time::Duration;

use tokio::time::Instant;

/// 전송 하나의 통계 (송신/수신 공용)
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 파일 전체 크기
    pub total_bytes: u64,

    /// 확인된 바이트 (송신: ACK, 수신: 버퍼 합계)
    pub transferred_bytes: u64,

    /// 전송한 청크 프레임 수 (재전송 포함)
    pub chunks_sent: u64,

    /// 재전송 청크 수
    pub retransmitted_chunks: u64,

    /// ACK 수
    pub acks: u64,

    /// ACK 타임아웃 수
    pub timeouts: u64,

    /// 중복 수신 청크 수
    pub duplicate_chunks: u64,

    /// 배치 수
    pub batches: u64,
}

impl TransferStats {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes,
            transferred_bytes: 0,
            chunks_sent: 0,
            retransmitted_chunks: 0,
            acks: 0,
            timeouts: 0,
            duplicate_chunks: 0,
            batches: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 처리율 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.transferred_bytes as f64 / elapsed
    }

    /// 타임아웃 비율
    pub fn timeout_rate(&self) -> f64 {
        if self.chunks_sent == 0 {
            return 0.0;
        }
        self.timeouts as f64 / self.chunks_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {}/{} | Throughput: {:.2} MB/s | Chunks: {} (retx {}) | Acks: {} | Timeouts: {} | Dups: {}",
            self.elapsed().as_secs_f64(),
            self.transferred_bytes,
            self.total_bytes,
            self.overall_throughput() / 1_000_000.0,
            self.chunks_sent,
            self.retransmitted_chunks,
            self.acks,
            self.timeouts,
            self.duplicate_chunks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(0)
    }
}

/// 진행률 샘플
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// 직전 샘플 이후 처리율 (bytes/sec)
    pub bytes_per_sec: f64,
    /// 남은 시간 추정 (처리율이 0이면 None)
    pub eta: Option<Duration>,
}

/// 일정 간격으로만 속도/ETA를 계산하는 측정기
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    interval: Duration,
    last_update: Instant,
    last_bytes: u64,
}

impl ProgressMeter {
    pub fn new(interval: Duration) -> Self {
        Self::with_start(interval, Instant::now())
    }

    pub fn with_start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_update: now,
            last_bytes: 0,
        }
    }

    /// 간격이 지났으면 샘플 반환, 아니면 None
    pub fn sample(&mut self, transferred: u64, total: u64, now: Instant) -> Option<ProgressSample> {
        let dt = now.saturating_duration_since(self.last_update);
        // 완료 시점은 간격과 무관하게 보고
        if dt < self.interval && transferred < total {
            return None;
        }

        let secs = dt.as_secs_f64();
        let bytes_per_sec = if secs > 0.0 {
            transferred.saturating_sub(self.last_bytes) as f64 / secs
        } else {
            0.0
        };
        let remaining = total.saturating_sub(transferred);
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if bytes_per_sec > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
        } else {
            None
        };

        self.last_update = now;
        self.last_bytes = transferred;
        Some(ProgressSample { bytes_per_sec, eta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_throttles() {
        let start = Instant::now();
        let mut meter = ProgressMeter::with_start(Duration::from_millis(500), start);

        assert!(meter.sample(100, 1000, start + Duration::from_millis(100)).is_none());

        let sample = meter
            .sample(500, 1000, start + Duration::from_millis(500))
            .unwrap();
        assert_eq!(sample.bytes_per_sec, 1000.0);
        assert_eq!(sample.eta, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_meter_reports_completion_immediately() {
        let start = Instant::now();
        let mut meter = ProgressMeter::with_start(Duration::from_secs(10), start);

        let sample = meter.sample(1000, 1000, start).unwrap();
        assert_eq!(sample.eta, Some(Duration::ZERO));
    }

    #[test]
    fn test_stats_summary() {
        let mut stats = TransferStats::new(1000);
        stats.chunks_sent = 4;
        stats.timeouts = 1;
        assert_eq!(stats.timeout_rate(), 0.25);
        assert!(stats.summary().contains("Timeouts: 1"));
    }
}
