//! 송신 윈도우 (송신측)
//!
//! - 파일 하나당 하나의 전송 세션
//! - 송신 큐 앞쪽에서 `window_size`개씩 배치로 전송, 청크마다 ACK 대기
//! - 타임아웃 청크는 큐에 남겨 다음 배치에서 재전송
//! - 재시도 한도에 도달한 청크가 다시 선택되면 전송 전체 중단

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::FrameSink;
use crate::checksum::checksum_bytes;
use crate::chunk::{Chunk, ChunkIndex, FileId, Segmenter, TransferDescriptor};
use crate::message::Frame;
use crate::rate::{RateAdapter, RateChange};
use crate::report::{Progress, Reporter, Role, TransferStatus};
use crate::stats::{ProgressMeter, TransferStats};
use crate::{Config, Error, Result};

/// ACK 라우터
///
/// `(file_id, index)`마다 대기자 하나를 등록하고, ACK가 오면 그 대기자만 깨움
#[derive(Debug, Default)]
pub struct AckRouter {
    waiters: DashMap<(FileId, ChunkIndex), oneshot::Sender<()>>,
}

impl AckRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 대기자 등록
    pub fn register(&self, file_id: FileId, index: ChunkIndex) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert((file_id, index), tx);
        rx
    }

    /// ACK 전달
    ///
    /// 추적하지 않는 청크(중복 ACK, 이미 타임아웃된 청크)는 무시하고 false 반환
    pub fn deliver(&self, file_id: FileId, index: ChunkIndex) -> bool {
        match self.waiters.remove(&(file_id, index)) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => {
                trace!("추적하지 않는 ACK 무시: file_id={:016x}, index={}", file_id, index);
                false
            }
        }
    }

    /// 대기자 취소
    pub fn cancel(&self, file_id: FileId, index: ChunkIndex) {
        self.waiters.remove(&(file_id, index));
    }

    /// 전송 하나의 대기자 전부 제거
    pub fn forget(&self, file_id: FileId) {
        self.waiters.retain(|(id, _), _| *id != file_id);
    }

    /// 대기 중인 청크 수
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

/// 청크 하나의 배치 결과
#[derive(Debug)]
enum ChunkOutcome {
    Acked {
        index: ChunkIndex,
        bytes: usize,
        rtt: Duration,
    },
    TimedOut {
        index: ChunkIndex,
    },
}

/// 파일 하나의 송신 결과
#[derive(Debug, Clone)]
pub struct FileReport {
    pub file_id: FileId,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    /// 분할된 청크 수
    pub chunks: u32,
    /// 송신 큐 최대 길이
    pub peak_queue_len: usize,
    pub stats: TransferStats,
}

/// 세션 상태 (드레인 루프와 enqueue에서만 변경)
struct SessionState {
    /// ACK 받지 못한 청크 (삽입 순서 = 전송 순서)
    outbound: VecDeque<Chunk>,

    /// 청크별 재시도 횟수
    retries: HashMap<ChunkIndex, u32>,

    rate: RateAdapter,
    stats: TransferStats,
    meter: ProgressMeter,

    /// 원본 데이터 (체크섬 계산용)
    source: Option<Bytes>,
    checksum: Option<String>,

    /// 모든 청크가 큐에 들어갔는지
    input_done: bool,
    total_chunks: u32,
    peak_queue_len: usize,
}

/// 드레인 루프 재진입 방지 가드
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 송신 윈도우 (전송 세션)
pub struct SendWindow {
    config: Config,
    descriptor: TransferDescriptor,
    sink: Arc<dyn FrameSink>,
    acks: Arc<AckRouter>,
    reporter: Arc<dyn Reporter>,

    state: Mutex<SessionState>,

    /// 큐에 여유가 생김 (드레인 → enqueue)
    space: Notify,
    /// 큐에 청크가 들어옴 또는 입력 종료 (enqueue → 드레인)
    work: Notify,

    draining: AtomicBool,
}

impl SendWindow {
    /// 새 전송 세션 생성
    pub fn new(
        config: Config,
        descriptor: TransferDescriptor,
        sink: Arc<dyn FrameSink>,
        acks: Arc<AckRouter>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let state = SessionState {
            outbound: VecDeque::with_capacity(config.backpressure_limit()),
            retries: HashMap::new(),
            rate: RateAdapter::new(&config),
            stats: TransferStats::new(descriptor.total_size),
            meter: ProgressMeter::new(config.progress_interval()),
            source: None,
            checksum: descriptor.checksum.clone(),
            input_done: false,
            total_chunks: 0,
            peak_queue_len: 0,
        };

        Self {
            config,
            descriptor,
            sink,
            acks,
            reporter,
            state: Mutex::new(state),
            space: Notify::new(),
            work: Notify::new(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    pub fn file_id(&self) -> FileId {
        self.descriptor.file_id
    }

    /// 현재 송신 큐 길이
    pub fn queue_len(&self) -> usize {
        self.state.lock().outbound.len()
    }

    pub fn window_size(&self) -> usize {
        self.state.lock().rate.window_size()
    }

    pub fn chunk_size(&self) -> usize {
        self.state.lock().rate.chunk_size()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// 파일 전송 전체 (enqueue + 드레인 + 완료)
    pub async fn run(&self, data: Bytes) -> Result<FileReport> {
        let (_, report) = tokio::try_join!(self.enqueue(data), self.drain())?;
        report.ok_or(Error::DrainInProgress)
    }

    /// file-start 전송 후 파일을 분할해 송신 큐에 추가
    ///
    /// 큐가 백프레셔 한도에 닿으면 드레인될 때까지 대기.
    /// 세션당 한 번만 호출.
    pub async fn enqueue(&self, data: Bytes) -> Result<()> {
        let file_id = self.descriptor.file_id;
        self.sink.send(Frame::FileStart {
            filename: self.descriptor.filename.clone(),
            file_size: self.descriptor.total_size,
            file_id,
        })?;
        info!(
            "파일 시작: {} ({} bytes, file_id={:016x})",
            self.descriptor.filename, self.descriptor.total_size, file_id
        );

        let limit = self.config.backpressure_limit();
        let mut segmenter = Segmenter::new(data.clone());
        self.state.lock().source = Some(data);

        loop {
            let pushed = {
                let mut st = self.state.lock();
                if st.outbound.len() >= limit {
                    false
                } else {
                    // 잘라낼 때마다 현재 청크 크기 사용
                    let chunk_size = st.rate.chunk_size();
                    match segmenter.next_chunk(chunk_size) {
                        Some((index, payload)) => {
                            st.outbound.push_back(Chunk::new(file_id, index, payload));
                            st.total_chunks += 1;
                            st.peak_queue_len = st.peak_queue_len.max(st.outbound.len());
                            true
                        }
                        None => break,
                    }
                }
            };

            if pushed {
                self.work.notify_one();
            } else {
                trace!("백프레셔 대기: file_id={:016x}", file_id);
                self.space.notified().await;
            }
        }

        self.state.lock().input_done = true;
        self.work.notify_one();
        debug!(
            "분할 완료: file_id={:016x}, {} 청크",
            file_id,
            segmenter.next_index()
        );
        Ok(())
    }

    /// 드레인 루프
    ///
    /// 이미 실행 중이면 새 루프를 만들지 않고 `Ok(None)` 반환.
    /// 큐가 비고 입력이 끝나면 file-end를 보내고 결과 반환.
    pub async fn drain(&self) -> Result<Option<FileReport>> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "드레인 루프 이미 실행 중: file_id={:016x}",
                self.descriptor.file_id
            );
            return Ok(None);
        }
        let _guard = DrainGuard(&self.draining);

        match self.drain_loop().await {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                self.acks.forget(self.descriptor.file_id);
                warn!("전송 중단: {} ({})", self.descriptor.filename, e);
                self.reporter.status(&TransferStatus::Aborted {
                    filename: self.descriptor.filename.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn drain_loop(&self) -> Result<FileReport> {
        loop {
            let batch = {
                let mut guard = self.state.lock();
                let st = &mut *guard;

                if st.outbound.is_empty() {
                    if st.input_done {
                        break;
                    }
                    None
                } else {
                    let window = st.rate.window_size();
                    let now = Instant::now();
                    let mut batch = Vec::with_capacity(window);

                    for chunk in st.outbound.iter_mut().take(window) {
                        let attempts = st.retries.get(&chunk.index).copied().unwrap_or(0);
                        if attempts >= self.config.max_retries {
                            return Err(Error::RetriesExhausted {
                                file_id: chunk.file_id,
                                index: chunk.index,
                                attempts,
                            });
                        }
                        chunk.sent_at = Some(now);
                        batch.push((chunk.clone(), attempts));
                    }
                    Some(batch)
                }
            };

            match batch {
                Some(batch) => {
                    let outcomes = self.transmit_batch(batch).await?;
                    self.apply_outcomes(outcomes);
                    self.space.notify_one();
                }
                None => self.work.notified().await,
            }
        }

        self.complete()
    }

    /// 배치 전송: 청크마다 태스크 하나, 전부 끝날 때까지 대기
    async fn transmit_batch(&self, batch: Vec<(Chunk, u32)>) -> Result<Vec<ChunkOutcome>> {
        {
            let mut st = self.state.lock();
            st.stats.batches += 1;
            st.stats.chunks_sent += batch.len() as u64;
            st.stats.retransmitted_chunks +=
                batch.iter().filter(|(_, attempts)| *attempts > 0).count() as u64;
        }

        debug!(
            "배치 전송: file_id={:016x}, {} 청크",
            self.descriptor.file_id,
            batch.len()
        );

        let timeout = self.config.ack_timeout();
        let mut set = JoinSet::new();
        for (chunk, _) in batch {
            set.spawn(await_ack(
                self.sink.clone(),
                self.acks.clone(),
                chunk,
                timeout,
            ));
        }

        // 첫 치명적 에러에서 반환하면 JoinSet drop으로 나머지 대기 취소
        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            outcomes.push(joined??);
        }
        Ok(outcomes)
    }

    fn apply_outcomes(&self, outcomes: Vec<ChunkOutcome>) {
        let now = Instant::now();
        let progress = {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            for outcome in outcomes {
                match outcome {
                    ChunkOutcome::Acked { index, bytes, rtt } => {
                        if let Some(pos) = st.outbound.iter().position(|c| c.index == index) {
                            st.outbound.remove(pos);
                            st.retries.remove(&index);
                            st.rate.on_ack(bytes);
                            st.stats.acks += 1;
                            st.stats.transferred_bytes += bytes as u64;
                            trace!("ACK: index={}, rtt={:.2}ms", index, rtt.as_secs_f64() * 1000.0);
                        }
                    }
                    ChunkOutcome::TimedOut { index } => {
                        st.rate.on_timeout();
                        st.stats.timeouts += 1;
                        let attempts = st.retries.entry(index).or_insert(0);
                        *attempts += 1;
                        warn!(
                            "ACK 타임아웃: file_id={:016x}, index={}, attempts={}",
                            self.descriptor.file_id, index, *attempts
                        );
                    }
                }
            }

            match st.rate.update(now) {
                RateChange::Decreased {
                    chunk_size,
                    window_size,
                } => info!(
                    "전송률 감소: chunk_size={}, window={}",
                    chunk_size, window_size
                ),
                RateChange::Increased {
                    chunk_size,
                    window_size,
                } => debug!(
                    "전송률 증가: chunk_size={}, window={}, {:.2} MB/s",
                    chunk_size,
                    window_size,
                    st.rate.last_throughput() / 1_000_000.0
                ),
                RateChange::Skipped | RateChange::Unchanged => {}
            }

            st.meter
                .sample(st.stats.transferred_bytes, self.descriptor.total_size, now)
                .map(|sample| Progress {
                    role: Role::Sending,
                    file_id: self.descriptor.file_id,
                    filename: self.descriptor.filename.clone(),
                    transferred: st.stats.transferred_bytes,
                    total: self.descriptor.total_size,
                    bytes_per_sec: sample.bytes_per_sec,
                    eta: sample.eta,
                })
        };

        if let Some(progress) = progress {
            self.reporter.progress(&progress);
        }
    }

    /// file-end 전송 (체크섬은 여기서 처음 계산)
    fn complete(&self) -> Result<FileReport> {
        let report = {
            let mut st = self.state.lock();
            let checksum = match &st.checksum {
                Some(checksum) => checksum.clone(),
                None => {
                    let checksum = checksum_bytes(st.source.as_deref().unwrap_or_default());
                    st.checksum = Some(checksum.clone());
                    checksum
                }
            };

            FileReport {
                file_id: self.descriptor.file_id,
                filename: self.descriptor.filename.clone(),
                size: self.descriptor.total_size,
                checksum,
                chunks: st.total_chunks,
                peak_queue_len: st.peak_queue_len,
                stats: st.stats.clone(),
            }
        };

        self.sink.send(Frame::FileEnd {
            file_id: report.file_id,
            checksum: report.checksum.clone(),
        })?;

        info!(
            "파일 전송 완료: {} | {}",
            report.filename,
            report.stats.summary()
        );
        self.reporter.status(&TransferStatus::Completed {
            role: Role::Sending,
            filename: report.filename.clone(),
        });
        Ok(report)
    }
}

/// 청크 하나 전송 후 ACK 또는 타임아웃까지 대기
async fn await_ack(
    sink: Arc<dyn FrameSink>,
    acks: Arc<AckRouter>,
    chunk: Chunk,
    timeout: Duration,
) -> Result<ChunkOutcome> {
    let (file_id, index) = (chunk.file_id, chunk.index);
    // 전송 전에 등록해야 빠른 ACK를 놓치지 않음
    let rx = acks.register(file_id, index);
    let sent_at = Instant::now();

    if let Err(e) = sink.send(Frame::chunk(file_id, index, chunk.data.clone())) {
        acks.cancel(file_id, index);
        return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(())) => Ok(ChunkOutcome::Acked {
            index,
            bytes: chunk.len(),
            rtt: sent_at.elapsed(),
        }),
        Ok(Err(_)) | Err(_) => {
            acks.cancel(file_id, index);
            Ok(ChunkOutcome::TimedOut { index })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::NullReporter;
    use std::collections::HashSet;

    /// 전송 프레임을 기록하고 청크에 즉시 ACK하는 싱크
    struct AutoAckSink {
        acks: Arc<AckRouter>,
        frames: Mutex<Vec<Frame>>,
        dropped: HashSet<ChunkIndex>,
    }

    impl AutoAckSink {
        fn new(acks: Arc<AckRouter>, dropped: &[ChunkIndex]) -> Arc<Self> {
            Arc::new(Self {
                acks,
                frames: Mutex::new(Vec::new()),
                dropped: dropped.iter().copied().collect(),
            })
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().clone()
        }

        fn chunk_sends(&self, wanted: ChunkIndex) -> usize {
            self.frames()
                .iter()
                .filter(|f| matches!(f, Frame::FileChunk { index, .. } if *index == wanted))
                .count()
        }
    }

    impl FrameSink for AutoAckSink {
        fn send(&self, frame: Frame) -> Result<()> {
            if let Frame::FileChunk { file_id, index, .. } = &frame {
                if !self.dropped.contains(index) {
                    self.acks.deliver(*file_id, *index);
                }
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn small_config() -> Config {
        Config {
            initial_chunk_size: 1024,
            min_chunk_size: 256,
            max_chunk_size: 4096,
            initial_window_size: 4,
            min_window_size: 1,
            max_window_size: 8,
            ..Config::default()
        }
    }

    fn window(config: Config, size: u64, sink: Arc<AutoAckSink>, acks: Arc<AckRouter>) -> SendWindow {
        SendWindow::new(
            config,
            TransferDescriptor::new("test.bin", size),
            sink,
            acks,
            Arc::new(NullReporter),
        )
    }

    #[tokio::test]
    async fn test_one_megabyte_transfer() {
        let acks = Arc::new(AckRouter::new());
        let sink = AutoAckSink::new(acks.clone(), &[]);
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 253) as u8).collect();
        let window = window(Config::default(), data.len() as u64, sink.clone(), acks.clone());

        let report = window.run(Bytes::from(data.clone())).await.unwrap();

        let frames = sink.frames();
        let chunk_lens: Vec<usize> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::FileChunk { chunk, .. } => Some(chunk.len()),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_lens, vec![262_144, 262_144, 262_144, 213_568]);
        assert_eq!(report.stats.acks, 4);
        assert_eq!(report.chunks, 4);

        assert!(matches!(frames.first(), Some(Frame::FileStart { file_size: 1_000_000, .. })));
        match frames.last() {
            Some(Frame::FileEnd { checksum, .. }) => assert_eq!(checksum, &checksum_bytes(&data)),
            other => panic!("file-end 없음: {:?}", other),
        }
        assert_eq!(acks.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_aborts() {
        let acks = Arc::new(AckRouter::new());
        let sink = AutoAckSink::new(acks.clone(), &[7]);
        let window = window(small_config(), 16 * 1024, sink.clone(), acks.clone());

        let result = window.run(Bytes::from(vec![1u8; 16 * 1024])).await;

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { index: 7, attempts: 3, .. })
        ));
        assert_eq!(sink.chunk_sends(7), 3);
        assert!(!sink
            .frames()
            .iter()
            .any(|f| matches!(f, Frame::FileEnd { .. })));
        assert_eq!(acks.pending(), 0);
        assert!(!window.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_timeout_is_retried() {
        // 첫 전송만 유실되는 싱크
        struct LoseFirst {
            acks: Arc<AckRouter>,
            seen: Mutex<HashSet<ChunkIndex>>,
        }
        impl FrameSink for LoseFirst {
            fn send(&self, frame: Frame) -> Result<()> {
                if let Frame::FileChunk { file_id, index, .. } = frame {
                    if !self.seen.lock().insert(index) {
                        self.acks.deliver(file_id, index);
                    }
                }
                Ok(())
            }
        }

        let acks = Arc::new(AckRouter::new());
        let sink = Arc::new(LoseFirst {
            acks: acks.clone(),
            seen: Mutex::new(HashSet::new()),
        });
        let window = SendWindow::new(
            small_config(),
            TransferDescriptor::new("retry.bin", 4096),
            sink,
            acks,
            Arc::new(NullReporter),
        );

        let report = window.run(Bytes::from(vec![9u8; 4096])).await.unwrap();
        assert_eq!(report.stats.timeouts, 4);
        assert_eq!(report.stats.retransmitted_chunks, 4);
        assert_eq!(report.stats.acks, 4);
    }

    #[tokio::test]
    async fn test_queue_respects_backpressure() {
        let acks = Arc::new(AckRouter::new());
        let sink = AutoAckSink::new(acks.clone(), &[]);
        let config = Config {
            initial_chunk_size: 16,
            min_chunk_size: 16,
            max_chunk_size: 16,
            initial_window_size: 2,
            min_window_size: 1,
            max_window_size: 2,
            ..Config::default()
        };
        let window = window(config, 1000, sink.clone(), acks);

        let report = window.run(Bytes::from(vec![0u8; 1000])).await.unwrap();

        assert_eq!(report.chunks, 63);
        assert!(report.peak_queue_len <= 4);
        assert_eq!(sink.chunk_sends(62), 1);
    }

    #[tokio::test]
    async fn test_second_drain_is_rejected() {
        let acks = Arc::new(AckRouter::new());
        let sink = AutoAckSink::new(acks.clone(), &[]);
        let window = window(small_config(), 2048, sink, acks);

        let (first, second, enqueued) = tokio::join!(window.drain(), async {
            tokio::task::yield_now().await;
            window.drain().await
        }, async {
            tokio::task::yield_now().await;
            window.enqueue(Bytes::from(vec![3u8; 2048])).await
        });

        assert!(enqueued.is_ok());
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_sends_only_framing() {
        let acks = Arc::new(AckRouter::new());
        let sink = AutoAckSink::new(acks.clone(), &[]);
        let window = window(Config::default(), 0, sink.clone(), acks);

        let report = window.run(Bytes::new()).await.unwrap();

        assert_eq!(report.chunks, 0);
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Frame::FileEnd { .. }));
    }

    #[test]
    fn test_unknown_ack_is_noop() {
        let acks = AckRouter::new();
        assert!(!acks.deliver(1, 0));

        let _rx = acks.register(1, 0);
        assert!(acks.deliver(1, 0));
        // 중복 ACK
        assert!(!acks.deliver(1, 0));
    }
}
