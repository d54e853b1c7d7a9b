//! 수신자 (재조립기)
//!
//! - 청크 도착 순서와 무관하게 인덱스로 버퍼링
//! - 청크마다 즉시 ACK (중복 청크도 ACK)
//! - file-end에서 연속 구간을 조립하고 체크섬 검증
//!
//! 상태: Idle → Receiving → Finalizing → (Verified | Rejected) → Idle

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::channel::FrameSink;
use crate::checksum::{checksum_bytes, checksum_matches};
use crate::chunk::{ChunkIndex, FileId};
use crate::message::Frame;
use crate::output::OutputSink;
use crate::report::{Progress, Reporter, Role, TransferStatus};
use crate::stats::{ProgressMeter, TransferStats};
use crate::{Error, Result};

/// 재조립기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Receiving,
    Finalizing,
}

/// 수신 이벤트
#[derive(Debug)]
pub enum ReceiveEvent {
    /// 배치 시작 (파일 N개 예고)
    BatchAnnounced { total_files: u32 },
    /// 파일 수신 시작
    Started {
        file_id: FileId,
        filename: String,
        file_size: u64,
    },
    /// 검증 성공, 출력으로 전달됨
    Verified {
        file_id: FileId,
        filename: String,
        size: u64,
    },
    /// 검증 실패 또는 불완전한 전송
    Failed {
        file_id: FileId,
        filename: String,
        error: Error,
    },
}

/// 진행 중인 수신 전송
struct IncomingTransfer {
    file_id: FileId,
    filename: String,
    declared_size: u64,

    /// 인덱스 → 페이로드
    buffer: HashMap<ChunkIndex, Bytes>,

    /// 버퍼 합계 (같은 인덱스를 덮어쓰면 기존 길이를 빼고 갱신)
    received_size: u64,

    /// 아직 없는 가장 작은 인덱스
    cursor: ChunkIndex,

    stats: TransferStats,
    meter: ProgressMeter,
}

impl IncomingTransfer {
    fn new(file_id: FileId, filename: String, declared_size: u64, progress_interval: Duration) -> Self {
        Self {
            file_id,
            filename,
            declared_size,
            buffer: HashMap::new(),
            received_size: 0,
            cursor: 0,
            stats: TransferStats::new(declared_size),
            meter: ProgressMeter::new(progress_interval),
        }
    }

    fn buffered_size(&self) -> u64 {
        self.buffer.values().map(|chunk| chunk.len() as u64).sum()
    }

    /// 연속 구간 커서 전진
    fn advance_cursor(&mut self) {
        while self.buffer.contains_key(&self.cursor) {
            self.cursor += 1;
        }
    }

    /// 0..cursor 구간을 인덱스 순서로 이어 붙임
    fn assemble(&self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.received_size as usize);
        for index in 0..self.cursor {
            if let Some(chunk) = self.buffer.get(&index) {
                data.extend_from_slice(chunk);
            }
        }
        data.freeze()
    }
}

/// 수신 재조립기 (단일 수신 핸들러에서만 접근)
pub struct Reassembler {
    state: ReceiverState,
    active: Option<IncomingTransfer>,
    sink: Arc<dyn FrameSink>,
    output: Arc<dyn OutputSink>,
    reporter: Arc<dyn Reporter>,
    progress_interval: Duration,

    expected_files: Option<u32>,
    finished_files: u32,
}

impl Reassembler {
    pub fn new(
        sink: Arc<dyn FrameSink>,
        output: Arc<dyn OutputSink>,
        reporter: Arc<dyn Reporter>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            state: ReceiverState::Idle,
            active: None,
            sink,
            output,
            reporter,
            progress_interval,
            expected_files: None,
            finished_files: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// 현재 전송 ID
    pub fn active_file_id(&self) -> Option<FileId> {
        self.active.as_ref().map(|t| t.file_id)
    }

    /// 연속 구간 커서
    pub fn cursor(&self) -> Option<ChunkIndex> {
        self.active.as_ref().map(|t| t.cursor)
    }

    /// 현재까지 받은 바이트
    pub fn received_size(&self) -> Option<u64> {
        self.active.as_ref().map(|t| t.received_size)
    }

    /// 배치에서 예고된 파일 수
    pub fn expected_files(&self) -> Option<u32> {
        self.expected_files
    }

    /// 검증 성공/실패로 끝난 파일 수
    pub fn finished_files(&self) -> u32 {
        self.finished_files
    }

    /// 프레임 하나 처리
    ///
    /// 반환되는 에러는 ACK 송신 에러뿐이며, 검증/저장 실패는 `ReceiveEvent::Failed`로 전달
    pub fn handle_frame(&mut self, frame: Frame) -> Result<Option<ReceiveEvent>> {
        match frame {
            Frame::TransferStart { total_files } => {
                info!("배치 수신 예고: 파일 {}개", total_files);
                self.expected_files = Some(total_files);
                self.finished_files = 0;
                Ok(Some(ReceiveEvent::BatchAnnounced { total_files }))
            }
            Frame::FileStart {
                filename,
                file_size,
                file_id,
            } => Ok(self.handle_file_start(file_id, filename, file_size)),
            Frame::FileChunk {
                file_id,
                index,
                chunk,
                timestamp,
            } => {
                self.handle_chunk(file_id, index, chunk, timestamp)?;
                Ok(None)
            }
            Frame::FileEnd { file_id, checksum } => self.handle_file_end(file_id, &checksum),
            Frame::ChunkAck { file_id, index } => {
                trace!("수신측에 온 ACK 무시: file_id={:016x}, index={}", file_id, index);
                Ok(None)
            }
        }
    }

    fn handle_file_start(
        &mut self,
        file_id: FileId,
        filename: String,
        file_size: u64,
    ) -> Option<ReceiveEvent> {
        if let Some(active) = &self.active {
            if active.file_id == file_id {
                debug!("중복 file-start 무시: file_id={:016x}", file_id);
                return None;
            }
            warn!(
                "이전 전송 폐기: {} (file_id={:016x}, {}/{} bytes)",
                active.filename, active.file_id, active.received_size, active.declared_size
            );
        }

        info!(
            "파일 수신 시작: {} ({} bytes, file_id={:016x})",
            filename, file_size, file_id
        );
        self.active = Some(IncomingTransfer::new(
            file_id,
            filename.clone(),
            file_size,
            self.progress_interval,
        ));
        self.state = ReceiverState::Receiving;

        Some(ReceiveEvent::Started {
            file_id,
            filename,
            file_size,
        })
    }

    fn handle_chunk(
        &mut self,
        file_id: FileId,
        index: ChunkIndex,
        chunk: Bytes,
        timestamp: u64,
    ) -> Result<()> {
        let transfer = match self.active.as_mut() {
            Some(t) if t.file_id == file_id && self.state == ReceiverState::Receiving => t,
            _ => {
                trace!("다른 전송의 청크 무시: file_id={:016x}, index={}", file_id, index);
                return Ok(());
            }
        };

        // 같은 인덱스를 덮어쓸 때는 기존 길이를 빼고 계산
        let replaced = transfer.buffer.get(&index).map_or(0, |c| c.len() as u64);
        let tentative = transfer.received_size - replaced + chunk.len() as u64;
        if tentative > transfer.declared_size {
            warn!(
                "선언 크기 초과 청크 폐기: file_id={:016x}, index={}, {} > {}",
                file_id, index, tentative, transfer.declared_size
            );
            return Ok(());
        }

        if replaced > 0 || transfer.buffer.contains_key(&index) {
            transfer.stats.duplicate_chunks += 1;
        }
        transfer.buffer.insert(index, chunk);
        transfer.received_size = tentative;
        debug_assert_eq!(transfer.received_size, transfer.buffered_size());
        transfer.stats.transferred_bytes = transfer.received_size;
        transfer.stats.acks += 1;
        transfer.advance_cursor();

        trace!(
            "청크 수신: index={}, cursor={}, latency={}us",
            index,
            transfer.cursor,
            crate::message::now_micros().saturating_sub(timestamp)
        );

        self.sink.send(Frame::ChunkAck { file_id, index })?;

        let progress = transfer
            .meter
            .sample(transfer.received_size, transfer.declared_size, Instant::now())
            .map(|sample| Progress {
                role: Role::Receiving,
                file_id,
                filename: transfer.filename.clone(),
                transferred: transfer.received_size,
                total: transfer.declared_size,
                bytes_per_sec: sample.bytes_per_sec,
                eta: sample.eta,
            });
        if let Some(progress) = progress {
            self.reporter.progress(&progress);
        }

        Ok(())
    }

    fn handle_file_end(&mut self, file_id: FileId, checksum: &str) -> Result<Option<ReceiveEvent>> {
        if self.active_file_id() != Some(file_id) {
            trace!("다른 전송의 file-end 무시: file_id={:016x}", file_id);
            return Ok(None);
        }

        self.state = ReceiverState::Finalizing;
        // 어떤 결과든 버퍼를 비우고 Idle로 복귀
        let transfer = match self.active.take() {
            Some(transfer) => transfer,
            None => return Ok(None),
        };
        self.state = ReceiverState::Idle;
        self.finished_files += 1;

        let data = transfer.assemble();
        let actual_size = data.len() as u64;

        if actual_size != transfer.declared_size {
            warn!(
                "불완전한 전송: {} ({} / {} bytes, cursor={}, buffered={})",
                transfer.filename,
                actual_size,
                transfer.declared_size,
                transfer.cursor,
                transfer.buffer.len()
            );
            self.reporter.status(&TransferStatus::Incomplete {
                filename: transfer.filename.clone(),
            });
            return Ok(Some(ReceiveEvent::Failed {
                file_id,
                filename: transfer.filename,
                error: Error::IncompleteTransfer {
                    file_id,
                    expected: transfer.declared_size,
                    actual: actual_size,
                },
            }));
        }

        let actual = checksum_bytes(&data);
        if !checksum_matches(checksum, &actual) {
            warn!(
                "체크섬 불일치: {} (expected {}, got {})",
                transfer.filename, checksum, actual
            );
            self.reporter.status(&TransferStatus::ChecksumFailed {
                filename: transfer.filename.clone(),
            });
            return Ok(Some(ReceiveEvent::Failed {
                file_id,
                filename: transfer.filename,
                error: Error::ChecksumMismatch {
                    expected: checksum.to_string(),
                    actual,
                },
            }));
        }

        info!(
            "파일 검증 완료: {} | {}",
            transfer.filename,
            transfer.stats.summary()
        );
        if let Err(e) = self.output.deliver(&transfer.filename, data) {
            warn!("파일 저장 실패: {} ({})", transfer.filename, e);
            self.reporter.status(&TransferStatus::DeliveryFailed {
                filename: transfer.filename.clone(),
                reason: e.to_string(),
            });
            return Ok(Some(ReceiveEvent::Failed {
                file_id,
                filename: transfer.filename,
                error: e,
            }));
        }
        self.reporter.status(&TransferStatus::Completed {
            role: Role::Receiving,
            filename: transfer.filename.clone(),
        });

        Ok(Some(ReceiveEvent::Verified {
            file_id,
            filename: transfer.filename,
            size: actual_size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryOutput;
    use crate::report::NullReporter;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
    }

    impl FrameSink for RecordingSink {
        fn send(&self, frame: Frame) -> Result<()> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn reassembler() -> (Reassembler, Arc<RecordingSink>, Arc<MemoryOutput>) {
        let sink = Arc::new(RecordingSink::default());
        let output = Arc::new(MemoryOutput::new());
        let reassembler = Reassembler::new(
            sink.clone(),
            output.clone(),
            Arc::new(NullReporter),
            Duration::from_millis(500),
        );
        (reassembler, sink, output)
    }

    fn start(r: &mut Reassembler, file_id: FileId, size: u64) {
        r.handle_frame(Frame::FileStart {
            filename: "a.txt".into(),
            file_size: size,
            file_id,
        })
        .unwrap();
    }

    fn chunk(r: &mut Reassembler, file_id: FileId, index: ChunkIndex, data: &'static [u8]) {
        r.handle_frame(Frame::chunk(file_id, index, Bytes::from_static(data)))
            .unwrap();
    }

    #[test]
    fn test_out_of_order_assembly() {
        let (mut r, sink, output) = reassembler();
        start(&mut r, 1, 9);
        assert_eq!(r.state(), ReceiverState::Receiving);

        chunk(&mut r, 1, 0, b"aaa");
        assert_eq!(r.cursor(), Some(1));
        chunk(&mut r, 1, 2, b"ccc");
        assert_eq!(r.cursor(), Some(1));
        chunk(&mut r, 1, 1, b"bbb");
        assert_eq!(r.cursor(), Some(3));

        let acks: Vec<ChunkIndex> = sink
            .frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::ChunkAck { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![0, 2, 1]);

        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b"aaabbbccc"),
            })
            .unwrap();
        assert!(matches!(event, Some(ReceiveEvent::Verified { size: 9, .. })));
        assert_eq!(r.state(), ReceiverState::Idle);
        assert_eq!(
            output.files(),
            vec![("a.txt".to_string(), Bytes::from_static(b"aaabbbccc"))]
        );
    }

    #[test]
    fn test_duplicate_chunk_is_acked_but_not_counted() {
        let (mut r, sink, _) = reassembler();
        start(&mut r, 1, 6);

        chunk(&mut r, 1, 0, b"abc");
        chunk(&mut r, 1, 0, b"abc");
        assert_eq!(r.received_size(), Some(3));
        assert_eq!(sink.frames.lock().len(), 2);

        chunk(&mut r, 1, 1, b"def");
        assert_eq!(r.received_size(), Some(6));
    }

    #[test]
    fn test_foreign_chunk_is_ignored() {
        let (mut r, sink, _) = reassembler();
        chunk(&mut r, 9, 0, b"zzz");
        start(&mut r, 1, 3);
        chunk(&mut r, 2, 0, b"zzz");

        assert!(sink.frames.lock().is_empty());
        assert_eq!(r.received_size(), Some(0));
    }

    #[test]
    fn test_new_transfer_discards_stale_buffer() {
        let (mut r, _, output) = reassembler();
        start(&mut r, 1, 6);
        chunk(&mut r, 1, 0, b"old");

        start(&mut r, 2, 3);
        assert_eq!(r.active_file_id(), Some(2));
        assert_eq!(r.received_size(), Some(0));

        // 이전 전송의 file-end는 무시
        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b"old"),
            })
            .unwrap();
        assert!(event.is_none());
        assert!(output.files().is_empty());
    }

    #[test]
    fn test_checksum_mismatch_rejects() {
        let (mut r, _, output) = reassembler();
        start(&mut r, 1, 3);
        chunk(&mut r, 1, 0, b"abc");

        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b"abd"),
            })
            .unwrap();

        assert!(matches!(
            event,
            Some(ReceiveEvent::Failed {
                error: Error::ChecksumMismatch { .. },
                ..
            })
        ));
        assert!(output.files().is_empty());
        assert_eq!(r.state(), ReceiverState::Idle);
        assert_eq!(r.active_file_id(), None);
    }

    #[test]
    fn test_size_mismatch_is_incomplete() {
        let (mut r, _, output) = reassembler();
        start(&mut r, 1, 9);
        chunk(&mut r, 1, 0, b"aaa");
        chunk(&mut r, 1, 2, b"ccc");

        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b"aaabbbccc"),
            })
            .unwrap();

        assert!(matches!(
            event,
            Some(ReceiveEvent::Failed {
                error: Error::IncompleteTransfer {
                    expected: 9,
                    actual: 3,
                    ..
                },
                ..
            })
        ));
        assert!(output.files().is_empty());
        assert_eq!(r.state(), ReceiverState::Idle);
    }

    #[test]
    fn test_oversized_chunk_is_dropped_without_ack() {
        let (mut r, sink, _) = reassembler();
        start(&mut r, 1, 4);
        chunk(&mut r, 1, 0, b"abc");
        chunk(&mut r, 1, 1, b"def");

        assert_eq!(r.received_size(), Some(3));
        assert_eq!(sink.frames.lock().len(), 1);
    }

    #[test]
    fn test_delivery_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mut r = Reassembler::new(
            sink,
            Arc::new(crate::output::DirectoryOutput::new(dir.path())),
            Arc::new(NullReporter),
            Duration::from_millis(500),
        );

        r.handle_frame(Frame::FileStart {
            filename: "../evil.bin".into(),
            file_size: 3,
            file_id: 1,
        })
        .unwrap();
        chunk(&mut r, 1, 0, b"abc");

        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b"abc"),
            })
            .unwrap();

        assert!(matches!(
            event,
            Some(ReceiveEvent::Failed {
                error: Error::InvalidFilename(_),
                ..
            })
        ));
        assert_eq!(r.state(), ReceiverState::Idle);
        assert_eq!(r.finished_files(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_file_verifies() {
        let (mut r, _, output) = reassembler();
        start(&mut r, 1, 0);

        let event = r
            .handle_frame(Frame::FileEnd {
                file_id: 1,
                checksum: checksum_bytes(b""),
            })
            .unwrap();
        assert!(matches!(event, Some(ReceiveEvent::Verified { size: 0, .. })));
        assert_eq!(output.files().len(), 1);
    }
}
