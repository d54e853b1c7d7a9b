//! 피어 엔드포인트
//!
//! 링크 하나당 수신 디스패치 태스크 하나:
//! - chunk-ack → `AckRouter` (송신 세션 깨움)
//! - 나머지 프레임 → `Reassembler`
//!
//! 같은 링크로 파일을 보내고 받을 수 있음

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::Link;
use crate::message::Frame;
use crate::orchestrator::{BatchReport, FileSource, Orchestrator};
use crate::output::OutputSink;
use crate::receiver::{ReceiveEvent, Reassembler};
use crate::report::Reporter;
use crate::sender::AckRouter;
use crate::{Config, Result};

/// 수신 이벤트 스트림
pub type EventReceiver = mpsc::UnboundedReceiver<ReceiveEvent>;

/// 피어 핸들
pub struct Peer {
    orchestrator: Orchestrator,
    acks: Arc<AckRouter>,
    running: Arc<AtomicBool>,
    closed: watch::Receiver<bool>,
    dispatch: JoinHandle<()>,
}

impl Peer {
    /// 디스패치 태스크 시작
    ///
    /// 런타임 안에서 호출되어야 함
    pub fn start(
        link: Link,
        config: Config,
        output: Arc<dyn OutputSink>,
        reporter: Arc<dyn Reporter>,
    ) -> (Self, EventReceiver) {
        let Link { sink, mut inbound } = link;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let acks = Arc::new(AckRouter::new());
        let running = Arc::new(AtomicBool::new(true));
        let (closed_tx, closed) = watch::channel(false);

        let mut reassembler = Reassembler::new(
            sink.clone(),
            output,
            reporter.clone(),
            config.progress_interval(),
        );

        let acks_dispatch = acks.clone();
        let running_dispatch = running.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match frame {
                    Frame::ChunkAck { file_id, index } => {
                        if !acks_dispatch.deliver(file_id, index) {
                            debug!("추적하지 않는 ACK: file_id={:016x}, index={}", file_id, index);
                        }
                    }
                    frame => match reassembler.handle_frame(frame) {
                        Ok(Some(event)) => {
                            // 이벤트를 아무도 받지 않아도 수신은 계속
                            let _ = event_tx.send(event);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("프레임 처리 에러: {}", e),
                    },
                }
            }

            info!("링크 종료, 디스패치 태스크 정지");
            running_dispatch.store(false, Ordering::SeqCst);
            let _ = closed_tx.send(true);
        });

        let orchestrator = Orchestrator::new(config, sink, acks.clone(), reporter);
        let peer = Self {
            orchestrator,
            acks,
            running,
            closed,
            dispatch,
        };
        (peer, event_rx)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// 파일 목록 전송
    pub async fn send_files<I>(&self, files: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = FileSource>,
    {
        self.orchestrator.send_files(files).await
    }

    /// ACK 대기 중인 청크 수
    pub fn pending_acks(&self) -> usize {
        self.acks.pending()
    }

    /// 링크가 살아 있는지
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 상대가 링크를 닫을 때까지 대기
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        while !*closed.borrow_and_update() {
            // 태스크가 중단되어 송신측이 사라져도 종료로 간주
            if closed.changed().await.is_err() {
                break;
            }
        }
    }

    /// 디스패치 태스크 정지
    pub fn stop(&self) {
        self.dispatch.abort();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.dispatch.abort();
    }
}
