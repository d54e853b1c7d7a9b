//! 전송 오케스트레이터
//!
//! 파일 큐를 한 번에 하나씩 전송. 배치 전체를 transfer-start로 감싸고,
//! 파일 사이에는 안정화 대기(settle delay)를 둠.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::channel::FrameSink;
use crate::chunk::TransferDescriptor;
use crate::message::Frame;
use crate::report::Reporter;
use crate::sender::{AckRouter, FileReport, SendWindow};
use crate::{Config, Error, Result};

/// 전송할 파일의 출처
#[derive(Debug, Clone)]
pub enum FileSource {
    /// 디스크 파일 (전송 직전에 비동기로 읽음)
    Path(PathBuf),
    /// 메모리 버퍼
    Memory { name: String, data: Bytes },
}

impl FileSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn memory(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// 수신측에 전달되는 파일 이름
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            Self::Memory { name, .. } => name.clone(),
        }
    }

    /// 파일 내용
    pub async fn load(&self) -> Result<Bytes> {
        match self {
            Self::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            Self::Memory { data, .. } => Ok(data.clone()),
        }
    }
}

/// 전송 대기 파일 목록 (전송 시작 전까지 순서 변경 가능)
#[derive(Debug, Clone, Default)]
pub struct FileQueue {
    files: VecDeque<FileSource>,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: FileSource) {
        self.files.push_back(source);
    }

    pub fn remove(&mut self, position: usize) -> Option<FileSource> {
        self.files.remove(position)
    }

    /// `from` 위치의 파일을 `to` 위치로 이동
    pub fn move_to(&mut self, from: usize, to: usize) -> bool {
        if from >= self.files.len() || to >= self.files.len() {
            return false;
        }
        if let Some(source) = self.files.remove(from) {
            self.files.insert(to, source);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSource> {
        self.files.iter()
    }

    fn pop_front(&mut self) -> Option<FileSource> {
        self.files.pop_front()
    }
}

impl FromIterator<FileSource> for FileQueue {
    fn from_iter<I: IntoIterator<Item = FileSource>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FileQueue {
    type Item = FileSource;
    type IntoIter = std::collections::vec_deque::IntoIter<FileSource>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// 배치 전송 결과
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// 송신 오케스트레이터
pub struct Orchestrator {
    config: Config,
    sink: Arc<dyn FrameSink>,
    acks: Arc<AckRouter>,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        sink: Arc<dyn FrameSink>,
        acks: Arc<AckRouter>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            sink,
            acks,
            reporter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 파일 목록 전송
    pub async fn send_files<I>(&self, files: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = FileSource>,
    {
        self.send_queue(files.into_iter().collect()).await
    }

    /// 큐 전체 전송
    ///
    /// 치명적 중단이 발생하면 남은 파일은 보내지 않고 `Error::FileAborted` 반환
    pub async fn send_queue(&self, mut queue: FileQueue) -> Result<BatchReport> {
        let total_files = queue.len() as u32;
        self.sink.send(Frame::TransferStart { total_files })?;
        info!("배치 전송 시작: 파일 {}개", total_files);

        let mut report = BatchReport::default();
        while let Some(source) = queue.pop_front() {
            if !report.files.is_empty() {
                debug!("다음 파일 전 대기: {:?}", self.config.settle_delay());
                tokio::time::sleep(self.config.settle_delay()).await;
            }

            let filename = source.name();
            match self.send_one(&source, &filename).await {
                Ok(file) => report.files.push(file),
                Err(e) => {
                    warn!(
                        "배치 중단: {} (완료 {}개, 남은 파일 {}개)",
                        filename,
                        report.files.len(),
                        queue.len()
                    );
                    return Err(Error::FileAborted {
                        filename,
                        completed: report.files.len(),
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "배치 전송 완료: 파일 {}개, {} bytes",
            report.files.len(),
            report.total_bytes()
        );
        Ok(report)
    }

    async fn send_one(&self, source: &FileSource, filename: &str) -> Result<FileReport> {
        let data = source.load().await?;
        let descriptor = TransferDescriptor::new(filename, data.len() as u64);
        let window = SendWindow::new(
            self.config.clone(),
            descriptor,
            self.sink.clone(),
            self.acks.clone(),
            self.reporter.clone(),
        );
        window.run(data).await
    }
}
