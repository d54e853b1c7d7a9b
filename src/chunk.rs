//! 청크와 분할기 정의
//!
//! - Chunk: 인덱스가 붙은 파일 조각 (32KB ~ 1MB, 전송 중 가변)
//! - Segmenter: 현재 청크 크기로 한 조각씩 잘라내는 지연 분할기

use bytes::Bytes;
use tokio::time::Instant;

/// 전송 ID (파일 인스턴스마다 고유)
pub type FileId = u64;

/// 청크 인덱스 (전송 내 순번)
pub type ChunkIndex = u32;

/// 새 전송 ID 생성
pub fn new_file_id() -> FileId {
    rand::random()
}

/// 청크 (송신 단위)
///
/// ACK 받을 때까지 송신 윈도우가 소유하며, 페이로드는 생성 후 불변
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 전송 ID
    pub file_id: FileId,

    /// 청크 인덱스
    pub index: ChunkIndex,

    /// 실제 데이터
    pub data: Bytes,

    /// 마지막 전송 시간 (미전송이면 None)
    pub sent_at: Option<Instant>,
}

impl Chunk {
    /// 새 청크 생성
    pub fn new(file_id: FileId, index: ChunkIndex, data: Bytes) -> Self {
        Self {
            file_id,
            index,
            data,
            sent_at: None,
        }
    }

    /// 데이터 길이
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 전송 디스크립터 (파일 하나당 하나)
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    /// 전송 ID
    pub file_id: FileId,

    /// 원본 파일 이름
    pub filename: String,

    /// 전체 크기 (바이트)
    pub total_size: u64,

    /// 파일 체크섬 (종료 프레임 직전에 계산)
    pub checksum: Option<String>,
}

impl TransferDescriptor {
    pub fn new(filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            file_id: new_file_id(),
            filename: filename.into(),
            total_size,
            checksum: None,
        }
    }
}

/// 청크 분할기 (송신측)
///
/// 청크 크기를 미리 정하지 않고, 잘라낼 때마다 호출자가 넘기는 현재 크기를 사용.
/// 전송률 제어가 중간에 크기를 바꿔도 원본을 정확히 한 번씩 순서대로 덮음.
#[derive(Debug, Clone)]
pub struct Segmenter {
    source: Bytes,
    offset: usize,
    next_index: ChunkIndex,
}

impl Segmenter {
    pub fn new(source: Bytes) -> Self {
        Self::resume(source, 0, 0)
    }

    /// 지정한 오프셋/인덱스부터 다시 분할
    pub fn resume(source: Bytes, offset: usize, next_index: ChunkIndex) -> Self {
        let offset = offset.min(source.len());
        Self {
            source,
            offset,
            next_index,
        }
    }

    /// 다음 청크 잘라내기
    ///
    /// 원본이 끝났으면 None. 빈 원본은 청크를 하나도 만들지 않음.
    pub fn next_chunk(&mut self, chunk_size: usize) -> Option<(ChunkIndex, Bytes)> {
        if self.is_finished() {
            return None;
        }

        let end = (self.offset + chunk_size.max(1)).min(self.source.len());
        // Bytes::slice는 복사 없이 참조만 나눔
        let payload = self.source.slice(self.offset..end);
        let index = self.next_index;

        self.offset = end;
        self.next_index += 1;
        Some((index, payload))
    }

    /// 다음에 발급할 인덱스
    pub fn next_index(&self) -> ChunkIndex {
        self.next_index
    }

    /// 원본을 모두 잘라냈는지
    pub fn is_finished(&self) -> bool {
        self.offset >= self.source.len()
    }
}
