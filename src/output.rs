//! 검증된 파일의 출력 대상

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::info;

use crate::{Error, Result};

/// 검증을 통과한 파일만 전달됨
pub trait OutputSink: Send + Sync {
    fn deliver(&self, filename: &str, data: Bytes) -> Result<()>;
}

/// 디렉터리에 저장
#[derive(Debug, Clone)]
pub struct DirectoryOutput {
    root: PathBuf,
}

impl DirectoryOutput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 출력 디렉터리를 벗어나는 이름은 거부
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        if filename.is_empty() {
            return Err(Error::InvalidFilename("빈 파일 이름".into()));
        }

        let path = Path::new(filename);
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::InvalidFilename(filename.to_string()));
                }
            }
        }
        if path.is_absolute() {
            return Err(Error::InvalidFilename(filename.to_string()));
        }

        Ok(self.root.join(path))
    }
}

impl OutputSink for DirectoryOutput {
    fn deliver(&self, filename: &str, data: Bytes) -> Result<()> {
        let path = self.resolve(filename)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &data)?;
        info!("파일 저장: {} ({} bytes)", path.display(), data.len());
        Ok(())
    }
}

/// 메모리에 보관
#[derive(Debug, Default)]
pub struct MemoryOutput {
    files: Mutex<Vec<(String, Bytes)>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 전달된 순서대로 (이름, 내용)
    pub fn files(&self) -> Vec<(String, Bytes)> {
        self.files.lock().clone()
    }

    pub fn get(&self, filename: &str) -> Option<Bytes> {
        self.files
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == filename)
            .map(|(_, data)| data.clone())
    }
}

impl OutputSink for MemoryOutput {
    fn deliver(&self, filename: &str, data: Bytes) -> Result<()> {
        self.files.lock().push((filename.to_string(), data));
        Ok(())
    }
}
