//! 바이트 저장소
//!
//! 응답측은 파일을 읽고 수신측은 조립된 파일을 씀.
//! 이름은 디렉터리 구분자나 `..`가 없는 단순 파일 이름만 허용

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{Error, Result};

/// 파일 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub is_dir: bool,
}

/// 파일 바이트 범위 읽기/쓰기
pub trait ByteStore: Send + Sync {
    fn stat(&self, name: &str) -> Result<FileStat>;

    fn read_range(&self, name: &str, offset: u64, len: usize) -> Result<Bytes>;

    /// 빈 파일 생성 (이미 있으면 비움)
    fn create(&self, name: &str) -> Result<()>;

    fn write_range(&self, name: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// 일반 파일 전체 읽기
    fn read_all(&self, name: &str) -> Result<Bytes> {
        let stat = self.stat(name)?;
        if stat.is_dir {
            return Err(Error::file(name, "디렉터리임"));
        }
        let len = usize::try_from(stat.len).map_err(|_| Error::file(name, "파일이 너무 큼"))?;
        self.read_range(name, 0, len)
    }
}

/// 단순 파일 이름 검증
pub fn validate_file_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if !plain {
        return Err(Error::file(name, "허용되지 않는 파일 이름"));
    }
    Ok(())
}

/// 디렉터리 기반 저장소
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        Ok(self.root.join(name))
    }
}

impl ByteStore for DirStore {
    fn stat(&self, name: &str) -> Result<FileStat> {
        let meta = fs::metadata(self.path(name)?).map_err(|e| Error::file(name, e))?;
        Ok(FileStat {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read_range(&self, name: &str, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = File::open(self.path(name)?).map_err(|e| Error::file(name, e))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf)?;
        if buf.len() < len {
            return Err(Error::file(
                name,
                format!("짧은 읽기: {} / {} bytes", buf.len(), len),
            ));
        }
        Ok(Bytes::from(buf))
    }

    fn create(&self, name: &str) -> Result<()> {
        File::create(self.path(name)?)?;
        Ok(())
    }

    fn write_range(&self, name: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.path(name)?)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }
}

/// 메모리 저장소 (테스트 및 임베딩용)
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.write().insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).cloned()
    }
}

impl ByteStore for MemoryStore {
    fn stat(&self, name: &str) -> Result<FileStat> {
        validate_file_name(name)?;
        self.files
            .read()
            .get(name)
            .map(|data| FileStat {
                len: data.len() as u64,
                is_dir: false,
            })
            .ok_or_else(|| Error::file(name, "파일 없음"))
    }

    fn read_range(&self, name: &str, offset: u64, len: usize) -> Result<Bytes> {
        let files = self.files.read();
        let data = files.get(name).ok_or_else(|| Error::file(name, "파일 없음"))?;

        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| Error::file(name, "범위 밖 읽기"))?;
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    fn create(&self, name: &str) -> Result<()> {
        validate_file_name(name)?;
        self.files.write().insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn write_range(&self, name: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut files = self.files.write();
        let file = files
            .get_mut(name)
            .ok_or_else(|| Error::file(name, "파일 없음"))?;

        let start = offset as usize;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        Ok(())
    }
}
