//! 가상 파일 저장소
//!
//! - Filestore: 엔진이 쓰는 파일 연산 (open / rename / remove / 임시 이름 / 크기)
//! - StdFilestore: 디렉터리 기반 실제 파일 시스템
//! - MemoryFilestore: 공유 메모리 맵 (테스트, 시뮬레이션용)
//!
//! 파일 닫기는 핸들을 drop하는 것으로 대신한다.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

/// 기본 임시 파일 접두어
pub const DEFAULT_TEMP_FILE_PREFIX: &str = "cfdp_tmp";

/// 열린 파일 핸들
pub trait VirtualFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> VirtualFile for T {}

/// 열기 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// 읽기 전용 (파일이 있어야 함)
    Read,

    /// 새로 만들거나 비우고 쓰기
    Write,
}

/// 엔진이 사용하는 파일 저장소
pub trait Filestore: Send {
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VirtualFile>>;

    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    fn remove(&self, name: &str) -> io::Result<()>;

    /// 아직 존재하지 않는 임시 파일 이름 후보
    fn temp_file_name(&self) -> String;

    fn file_size(&self, name: &str) -> io::Result<u64>;

    /// 레코드 구조 파일 여부 (지원 안 함)
    fn is_segmented(&self, _name: &str) -> bool {
        false
    }
}

/// 디렉터리 기반 파일 저장소
#[derive(Debug, Clone)]
pub struct StdFilestore {
    root: PathBuf,
    temp_prefix: String,
}

impl StdFilestore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_prefix: DEFAULT_TEMP_FILE_PREFIX.to_string(),
        }
    }

    /// 임시 파일 접두어 지정
    pub fn with_temp_prefix(mut self, prefix: &str) -> Self {
        self.temp_prefix = prefix.to_string();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Filestore for StdFilestore {
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VirtualFile>> {
        let file: File = match mode {
            OpenMode::Read => File::open(self.path(name))?,
            OpenMode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(self.path(name))?,
        };
        Ok(Box::new(file))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name))
    }

    fn temp_file_name(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let name = format!("{}{:05}", self.temp_prefix, rng.gen_range(1..100_000u32));
            if !self.path(&name).exists() {
                return name;
            }
        }
    }

    fn file_size(&self, name: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.path(name))?.len())
    }
}

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// 메모리 파일 저장소 (clone은 같은 저장소를 공유)
#[derive(Debug, Clone, Default)]
pub struct MemoryFilestore {
    files: Files,
    temp_counter: Arc<AtomicU32>,
}

impl MemoryFilestore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 파일 내용 직접 설정
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(name.to_string(), data.into());
    }

    /// 파일 내용 조회
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    /// 저장된 파일 이름 (정렬)
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Filestore for MemoryFilestore {
    fn open(&self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VirtualFile>> {
        match mode {
            OpenMode::Read => {
                if !self.exists(name) {
                    return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()));
                }
            }
            OpenMode::Write => self.insert(name, Vec::new()),
        }
        Ok(Box::new(MemoryFile {
            files: self.files.clone(),
            name: name.to_string(),
            pos: 0,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, from.to_string()))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn temp_file_name(&self) -> String {
        loop {
            let n = self.temp_counter.fetch_add(1, Ordering::Relaxed) % 100_000 + 1;
            let name = format!("{}{:05}", DEFAULT_TEMP_FILE_PREFIX, n);
            if !self.exists(&name) {
                return name;
            }
        }
    }

    fn file_size(&self, name: &str) -> io::Result<u64> {
        self.files
            .lock()
            .get(name)
            .map(|d| d.len() as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }
}

/// 저장소에 바로 읽고 쓰는 메모리 파일 핸들
struct MemoryFile {
    files: Files,
    name: String,
    pos: u64,
}

impl MemoryFile {
    fn gone(&self) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, self.name.clone())
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let files = self.files.lock();
        let data = files.get(&self.name).ok_or_else(|| self.gone())?;
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.lock();
        let data = files.get_mut(&self.name).ok_or_else(|| self.gone())?;
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self
            .files
            .lock()
            .get(&self.name)
            .map(|d| d.len() as i64)
            .ok_or_else(|| self.gone())?;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "음수 위치로 seek",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
