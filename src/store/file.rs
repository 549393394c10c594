// Positional, fixed-record file access for header storage. A thin wrapper
// over std::fs: no buffering, no caching — callers own tracking of "how
// many records exist" and pass absolute byte offsets.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::header::HEADER_BYTES;

#[derive(Debug, Clone)]
pub struct ChainFile {
    headers_dir: PathBuf,
}

impl ChainFile {
    pub fn new(headers_dir: impl Into<PathBuf>) -> Self {
        ChainFile {
            headers_dir: headers_dir.into(),
        }
    }

    /// Path is a pure function of current identity — never cached, so a
    /// rename during a branch swap is reflected on the very next call.
    pub fn path(&self, parent_id: Option<u32>, forkpoint: u32) -> PathBuf {
        match parent_id {
            None => self.headers_dir.join("blockchain_headers"),
            Some(pid) => self
                .headers_dir
                .join("forks")
                .join(format!("fork_{pid}_{forkpoint}")),
        }
    }

    pub fn size_at(&self, parent_id: Option<u32>, forkpoint: u32) -> StoreResult<u32> {
        let path = self.path(parent_id, forkpoint);
        match fs::metadata(&path) {
            Ok(meta) => Ok((meta.len() / HEADER_BYTES as u64) as u32),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the 112-byte record at `index` (0-based, relative to the
    /// file's own start). Returns `None` on a short read or missing file —
    /// both mean "nothing stored there yet".
    pub fn read_record(
        &self,
        parent_id: Option<u32>,
        forkpoint: u32,
        index: u32,
    ) -> StoreResult<Option<[u8; HEADER_BYTES]>> {
        let path = self.path(parent_id, forkpoint);
        let mut f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        f.seek(SeekFrom::Start(index as u64 * HEADER_BYTES as u64))?;
        let mut buf = [0u8; HEADER_BYTES];
        match f.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads `count` consecutive records starting at `index`, raw bytes.
    pub fn read_records(
        &self,
        parent_id: Option<u32>,
        forkpoint: u32,
        index: u32,
        count: u32,
    ) -> StoreResult<Vec<u8>> {
        let path = self.path(parent_id, forkpoint);
        self.assert_file_available(&path)?;
        let mut f = File::open(&path)?;
        f.seek(SeekFrom::Start(index as u64 * HEADER_BYTES as u64))?;
        let mut buf = vec![0u8; count as usize * HEADER_BYTES];
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Writes `data` at byte `offset`. If `truncate` is set and `offset`
    /// does not already sit at the end of the file, the file is truncated
    /// to `offset` first — matching the append-with-possible-rewind
    /// semantics `save_header`/`save_chunk` need. Always fsyncs before
    /// returning.
    pub fn write_at(
        &self,
        parent_id: Option<u32>,
        forkpoint: u32,
        offset: u64,
        data: &[u8],
        truncate: bool,
    ) -> StoreResult<()> {
        let path = self.path(parent_id, forkpoint);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut f = match OpenOptions::new().create(true).read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.assert_file_available(&path)?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        if truncate {
            f.set_len(offset)?;
        }
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        f.sync_all()?;
        Ok(())
    }

    pub fn rename(&self, from: (Option<u32>, u32), to: (Option<u32>, u32)) -> StoreResult<()> {
        let src = self.path(from.0, from.1);
        let dst = self.path(to.0, to.1);
        if !src.exists() {
            return Ok(());
        }
        if let Some(dir) = dst.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::rename(&src, &dst)?;
        Ok(())
    }

    pub fn forks_dir(&self) -> PathBuf {
        self.headers_dir.join("forks")
    }

    pub fn headers_dir(&self) -> &Path {
        &self.headers_dir
    }

    /// Distinguishes "nothing stored there yet" (fine, callers that tolerate
    /// it check for it themselves) from "storage was deleted out from under
    /// us", which every caller of `read_records`/`write_at` needs to surface
    /// distinctly rather than as a generic IO error.
    fn assert_file_available(&self, path: &Path) -> StoreResult<()> {
        if path.exists() {
            return Ok(());
        }
        if !self.headers_dir.exists() {
            return Err(StoreError::FileNotFound(format!(
                "headers directory {} does not exist; was it deleted while running?",
                self.headers_dir.display()
            )));
        }
        Err(StoreError::FileNotFound(format!(
            "cannot find header file, expected at {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn main_chain_path_is_blockchain_headers() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        assert_eq!(file.path(None, 0), dir.path().join("blockchain_headers"));
    }

    #[test]
    fn fork_path_encodes_parent_and_forkpoint() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        assert_eq!(
            file.path(Some(0), 10),
            dir.path().join("forks").join("fork_0_10")
        );
    }

    #[test]
    fn size_of_missing_file_is_zero() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        assert_eq!(file.size_at(None, 0).unwrap(), 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        let record = [7u8; HEADER_BYTES];
        file.write_at(None, 0, 0, &record, true).unwrap();
        assert_eq!(file.size_at(None, 0).unwrap(), 1);
        let back = file.read_record(None, 0, 0).unwrap().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn read_past_end_returns_none() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        file.write_at(None, 0, 0, &[1u8; HEADER_BYTES], true).unwrap();
        assert!(file.read_record(None, 0, 5).unwrap().is_none());
    }

    #[test]
    fn truncate_rewinds_file_on_rewrite() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        file.write_at(None, 0, 0, &[1u8; HEADER_BYTES * 3], true).unwrap();
        assert_eq!(file.size_at(None, 0).unwrap(), 3);
        file.write_at(None, 0, HEADER_BYTES as u64, &[2u8; HEADER_BYTES], true)
            .unwrap();
        assert_eq!(file.size_at(None, 0).unwrap(), 2);
    }

    #[test]
    fn rename_moves_an_existing_file() {
        let dir = tempdir().unwrap();
        let file = ChainFile::new(dir.path());
        file.write_at(Some(0), 5, 0, &[9u8; HEADER_BYTES], true).unwrap();
        file.rename((Some(0), 5), (Some(0), 9)).unwrap();
        assert_eq!(file.size_at(Some(0), 5).unwrap(), 0);
        assert_eq!(file.size_at(Some(0), 9).unwrap(), 1);
    }
}
