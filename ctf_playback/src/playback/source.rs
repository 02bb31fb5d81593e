//! Byte sources backing event streams.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{CtfError, Result};

/// A complete, contiguous event stream.
pub trait ByteSource {
    fn bytes(&self) -> &[u8];

    fn byte_len(&self) -> u64 {
        self.bytes().len() as u64
    }
}

impl ByteSource for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl ByteSource for &[u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl ByteSource for Arc<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// Memory-mapped stream file. The mapping is released when dropped.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    // Empty files cannot be mapped on every platform.
    mmap: Option<Mmap>,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| CtfError::io(path, err))?;
        let len = file
            .metadata()
            .map_err(|err| CtfError::io(path, err))?
            .len();
        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only; stream files are not expected
            // to change while a trace is played back.
            Some(unsafe { Mmap::map(&file) }.map_err(|err| CtfError::io(path, err))?)
        };
        debug!(path = %path.display(), bytes = len, "mapped stream file");
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for MappedFile {
    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_mapped_file__written_bytes__then_same_view() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();

        let mapped = MappedFile::open(file.path()).unwrap();
        assert_eq!(mapped.bytes(), &[1, 2, 3, 4]);
        assert_eq!(mapped.byte_len(), 4);
        assert_eq!(mapped.path(), file.path());
    }

    #[test]
    fn test_mapped_file__empty__then_empty_view() {
        let file = NamedTempFile::new().unwrap();
        let mapped = MappedFile::open(file.path()).unwrap();
        assert!(mapped.bytes().is_empty());
    }

    #[test]
    fn test_mapped_file__missing__then_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("channel0_0");
        match MappedFile::open(&missing) {
            Err(CtfError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
