//! Shared access to one physical archive handle
//!
//! A path-opened archive gives each block read its own private handle, but a
//! stream-opened archive has exactly one handle that every concurrent block
//! read contends on. `SharedStream` wraps either case behind a clone-shared
//! mutex. The lock is held per contiguous copy, not per logical file, so
//! concurrent decodes interleave at copy granularity instead of serializing
//! whole files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archive::format::COPY_CHUNK_SIZE;
use crate::error::Result;

/// Any seekable byte source an archive can be mounted from.
pub trait ArchiveSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveSource for T {}

/// Clone-shared, lock-guarded archive handle. Clones refer to the same
/// underlying source and the same lock.
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Mutex<Box<dyn ArchiveSource>>>,
}

impl SharedStream {
    /// Wraps a caller-supplied source.
    pub fn new<S: ArchiveSource + 'static>(source: S) -> Self {
        SharedStream {
            inner: Arc::new(Mutex::new(Box::new(source))),
        }
    }

    /// Opens a read-only handle on `path`.
    pub fn open_path(path: &Path) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    /// Source length in bytes.
    pub fn stream_len(&self) -> Result<u64> {
        let mut guard = self.inner.lock();
        Ok(guard.seek(SeekFrom::End(0))?)
    }

    /// Copies exactly `dst.len()` bytes starting at `offset` into `dst`.
    /// The lock is held for the whole copy; reads are issued in
    /// `COPY_CHUNK_SIZE` slices.
    pub fn read_block_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let mut guard = self.inner.lock();
        guard.seek(SeekFrom::Start(offset))?;
        let mut copied = 0;
        while copied < dst.len() {
            let end = (copied + COPY_CHUNK_SIZE).min(dst.len());
            guard.read_exact(&mut dst[copied..end])?;
            copied = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_read_block_at_spans_multiple_chunks() {
        let data = pattern(COPY_CHUNK_SIZE * 2 + 500);
        let stream = SharedStream::new(Cursor::new(data.clone()));

        let mut out = vec![0u8; COPY_CHUNK_SIZE + 700];
        stream.read_block_at(300, &mut out).unwrap();
        assert_eq!(out[..], data[300..300 + out.len()]);
    }

    #[test]
    fn test_stream_len() {
        let stream = SharedStream::new(Cursor::new(vec![0u8; 1234]));
        assert_eq!(stream.stream_len().unwrap(), 1234);
    }

    #[test]
    fn test_concurrent_reads_see_consistent_slices() {
        let data = pattern(64 * 1024);
        let stream = SharedStream::new(Cursor::new(data.clone()));

        let mut handles = vec![];
        for thread_id in 0..8usize {
            let stream = stream.clone();
            let data = data.clone();
            handles.push(thread::spawn(move || {
                for round in 0..50 {
                    let offset = (thread_id * 1000 + round * 13) % (data.len() - 256);
                    let mut out = vec![0u8; 256];
                    stream.read_block_at(offset as u64, &mut out).unwrap();
                    assert_eq!(out[..], data[offset..offset + 256]);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Reader thread panicked");
        }
    }
}
