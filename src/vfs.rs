//! Virtual file system boundary
//!
//! The routing-facing view of any mounted backend: paths in, seekable
//! streams out. `Package` implements both traits, so a mounted archive can
//! stand behind the same interface as any other backend without callers
//! knowing which they hold.

use std::io::{Read, Seek};

use crate::archive::{BlockStream, Package, StreamRequest};
use crate::error::Result;

/// A fully decoded, seekable logical file.
pub trait VirtualFileStream: Read + Seek + Send {
    /// Decoded length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VirtualFileStream for BlockStream {
    fn len(&self) -> u64 {
        BlockStream::len(self) as u64
    }
}

/// A mounted backend serving logical files by path.
pub trait VirtualFileSystem {
    /// True when `path` maps to a live entry.
    fn exist(&self, path: &str) -> Result<bool>;

    /// Decodes `path` synchronously.
    fn get_stream(&self, path: &str) -> Result<Box<dyn VirtualFileStream>>;

    /// Queues a background decode of `path`.
    fn get_stream_async(&self, path: &str) -> Result<StreamRequest>;

    /// All live logical paths.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Releases the backend. Implementations flush pending state first.
    fn close(&mut self) -> Result<()>;
}

impl VirtualFileSystem for Package {
    fn exist(&self, path: &str) -> Result<bool> {
        Package::exist(self, path)
    }

    fn get_stream(&self, path: &str) -> Result<Box<dyn VirtualFileStream>> {
        Ok(Box::new(Package::get_stream(self, path)?))
    }

    fn get_stream_async(&self, path: &str) -> Result<StreamRequest> {
        Package::get_stream_async(self, path)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Package::list_files(self)
    }

    fn close(&mut self) -> Result<()> {
        Package::close(self)
    }
}
