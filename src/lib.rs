//! packfs-rs: single-file package archive engine with VFS support
//!
//! This library implements the packfs block-archive format, combining:
//! - One-file packages holding many logical files as independent blocks
//! - Per-block compression (LZ4/Zstd) and length-preserving encryption
//! - Soft deletes with deferred compaction on flush
//! - Synchronous and background (poll-based) block reads
//! - A virtual-file-system trait surface for mounted packages
//!
//! # Example
//!
//! ```no_run
//! use packfs_rs::Package;
//!
//! // Create a package
//! let mut package = Package::create("example.pak")?;
//! package.add_file("data.txt", b"Hello, World!")?;
//! package.flush(true)?;
//! package.close()?;
//!
//! // Read it back
//! let package = Package::mount("example.pak")?;
//! let stream = package.get_stream("data.txt")?;
//! # Ok::<(), packfs_rs::error::PackError>(())
//! ```

// Core modules
pub mod archive;
pub mod codec;
pub mod error;
pub mod operator;
pub mod pool;
pub mod vfs;

// Re-export commonly used types
pub use archive::{
    ArchiveSource, BlockInfo, BlockStream, Package, PackageHeader, ProcessState, StreamRequest,
    BLOCK_INFO_SIZE, FILE_LIST_NAME, HEADER_SIZE, MAGIC_ID, PACKAGE_EXT, VERSION,
};
pub use codec::{CompressMethod, EncryptMethod};
pub use error::{PackError, Result};
pub use operator::{create_package, extract_package};
pub use pool::{BufferPool, PooledBuf};
pub use vfs::{VirtualFileStream, VirtualFileSystem};
