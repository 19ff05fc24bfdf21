//! Package archive orchestrator
//!
//! `Package` owns the header, block table, file-name index, and reverse
//! lookup map, and exposes the whole archive surface: lifecycle
//! (open/create/close), reads (exist/get_stream/list_files), mutations
//! (add/delete/flush), and observer registration. Mount and flush mechanics
//! live in the reader and writer impl blocks next to this file.
//!
//! Mutations assume a single-writer discipline. The read surface takes
//! `&self` and is safe to share across threads once the archive is stable.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::archive::block_stream::BlockStream;
use crate::archive::format::{BlockInfo, PackageHeader, PendingOp, BLOCK_INIT_VERSION, FILE_LIST_NAME};
use crate::archive::request::StreamRequest;
use crate::archive::shared_stream::{ArchiveSource, SharedStream};
use crate::codec::{self, CompressMethod, EncryptMethod};
use crate::error::{PackError, Result};

/// Phases reported through progress observers while writing or extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    CalculatingBlockInfo,
    WritingHeader,
    WritingBlockInfo,
    WritingBlockData,
    ExtractingBlockData,
}

pub type ProgressFn = Box<dyn FnMut(ProcessState, usize, usize) + Send>;
pub type StreamObserverFn = Box<dyn FnMut(&str, i64, i64) + Send>;
pub type BlockObserverFn = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct Observers {
    progress: Option<ProgressFn>,
    stream: Option<StreamObserverFn>,
    block: Option<BlockObserverFn>,
}

/// How an open archive reaches its bytes.
pub(crate) enum PackageSource {
    /// Never opened.
    None,
    /// Path-opened: every block read opens its own private handle.
    Path(PathBuf),
    /// Stream-opened: one retained shared handle, read-only.
    Stream(SharedStream),
}

/// A single-file package archive.
pub struct Package {
    pub(crate) source: PackageSource,
    pub(crate) header: PackageHeader,
    pub(crate) blocks: Vec<BlockInfo>,
    pub(crate) paths: Vec<String>,
    pub(crate) path_map: HashMap<String, usize>,
    pub(crate) opened: bool,
    pub(crate) closed: bool,
    pub(crate) dirty: bool,
    pub(crate) read_only: bool,
    observers: Mutex<Observers>,
}

impl Package {
    /// Unopened archive with the empty baseline header.
    pub fn new() -> Self {
        Package {
            source: PackageSource::None,
            header: PackageHeader::empty(),
            blocks: Vec::new(),
            paths: Vec::new(),
            path_map: HashMap::new(),
            opened: false,
            closed: false,
            dirty: false,
            read_only: false,
            observers: Mutex::new(Observers::default()),
        }
    }

    /// Mounts an existing package file. The mount handle is released once the
    /// tables are in memory; later block reads open their own handles.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.opened {
            return Err(PackError::AlreadyOpened);
        }
        let path = path.as_ref();
        let stream = SharedStream::open_path(path)?;
        self.mount_from(&stream)?;
        self.source = PackageSource::Path(path.to_path_buf());
        self.opened = true;
        self.closed = false;
        debug!(path = %path.display(), files = self.paths.len(), "Package mounted");
        Ok(())
    }

    /// Mounts from a caller-supplied stream, retained for the archive's
    /// lifetime. Stream-opened archives are read-only.
    pub fn open_stream<S: ArchiveSource + 'static>(&mut self, stream: S) -> Result<()> {
        if self.opened {
            return Err(PackError::AlreadyOpened);
        }
        let shared = SharedStream::new(stream);
        self.mount_from(&shared)?;
        self.source = PackageSource::Stream(shared);
        self.opened = true;
        self.closed = false;
        self.read_only = true;
        debug!(files = self.paths.len(), "Package mounted from stream");
        Ok(())
    }

    /// One-call mount of an existing package file.
    pub fn mount<P: AsRef<Path>>(path: P) -> Result<Package> {
        let mut package = Package::new();
        package.open(path)?;
        Ok(package)
    }

    /// Creates a new empty package at `path`, claiming the file immediately.
    /// The file stays empty on disk until the first flush.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Package> {
        let path = path.as_ref();
        if path.exists() {
            return Err(PackError::FileAlreadyExists(path.display().to_string()));
        }
        File::create(path)?;
        let mut package = Package::new();
        package.source = PackageSource::Path(path.to_path_buf());
        package.opened = true;
        debug!(path = %path.display(), "Package created");
        Ok(package)
    }

    /// Flushes pending changes if dirty, then drops all in-memory state and
    /// the retained handle. Idempotent once closed.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush(false)?;
        self.blocks.clear();
        self.paths.clear();
        self.path_map.clear();
        self.source = PackageSource::None;
        self.opened = false;
        self.closed = true;
        Ok(())
    }

    /// True when `path` maps to a live entry.
    pub fn exist(&self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.path_map.contains_key(&normalize_path(path)))
    }

    /// Synchronously decodes the block backing `path`.
    ///
    /// Entries staged by `add_file` become readable after the next flush;
    /// until then their block carries no exists bit and reading fails with
    /// `BlockDisposed`.
    pub fn get_stream(&self, path: &str) -> Result<BlockStream> {
        self.ensure_open()?;
        let path = normalize_path(path);
        let index = self.lookup(&path)?;
        let block = self.blocks[index].record();
        self.notify_stream(&path, &block);
        let source = self.block_source()?;
        BlockStream::open(&source, &block)
    }

    /// Queues the decode of `path` onto the background executor and returns
    /// the poll handle immediately. Preconditions (open archive, known path)
    /// are still checked on the calling thread.
    pub fn get_stream_async(&self, path: &str) -> Result<StreamRequest> {
        self.ensure_open()?;
        let path = normalize_path(path);
        let index = self.lookup(&path)?;
        let block = self.blocks[index].record();
        self.notify_stream(&path, &block);
        let source = self.block_source()?;
        Ok(StreamRequest::spawn(source, block))
    }

    /// All non-deleted content paths in table order, staged entries included.
    pub fn list_files(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut files = Vec::new();
        for (i, path) in self.paths.iter().enumerate() {
            if path == FILE_LIST_NAME || self.blocks[i].is_deleted() {
                continue;
            }
            files.push(path.clone());
        }
        Ok(files)
    }

    /// Copy of the block metadata backing `path`.
    pub fn block_info(&self, path: &str) -> Result<BlockInfo> {
        self.ensure_open()?;
        let path = normalize_path(path);
        self.notify_block(&path);
        let index = self.lookup(&path)?;
        Ok(self.blocks[index].record())
    }

    /// Stages `data` under `path` with no compression or encryption.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.add_file_with_options(path, data, CompressMethod::None, EncryptMethod::None, 0)
    }

    /// Stages `data` under `path`, running the write side of the codec
    /// pipeline eagerly: encrypt first, then compress. Compression is kept
    /// only when it actually shrinks the payload.
    pub fn add_file_with_options(
        &mut self,
        path: &str,
        data: &[u8],
        compress: CompressMethod,
        encrypt: EncryptMethod,
        encrypt_key: i64,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(PackError::ReadOnly);
        }
        let path = normalize_path(path);
        if self.path_map.contains_key(&path) || path == FILE_LIST_NAME {
            return Err(PackError::FileAlreadyExists(path));
        }
        self.stage_block(path, data, compress, encrypt, encrypt_key)
    }

    /// Reads `disk_path` and stages it under `path` uncompressed.
    pub fn add_file_from_disk<P: AsRef<Path>>(&mut self, path: &str, disk_path: P) -> Result<()> {
        let data = std::fs::read(disk_path)?;
        self.add_file(path, &data)
    }

    /// Deletes `path`. Persisted entries are soft-deleted and reclaimed at
    /// the next compacting flush; staged-only entries are removed outright.
    /// Absent paths (and the reserved file-list name) are a no-op.
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(PackError::ReadOnly);
        }
        let path = normalize_path(path);
        if path == FILE_LIST_NAME {
            return Ok(());
        }
        let Some(index) = self.path_map.get(&path).copied() else {
            return Ok(());
        };
        if self.blocks[index].exists() {
            self.blocks[index].op = PendingOp::Deleted;
        } else {
            self.blocks.remove(index);
            self.paths.remove(index);
        }
        self.mark_dirty();
        self.rehash();
        debug!(path = %path, "File deleted from package");
        Ok(())
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Backing file path for path-opened archives.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            PackageSource::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Registers the flush progress observer, replacing any previous one.
    pub fn set_progress_observer(&self, cb: ProgressFn) {
        self.observers.lock().progress = Some(cb);
    }

    /// Registers the "stream fetched" observer fired before each decode.
    pub fn set_stream_observer(&self, cb: StreamObserverFn) {
        self.observers.lock().stream = Some(cb);
    }

    /// Registers the "block requested" observer fired by `block_info`.
    pub fn set_block_observer(&self, cb: BlockObserverFn) {
        self.observers.lock().block = Some(cb);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PackError::AlreadyClosed);
        }
        if !self.opened {
            return Err(PackError::NotOpened);
        }
        Ok(())
    }

    fn lookup(&self, normalized: &str) -> Result<usize> {
        self.path_map
            .get(normalized)
            .copied()
            .ok_or_else(|| PackError::FileNotFound(normalized.to_string()))
    }

    /// Fresh shared handle for one block read: per-call private handle for
    /// path-opened archives, the retained handle for stream-opened ones.
    fn block_source(&self) -> Result<SharedStream> {
        match &self.source {
            PackageSource::Path(path) => SharedStream::open_path(path),
            PackageSource::Stream(stream) => Ok(stream.clone()),
            PackageSource::None => Err(PackError::NotOpened),
        }
    }

    /// Runs the write-side codec pipeline over `data` and appends the staged
    /// block and its path in tandem. Also used internally for the file-list
    /// block, so the reserved-name guard stays in the public entry points.
    pub(crate) fn stage_block(
        &mut self,
        path: String,
        data: &[u8],
        compress: CompressMethod,
        encrypt: EncryptMethod,
        encrypt_key: i64,
    ) -> Result<()> {
        let mut staged = data.to_vec();
        let mut block = BlockInfo {
            flags: BLOCK_INIT_VERSION,
            original_size: data.len() as i64,
            ..Default::default()
        };

        if encrypt != EncryptMethod::None {
            codec::crypt_in_place(encrypt, &mut staged, encrypt_key);
            block.set_encrypt_method(encrypt);
            block.encrypt_key = encrypt_key;
        }
        if compress != CompressMethod::None {
            let compressed = codec::compress(compress, &staged)?;
            if compressed.len() < staged.len() {
                staged = compressed;
                block.set_compress_method(compress);
            } else {
                warn!(
                    path = %path,
                    input = staged.len(),
                    output = compressed.len(),
                    "Compression discarded, output not smaller than input"
                );
            }
        }
        block.compressed_size = staged.len() as i64;
        block.raw_data = Some(staged);
        block.op = PendingOp::New;

        self.blocks.push(block);
        self.paths.push(path);
        self.mark_dirty();
        self.rehash();
        Ok(())
    }

    /// Marks the archive dirty. On the clean-to-dirty transition the
    /// persisted file-list block is invalidated (flagged deleted, path entry
    /// kept) so the next flush stages a replacement.
    pub(crate) fn mark_dirty(&mut self) {
        if self.dirty {
            return;
        }
        self.dirty = true;
        if let Some(&index) = self.path_map.get(FILE_LIST_NAME) {
            self.blocks[index].set_deleted_flag();
        }
    }

    /// Rebuilds the reverse path index, skipping deleted blocks.
    pub(crate) fn rehash(&mut self) {
        debug_assert_eq!(self.paths.len(), self.blocks.len());
        self.path_map.clear();
        for (i, path) in self.paths.iter().enumerate() {
            if self.blocks[i].is_deleted() {
                continue;
            }
            self.path_map.insert(path.clone(), i);
        }
    }

    // Callbacks run with their slot taken and the observers lock released,
    // so a callback may re-enter the archive surface, the setters included.
    // A replacement registered from inside the callback survives the restore.

    fn notify_block(&self, path: &str) {
        let Some(mut cb) = self.observers.lock().block.take() else {
            return;
        };
        cb(path);
        self.observers.lock().block.get_or_insert(cb);
    }

    fn notify_stream(&self, path: &str, block: &BlockInfo) {
        let Some(mut cb) = self.observers.lock().stream.take() else {
            return;
        };
        cb(path, block.original_size, block.compressed_size);
        self.observers.lock().stream.get_or_insert(cb);
    }

    pub(crate) fn emit_progress(&self, state: ProcessState, current: usize, total: usize) {
        let Some(mut cb) = self.observers.lock().progress.take() else {
            return;
        };
        cb(state, current, total);
        self.observers.lock().progress.get_or_insert(cb);
    }
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}

/// Separator normalization applied to every caller-supplied logical path.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
