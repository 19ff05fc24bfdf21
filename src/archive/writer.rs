//! Archive flush path
//!
//! Serializes the in-memory archive back to its file: fold pending deletes
//! into persisted flags, stage a fresh file-name-list block, recompute the
//! header and block offsets, then write header, block data, and block table
//! in place. A `clean` flush additionally compacts soft-deleted blocks out
//! of the image.
//!
//! There is no two-phase commit. A failure mid-write can leave the file
//! inconsistent; callers that need atomicity write to a scratch path and
//! rename over the original.
//!
//! Compaction assumes soft-deleted blocks sit after all retained persisted
//! data (the natural outcome of delete-then-flush on recently added
//! entries); retained blocks are never relocated, only skipped over.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use tracing::debug;

use crate::archive::format::{PendingOp, BLOCK_INFO_SIZE, FILE_LIST_COMPRESS, FILE_LIST_NAME, HEADER_SIZE};
use crate::archive::package::{Package, PackageSource, ProcessState};
use crate::codec::EncryptMethod;
use crate::error::{PackError, Result};

impl Package {
    /// Writes all pending changes to the backing file. With `clean` set,
    /// soft-deleted blocks are compacted out of the image; otherwise their
    /// bytes and table records are carried along.
    ///
    /// A no-op on a non-dirty archive.
    pub fn flush(&mut self, clean: bool) -> Result<()> {
        self.ensure_open()?;
        if !self.dirty {
            return Ok(());
        }
        if self.read_only {
            return Err(PackError::ReadOnly);
        }

        self.save_block_operations();
        self.rebuild_file_list_block(clean)?;
        self.recalculate_header(clean);
        self.recalculate_block_table(clean);

        let mut file = self.open_write_stream()?;
        self.write_header(&mut file)?;
        self.write_block_data(&mut file, clean)?;
        let tail = self.header.block_data_offset + self.header.block_data_size;
        file.set_len(tail as u64)?;
        self.write_block_table(&mut file, clean)?;
        self.finish_writing(clean);

        debug!(
            clean,
            blocks = self.blocks.len(),
            total_size = self.header.total_size,
            "Package flushed"
        );
        Ok(())
    }

    fn open_write_stream(&self) -> Result<File> {
        match &self.source {
            PackageSource::Path(path) => Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?),
            _ => Err(PackError::ReadOnly),
        }
    }

    /// Folds pending delete markers into the persisted soft-delete flag.
    fn save_block_operations(&mut self) {
        for block in &mut self.blocks {
            if block.op == PendingOp::Deleted {
                block.set_deleted_flag();
                block.op = PendingOp::None;
            }
        }
    }

    /// Serializes the path list (omitting soft-deleted entries on a clean
    /// flush) and stages it as the archive's new final block. The previous
    /// list block was already invalidated on the clean-to-dirty transition.
    fn rebuild_file_list_block(&mut self, clean: bool) -> Result<()> {
        let mut content = Vec::new();
        for (i, path) in self.paths.iter().enumerate() {
            if clean && self.blocks[i].is_deleted() {
                continue;
            }
            let bytes = path.as_bytes();
            content.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            content.extend_from_slice(bytes);
        }
        self.stage_block(
            FILE_LIST_NAME.to_string(),
            &content,
            FILE_LIST_COMPRESS,
            EncryptMethod::None,
            0,
        )
    }

    /// Recomputes header fields from the retained blocks. Data always starts
    /// right after the header; the table follows the data region.
    fn recalculate_header(&mut self, clean: bool) {
        let mut data_size = 0i64;
        let mut count = 0i64;
        for block in &self.blocks {
            if clean && block.is_deleted() {
                continue;
            }
            data_size += block.compressed_size;
            count += 1;
        }
        self.header.block_data_offset = HEADER_SIZE as i64;
        self.header.block_data_size = data_size;
        self.header.block_table_offset = self.header.block_data_offset + data_size;
        self.header.block_table_size = count * BLOCK_INFO_SIZE as i64;
        self.header.total_size = self.header.block_table_offset + self.header.block_table_size;
    }

    /// Lays retained blocks contiguously from the data offset, in table
    /// order, and marks each as existing.
    fn recalculate_block_table(&mut self, clean: bool) {
        let mut offset = self.header.block_data_offset;
        for block in &mut self.blocks {
            if clean && block.is_deleted() {
                continue;
            }
            block.offset = offset;
            block.set_exists();
            offset += block.compressed_size;
        }
    }

    fn write_header(&self, file: &mut File) -> Result<()> {
        self.emit_progress(ProcessState::WritingHeader, 1, 1);
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.header.write_to(&mut buf)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Writes staged block payloads in table order. Already-persisted blocks
    /// are seeked over, never rewritten, so every new block must follow all
    /// persisted data; on a clean flush soft-deleted blocks are passed over
    /// without a seek. The final position must land exactly on the data
    /// region's end.
    fn write_block_data(&self, file: &mut File, clean: bool) -> Result<()> {
        file.seek(SeekFrom::Start(self.header.block_data_offset as u64))?;
        let total = self.blocks.len();
        let mut wrote_new = false;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.op == PendingOp::New {
                let Some(raw) = block.raw_data.as_ref() else {
                    return Err(PackError::ApplicationFault(
                        "new block has no staged data".into(),
                    ));
                };
                if raw.len() as i64 != block.compressed_size {
                    return Err(PackError::StreamDataError {
                        actual: raw.len() as i64,
                        expected: block.compressed_size,
                    });
                }
                file.write_all(raw)?;
                wrote_new = true;
            } else if wrote_new {
                return Err(PackError::ApplicationFault(
                    "persisted block found after new data, image is not contiguous".into(),
                ));
            } else if clean && block.is_deleted() {
                continue;
            } else {
                file.seek(SeekFrom::Current(block.compressed_size))?;
            }
            self.emit_progress(ProcessState::WritingBlockData, i + 1, total);
        }

        let tail = self.header.block_data_offset + self.header.block_data_size;
        let pos = file.stream_position()? as i64;
        if pos != tail {
            return Err(PackError::BlockOffsetError {
                actual: pos,
                expected: tail,
            });
        }
        Ok(())
    }

    fn write_block_table(&self, file: &mut File, clean: bool) -> Result<()> {
        let total = self.blocks.len();
        let mut buf = Vec::with_capacity(self.header.block_table_size as usize);
        for (i, block) in self.blocks.iter().enumerate() {
            if clean && block.is_deleted() {
                continue;
            }
            block.write_to(&mut buf)?;
            self.emit_progress(ProcessState::WritingBlockInfo, i + 1, total);
        }
        file.seek(SeekFrom::Start(self.header.block_table_offset as u64))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Clears staging state and, on a clean flush, drops the soft-deleted
    /// records so memory mirrors the compacted image.
    fn finish_writing(&mut self, clean: bool) {
        if clean {
            let blocks = std::mem::take(&mut self.blocks);
            let paths = std::mem::take(&mut self.paths);
            for (block, path) in blocks.into_iter().zip(paths) {
                if block.is_deleted() {
                    continue;
                }
                self.blocks.push(block);
                self.paths.push(path);
            }
        }
        for block in &mut self.blocks {
            block.op = PendingOp::None;
            block.raw_data = None;
        }
        self.dirty = false;
        self.rehash();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_flush_requires_open() {
        let mut package = Package::new();
        match package.flush(false) {
            Err(PackError::NotOpened) => {}
            other => panic!("Expected NotOpened, got: {:?}", other),
        }
    }

    #[test]
    fn test_flush_on_clean_archive_is_noop() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().with_extension("pak");

        let mut package = Package::create(&path).unwrap();
        package.flush(false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        package.add_file("a.txt", b"hello").unwrap();
        package.flush(false).unwrap();
        let written = std::fs::metadata(&path).unwrap().len();
        assert!(written > 0);

        // Second flush has nothing to do and must not touch the file.
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();
        package.flush(false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_first_flush_writes_mountable_image() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().with_extension("pak");

        let mut package = Package::create(&path).unwrap();
        package.add_file("a.txt", b"hello").unwrap();
        package.flush(true).unwrap();
        package.close().unwrap();

        let reopened = Package::mount(&path).unwrap();
        assert!(reopened.exist("a.txt").unwrap());
        assert_eq!(reopened.list_files().unwrap(), vec!["a.txt"]);

        let mut stream = reopened.get_stream("a.txt").unwrap();
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut stream, &mut contents).unwrap();
        assert_eq!(contents, b"hello");

        std::fs::remove_file(&path).unwrap();
    }
}
