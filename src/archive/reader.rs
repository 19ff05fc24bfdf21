//! Archive mount path
//!
//! Loads an archive image in three passes: validate the fixed header, bulk
//! read the block table, then decode the trailing file-name-list block into
//! the path index. Every structural defect maps to one of `HeaderInvalid`,
//! `BlockTableInvalid`, or `FileListInvalid`, with the offending values
//! logged at the detection site.

use tracing::warn;

use crate::archive::block_stream::BlockStream;
use crate::archive::format::{BlockInfo, PackageHeader, FILE_LIST_NAME, HEADER_SIZE};
use crate::archive::package::Package;
use crate::archive::shared_stream::SharedStream;
use crate::error::{PackError, Result};

impl Package {
    /// Populates header, block table, and path index from `stream`. The
    /// caller flips the archive to opened only after this returns `Ok`.
    pub(crate) fn mount_from(&mut self, stream: &SharedStream) -> Result<()> {
        self.read_header(stream)?;
        self.read_block_table(stream)?;
        self.read_file_list(stream)?;
        self.rehash();
        Ok(())
    }

    fn read_header(&mut self, stream: &SharedStream) -> Result<()> {
        if stream.stream_len()? < HEADER_SIZE as u64 {
            warn!("Package is shorter than the fixed header");
            return Err(PackError::HeaderInvalid);
        }
        let mut buf = [0u8; HEADER_SIZE];
        stream.read_block_at(0, &mut buf)?;
        let header = PackageHeader::read_from(&buf[..])?;
        if !header.validate() {
            warn!(
                id = header.id,
                version = header.version,
                total_size = header.total_size,
                table_offset = header.block_table_offset,
                table_size = header.block_table_size,
                "Package header failed validation"
            );
            return Err(PackError::HeaderInvalid);
        }
        self.header = header;
        Ok(())
    }

    fn read_block_table(&mut self, stream: &SharedStream) -> Result<()> {
        self.blocks.clear();
        let table_offset = self.header.block_table_offset;
        let table_size = self.header.block_table_size;
        let table_end = (table_offset + table_size) as u64;
        if stream.stream_len()? < table_end {
            warn!(
                table_offset,
                table_size, "Block table runs past the end of the package"
            );
            return Err(PackError::BlockTableInvalid);
        }

        let mut raw = vec![0u8; table_size as usize];
        stream.read_block_at(table_offset as u64, &mut raw)?;

        let mut cursor = &raw[..];
        for _ in 0..self.header.block_count() {
            self.blocks.push(BlockInfo::read_from(&mut cursor)?);
        }
        Ok(())
    }

    /// Decodes the trailing file-name-list block into `paths`: one
    /// length-prefixed UTF-8 entry per earlier block record, then the
    /// reserved sentinel appended for the list block itself.
    fn read_file_list(&mut self, stream: &SharedStream) -> Result<()> {
        self.paths.clear();
        let Some(list_block) = self.blocks.last() else {
            warn!("Package has no block records, file list missing");
            return Err(PackError::FileListInvalid);
        };

        let list = BlockStream::open(stream, list_block).map_err(|err| {
            warn!(error = %err, "File-name-list block failed to decode");
            PackError::FileListInvalid
        })?;
        let data = list.as_slice();

        let mut entries = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            if pos + 4 > data.len() {
                warn!(pos, "File list truncated inside a length prefix");
                return Err(PackError::FileListInvalid);
            }
            let mut len_buf = [0u8; 4];
            len_buf.copy_from_slice(&data[pos..pos + 4]);
            let len = i32::from_le_bytes(len_buf);
            pos += 4;

            if len < 0 || pos + len as usize > data.len() {
                warn!(pos, len, "File list entry claims more bytes than remain");
                return Err(PackError::FileListInvalid);
            }
            let name = match std::str::from_utf8(&data[pos..pos + len as usize]) {
                Ok(name) => name.to_string(),
                Err(_) => {
                    warn!(pos, len, "File list entry is not valid UTF-8");
                    return Err(PackError::FileListInvalid);
                }
            };
            pos += len as usize;
            entries.push(name);
        }

        // One entry per block record, with the final list block accounting
        // for itself via the appended sentinel.
        if entries.len() + 1 != self.blocks.len() {
            warn!(
                entries = entries.len(),
                blocks = self.blocks.len(),
                "File list entry count does not match the block table"
            );
            return Err(PackError::FileListInvalid);
        }

        self.paths = entries;
        self.paths.push(FILE_LIST_NAME.to_string());
        Ok(())
    }
}
