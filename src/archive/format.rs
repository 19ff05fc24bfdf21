use crate::codec::{CompressMethod, EncryptMethod};
use crate::error::Result;
use std::io::{Read, Write};

/// Archive magic id ("packfs" in ASCII hex pairs)
pub const MAGIC_ID: i64 = 0x7061_636b_6673;

/// Current package format version
pub const VERSION: i64 = 1;

/// Header size in bytes (10 little-endian i64 fields)
pub const HEADER_SIZE: usize = 80;

/// Block info record size in bytes (5 little-endian i64 fields)
pub const BLOCK_INFO_SIZE: usize = 40;

/// Package file extension
pub const PACKAGE_EXT: &str = ".pak";

/// Reserved logical path of the file-name-list block. The leading slashes
/// keep it from ever colliding with a normalized content path.
pub const FILE_LIST_NAME: &str = "//__PACK_FILE_LIST__//";

/// Compression applied to the file-name-list block
pub const FILE_LIST_COMPRESS: CompressMethod = CompressMethod::Zstd;

/// Largest decodable block payload in bytes
pub const MAX_BLOCK_SIZE: i64 = i32::MAX as i64;

/// Chunk granularity for copies out of the shared archive stream
pub const COPY_CHUNK_SIZE: usize = 128 * 1024;

// Block flags bitfield layout
pub const BLOCK_EXISTS: i64 = 0x0000_0001;
pub const BLOCK_DELETED: i64 = 0x0000_0002;
pub const BLOCK_COMPRESS_MASK: i64 = 0x0000_0F00;
pub const BLOCK_ENCRYPT_MASK: i64 = 0x0000_F000;
pub const BLOCK_VERSION_MASK: i64 = 0xFFFF_0000;

/// Version stamp (major 1, minor 0) carried by newly staged blocks
pub const BLOCK_INIT_VERSION: i64 = 0x0100_0000;

const COMPRESS_SHIFT: u32 = 8;
const ENCRYPT_SHIFT: u32 = 12;

/// Archive header at offset 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHeader {
    pub id: i64,
    pub version: i64,
    pub total_size: i64,
    pub block_table_offset: i64,
    pub block_table_size: i64,
    pub block_data_offset: i64,
    pub block_data_size: i64,
    pub reserved: [i64; 3],
}

impl PackageHeader {
    /// Baseline for a freshly created, never-flushed archive
    pub fn empty() -> Self {
        Self {
            id: MAGIC_ID,
            version: VERSION,
            total_size: HEADER_SIZE as i64,
            block_table_offset: HEADER_SIZE as i64,
            block_table_size: 0,
            block_data_offset: HEADER_SIZE as i64,
            block_data_size: 0,
            reserved: [0; 3],
        }
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.id.to_le_bytes())?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.total_size.to_le_bytes())?;
        writer.write_all(&self.block_table_offset.to_le_bytes())?;
        writer.write_all(&self.block_table_size.to_le_bytes())?;
        writer.write_all(&self.block_data_offset.to_le_bytes())?;
        writer.write_all(&self.block_data_size.to_le_bytes())?;
        for value in &self.reserved {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Read header from a reader
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        Ok(Self {
            id: read_i64(&mut reader)?,
            version: read_i64(&mut reader)?,
            total_size: read_i64(&mut reader)?,
            block_table_offset: read_i64(&mut reader)?,
            block_table_size: read_i64(&mut reader)?,
            block_data_offset: read_i64(&mut reader)?,
            block_data_size: read_i64(&mut reader)?,
            reserved: [
                read_i64(&mut reader)?,
                read_i64(&mut reader)?,
                read_i64(&mut reader)?,
            ],
        })
    }

    /// Structural invariants checked at mount. Field values come straight
    /// off disk, so the layout sums use checked arithmetic and treat
    /// overflow as a validation failure.
    pub fn validate(&self) -> bool {
        self.id == MAGIC_ID
            && self.version == VERSION
            && self.block_table_size >= 0
            && self.block_table_size % BLOCK_INFO_SIZE as i64 == 0
            && self.block_data_offset >= HEADER_SIZE as i64
            && self.block_data_size >= 0
            && self.block_data_offset.checked_add(self.block_data_size)
                == Some(self.block_table_offset)
            && self.block_table_offset.checked_add(self.block_table_size)
                == Some(self.total_size)
    }

    /// Number of block records implied by the table size
    pub fn block_count(&self) -> usize {
        (self.block_table_size / BLOCK_INFO_SIZE as i64) as usize
    }
}

impl Default for PackageHeader {
    fn default() -> Self {
        Self::empty()
    }
}

/// Pending write state of a block, in-memory only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOp {
    #[default]
    None,
    New,
    Deleted,
}

/// One block table record: five persisted fields plus staging state that
/// never reaches disk
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    pub flags: i64,
    pub offset: i64,
    pub original_size: i64,
    pub compressed_size: i64,
    pub encrypt_key: i64,
    /// Pending operation marker, not persisted
    pub op: PendingOp,
    /// Staged bytes awaiting the next flush, not persisted
    pub raw_data: Option<Vec<u8>>,
}

impl BlockInfo {
    /// Write the five persisted fields to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.original_size.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        writer.write_all(&self.encrypt_key.to_le_bytes())?;
        Ok(())
    }

    /// Read one record from a reader; staging state starts cleared
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        Ok(BlockInfo {
            flags: read_i64(&mut reader)?,
            offset: read_i64(&mut reader)?,
            original_size: read_i64(&mut reader)?,
            compressed_size: read_i64(&mut reader)?,
            encrypt_key: read_i64(&mut reader)?,
            op: PendingOp::None,
            raw_data: None,
        })
    }

    /// Copy of the record without the staged payload. The pending-op marker
    /// is carried; `raw_data` stays with the table entry.
    pub fn record(&self) -> BlockInfo {
        BlockInfo {
            flags: self.flags,
            offset: self.offset,
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            encrypt_key: self.encrypt_key,
            op: self.op,
            raw_data: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.flags & BLOCK_EXISTS != 0
    }

    pub fn set_exists(&mut self) {
        self.flags |= BLOCK_EXISTS;
    }

    /// Persisted soft-delete bit
    pub fn deleted_flag(&self) -> bool {
        self.flags & BLOCK_DELETED != 0
    }

    pub fn set_deleted_flag(&mut self) {
        self.flags |= BLOCK_DELETED;
    }

    /// Deleted through either the persisted flag or a pending delete marker
    pub fn is_deleted(&self) -> bool {
        self.deleted_flag() || self.op == PendingOp::Deleted
    }

    pub fn compress_code(&self) -> i64 {
        (self.flags & BLOCK_COMPRESS_MASK) >> COMPRESS_SHIFT
    }

    pub fn compress_method(&self) -> Result<CompressMethod> {
        CompressMethod::from_code(self.compress_code())
    }

    pub fn set_compress_method(&mut self, method: CompressMethod) {
        self.flags = (self.flags & !BLOCK_COMPRESS_MASK) | (method.code() << COMPRESS_SHIFT);
    }

    pub fn encrypt_code(&self) -> i64 {
        (self.flags & BLOCK_ENCRYPT_MASK) >> ENCRYPT_SHIFT
    }

    pub fn encrypt_method(&self) -> Result<EncryptMethod> {
        EncryptMethod::from_code(self.encrypt_code())
    }

    pub fn set_encrypt_method(&mut self, method: EncryptMethod) {
        self.flags = (self.flags & !BLOCK_ENCRYPT_MASK) | (method.code() << ENCRYPT_SHIFT);
    }

    pub fn format_version(&self) -> i64 {
        self.flags & BLOCK_VERSION_MASK
    }

    /// Bytes the block occupies on disk: the compressed length when the
    /// compression code is set, the original length otherwise
    pub fn stored_size(&self) -> i64 {
        if self.compress_code() != 0 {
            self.compressed_size
        } else {
            self.original_size
        }
    }
}

// Helper for reading little-endian i64 fields
fn read_i64<R: Read>(mut reader: R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}
