//! Decoded view of one block
//!
//! `BlockStream` validates a block record, runs the copy → decompress →
//! decrypt pipeline once at open time, and exposes the decoded bytes as a
//! seekable read-only stream. Scratch space comes from the shared buffer
//! pool, sized to the larger of the stored and decoded lengths so the same
//! buffer serves every stage; it goes back to the pool when the stream drops.
//! Ciphers are in-place transforms, so the decrypt stage needs no second
//! buffer.

use std::io::{self, Read, Seek, SeekFrom};

use crate::archive::format::{BlockInfo, HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::archive::shared_stream::SharedStream;
use crate::codec::{self, CompressMethod, EncryptMethod};
use crate::error::{PackError, Result};
use crate::pool::{BufferPool, PooledBuf};

/// Read-only seekable stream over one fully decoded block.
#[derive(Debug)]
pub struct BlockStream {
    buf: PooledBuf<'static>,
    len: usize,
    pos: u64,
}

impl BlockStream {
    /// Fully decodes `block` out of `source`. The source handle is only
    /// needed for the copy stage; the returned stream is self-contained.
    pub(crate) fn open(source: &SharedStream, block: &BlockInfo) -> Result<Self> {
        validate_block(source, block)?;

        let stored_len = block.stored_size() as usize;
        let original_len = block.original_size as usize;
        let pool = BufferPool::shared();
        let mut data = pool.rent(stored_len.max(original_len));

        source.read_block_at(block.offset as u64, &mut data[..stored_len])?;
        let mut len = stored_len;

        let compress = block.compress_method()?;
        if compress != CompressMethod::None {
            let mut scratch = pool.rent(original_len);
            let written =
                codec::decompress_into(compress, &data[..len], &mut scratch[..original_len])?;
            data[..written].copy_from_slice(&scratch[..written]);
            len = written;
        }

        let encrypt = block.encrypt_method()?;
        if encrypt != EncryptMethod::None {
            codec::crypt_in_place(encrypt, &mut data[..len], block.encrypt_key);
        }

        if len as i64 != block.original_size {
            return Err(PackError::StreamDataLengthMismatch {
                actual: len as i64,
                expected: block.original_size,
            });
        }

        Ok(BlockStream { buf: data, len, pos: 0 })
    }

    /// Decoded length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decoded bytes, independent of the read position.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Copies the decoded bytes out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Read for BlockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = (self.pos as usize).min(self.len);
        let n = (self.len - start).min(buf.len());
        buf[..n].copy_from_slice(&self.buf[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for BlockStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset as i64),
            SeekFrom::End(offset) => (self.len as i64).checked_add(offset),
            SeekFrom::Current(offset) => (self.pos as i64).checked_add(offset),
        };
        match target {
            Some(target) if target >= 0 => {
                self.pos = target as u64;
                Ok(self.pos)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position in block stream",
            )),
        }
    }
}

/// Structural checks before any I/O or buffer rental.
fn validate_block(source: &SharedStream, block: &BlockInfo) -> Result<()> {
    if !block.exists() {
        return Err(PackError::BlockDisposed);
    }
    if block.offset < HEADER_SIZE as i64 {
        return Err(PackError::BlockOffsetError {
            actual: block.offset,
            expected: HEADER_SIZE as i64,
        });
    }
    if block.original_size < 0 || block.compressed_size < 0 {
        return Err(PackError::StreamDataError {
            actual: block.original_size.min(block.compressed_size),
            expected: 0,
        });
    }
    let max_size = block.original_size.max(block.compressed_size);
    if max_size > MAX_BLOCK_SIZE {
        return Err(PackError::BlockDataTooLarge(max_size));
    }
    let stream_len = source.stream_len()? as i64;
    // The offset has no upper bound yet; a corrupt record can push the sum
    // past i64::MAX, so saturate it into the length check.
    let required = block.offset.saturating_add(block.stored_size());
    if stream_len < required {
        return Err(PackError::StreamDataError {
            actual: stream_len,
            expected: required,
        });
    }
    Ok(())
}
