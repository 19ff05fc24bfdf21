//! Block codec strategies
//!
//! Compression and encryption are selected per block by small numeric codes
//! persisted in the block flags bitfield, so strategies can be added without
//! changing the container layout. Compressors work buffer-to-buffer (the
//! block record carries both lengths, no framing is embedded in the payload).
//! Ciphers must be length-preserving: an encrypted, uncompressed block stores
//! exactly `original_size` bytes on disk.

use crate::error::{PackError, Result};

/// Zstd level used for newly staged blocks.
const ZSTD_LEVEL: i32 = 3;

/// Compression strategy code, stored in block flags bits 8-11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressMethod {
    #[default]
    None = 0,
    Lz4 = 1,
    Zstd = 2,
}

impl CompressMethod {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(CompressMethod::None),
            1 => Ok(CompressMethod::Lz4),
            2 => Ok(CompressMethod::Zstd),
            other => Err(PackError::InvalidCompression(other)),
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Encryption strategy code, stored in block flags bits 12-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptMethod {
    #[default]
    None = 0,
    Xor = 1,
}

impl EncryptMethod {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(EncryptMethod::None),
            1 => Ok(EncryptMethod::Xor),
            other => Err(PackError::InvalidEncryption(other)),
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Compresses `data` with the given strategy, returning the compressed bytes.
pub fn compress(method: CompressMethod, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressMethod::None => Ok(data.to_vec()),
        CompressMethod::Lz4 => Ok(lz4_flex::block::compress(data)),
        CompressMethod::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
            .map_err(|e| PackError::CompressionFailed(e.to_string())),
    }
}

/// Decompresses `src` into `dst`, returning the number of bytes written.
/// `dst` must be at least as long as the decompressed payload.
pub fn decompress_into(method: CompressMethod, src: &[u8], dst: &mut [u8]) -> Result<usize> {
    match method {
        CompressMethod::None => {
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
        CompressMethod::Lz4 => lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| PackError::DecompressionFailed(e.to_string())),
        CompressMethod::Zstd => zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| PackError::DecompressionFailed(e.to_string())),
    }
}

/// Runs the cipher selected by `method` over `data` in place. All supported
/// ciphers are symmetric, so the same call encrypts and decrypts.
pub fn crypt_in_place(method: EncryptMethod, data: &mut [u8], key: i64) {
    match method {
        EncryptMethod::None => {}
        EncryptMethod::Xor => xor_in_place(data, key),
    }
}

/// Keyed XOR transform: the 8 little-endian bytes of `key` repeat cyclically
/// over the payload.
fn xor_in_place(data: &mut [u8], key: i64) {
    let key_bytes = key.to_le_bytes();
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key_bytes[i % key_bytes.len()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_roundtrip() {
        let data = b"hello hello hello hello hello hello".repeat(16);
        let compressed = compress(CompressMethod::Lz4, &data).unwrap();
        assert!(compressed.len() < data.len());

        let mut out = vec![0u8; data.len()];
        let written = decompress_into(CompressMethod::Lz4, &compressed, &mut out).unwrap();
        assert_eq!(written, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(32);
        let compressed = compress(CompressMethod::Zstd, &data).unwrap();
        assert!(compressed.len() < data.len());

        let mut out = vec![0u8; data.len()];
        let written = decompress_into(CompressMethod::Zstd, &compressed, &mut out).unwrap();
        assert_eq!(written, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_xor_is_symmetric_and_length_preserving() {
        let original = b"block payload with some bytes".to_vec();
        let mut data = original.clone();
        crypt_in_place(EncryptMethod::Xor, &mut data, 0x1122_3344_5566_7788);
        assert_eq!(data.len(), original.len());
        assert_ne!(data, original);

        crypt_in_place(EncryptMethod::Xor, &mut data, 0x1122_3344_5566_7788);
        assert_eq!(data, original);
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        assert!(matches!(
            CompressMethod::from_code(9),
            Err(PackError::InvalidCompression(9))
        ));
        assert!(matches!(
            EncryptMethod::from_code(7),
            Err(PackError::InvalidEncryption(7))
        ));
    }
}
