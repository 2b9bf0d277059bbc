//! Pluggable segment compression.

use spillway_common::config::Compression;

use super::error::{FormatError, FormatResult};

/// Compresses and decompresses segment payloads.
pub trait CompressionCodec: Send + Sync {
    /// The scheme this codec implements.
    fn compression(&self) -> Compression;

    /// Compresses a raw payload.
    fn compress(&self, raw: &[u8]) -> Vec<u8>;

    /// Restores a payload of `raw_len` bytes.
    fn decompress(&self, stored: &[u8], raw_len: usize) -> FormatResult<Vec<u8>>;
}

struct Identity;

impl CompressionCodec for Identity {
    fn compression(&self) -> Compression {
        Compression::None
    }

    fn compress(&self, raw: &[u8]) -> Vec<u8> {
        raw.to_vec()
    }

    fn decompress(&self, stored: &[u8], raw_len: usize) -> FormatResult<Vec<u8>> {
        if stored.len() != raw_len {
            return Err(FormatError::Decompress {
                message: format!("expected {raw_len} bytes, found {}", stored.len()),
            });
        }
        Ok(stored.to_vec())
    }
}

struct Lz4;

impl CompressionCodec for Lz4 {
    fn compression(&self) -> Compression {
        Compression::Lz4
    }

    fn compress(&self, raw: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(raw)
    }

    fn decompress(&self, stored: &[u8], raw_len: usize) -> FormatResult<Vec<u8>> {
        lz4_flex::block::decompress(stored, raw_len).map_err(|e| FormatError::Decompress {
            message: e.to_string(),
        })
    }
}

static IDENTITY: Identity = Identity;
static LZ4: Lz4 = Lz4;

/// Returns the codec for a compression scheme.
pub fn codec_for(compression: Compression) -> &'static dyn CompressionCodec {
    match compression {
        Compression::None => &IDENTITY,
        Compression::Lz4 => &LZ4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codecs_restore_payload() {
        let raw: Vec<u8> = b"spillway ".iter().copied().cycle().take(4096).collect();
        for compression in [Compression::None, Compression::Lz4] {
            let codec = codec_for(compression);
            assert_eq!(codec.compression(), compression);
            let stored = codec.compress(&raw);
            assert_eq!(codec.decompress(&stored, raw.len()).unwrap(), raw);
        }
        assert!(codec_for(Compression::Lz4).compress(&raw).len() < raw.len());
    }

    #[test]
    fn test_decompress_rejects_bad_length() {
        let codec = codec_for(Compression::None);
        assert!(codec.decompress(b"abc", 4).is_err());

        let codec = codec_for(Compression::Lz4);
        let stored = codec.compress(b"hello hello hello");
        assert!(codec.decompress(&stored[..stored.len() - 1], 17).is_err());
    }
}
