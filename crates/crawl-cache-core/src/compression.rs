//! Payload compression for the durable tier
//!
//! Screenshots and rendered HTML dominate durable storage. Payloads at or
//! above a size threshold are compressed and tagged with a [`Codec`] so a
//! reader can decode them regardless of its own compressor setting.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::CacheError;

/// Compression level (1-22, higher = better compression but slower)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Payloads smaller than this are stored raw
pub const MIN_COMPRESSION_SIZE: usize = 256;

/// Encoding of a stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Raw,
    Zstd,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Codec::Raw),
            "zstd" => Ok(Codec::Zstd),
            other => Err(CacheError::Decompression(format!("unknown codec: {other}"))),
        }
    }
}

/// Trait for compression implementations
pub trait Compressor: Send + Sync + Clone + 'static {
    /// Codec written by this compressor
    fn codec(&self) -> Codec;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;

    /// Check if data should be compressed (based on size threshold)
    fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= MIN_COMPRESSION_SIZE
    }

    /// Encode a payload for storage, returning the codec actually used
    fn encode(&self, payload: &Bytes) -> Result<(Codec, Bytes), CacheError> {
        if self.codec() == Codec::Raw || !self.should_compress(payload) {
            return Ok((Codec::Raw, payload.clone()));
        }
        let compressed = self.compress(payload)?;
        // Incompressible payloads (already-compressed PNGs) stay raw.
        if compressed.len() >= payload.len() {
            return Ok((Codec::Raw, payload.clone()));
        }
        Ok((self.codec(), Bytes::from(compressed)))
    }
}

/// Decode a stored payload written with `codec`
pub fn decode(codec: Codec, data: Bytes) -> Result<Bytes, CacheError> {
    match codec {
        Codec::Raw => Ok(data),
        #[cfg(feature = "compression")]
        Codec::Zstd => zstd::decode_all(data.as_ref())
            .map(Bytes::from)
            .map_err(|e| CacheError::Decompression(e.to_string())),
        #[cfg(not(feature = "compression"))]
        Codec::Zstd => Err(CacheError::Decompression(
            "zstd payload but compression support is not enabled".into(),
        )),
    }
}

/// No-op compressor (disabled compression)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn codec(&self) -> Codec {
        Codec::Raw
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        Ok(data.to_vec())
    }

    fn should_compress(&self, _data: &[u8]) -> bool {
        false
    }
}

/// Zstd compressor
#[cfg(feature = "compression")]
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
    min_size: usize,
}

#[cfg(feature = "compression")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

#[cfg(feature = "compression")]
impl ZstdCompressor {
    /// Create a new zstd compressor with the given compression level (1-22)
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
            min_size: MIN_COMPRESSION_SIZE,
        }
    }

    /// Set minimum size for compression
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

#[cfg(feature = "compression")]
impl Compressor for ZstdCompressor {
    fn codec(&self) -> Codec {
        Codec::Zstd
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::encode_all(data, self.level).map_err(|e| CacheError::Compression(e.to_string()))
    }

    fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= self.min_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_encodes_raw() {
        let payload = Bytes::from(vec![7u8; 4096]);
        let (codec, encoded) = NoopCompressor.encode(&payload).unwrap();
        assert_eq!(codec, Codec::Raw);
        assert_eq!(encoded, payload);
        assert_eq!(decode(codec, encoded).unwrap(), payload);
    }

    #[test]
    fn test_codec_labels() {
        assert_eq!("zstd".parse::<Codec>().unwrap(), Codec::Zstd);
        assert_eq!(Codec::Raw.to_string(), "raw");
        assert!(matches!(
            "lz4".parse::<Codec>(),
            Err(CacheError::Decompression(_))
        ));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_encode_decode() {
        let compressor = ZstdCompressor::new(3);
        let payload = Bytes::from((0..4096).map(|i| (i % 16) as u8).collect::<Vec<_>>());

        let (codec, encoded) = compressor.encode(&payload).unwrap();
        assert_eq!(codec, Codec::Zstd);
        assert!(encoded.len() < payload.len());
        assert_eq!(decode(codec, encoded).unwrap(), payload);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_skips_small_payloads() {
        let compressor = ZstdCompressor::new(3);
        let (codec, _) = compressor.encode(&Bytes::from_static(b"small")).unwrap();
        assert_eq!(codec, Codec::Raw);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_level_clamping() {
        assert_eq!(ZstdCompressor::new(-5).level(), 1);
        assert_eq!(ZstdCompressor::new(100).level(), 22);
    }
}
