//! Disk Tier Compression
//!
//! Streaming codecs wrapped around the file writer/reader, so an entry is
//! serialized straight into the compressor without an intermediate buffer.
//!
//! # Example
//!
//! ```
//! use pricecache::cache::compression::Codec;
//!
//! let mut buf = Vec::new();
//! Codec::Gzip.write_json(&mut buf, "k", &vec![1, 2, 3]).unwrap();
//!
//! let back: Vec<i32> = Codec::Gzip.read_json(buf.as_slice(), "k").unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

use std::io::{BufReader, BufWriter, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported stream codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Plain JSON
    #[default]
    None,
    /// Gzip stream
    Gzip,
    /// LZ4 frame
    Lz4,
}

impl Codec {
    /// Codec selected by the `compress_l2` flag
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            Codec::Gzip
        } else {
            Codec::None
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Gzip => "gzip",
            Codec::Lz4 => "lz4",
        }
    }

    /// File extension for entries written with this codec
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::None => "json",
            Codec::Gzip => "gz",
            Codec::Lz4 => "lz4",
        }
    }

    /// Codec for a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Codec::None),
            "gz" => Some(Codec::Gzip),
            "lz4" => Some(Codec::Lz4),
            _ => None,
        }
    }

    /// Whether this codec compresses
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Codec::None)
    }

    /// Serialize `value` as JSON through this codec into `writer`
    pub fn write_json<W: Write, T: Serialize + ?Sized>(
        &self,
        writer: W,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        match self {
            Codec::None => {
                serde_json::to_writer(&mut writer, value).map_err(|e| self.encode_error(key, e))?;
            }
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(&mut writer, Compression::default());
                serde_json::to_writer(&mut encoder, value)
                    .map_err(|e| self.encode_error(key, e))?;
                encoder.finish().map_err(|e| self.compression_error(e))?;
            }
            Codec::Lz4 => {
                let mut encoder = lz4::EncoderBuilder::new()
                    .level(4)
                    .build(&mut writer)
                    .map_err(|e| self.compression_error(e))?;
                serde_json::to_writer(&mut encoder, value)
                    .map_err(|e| self.encode_error(key, e))?;
                let (_, result) = encoder.finish();
                result.map_err(|e| self.compression_error(e))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Decode a JSON value written by [`Codec::write_json`]
    pub fn read_json<R: Read, T: DeserializeOwned>(&self, reader: R, key: &str) -> Result<T> {
        let reader = BufReader::new(reader);
        match self {
            Codec::None => serde_json::from_reader(reader).map_err(|e| self.decode_error(key, e)),
            Codec::Gzip => serde_json::from_reader(GzDecoder::new(reader))
                .map_err(|e| self.decode_error(key, e)),
            Codec::Lz4 => {
                let decoder = lz4::Decoder::new(reader).map_err(|e| Error::Decompression {
                    codec: self.name().to_string(),
                    reason: e.to_string(),
                })?;
                serde_json::from_reader(decoder).map_err(|e| self.decode_error(key, e))
            }
        }
    }

    fn compression_error(&self, e: std::io::Error) -> Error {
        Error::Compression {
            codec: self.name().to_string(),
            reason: e.to_string(),
        }
    }

    fn encode_error(&self, key: &str, e: serde_json::Error) -> Error {
        if e.is_io() && self.is_compressed() {
            Error::Compression {
                codec: self.name().to_string(),
                reason: e.to_string(),
            }
        } else if e.is_io() {
            Error::Io(std::io::Error::other(e.to_string()))
        } else {
            Error::serialization(key, e)
        }
    }

    /// Truncated or garbled bytes are corruption; well-formed JSON of the
    /// wrong shape is a deserialization error.
    fn decode_error(&self, key: &str, e: serde_json::Error) -> Error {
        if e.is_io() && self.is_compressed() {
            Error::Decompression {
                codec: self.name().to_string(),
                reason: e.to_string(),
            }
        } else if e.is_syntax() || e.is_eof() || e.is_io() {
            Error::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
        } else {
            Error::deserialization(key, e)
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================
