//! Compression strategy configs
#[cfg(any(feature = "flate2", feature = "lz4", feature = "zstd"))]
use std::io::{Read, Write};

use crate::error::CodecError;

pub(crate) const CODEC_NONE: u8 = 0x00;
pub(crate) const CODEC_GZIP: u8 = 0x01;
pub(crate) const CODEC_SNAPPY: u8 = 0x02;
pub(crate) const CODEC_LZ4: u8 = 0x03;
pub(crate) const CODEC_ZSTD: u8 = 0x04;

/// compression applied to every message set of a producer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Compression {
    #[default]
    None,
    Gzip(CompressionGzip),
    Snappy(CompressionSnappy),
    Lz4(CompressionLz4),
    Zstd(CompressionZstd),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionGzip {
    pub level: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionSnappy {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionLz4 {
    pub level: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressionZstd {
    pub level: i32,
}

impl Default for CompressionGzip {
    fn default() -> Self {
        CompressionGzip { level: 6 }
    }
}

impl Default for CompressionLz4 {
    fn default() -> Self {
        CompressionLz4 { level: 4 }
    }
}

impl Default for CompressionZstd {
    fn default() -> Self {
        CompressionZstd { level: 3 }
    }
}

impl Compression {
    /// codec identifier stored in the low bits of a message's attributes
    pub fn codec_id(&self) -> u8 {
        match self {
            Compression::None => CODEC_NONE,
            Compression::Gzip(_) => CODEC_GZIP,
            Compression::Snappy(_) => CODEC_SNAPPY,
            Compression::Lz4(_) => CODEC_LZ4,
            Compression::Zstd(_) => CODEC_ZSTD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip(_) => "gzip",
            Compression::Snappy(_) => "snappy",
            Compression::Lz4(_) => "lz4",
            Compression::Zstd(_) => "zstd",
        }
    }

    /// whether the cargo feature providing this codec is active
    pub fn is_supported(&self) -> bool {
        match self {
            Compression::None => true,
            Compression::Gzip(_) => cfg!(feature = "flate2"),
            Compression::Snappy(_) => cfg!(feature = "snap"),
            Compression::Lz4(_) => cfg!(feature = "lz4"),
            Compression::Zstd(_) => cfg!(feature = "zstd"),
        }
    }

    pub(crate) fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            #[cfg(feature = "flate2")]
            Compression::Gzip(gzip) => {
                let mut e = flate2::write::GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(gzip.level),
                );
                e.write_all(data)?;
                Ok(e.finish()?)
            }
            #[cfg(feature = "snap")]
            Compression::Snappy(_) => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
            #[cfg(feature = "lz4")]
            Compression::Lz4(lz4) => {
                let mut encoder = lz4::EncoderBuilder::new()
                    .level(lz4.level)
                    .build(Vec::new())?;
                encoder.write_all(data)?;
                let (compressed, result) = encoder.finish();
                result?;
                Ok(compressed)
            }
            #[cfg(feature = "zstd")]
            Compression::Zstd(zstd) => Ok(zstd::encode_all(data, zstd.level)?),
            #[allow(unreachable_patterns)]
            other => Err(CodecError::UnsupportedCodec(other.codec_id())),
        }
    }
}

impl TryFrom<u8> for Compression {
    type Error = CodecError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            CODEC_NONE => Ok(Compression::None),
            CODEC_GZIP => Ok(Compression::Gzip(CompressionGzip::default())),
            CODEC_SNAPPY => Ok(Compression::Snappy(CompressionSnappy::default())),
            CODEC_LZ4 => Ok(Compression::Lz4(CompressionLz4::default())),
            CODEC_ZSTD => Ok(Compression::Zstd(CompressionZstd::default())),
            other => Err(CodecError::UnsupportedCodec(other)),
        }
    }
}

pub(crate) fn decompress(codec_id: u8, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match codec_id {
        CODEC_NONE => Ok(data.to_vec()),
        #[cfg(feature = "flate2")]
        CODEC_GZIP => {
            let mut d = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            d.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        }
        #[cfg(feature = "snap")]
        CODEC_SNAPPY => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))),
        #[cfg(feature = "lz4")]
        CODEC_LZ4 => {
            let mut decoder = lz4::Decoder::new(data)?;
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        }
        #[cfg(feature = "zstd")]
        CODEC_ZSTD => Ok(zstd::decode_all(data)?),
        other => Err(CodecError::UnsupportedCodec(other)),
    }
}
