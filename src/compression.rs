//! Chunk compression for the durable backend.
//!
//! Settings are chosen once when a backend is constructed and applied to every
//! chunk it writes. Each dataset records the algorithm and whether the byte
//! shuffle ran, so chunks written under other settings stay readable.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SeriesError};

/// Width in bytes of one stored value.
pub const VALUE_WIDTH: usize = std::mem::size_of::<f64>();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Zstd,
}

impl CompressionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(CompressionAlgorithm::None),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            "zstd" => Ok(CompressionAlgorithm::Zstd),
            other => Err(SeriesError::DataCorruption {
                message: format!("unknown compression algorithm '{other}'"),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub algorithm: CompressionAlgorithm,
    pub level: i32,
    pub shuffle: bool,
}

impl CompressionSettings {
    pub fn none() -> Self {
        Self::default()
    }
    pub fn deflate(level: i32, shuffle: bool) -> Result<Self> {
        let settings = Self {
            algorithm: CompressionAlgorithm::Deflate,
            level,
            shuffle,
        };
        settings.validate()?;
        Ok(settings)
    }
    pub fn zstd(level: i32, shuffle: bool) -> Result<Self> {
        let settings = Self {
            algorithm: CompressionAlgorithm::Zstd,
            level,
            shuffle,
        };
        settings.validate()?;
        Ok(settings)
    }
    pub fn validate(&self) -> Result<()> {
        let valid = match self.algorithm {
            CompressionAlgorithm::None => true,
            CompressionAlgorithm::Deflate => (0..=9).contains(&self.level),
            CompressionAlgorithm::Zstd => (1..=22).contains(&self.level),
        };
        if !valid {
            return Err(SeriesError::Config(format!(
                "compression level {} is out of range for {}",
                self.level,
                self.algorithm.as_str()
            )));
        }
        Ok(())
    }
    /// Whether a shuffle is applied to the bytes. Uncompressed chunks are
    /// never shuffled.
    pub fn shuffles(&self) -> bool {
        self.shuffle && self.algorithm != CompressionAlgorithm::None
    }
    pub fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let staged;
        let input = if self.shuffles() {
            staged = shuffle(bytes, VALUE_WIDTH);
            &staged[..]
        } else {
            bytes
        };
        match self.algorithm {
            CompressionAlgorithm::None => Ok(input.to_vec()),
            CompressionAlgorithm::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level as u32));
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Zstd => Ok(zstd::bulk::compress(input, self.level)?),
        }
    }
}

pub fn decompress(algorithm: CompressionAlgorithm, shuffled: bool, bytes: &[u8]) -> Result<Vec<u8>> {
    let inflated = match algorithm {
        CompressionAlgorithm::None => bytes.to_vec(),
        CompressionAlgorithm::Deflate => {
            let mut decoder = ZlibDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        }
        CompressionAlgorithm::Zstd => zstd::decode_all(bytes)?,
    };
    if shuffled {
        Ok(unshuffle(&inflated, VALUE_WIDTH))
    } else {
        Ok(inflated)
    }
}

/// Groups the n-th byte of every `width`-byte lane together, which puts the
/// slowly varying exponent bytes of numeric data next to each other. A ragged
/// tail is copied through unchanged.
pub fn shuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    let lanes = bytes.len() / width;
    let mut out = Vec::with_capacity(bytes.len());
    for offset in 0..width {
        out.extend((0..lanes).map(|lane| bytes[lane * width + offset]));
    }
    out.extend_from_slice(&bytes[lanes * width..]);
    out
}

pub fn unshuffle(bytes: &[u8], width: usize) -> Vec<u8> {
    let lanes = bytes.len() / width;
    let mut out = vec![0u8; bytes.len()];
    for offset in 0..width {
        for lane in 0..lanes {
            out[lane * width + offset] = bytes[offset * lanes + lane];
        }
    }
    out[lanes * width..].copy_from_slice(&bytes[lanes * width..]);
    out
}
