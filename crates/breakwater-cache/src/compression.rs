//! Payload compression codecs.
//!
//! The codec is stored with each compressed entry so decompression always
//! uses the codec that produced the bytes. A decompression failure is a
//! corruption signal: the engine invalidates the entry and reports a miss,
//! never an error to the caller.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

/// Minimum ratio of saved bytes for compressed storage to be worthwhile.
/// Below this the raw payload is kept.
pub(crate) const MIN_SAVINGS_RATIO: f64 = 0.10;

/// Compression codec applied to cached payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// No compression.
    Raw,
    /// Zstandard at the given level (1–9).
    Zstd(i32),
    /// Snappy (level-less).
    Snappy,
    /// Gzip at the given level (1–9).
    Gzip(u32),
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Zstd(1)
    }
}

/// Decompression failure: the stored bytes do not round-trip through the
/// recorded codec.
#[derive(Debug, Error)]
#[error("payload failed to decompress with codec {codec:?}")]
pub struct CorruptPayload {
    pub(crate) codec: Codec,
}

impl Codec {
    /// Validates the codec's level range.
    pub(crate) fn validate(self) -> Result<(), String> {
        match self {
            Codec::Zstd(level) if !(1..=9).contains(&level) => {
                Err(format!("zstd level {level} outside 1..=9"))
            }
            Codec::Gzip(level) if !(1..=9).contains(&level) => {
                Err(format!("gzip level {level} outside 1..=9"))
            }
            _ => Ok(()),
        }
    }

    /// Compresses `data`, returning `None` when this codec is `Raw` or the
    /// savings fall short of [`MIN_SAVINGS_RATIO`].
    pub(crate) fn compress(self, data: &[u8]) -> Option<Bytes> {
        let compressed = match self {
            Codec::Raw => return None,
            Codec::Zstd(level) => zstd::bulk::compress(data, level).ok()?,
            Codec::Snappy => snap::raw::Encoder::new().compress_vec(data).ok()?,
            Codec::Gzip(level) => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
                encoder.write_all(data).ok()?;
                encoder.finish().ok()?
            }
        };

        let saved = data.len().saturating_sub(compressed.len()) as f64;
        if saved / data.len() as f64 >= MIN_SAVINGS_RATIO {
            Some(Bytes::from(compressed))
        } else {
            None
        }
    }

    /// Decompresses `data` back to the original `raw_len` bytes.
    pub(crate) fn decompress(self, data: &[u8], raw_len: usize) -> Result<Bytes, CorruptPayload> {
        let corrupt = || CorruptPayload { codec: self };
        let out = match self {
            Codec::Raw => return Ok(Bytes::copy_from_slice(data)),
            Codec::Zstd(_) => zstd::bulk::decompress(data, raw_len).map_err(|_| corrupt())?,
            Codec::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|_| corrupt())?,
            Codec::Gzip(_) => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::with_capacity(raw_len);
                decoder.read_to_end(&mut out).map_err(|_| corrupt())?;
                out
            }
        };
        if out.len() != raw_len {
            return Err(corrupt());
        }
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressible() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(16 * 1024)
            .copied()
            .collect()
    }

    #[test]
    fn zstd_round_trip() {
        let data = compressible();
        let packed = Codec::Zstd(3).compress(&data).expect("should compress");
        assert!(packed.len() < data.len());
        let unpacked = Codec::Zstd(3).decompress(&packed, data.len()).unwrap();
        assert_eq!(&unpacked[..], &data[..]);
    }

    #[test]
    fn snappy_round_trip() {
        let data = compressible();
        let packed = Codec::Snappy.compress(&data).expect("should compress");
        let unpacked = Codec::Snappy.decompress(&packed, data.len()).unwrap();
        assert_eq!(&unpacked[..], &data[..]);
    }

    #[test]
    fn gzip_round_trip() {
        let data = compressible();
        let packed = Codec::Gzip(6).compress(&data).expect("should compress");
        let unpacked = Codec::Gzip(6).decompress(&packed, data.len()).unwrap();
        assert_eq!(&unpacked[..], &data[..]);
    }

    #[test]
    fn incompressible_data_stays_raw() {
        // Already-compressed input will not clear the 10% savings bar.
        let data = compressible();
        let packed = Codec::Zstd(9).compress(&data).unwrap();
        assert!(Codec::Zstd(9).compress(&packed).is_none());
    }

    #[test]
    fn raw_codec_never_compresses() {
        assert!(Codec::Raw.compress(&compressible()).is_none());
    }

    #[test]
    fn mangled_bytes_report_corruption() {
        let data = compressible();
        let packed = Codec::Zstd(3).compress(&data).unwrap();
        let mangled = &packed[..packed.len() / 2];
        assert!(Codec::Zstd(3).decompress(mangled, data.len()).is_err());
    }

    #[test]
    fn level_validation() {
        assert!(Codec::Zstd(0).validate().is_err());
        assert!(Codec::Zstd(10).validate().is_err());
        assert!(Codec::Gzip(0).validate().is_err());
        assert!(Codec::Zstd(9).validate().is_ok());
        assert!(Codec::Snappy.validate().is_ok());
        assert!(Codec::Raw.validate().is_ok());
    }
}
