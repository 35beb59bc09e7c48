//! Payload compression for outbound messages.
//!
//! Large payloads are serialized to canonical JSON bytes, compressed with the
//! configured algorithm and wrapped in an envelope:
//!
//! ```json
//! { "compressed": true, "algorithm": "gzip", "data": "<base64>" }
//! ```
//!
//! The algorithm is fixed per compressor instance, so every consuming client
//! must support it. `compress` and `decompress` fail open; the `try_*`
//! variants surface codec errors to the caller.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::DEFAULT_COMPRESSION_THRESHOLD;
use crate::error::CompressionError;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW_BITS: u32 = 22;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Compression disabled.
    #[default]
    None,
    /// Gzip (RFC 1952).
    Gzip,
    /// Raw deflate (RFC 1951).
    Deflate,
    /// Brotli (RFC 7932).
    Brotli,
}

impl CompressionAlgorithm {
    /// Returns the wire name used in envelopes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "brotli",
        }
    }

    /// Returns the highest quality level the algorithm accepts.
    #[must_use]
    pub const fn max_level(&self) -> u32 {
        match self {
            Self::None => u32::MAX,
            Self::Gzip | Self::Deflate => 9,
            Self::Brotli => 11,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "deflate" => Ok(Self::Deflate),
            "brotli" | "br" => Ok(Self::Brotli),
            other => Err(CompressionError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Compressor with a statically configured algorithm and size threshold.
#[derive(Debug, Clone)]
pub struct MessageCompressor {
    algorithm: CompressionAlgorithm,
    threshold: usize,
    level: u32,
}

impl Default for MessageCompressor {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::None, DEFAULT_COMPRESSION_THRESHOLD, 6)
    }
}

impl MessageCompressor {
    /// Creates a compressor. The level is clamped to the algorithm's range.
    #[must_use]
    pub fn new(algorithm: CompressionAlgorithm, threshold: usize, level: u32) -> Self {
        Self {
            algorithm,
            threshold,
            level: level.min(algorithm.max_level()),
        }
    }

    /// Returns the configured algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Returns the size threshold in bytes.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns true if the value is a compression envelope.
    #[must_use]
    pub fn is_compressed(message: &Value) -> bool {
        message.get("compressed").and_then(Value::as_bool) == Some(true)
    }

    /// Compresses a message, returning it unchanged on failure.
    #[must_use]
    pub fn compress(&self, message: &Value) -> Value {
        match self.try_compress(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(algorithm = %self.algorithm, "Compression failed, sending uncompressed: {}", e);
                message.clone()
            }
        }
    }

    /// Decompresses a message, returning it unchanged on failure.
    #[must_use]
    pub fn decompress(&self, message: &Value) -> Value {
        match self.try_decompress(message) {
            Ok(value) => value,
            Err(e) => {
                warn!("Decompression failed, returning envelope: {}", e);
                message.clone()
            }
        }
    }

    /// Compresses a message if it is at or above the size threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encoding fails.
    pub fn try_compress(&self, message: &Value) -> Result<Value, CompressionError> {
        if self.algorithm == CompressionAlgorithm::None {
            return Ok(message.clone());
        }

        let bytes = serde_json::to_vec(message)
            .map_err(|e| CompressionError::InvalidEnvelope(e.to_string()))?;
        if bytes.len() < self.threshold {
            return Ok(message.clone());
        }

        let encoded = encode(self.algorithm, self.level, &bytes)?;
        debug!(
            algorithm = %self.algorithm,
            original = bytes.len(),
            compressed = encoded.len(),
            "Compressed payload"
        );

        Ok(json!({
            "compressed": true,
            "algorithm": self.algorithm.as_str(),
            "data": BASE64.encode(encoded),
        }))
    }

    /// Reverses `try_compress` using the algorithm tagged in the envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope is malformed or decoding fails.
    pub fn try_decompress(&self, message: &Value) -> Result<Value, CompressionError> {
        if !Self::is_compressed(message) {
            return Ok(message.clone());
        }

        let algorithm: CompressionAlgorithm = message
            .get("algorithm")
            .and_then(Value::as_str)
            .ok_or_else(|| CompressionError::InvalidEnvelope("missing algorithm".to_string()))?
            .parse()?;
        let data = message
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CompressionError::InvalidEnvelope("missing data".to_string()))?;

        let encoded = BASE64.decode(data)?;
        let bytes = decode(algorithm, &encoded)?;

        serde_json::from_slice(&bytes).map_err(|e| CompressionError::InvalidEnvelope(e.to_string()))
    }
}

fn encode(
    algorithm: CompressionAlgorithm,
    level: u32,
    bytes: &[u8],
) -> Result<Vec<u8>, CompressionError> {
    match algorithm {
        CompressionAlgorithm::None => Ok(bytes.to_vec()),
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(bytes).map_err(CompressionError::Encode)?;
            encoder.finish().map_err(CompressionError::Encode)
        }
        CompressionAlgorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(bytes).map_err(CompressionError::Encode)?;
            encoder.finish().map_err(CompressionError::Encode)
        }
        CompressionAlgorithm::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER_SIZE,
                    level,
                    BROTLI_WINDOW_BITS,
                );
                writer.write_all(bytes).map_err(CompressionError::Encode)?;
                writer.flush().map_err(CompressionError::Encode)?;
            }
            Ok(out)
        }
    }
}

fn decode(algorithm: CompressionAlgorithm, bytes: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::new();
    match algorithm {
        CompressionAlgorithm::None => out.extend_from_slice(bytes),
        CompressionAlgorithm::Gzip => {
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(CompressionError::Decode)?;
        }
        CompressionAlgorithm::Deflate => {
            DeflateDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(CompressionError::Decode)?;
        }
        CompressionAlgorithm::Brotli => {
            brotli::Decompressor::new(bytes, BROTLI_BUFFER_SIZE)
                .read_to_end(&mut out)
                .map_err(CompressionError::Decode)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn large_message() -> Value {
        let levels: Vec<Value> = (0..100)
            .map(|i| json!({"price": format!("{}.5", 100 + i), "amount": "1.25"}))
            .collect();
        json!({"baseAsset": "BTC", "quoteAsset": "ETH", "bids": levels, "timestamp": 1})
    }

    fn small_message() -> Value {
        json!({"price": "10.0", "amount": "1.0"})
    }

    const ALGORITHMS: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Brotli,
    ];

    #[test]
    fn test_none_passes_through() {
        let compressor = MessageCompressor::default();
        let message = large_message();
        assert_eq!(compressor.compress(&message), message);
    }

    #[test]
    fn test_below_threshold_passes_through() {
        for algorithm in ALGORITHMS {
            let compressor = MessageCompressor::new(algorithm, 1024, 6);
            let message = small_message();
            let out = compressor.compress(&message);
            assert_eq!(out, message);
            assert!(!MessageCompressor::is_compressed(&out));
        }
    }

    #[test]
    fn test_large_message_is_wrapped() {
        for algorithm in ALGORITHMS {
            let compressor = MessageCompressor::new(algorithm, 1024, 6);
            let out = compressor.compress(&large_message());

            assert!(MessageCompressor::is_compressed(&out));
            assert_eq!(out["algorithm"], algorithm.as_str());
            assert!(out["data"].is_string());
        }
    }

    #[test]
    fn test_decompress_restores_original() {
        for algorithm in ALGORITHMS {
            let compressor = MessageCompressor::new(algorithm, 1024, 6);
            for message in [large_message(), small_message()] {
                let restored = compressor.decompress(&compressor.compress(&message));
                assert_eq!(restored, message, "algorithm {algorithm}");
            }
        }
    }

    #[test]
    fn test_decompress_uses_envelope_algorithm() {
        let gzip = MessageCompressor::new(CompressionAlgorithm::Gzip, 0, 6);
        let brotli = MessageCompressor::new(CompressionAlgorithm::Brotli, 0, 6);

        let wrapped = gzip.compress(&large_message());
        assert_eq!(brotli.decompress(&wrapped), large_message());
    }

    #[test]
    fn test_decompress_uncompressed_passes_through() {
        let compressor = MessageCompressor::new(CompressionAlgorithm::Gzip, 0, 6);
        let message = json!({"compressed": false, "value": 1});
        assert_eq!(compressor.decompress(&message), message);
    }

    #[test]
    fn test_decompress_fails_open_on_bad_data() {
        let compressor = MessageCompressor::new(CompressionAlgorithm::Gzip, 0, 6);
        let envelope = json!({"compressed": true, "algorithm": "gzip", "data": "not base64!"});

        assert!(compressor.try_decompress(&envelope).is_err());
        assert_eq!(compressor.decompress(&envelope), envelope);
    }

    #[test]
    fn test_decompress_unknown_algorithm() {
        let compressor = MessageCompressor::default();
        let envelope = json!({"compressed": true, "algorithm": "lz4", "data": ""});

        assert!(matches!(
            compressor.try_decompress(&envelope),
            Err(CompressionError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_level_is_clamped() {
        let compressor = MessageCompressor::new(CompressionAlgorithm::Gzip, 0, 42);
        let restored = compressor.decompress(&compressor.compress(&large_message()));
        assert_eq!(restored, large_message());
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(
            "GZIP".parse::<CompressionAlgorithm>().expect("parse"),
            CompressionAlgorithm::Gzip
        );
        assert_eq!(
            "br".parse::<CompressionAlgorithm>().expect("parse"),
            CompressionAlgorithm::Brotli
        );
        assert!("zstd".parse::<CompressionAlgorithm>().is_err());
    }
}
