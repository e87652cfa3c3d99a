//! Streaming compression stages backed by flate2

use std::io::Read;

use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use super::spec::{CompressionAlgorithm, CompressionLevel};
use super::ByteStream;

/// Wrap `input` so reads yield compressed bytes
pub fn encoder(
    input: ByteStream,
    algorithm: CompressionAlgorithm,
    level: CompressionLevel,
) -> ByteStream {
    let level = Compression::new(level.native(algorithm));
    match algorithm {
        CompressionAlgorithm::Gzip => Box::new(GzEncoder::new(input, level)),
        CompressionAlgorithm::Zlib => Box::new(ZlibEncoder::new(input, level)),
        CompressionAlgorithm::Deflate => Box::new(DeflateEncoder::new(input, level)),
    }
}

/// Wrap `input` so reads yield decompressed bytes
pub fn decoder(input: ByteStream, algorithm: CompressionAlgorithm) -> ByteStream {
    match algorithm {
        CompressionAlgorithm::Gzip => Box::new(GzDecoder::new(input)),
        CompressionAlgorithm::Zlib => Box::new(ZlibDecoder::new(input)),
        CompressionAlgorithm::Deflate => Box::new(DeflateDecoder::new(input)),
    }
}

/// Compress an in-memory buffer
pub fn compress_bytes(
    data: &[u8],
    algorithm: CompressionAlgorithm,
    level: CompressionLevel,
) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    encoder(Box::new(std::io::Cursor::new(data.to_vec())), algorithm, level).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(data: &[u8], algorithm: CompressionAlgorithm, level: CompressionLevel) -> Vec<u8> {
        let compressed = compress_bytes(data, algorithm, level).unwrap();
        let mut out = Vec::new();
        decoder(Box::new(Cursor::new(compressed)), algorithm)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_all_algorithms_roundtrip() {
        let data: Vec<u8> = b"INSERT INTO orders VALUES (1, 'widget');\n".repeat(500);
        for algorithm in [
            CompressionAlgorithm::Gzip,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Deflate,
        ] {
            for level in [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High] {
                assert_eq!(roundtrip(&data, algorithm, level), data);
            }
        }
    }

    #[test]
    fn test_compression_shrinks_repetitive_dump() {
        let data: Vec<u8> = b"INSERT INTO t VALUES (1);\n".repeat(1000);
        let compressed = compress_bytes(&data, CompressionAlgorithm::Gzip, CompressionLevel::High).unwrap();
        assert!(compressed.len() < data.len() / 10);
    }

    #[test]
    fn test_gzip_output_has_magic() {
        let compressed = compress_bytes(b"x", CompressionAlgorithm::Gzip, CompressionLevel::Low).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_corrupt_input_errors() {
        let mut out = Vec::new();
        let result = decoder(
            Box::new(Cursor::new(b"definitely not gzip".to_vec())),
            CompressionAlgorithm::Gzip,
        )
        .read_to_end(&mut out);
        assert!(result.is_err());
    }
}
