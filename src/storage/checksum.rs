//! SHA-256 artifact checksums

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{BackupError, BackupResult};

/// Hash a stream, returning the lowercase hex digest and the byte count
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((to_hex(&hasher.finalize()), total))
}

/// Hash a stored artifact
pub fn checksum_file(path: &Path) -> BackupResult<(String, u64)> {
    let file = File::open(path)
        .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    sha256_reader(BufReader::new(file))
        .map_err(|e| BackupError::Io(format!("Failed to read {}: {}", path.display(), e)))
}

pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_known_digests() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_slice() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 13) as u8).collect();
        let (digest, len) = sha256_reader(Cursor::new(&data)).unwrap();
        assert_eq!(digest, sha256_hex(&data));
        assert_eq!(len, data.len() as u64);
    }

    #[test]
    fn test_checksum_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.dbk");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(checksum_file(&path).unwrap(), (EMPTY_SHA256.to_string(), 0));
        assert!(checksum_file(&temp_dir.path().join("missing")).is_err());
    }
}
