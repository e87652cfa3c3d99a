//! Streaming AES-256-GCM encryption
//!
//! Artifacts are encrypted as a sequence of independently authenticated frames
//! so that arbitrarily large dumps can be processed without buffering.
//!
//! # Stream Format
//!
//! ```text
//! header  = magic "DBKAEAD1" | memory_kib u32 | iterations u32 | parallelism u32
//!           | salt [16] | nonce_prefix [7]
//! frame   = last u8 | len u32 | ciphertext [len]
//! nonce   = nonce_prefix | counter u32 | last u8
//! ```
//!
//! Every frame carries the full header as associated data. Plaintext frames are
//! 64 KiB except the final one, which is always present (possibly empty) and is
//! the only frame with `last = 1`. Integers are big-endian. Truncation,
//! reordering, trailing bytes and tag mismatches all fail authentication.

use std::io::{self, Read};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::Zeroize;

use super::pipe::StreamFault;
use super::spec::KdfParams;
use crate::credentials::SecureString;
use crate::error::{BackupError, BackupResult};

/// Plaintext bytes per frame
pub const CHUNK_SIZE: usize = 64 * 1024;

const MAGIC: &[u8; 8] = b"DBKAEAD1";
const SALT_LEN: usize = 16;
const PREFIX_LEN: usize = 7;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 12 + SALT_LEN + PREFIX_LEN;

// Upper bounds accepted from an artifact header
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 64;

/// A derived 32-byte stream key
struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive a key from a passphrase with Argon2id
fn derive_key(passphrase: &str, kdf: &KdfParams, salt: &[u8]) -> BackupResult<DerivedKey> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| BackupError::TransformFailed(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| BackupError::TransformFailed(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedKey { key })
}

fn frame_nonce(prefix: &[u8; PREFIX_LEN], counter: u32, last: bool) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..PREFIX_LEN].copy_from_slice(prefix);
    nonce[PREFIX_LEN..PREFIX_LEN + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = last as u8;
    nonce
}

fn encode_header(kdf: &KdfParams, salt: &[u8; SALT_LEN], prefix: &[u8; PREFIX_LEN]) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&kdf.memory_kib.to_be_bytes());
    header.extend_from_slice(&kdf.iterations.to_be_bytes());
    header.extend_from_slice(&kdf.parallelism.to_be_bytes());
    header.extend_from_slice(salt);
    header.extend_from_slice(prefix);
    header
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

fn decryption_error(message: impl Into<String>) -> io::Error {
    StreamFault::Decryption(message.into()).into_io()
}

/// Read exactly `buf.len()` bytes, reporting a short stream as truncation
fn read_exact_or_truncated<R: Read>(inner: &mut R, buf: &mut [u8], what: &str) -> io::Result<()> {
    inner.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            decryption_error(format!("stream truncated in {}", what))
        } else {
            e
        }
    })
}

/// Reader adapter producing the encrypted stream of its inner reader
pub struct EncryptReader<R> {
    inner: R,
    cipher: Aes256Gcm,
    header: Vec<u8>,
    nonce_prefix: [u8; PREFIX_LEN],
    counter: u32,
    plain: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    started: bool,
    finished: bool,
}

impl<R: Read> EncryptReader<R> {
    /// Derive a fresh key (random salt) and start a new stream
    pub fn new(inner: R, passphrase: &SecureString, kdf: KdfParams) -> BackupResult<Self> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_prefix = [0u8; PREFIX_LEN];
        OsRng.fill_bytes(&mut nonce_prefix);

        let key = derive_key(passphrase.as_str(), &kdf, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| BackupError::TransformFailed(format!("Failed to create cipher: {}", e)))?;

        Ok(Self {
            inner,
            cipher,
            header: encode_header(&kdf, &salt, &nonce_prefix),
            nonce_prefix,
            counter: 0,
            plain: Vec::with_capacity(CHUNK_SIZE),
            out: Vec::new(),
            pos: 0,
            started: false,
            finished: false,
        })
    }

    fn next_frame(&mut self) -> io::Result<()> {
        self.out.clear();
        self.pos = 0;
        if !self.started {
            self.out.extend_from_slice(&self.header);
            self.started = true;
        }

        self.plain.clear();
        let n = (&mut self.inner)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut self.plain)?;
        let last = n < CHUNK_SIZE;

        let nonce = frame_nonce(&self.nonce_prefix, self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &self.plain,
                    aad: &self.header,
                },
            )
            .map_err(|_| StreamFault::Corrupt("encryption failed".into()).into_io())?;
        self.plain.zeroize();

        self.out.push(last as u8);
        self.out
            .extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        self.out.extend_from_slice(&ciphertext);

        if last {
            self.finished = true;
        } else {
            self.counter = self.counter.checked_add(1).ok_or_else(|| {
                StreamFault::Corrupt("stream exceeds maximum frame count".into()).into_io()
            })?;
        }
        Ok(())
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.out.len() {
            if self.finished {
                return Ok(0);
            }
            self.next_frame()?;
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct DecryptState {
    cipher: Aes256Gcm,
    header: Vec<u8>,
    nonce_prefix: [u8; PREFIX_LEN],
}

/// Reader adapter authenticating and decrypting an encrypted stream
///
/// Only authenticated plaintext is ever returned; any failure surfaces as an
/// I/O error carrying [`StreamFault::Decryption`].
pub struct DecryptReader<R> {
    inner: R,
    passphrase: SecureString,
    state: Option<DecryptState>,
    counter: u32,
    out: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, passphrase: SecureString) -> Self {
        Self {
            inner,
            passphrase,
            state: None,
            counter: 0,
            out: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    fn read_header(&mut self) -> io::Result<DecryptState> {
        let mut header = vec![0u8; HEADER_LEN];
        read_exact_or_truncated(&mut self.inner, &mut header, "header")?;

        if &header[..MAGIC.len()] != MAGIC {
            return Err(decryption_error("not an encrypted artifact (bad magic)"));
        }
        let mut offset = MAGIC.len();
        let kdf = KdfParams {
            memory_kib: read_u32(&header[offset..]),
            iterations: read_u32(&header[offset + 4..]),
            parallelism: read_u32(&header[offset + 8..]),
        };
        offset += 12;
        if kdf.memory_kib > MAX_MEMORY_KIB
            || kdf.iterations > MAX_ITERATIONS
            || kdf.parallelism > MAX_PARALLELISM
        {
            return Err(decryption_error("key derivation parameters out of range"));
        }
        let salt = header[offset..offset + SALT_LEN].to_vec();
        offset += SALT_LEN;
        let mut nonce_prefix = [0u8; PREFIX_LEN];
        nonce_prefix.copy_from_slice(&header[offset..offset + PREFIX_LEN]);

        let key = derive_key(self.passphrase.as_str(), &kdf, &salt)
            .map_err(|e| decryption_error(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| decryption_error(format!("failed to create cipher: {}", e)))?;

        Ok(DecryptState {
            cipher,
            header,
            nonce_prefix,
        })
    }

    fn next_frame(&mut self) -> io::Result<()> {
        if self.state.is_none() {
            let state = self.read_header()?;
            self.state = Some(state);
        }

        let mut frame_head = [0u8; 5];
        read_exact_or_truncated(&mut self.inner, &mut frame_head, "frame header")?;
        let last = match frame_head[0] {
            0 => false,
            1 => true,
            _ => return Err(decryption_error("invalid frame marker")),
        };
        let len = read_u32(&frame_head[1..]) as usize;
        if !(TAG_LEN..=CHUNK_SIZE + TAG_LEN).contains(&len) {
            return Err(decryption_error("invalid frame length"));
        }

        let mut ciphertext = vec![0u8; len];
        read_exact_or_truncated(&mut self.inner, &mut ciphertext, "frame body")?;

        let Some(state) = self.state.as_ref() else {
            return Err(decryption_error("missing stream header"));
        };
        let nonce = frame_nonce(&state.nonce_prefix, self.counter, last);
        let plaintext = state
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &state.header,
                },
            )
            .map_err(|_| decryption_error("authentication failed: wrong key or tampered data"))?;

        if !last && plaintext.len() != CHUNK_SIZE {
            return Err(decryption_error("short intermediate frame"));
        }

        if last {
            let mut probe = [0u8; 1];
            if self.inner.read(&mut probe)? != 0 {
                return Err(decryption_error("unexpected data after final frame"));
            }
            self.finished = true;
        } else {
            self.counter = self
                .counter
                .checked_add(1)
                .ok_or_else(|| decryption_error("too many frames"))?;
        }

        self.out.zeroize();
        self.out = plaintext;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.out.len() {
            if self.finished {
                return Ok(0);
            }
            self.next_frame()?;
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fast_kdf() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn encrypt(data: &[u8], passphrase: &str) -> Vec<u8> {
        let mut reader =
            EncryptReader::new(Cursor::new(data.to_vec()), &passphrase.into(), fast_kdf()).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    fn decrypt(data: &[u8], passphrase: &str) -> io::Result<Vec<u8>> {
        let mut reader = DecryptReader::new(Cursor::new(data.to_vec()), passphrase.into());
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    fn is_decryption_fault(err: &io::Error) -> bool {
        matches!(StreamFault::from_io(err), Some(StreamFault::Decryption(_)))
    }

    #[test]
    fn test_encrypt_decrypt() {
        let plaintext = b"Hello, World!";
        let encrypted = encrypt(plaintext, "pass");
        assert_eq!(decrypt(&encrypted, "pass").unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let encrypted = encrypt(b"", "pass");
        assert_eq!(encrypted.len(), HEADER_LEN + 5 + TAG_LEN);
        assert!(decrypt(&encrypted, "pass").unwrap().is_empty());
    }

    #[test]
    fn test_multi_frame_plaintext() {
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        let encrypted = encrypt(&plaintext, "pass");
        assert_eq!(decrypt(&encrypted, "pass").unwrap(), plaintext);

        let exact: Vec<u8> = vec![7u8; CHUNK_SIZE];
        assert_eq!(decrypt(&encrypt(&exact, "pass"), "pass").unwrap(), exact);
    }

    #[test]
    fn test_different_salts_and_nonces() {
        let a = encrypt(b"same", "pass");
        let b = encrypt(b"same", "pass");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(b"Hello, World!", "right");
        let err = decrypt(&encrypted, "wrong").unwrap_err();
        assert!(is_decryption_fault(&err));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut encrypted = encrypt(b"Hello, World!", "pass");
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;
        assert!(is_decryption_fault(&decrypt(&encrypted, "pass").unwrap_err()));
    }

    #[test]
    fn test_tampered_header_fails() {
        let mut encrypted = encrypt(b"Hello, World!", "pass");
        encrypted[HEADER_LEN - 1] ^= 0x01;
        assert!(decrypt(&encrypted, "pass").is_err());
    }

    #[test]
    fn test_truncated_stream_fails() {
        let plaintext: Vec<u8> = vec![1u8; CHUNK_SIZE + 10];
        let encrypted = encrypt(&plaintext, "pass");
        // Drop the final frame entirely
        let first_frame_end = HEADER_LEN + 5 + CHUNK_SIZE + TAG_LEN;
        let err = decrypt(&encrypted[..first_frame_end], "pass").unwrap_err();
        assert!(is_decryption_fault(&err));
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut encrypted = encrypt(b"data", "pass");
        encrypted.push(0);
        assert!(is_decryption_fault(&decrypt(&encrypted, "pass").unwrap_err()));
    }

    #[test]
    fn test_bad_magic_fails() {
        let err = decrypt(&[0u8; HEADER_LEN + 32], "pass").unwrap_err();
        assert!(is_decryption_fault(&err));
    }
}
