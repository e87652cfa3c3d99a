//! Transform chain for backup artifacts
//!
//! A backup's dump stream passes through an ordered list of stages
//! (compression, encryption) on the way to storage; restore applies the exact
//! reverse list. Every stage is a streaming `Read` adapter, so no stage ever
//! holds more than a frame of the dump in memory.
//!
//! # Example
//!
//! ```rust,ignore
//! use dbbackup::transform::TransformChain;
//!
//! let chain = TransformChain::prepare(&record.pipeline, &resolver)?;
//! let artifact = chain.apply(dump_stream)?;   // dump -> compress -> encrypt
//! let plain = chain.reverse(artifact_stream); // decrypt -> decompress
//! ```

pub mod compression;
pub mod encryption;
pub mod pipe;
pub mod spec;

use std::io::{Cursor, Read};

use crate::credentials::{CredentialResolver, SecureString};
use crate::error::{BackupError, BackupResult};

pub use encryption::{DecryptReader, EncryptReader};
pub use pipe::{bounded, classify, CancelToken, CancellableReader, StreamFault};
pub use spec::{
    validate_stages, CompressionAlgorithm, CompressionLevel, EncryptionAlgorithm, KdfParams,
    StageKind, StageSpec,
};

/// A lazy, sequential, finite byte stream
pub type ByteStream = Box<dyn Read + Send>;

/// A stage with its secrets resolved
#[derive(Debug)]
enum PreparedStage {
    Compress {
        algorithm: CompressionAlgorithm,
        level: CompressionLevel,
    },
    Encrypt {
        passphrase: SecureString,
        kdf: KdfParams,
    },
}

/// An ordered stage list ready to run in either direction
#[derive(Debug)]
pub struct TransformChain {
    stages: Vec<PreparedStage>,
}

impl TransformChain {
    /// Resolve the key of every encryption stage through the resolver
    pub fn prepare(stages: &[StageSpec], resolver: &CredentialResolver) -> BackupResult<Self> {
        Self::prepare_with(stages, |spec| resolver.resolve(spec))
    }

    /// Like [`prepare`](Self::prepare) with an explicit key lookup
    pub fn prepare_with<F>(stages: &[StageSpec], mut lookup: F) -> BackupResult<Self>
    where
        F: FnMut(&crate::credentials::CredentialSpec) -> BackupResult<SecureString>,
    {
        validate_stages(stages)?;
        let stages = stages
            .iter()
            .map(|stage| {
                Ok(match stage {
                    StageSpec::Compress { algorithm, level } => PreparedStage::Compress {
                        algorithm: *algorithm,
                        level: *level,
                    },
                    StageSpec::Encrypt { key, kdf, .. } => PreparedStage::Encrypt {
                        passphrase: lookup(key)?,
                        kdf: *kdf,
                    },
                })
            })
            .collect::<BackupResult<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Apply the stages in declared order
    pub fn apply(&self, input: ByteStream) -> BackupResult<ByteStream> {
        let mut stream = input;
        for stage in &self.stages {
            stream = match stage {
                PreparedStage::Compress { algorithm, level } => {
                    compression::encoder(stream, *algorithm, *level)
                }
                PreparedStage::Encrypt { passphrase, kdf } => {
                    Box::new(EncryptReader::new(stream, passphrase, *kdf)?)
                }
            };
        }
        Ok(stream)
    }

    /// Undo the stages in exact reverse order
    pub fn reverse(&self, input: ByteStream) -> ByteStream {
        let mut stream = input;
        for stage in self.stages.iter().rev() {
            stream = match stage {
                PreparedStage::Compress { algorithm, .. } => compression::decoder(stream, *algorithm),
                PreparedStage::Encrypt { passphrase, .. } => {
                    Box::new(DecryptReader::new(stream, passphrase.clone()))
                }
            };
        }
        stream
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    /// Apply to an in-memory buffer
    pub fn apply_bytes(&self, data: &[u8]) -> BackupResult<Vec<u8>> {
        let mut out = Vec::new();
        self.apply(Box::new(Cursor::new(data.to_vec())))?
            .read_to_end(&mut out)
            .map_err(|e| classify(e, |e| BackupError::TransformFailed(e.to_string())))?;
        Ok(out)
    }

    /// Reverse an in-memory buffer
    ///
    /// Either the complete original bytes are returned or an error; never a
    /// prefix.
    pub fn reverse_bytes(&self, data: &[u8]) -> BackupResult<Vec<u8>> {
        let mut out = Vec::new();
        match self
            .reverse(Box::new(Cursor::new(data.to_vec())))
            .read_to_end(&mut out)
        {
            Ok(_) => Ok(out),
            Err(e) => {
                zeroize::Zeroize::zeroize(&mut out);
                Err(classify(e, |e| BackupError::TransformFailed(e.to_string())))
            }
        }
    }
}
