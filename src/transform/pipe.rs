//! Bounded pipes, cancellation and stream faults
//!
//! Pipeline stages are `Read` adapters. A [`bounded`] pipe moves the reads of
//! one side onto its own thread and hands chunks across a bounded channel,
//! so a slow consumer applies backpressure to the producer and a fast producer
//! never buffers more than `capacity` chunks.

use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use super::ByteStream;
use crate::error::BackupError;

/// Bytes moved per pipe message
pub const PIPE_CHUNK: usize = 64 * 1024;

/// Typed causes carried inside `io::Error` through `Read` chains
#[derive(Debug, Error)]
pub enum StreamFault {
    #[error("{0}")]
    Decryption(String),
    #[error("{0}")]
    Corrupt(String),
    #[error("{0}")]
    Cancelled(String),
    #[error("{message}")]
    Dump { message: String, transient: bool },
}

impl StreamFault {
    pub fn into_io(self) -> io::Error {
        // Interrupted would be retried by read_to_end
        let kind = match self {
            StreamFault::Cancelled(_) => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, self)
    }

    /// Recover the fault from an I/O error, if it carries one
    pub fn from_io(err: &io::Error) -> Option<&StreamFault> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StreamFault>())
    }
}

/// Map a stream error to the taxonomy, using `fallback` for plain I/O errors
pub fn classify(err: io::Error, fallback: impl FnOnce(io::Error) -> BackupError) -> BackupError {
    match StreamFault::from_io(&err) {
        Some(StreamFault::Decryption(m)) => BackupError::DecryptionFailed(m.clone()),
        Some(StreamFault::Corrupt(m)) => BackupError::TransformFailed(m.clone()),
        Some(StreamFault::Cancelled(m)) => BackupError::Cancelled(m.clone()),
        Some(StreamFault::Dump { message, transient }) => BackupError::DumpFailed {
            message: message.clone(),
            transient: *transient,
        },
        None => fallback(err),
    }
}

/// Shared cancellation flag with an optional deadline
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<&'static str> {
        if self.flag.load(Ordering::SeqCst) {
            Some("aborted")
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some("timed out")
        } else {
            None
        }
    }

    /// Fail with a cancellation fault if the token has fired
    pub fn check(&self) -> io::Result<()> {
        match self.reason() {
            Some(reason) => Err(StreamFault::Cancelled(reason.to_string()).into_io()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.flag.load(Ordering::SeqCst))
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Reader that checks a cancel token before every read
pub struct CancellableReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R: Read> CancellableReader<R> {
    pub fn new(inner: R, token: CancelToken) -> Self {
        Self { inner, token }
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.token.check()?;
        self.inner.read(buf)
    }
}

enum Message {
    Data(Vec<u8>),
    End,
    Failed(io::Error),
}

/// Run `input` on a producer thread behind a channel of `capacity` chunks
pub fn bounded(input: ByteStream, capacity: usize, token: CancelToken) -> ByteStream {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let producer_token = token.clone();
    let spawned = thread::Builder::new()
        .name("dbb-pipe".into())
        .spawn(move || produce(input, tx, producer_token));

    match spawned {
        Ok(_) => Box::new(PipeReader {
            rx,
            token,
            current: Vec::new(),
            pos: 0,
            done: false,
        }),
        Err(e) => Box::new(FailedReader(Some(e))),
    }
}

fn produce(mut input: ByteStream, tx: SyncSender<Message>, token: CancelToken) {
    loop {
        if let Err(e) = token.check() {
            let _ = tx.send(Message::Failed(e));
            return;
        }
        let mut chunk = Vec::with_capacity(PIPE_CHUNK);
        match (&mut input).take(PIPE_CHUNK as u64).read_to_end(&mut chunk) {
            Ok(0) => {
                let _ = tx.send(Message::End);
                return;
            }
            Ok(_) => {
                if tx.send(Message::Data(chunk)).is_err() {
                    debug!("pipe consumer went away, stopping producer");
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Message::Failed(e));
                return;
            }
        }
    }
}

struct PipeReader {
    rx: Receiver<Message>,
    token: CancelToken,
    current: Vec<u8>,
    pos: usize,
    done: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.current.len() {
            if self.done {
                return Ok(0);
            }
            self.token.check()?;
            match self.rx.recv() {
                Ok(Message::Data(chunk)) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Ok(Message::End) => self.done = true,
                Ok(Message::Failed(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(_) => {
                    self.done = true;
                    return Err(StreamFault::Corrupt("pipe producer terminated unexpectedly".into())
                        .into_io());
                }
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct FailedReader(Option<io::Error>);

impl Read for FailedReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(self
            .0
            .take()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "pipe unavailable")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(StreamFault::Dump {
                message: "connection reset".into(),
                transient: true,
            }
            .into_io())
        }
    }

    #[test]
    fn test_bounded_pipe_passes_bytes_through() {
        let data: Vec<u8> = (0..PIPE_CHUNK * 3 + 5).map(|i| (i % 256) as u8).collect();
        let mut reader = bounded(Box::new(Cursor::new(data.clone())), 2, CancelToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_bounded_pipe_empty_input() {
        let mut reader = bounded(Box::new(Cursor::new(Vec::new())), 1, CancelToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_producer_error_is_forwarded_with_fault() {
        let mut reader = bounded(Box::new(FailingReader), 1, CancelToken::new());
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        let mapped = classify(err, |e| BackupError::Io(e.to_string()));
        assert!(matches!(mapped, BackupError::DumpFailed { transient: true, .. }));
    }

    #[test]
    fn test_cancelled_token_stops_reads() {
        let token = CancelToken::new();
        token.cancel();
        let mut reader = CancellableReader::new(Cursor::new(vec![1u8; 10]), token);
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        let mapped = classify(err, |e| BackupError::Io(e.to_string()));
        assert!(matches!(mapped, BackupError::Cancelled(_)));
    }

    #[test]
    fn test_timeout_fires() {
        let token = CancelToken::with_timeout(Duration::from_millis(0));
        assert_eq!(token.reason(), Some("timed out"));
    }

    #[test]
    fn test_plain_errors_use_fallback() {
        let err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let mapped = classify(err, |e| BackupError::StorageWriteFailed(e.to_string()));
        assert!(matches!(mapped, BackupError::StorageWriteFailed(_)));
    }
}
