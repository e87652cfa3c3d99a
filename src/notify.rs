//! Outcome notifications
//!
//! The orchestrator reports every backup and restore outcome to a
//! [`Notifier`]. Delivery happens on a detached thread and the caller waits at
//! most the configured timeout; a slow or failing transport never changes the
//! outcome of the operation.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::BackupResult;
use crate::models::BackupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Backup,
    Restore,
    Verify,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
            OperationKind::Verify => write!(f, "verify"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Structured outcome handed to the transport
#[derive(Debug, Clone, Serialize)]
pub struct OutcomePayload {
    pub operation: OperationKind,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<BackupId>,
    pub status: OutcomeStatus,
    /// Stage a failure occurred in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Notification transport
pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &OutcomePayload) -> BackupResult<()>;
}

/// Writes outcomes to the tracing output
///
/// Stands in for the webhook transport, which lives outside this crate.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    webhook_url: Option<String>,
}

impl LogNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self { webhook_url }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, payload: &OutcomePayload) -> BackupResult<()> {
        let body = serde_json::to_string(payload)?;
        info!(
            webhook = self.webhook_url.as_deref().unwrap_or("-"),
            payload = %body,
            "notification"
        );
        Ok(())
    }
}

/// How a delivery attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Failed(String),
    TimedOut,
}

/// Deliver `payload` on a detached thread, waiting at most `timeout`
pub fn deliver(notifier: Arc<dyn Notifier>, payload: OutcomePayload, timeout: Duration) -> Delivery {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("dbb-notify".into())
        .spawn(move || {
            let _ = tx.send(notifier.notify(&payload).map_err(|e| e.to_string()));
        });
    if let Err(e) = spawned {
        warn!(error = %e, "could not start notification thread");
        return Delivery::Failed(e.to_string());
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Delivery::Delivered,
        Ok(Err(message)) => {
            warn!(error = %message, "notification failed");
            Delivery::Failed(message)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "notification timed out");
            Delivery::TimedOut
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Delivery::Failed("notifier thread exited without reporting".into())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BackupError;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Collects payloads for assertions
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) payloads: Mutex<Vec<OutcomePayload>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, payload: &OutcomePayload) -> BackupResult<()> {
            self.payloads
                .lock()
                .unwrap()
                .push(payload.clone());
            Ok(())
        }
    }

    struct SlowNotifier;

    impl Notifier for SlowNotifier {
        fn notify(&self, _payload: &OutcomePayload) -> BackupResult<()> {
            thread::sleep(Duration::from_secs(5));
            Ok(())
        }
    }

    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn notify(&self, _payload: &OutcomePayload) -> BackupResult<()> {
            Err(BackupError::Io("webhook returned 500".into()))
        }
    }

    fn payload() -> OutcomePayload {
        OutcomePayload {
            operation: OperationKind::Backup,
            target: "orders".into(),
            backup_id: None,
            status: OutcomeStatus::Success,
            stage: None,
            message: None,
            size_bytes: Some(10),
            duration_ms: 5,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_delivered() {
        let notifier = Arc::new(RecordingNotifier::default());
        let outcome = deliver(notifier.clone(), payload(), Duration::from_secs(5));
        assert_eq!(outcome, Delivery::Delivered);
        assert_eq!(notifier.payloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_slow_notifier_does_not_block() {
        let start = Instant::now();
        let outcome = deliver(Arc::new(SlowNotifier), payload(), Duration::from_millis(50));
        assert_eq!(outcome, Delivery::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_failure_is_reported() {
        let outcome = deliver(Arc::new(BrokenNotifier), payload(), Duration::from_secs(5));
        assert!(matches!(outcome, Delivery::Failed(m) if m.contains("500")));
    }

    #[test]
    fn test_log_notifier_accepts_payload() {
        assert!(LogNotifier::new(None).notify(&payload()).is_ok());
    }

    #[test]
    fn test_payload_json_shape() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["operation"], "backup");
        assert_eq!(json["status"], "success");
        assert!(json.get("stage").is_none());
    }
}
