//! Operation state machines

use std::fmt;

use tracing::info;

use crate::error::{BackupError, BackupResult};

/// A state of an operation's state machine
pub trait Stage: Copy + Eq + fmt::Debug + Send + 'static {
    /// Where every operation starts, before any work is done
    const INITIAL: Self;
    const FAILED: Self;

    fn name(self) -> &'static str;

    /// The state that follows on success
    fn successor(self) -> Option<Self>;

    fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

/// States of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Pending,
    Resolving,
    Dumping,
    Transforming,
    Storing,
    Finalizing,
    Complete,
    Failed,
}

impl Stage for BackupState {
    const INITIAL: Self = BackupState::Pending;
    const FAILED: Self = BackupState::Failed;

    fn name(self) -> &'static str {
        match self {
            BackupState::Pending => "Pending",
            BackupState::Resolving => "Resolving",
            BackupState::Dumping => "Dumping",
            BackupState::Transforming => "Transforming",
            BackupState::Storing => "Storing",
            BackupState::Finalizing => "Finalizing",
            BackupState::Complete => "Complete",
            BackupState::Failed => "Failed",
        }
    }

    fn successor(self) -> Option<Self> {
        match self {
            BackupState::Pending => Some(BackupState::Resolving),
            BackupState::Resolving => Some(BackupState::Dumping),
            BackupState::Dumping => Some(BackupState::Transforming),
            BackupState::Transforming => Some(BackupState::Storing),
            BackupState::Storing => Some(BackupState::Finalizing),
            BackupState::Finalizing => Some(BackupState::Complete),
            BackupState::Complete | BackupState::Failed => None,
        }
    }
}

/// States of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Pending,
    Fetching,
    Reversing,
    Loading,
    Complete,
    Failed,
}

impl Stage for RestoreState {
    const INITIAL: Self = RestoreState::Pending;
    const FAILED: Self = RestoreState::Failed;

    fn name(self) -> &'static str {
        match self {
            RestoreState::Pending => "Pending",
            RestoreState::Fetching => "Fetching",
            RestoreState::Reversing => "Reversing",
            RestoreState::Loading => "Loading",
            RestoreState::Complete => "Complete",
            RestoreState::Failed => "Failed",
        }
    }

    fn successor(self) -> Option<Self> {
        match self {
            RestoreState::Pending => Some(RestoreState::Fetching),
            RestoreState::Fetching => Some(RestoreState::Reversing),
            RestoreState::Reversing => Some(RestoreState::Loading),
            RestoreState::Loading => Some(RestoreState::Complete),
            RestoreState::Complete | RestoreState::Failed => None,
        }
    }
}

/// Tracks one operation through its states
#[derive(Debug)]
pub struct StateTracker<S: Stage> {
    state: S,
    subject: String,
}

impl<S: Stage> StateTracker<S> {
    pub fn new(initial: S, subject: impl Into<String>) -> Self {
        Self {
            state: initial,
            subject: subject.into(),
        }
    }

    pub fn current(&self) -> S {
        self.state
    }

    /// Move to `next`, which must be the successor or `Failed`
    pub fn advance(&mut self, next: S) -> BackupResult<()> {
        let allowed = if next == S::FAILED {
            !self.state.is_terminal()
        } else {
            self.state.successor() == Some(next)
        };
        if !allowed {
            return Err(BackupError::Precondition(format!(
                "{}: invalid transition {} -> {}",
                self.subject,
                self.state.name(),
                next.name()
            )));
        }
        info!(subject = %self.subject, from = self.state.name(), to = next.name(), "state");
        self.state = next;
        Ok(())
    }

    /// Re-enter an earlier state for another attempt
    pub fn restart(&mut self, state: S) {
        info!(subject = %self.subject, from = self.state.name(), to = state.name(), "retry");
        self.state = state;
    }

    /// Attribute `err` to the current state
    ///
    /// Errors raised before the first transition are precondition checks
    /// and are returned as they are.
    pub fn wrap(&self, err: BackupError) -> BackupError {
        if self.state == S::INITIAL {
            return err;
        }
        err.in_stage(self.state.name())
    }

    /// Record failure, returning the error attributed to the failing state
    pub fn fail(&mut self, err: BackupError) -> BackupError {
        let err = self.wrap(err);
        if !self.state.is_terminal() {
            self.state = S::FAILED;
        }
        err
    }
}
