//! Upload state machine
//!
//! Pure transition logic: [`UploadContext::step`] consumes one
//! [`TransferEvent`] and returns the [`Action`] the orchestrator must carry
//! out. No I/O happens here, which keeps the retry and progress rules
//! testable without a storage client.

use crate::storage::{TransferEvent, TransferState};
use tracing::debug;

/// Where a single upload request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing submitted yet
    Idle,
    /// Handed to the storage client, no bytes reported
    Submitted,
    /// Progress updates are arriving
    Progressing,
    /// Failed with retry budget left; waiting for the resume to go out
    RetryPending,
    /// Object stored
    Completed,
    /// Transfer canceled by the client
    Canceled,
    /// Failed with the retry budget exhausted
    FailedTerminal,
    /// Transport error reported
    Errored,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed
                | UploadState::Canceled
                | UploadState::FailedTerminal
                | UploadState::Errored
        )
    }
}

/// What the orchestrator must do in response to an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Forward clamped byte counts to the listener
    ReportProgress { current: u64, total: u64 },
    /// Ask the client to resume the transfer; `attempt` counts from 1
    Resume { attempt: u32 },
    /// Report success
    Complete,
    /// Report the canceled state
    Cancel,
    /// Report the failed state
    Fail,
    /// Report a transport error
    Error(String),
    /// Nothing to do
    Ignore,
}

/// Per-request bookkeeping, created fresh for every upload
#[derive(Debug, Clone)]
pub struct UploadContext {
    state: UploadState,
    resumes: u32,
    max_resumes: u32,
    reported: u64,
}

impl UploadContext {
    /// Context allowing `max_resumes` resumptions after the first failure
    pub fn new(max_resumes: u32) -> Self {
        Self {
            state: UploadState::Idle,
            resumes: 0,
            max_resumes,
            reported: 0,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Resumptions issued so far
    pub fn resumes(&self) -> u32 {
        self.resumes
    }

    /// Highest byte count reported to the listener
    pub fn reported_bytes(&self) -> u64 {
        self.reported
    }

    /// The put call returned a handle
    pub fn submitted(&mut self) {
        if self.state == UploadState::Idle {
            self.state = UploadState::Submitted;
        }
    }

    /// The resume call returned a fresh handle
    pub fn resumed(&mut self) {
        if self.state == UploadState::RetryPending {
            self.state = UploadState::Submitted;
        }
    }

    /// Advance on one transfer event
    pub fn step(&mut self, event: &TransferEvent) -> Action {
        if self.state.is_terminal() {
            debug!(state = ?self.state, ?event, "Ignoring event after terminal state");
            return Action::Ignore;
        }

        match event {
            TransferEvent::Progress { current, total } => self.progress(*current, *total),
            TransferEvent::StateChanged(state) => self.transition(*state),
            TransferEvent::Error(message) => {
                self.state = UploadState::Errored;
                Action::Error(message.clone())
            }
        }
    }

    fn progress(&mut self, current: u64, total: u64) -> Action {
        if self.state == UploadState::RetryPending {
            return Action::Ignore;
        }

        // Resumed transfers restart their count; never report a step back
        let clamped = current.max(self.reported).min(total);
        if clamped < self.reported {
            return Action::Ignore;
        }

        self.reported = clamped;
        self.state = UploadState::Progressing;
        Action::ReportProgress {
            current: clamped,
            total,
        }
    }

    fn transition(&mut self, state: TransferState) -> Action {
        match state {
            TransferState::Completed => {
                self.state = UploadState::Completed;
                Action::Complete
            }
            TransferState::Canceled => {
                self.state = UploadState::Canceled;
                Action::Cancel
            }
            TransferState::Failed if self.state == UploadState::RetryPending => Action::Ignore,
            TransferState::Failed if self.resumes < self.max_resumes => {
                self.resumes += 1;
                self.state = UploadState::RetryPending;
                Action::Resume {
                    attempt: self.resumes,
                }
            }
            TransferState::Failed => {
                self.state = UploadState::FailedTerminal;
                Action::Fail
            }
            TransferState::Waiting | TransferState::InProgress | TransferState::Unknown => {
                Action::Ignore
            }
        }
    }
}
