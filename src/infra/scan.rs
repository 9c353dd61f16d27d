use crate::domain::{SessionDescriptor, SessionSource};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanWarningCount(usize);

impl From<usize> for ScanWarningCount {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl ScanWarningCount {
    pub fn get(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanOutput {
    pub sessions: Vec<SessionDescriptor>,
    pub warnings: ScanWarningCount,
}

impl ScanOutput {
    /// Most recent `updated_at` in this batch.
    pub fn latest_update(&self) -> Option<SystemTime> {
        self.sessions.iter().map(|session| session.updated_at).max()
    }
}

/// A whole-source failure. Unreadable individual records are counted in
/// [`ScanOutput::warnings`] instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{} unavailable: {reason}", origin.label())]
    SourceUnavailable {
        origin: SessionSource,
        reason: String,
    },

    #[error("OpenCode store is corrupt: {reason}")]
    CorruptStore { reason: String },
}

impl ScanError {
    pub fn unavailable(origin: SessionSource, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            origin,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ResolveDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

/// One physical origin of sessions. Implementations hold only their location and are safe to
/// call from any thread; a call never retries.
pub trait SourceReader: Send + Sync {
    fn source(&self) -> SessionSource;

    fn scan(&self) -> Result<ScanOutput, ScanError>;
}

/// A source that can be polled cheaply for rows changed after `cursor`.
pub trait StoreReader: SourceReader {
    /// `None` rescans everything.
    fn scan_since(&self, cursor: Option<SystemTime>) -> Result<ScanOutput, ScanError>;
}
