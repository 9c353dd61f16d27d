use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Where a session was discovered.
///
/// The declaration order doubles as the tie-break order when two sessions share the same
/// `updated_at`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SessionSource {
    Store,
    PrimaryTree,
    SecondaryTree,
}

impl SessionSource {
    pub const ALL: [SessionSource; 3] = [Self::Store, Self::PrimaryTree, Self::SecondaryTree];

    pub fn label(self) -> &'static str {
        match self {
            Self::Store => "OpenCode",
            Self::PrimaryTree => "Claude",
            Self::SecondaryTree => "Codex",
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Store => "oc",
            Self::PrimaryTree => "cl",
            Self::SecondaryTree => "cx",
        }
    }
}

/// Enough information to reload a session's full transcript later.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SessionLocator {
    File { path: PathBuf },
    StoreRow { db_path: PathBuf, session_id: String },
}

impl SessionLocator {
    pub fn display(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::StoreRow {
                db_path,
                session_id,
            } => format!("{}#{session_id}", db_path.display()),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SummaryFields {
    pub title: Option<String>,
    pub project: Option<PathBuf>,
    pub turn_count: Option<u32>,
    pub duration: Option<Duration>,
    pub size_bytes: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionDescriptor {
    pub id: String,
    pub source: SessionSource,
    pub updated_at: SystemTime,
    pub locator: SessionLocator,
    pub summary: SummaryFields,
}

impl SessionDescriptor {
    /// Display title with control characters stripped. Falls back to a placeholder so that one
    /// malformed session never breaks the list.
    pub fn display_title(&self) -> String {
        self.summary
            .title
            .as_deref()
            .and_then(super::sanitize_title)
            .unwrap_or_else(|| "(untitled)".to_string())
    }

    pub fn project_name(&self) -> Option<String> {
        let project = self.summary.project.as_ref()?;
        project
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .or_else(|| Some(project.display().to_string()))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceNotice {
    pub source: SessionSource,
    pub message: String,
}
