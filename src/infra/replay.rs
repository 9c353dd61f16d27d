use crate::domain::{SessionLocator, SessionTimeline, parse_codex_log_value};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

pub const MAX_TIMELINE_ITEMS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to open session file: {0}")]
    OpenFile(#[from] io::Error),

    #[error("OpenCode store not found: {0}")]
    StoreMissing(String),

    #[error("OpenCode session not found: {0}")]
    SessionNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Loads a full transcript for a locator. Called off the render thread.
pub trait ReplayDriver: Send + Sync {
    fn load(&self, locator: &SessionLocator) -> Result<SessionTimeline, ReplayError>;
}

/// Reads transcripts from the same files and database the scanners discovered them in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TranscriptLoader;

impl ReplayDriver for TranscriptLoader {
    fn load(&self, locator: &SessionLocator) -> Result<SessionTimeline, ReplayError> {
        match locator {
            SessionLocator::File { path } => load_session_file(path),
            SessionLocator::StoreRow {
                db_path,
                session_id,
            } => super::opencode::load_opencode_session_timeline(db_path, session_id),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LogFormat {
    Codex,
    Claude,
}

pub fn load_session_file(path: &Path) -> Result<SessionTimeline, ReplayError> {
    if path.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::IsADirectory,
            format!("path is a directory: {}", path.display()),
        )
        .into());
    }

    match detect_log_format(path) {
        LogFormat::Claude => Ok(super::claude::load_claude_session_timeline(path)?),
        LogFormat::Codex => Ok(load_codex_session_timeline(path)?),
    }
}

fn load_codex_session_timeline(path: &Path) -> io::Result<SessionTimeline> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut timeline = SessionTimeline::default();
    for line_result in reader.lines() {
        let line = match line_result {
            Ok(line) => line,
            Err(_) => {
                timeline.warnings += 1;
                timeline.truncated = true;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => {
                timeline.warnings += 1;
                continue;
            }
        };

        let Some(item) = parse_codex_log_value(&value) else {
            continue;
        };
        if timeline.items.len() >= MAX_TIMELINE_ITEMS {
            timeline.truncated = true;
            break;
        }
        timeline.items.push(item);
    }

    Ok(timeline)
}

fn detect_log_format(path: &Path) -> LogFormat {
    if looks_like_claude_jsonl(path) {
        LogFormat::Claude
    } else {
        LogFormat::Codex
    }
}

fn looks_like_claude_jsonl(path: &Path) -> bool {
    for value in read_jsonl_values(path, 50) {
        let line_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if matches!(
            line_type,
            "user" | "assistant" | "summary" | "progress" | "file-history-snapshot"
        ) {
            return true;
        }
    }
    false
}

fn read_jsonl_values(path: &Path, limit: usize) -> Vec<serde_json::Value> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return Vec::new(),
    };
    let reader = BufReader::new(file);
    let mut out: Vec<serde_json::Value> = Vec::new();
    for line_result in reader.lines().take(limit.saturating_mul(2)) {
        let Ok(line) = line_result else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            continue;
        };
        out.push(value);
        if out.len() >= limit {
            break;
        }
    }
    out
}
