use crate::domain::{
    ClaudeSessionsIndex, ClaudeSessionsIndexEntry, SessionDescriptor, SessionLocator,
    SessionSource, SessionTimeline, SummaryFields, derive_title_from_user_text,
    extract_claude_session_meta_hint, is_metadata_prompt, parse_claude_sessions_index,
    parse_claude_timeline_items, parse_claude_user_message_text, parse_rfc3339_to_system_time,
    span_between,
};
use crate::infra::{
    MAX_TIMELINE_ITEMS, ResolveDirError, ScanError, ScanOutput, ScanWarningCount, SourceReader,
};
use dirs::home_dir;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub fn resolve_claude_projects_dir() -> Result<PathBuf, ResolveDirError> {
    if let Some(override_dir) = std::env::var_os("CLAUDE_PROJECTS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = home_dir() else {
        return Err(ResolveDirError::HomeDirNotFound);
    };

    Ok(home.join(".claude").join("projects"))
}

#[derive(Clone, Debug)]
pub struct ClaudeTreeReader {
    projects_dir: PathBuf,
}

impl ClaudeTreeReader {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }
}

impl SourceReader for ClaudeTreeReader {
    fn source(&self) -> SessionSource {
        SessionSource::PrimaryTree
    }

    fn scan(&self) -> Result<ScanOutput, ScanError> {
        scan_claude_projects_dir(&self.projects_dir)
    }
}

pub fn load_claude_session_timeline(path: &Path) -> io::Result<SessionTimeline> {
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

        for item in parse_claude_timeline_items(&value) {
            if timeline.items.len() >= MAX_TIMELINE_ITEMS {
                timeline.truncated = true;
                break;
            }
            timeline.items.push(item);
        }

        if timeline.truncated {
            break;
        }
    }

    Ok(timeline)
}

pub fn scan_claude_projects_dir(projects_dir: &Path) -> Result<ScanOutput, ScanError> {
    if !projects_dir.is_dir() {
        return Err(ScanError::unavailable(
            SessionSource::PrimaryTree,
            format!("projects dir not found: {}", projects_dir.display()),
        ));
    }

    let entries = fs::read_dir(projects_dir).map_err(|error| {
        ScanError::unavailable(
            SessionSource::PrimaryTree,
            format!(
                "projects dir is not readable: {} ({error})",
                projects_dir.display()
            ),
        )
    })?;

    let mut warnings = 0usize;
    let mut sessions: Vec<SessionDescriptor> = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                warnings += 1;
                continue;
            }
        };

        let Ok(file_type) = entry.file_type() else {
            warnings += 1;
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }

        let output = scan_claude_project_key_dir(&entry.path());
        warnings += output.warnings;
        sessions.extend(output.sessions);
    }

    Ok(ScanOutput {
        sessions,
        warnings: ScanWarningCount::from(warnings),
    })
}

struct ScanProjectKeyOutput {
    sessions: Vec<SessionDescriptor>,
    warnings: usize,
}

fn scan_claude_project_key_dir(project_key_dir: &Path) -> ScanProjectKeyOutput {
    let sessions_index_path = project_key_dir.join("sessions-index.json");
    if sessions_index_path.is_file() {
        let parsed = fs::read_to_string(&sessions_index_path)
            .ok()
            .and_then(|text| parse_claude_sessions_index(&text).ok());
        if let Some(index) = parsed {
            return scan_project_key_from_sessions_index(project_key_dir, index);
        }

        debug!(path = %sessions_index_path.display(), "unreadable sessions-index.json");
        let mut fallback = scan_project_key_from_jsonl_files(project_key_dir, &HashSet::new());
        fallback.warnings = fallback.warnings.saturating_add(1);
        return fallback;
    }

    scan_project_key_from_jsonl_files(project_key_dir, &HashSet::new())
}

fn scan_project_key_from_sessions_index(
    project_key_dir: &Path,
    index: ClaudeSessionsIndex,
) -> ScanProjectKeyOutput {
    let mut sessions: Vec<SessionDescriptor> = Vec::new();
    let mut warnings = 0usize;

    let mut indexed: HashSet<PathBuf> = HashSet::new();
    let index_project_path = index.original_path.map(PathBuf::from);
    for entry in index.entries {
        if let Some(log_path) = index_entry_log_path(project_key_dir, &entry) {
            indexed.insert(log_path);
        }
        match descriptor_from_index_entry(project_key_dir, index_project_path.as_deref(), &entry)
        {
            Some(descriptor) => sessions.push(descriptor),
            None => warnings += 1,
        }
    }

    // The index lags behind the logs; anything it does not list is scanned directly.
    let unindexed = scan_project_key_from_jsonl_files(project_key_dir, &indexed);
    warnings += unindexed.warnings;
    sessions.extend(unindexed.sessions);

    ScanProjectKeyOutput { sessions, warnings }
}

fn index_entry_log_path(
    project_key_dir: &Path,
    entry: &ClaudeSessionsIndexEntry,
) -> Option<PathBuf> {
    let full_path = entry.full_path.as_ref()?;
    Some(if full_path.is_absolute() {
        full_path.clone()
    } else {
        project_key_dir.join(full_path)
    })
}

fn descriptor_from_index_entry(
    project_key_dir: &Path,
    index_project_path: Option<&Path>,
    entry: &ClaudeSessionsIndexEntry,
) -> Option<SessionDescriptor> {
    let log_path = index_entry_log_path(project_key_dir, entry)?;

    let metadata = fs::metadata(&log_path).ok()?;
    let head = scan_claude_file_head(&log_path).ok()?;

    let id = non_empty(entry.session_id.as_deref())
        .or(head.session_id.clone())
        .or_else(|| file_stem_string(&log_path))?;
    let project = non_empty(entry.project_path.as_deref())
        .map(PathBuf::from)
        .or_else(|| index_project_path.map(Path::to_path_buf))
        .or(head.cwd.clone());
    let title = non_empty(entry.summary.as_deref())
        .or_else(|| {
            entry
                .first_prompt
                .as_deref()
                .filter(|text| !is_metadata_prompt(text))
                .and_then(derive_title_from_user_text)
        })
        .or(head.title.clone());
    let started_at = entry
        .created
        .as_deref()
        .and_then(parse_rfc3339_to_system_time)
        .or(head.started_at);

    Some(make_descriptor(
        id,
        log_path,
        title,
        project,
        head.user_turns,
        started_at,
        metadata.len(),
        metadata.modified().ok(),
    ))
}

fn scan_project_key_from_jsonl_files(
    project_key_dir: &Path,
    skip: &HashSet<PathBuf>,
) -> ScanProjectKeyOutput {
    let mut sessions: Vec<SessionDescriptor> = Vec::new();
    let mut warnings = 0usize;

    let entries = match fs::read_dir(project_key_dir) {
        Ok(entries) => entries,
        Err(_) => {
            return ScanProjectKeyOutput {
                sessions,
                warnings: 1,
            };
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                warnings += 1;
                continue;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }
        if skip.contains(&path) {
            continue;
        }

        match scan_claude_session_file(&path) {
            Some(descriptor) => sessions.push(descriptor),
            None => warnings += 1,
        }
    }

    ScanProjectKeyOutput { sessions, warnings }
}

fn scan_claude_session_file(path: &Path) -> Option<SessionDescriptor> {
    let metadata = fs::metadata(path).ok()?;
    let head = scan_claude_file_head(path).ok()?;
    if !head.any_record {
        return None;
    }

    let id = head
        .session_id
        .clone()
        .or_else(|| file_stem_string(path))?;
    Some(make_descriptor(
        id,
        path.to_path_buf(),
        head.title,
        head.cwd,
        head.user_turns,
        head.started_at,
        metadata.len(),
        metadata.modified().ok(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn make_descriptor(
    id: String,
    log_path: PathBuf,
    title: Option<String>,
    project: Option<PathBuf>,
    turn_count: u32,
    started_at: Option<SystemTime>,
    size_bytes: u64,
    modified: Option<SystemTime>,
) -> SessionDescriptor {
    let updated_at = modified.or(started_at).unwrap_or(UNIX_EPOCH);
    SessionDescriptor {
        id,
        source: SessionSource::PrimaryTree,
        updated_at,
        locator: SessionLocator::File { path: log_path },
        summary: SummaryFields {
            title,
            project,
            turn_count: Some(turn_count),
            duration: started_at.and_then(|start| span_between(start, updated_at)),
            size_bytes: Some(size_bytes),
        },
    }
}

const MAX_HEAD_SCAN_BYTES: usize = 512 * 1024;

#[derive(Debug, Default)]
struct ClaudeFileHead {
    any_record: bool,
    cwd: Option<PathBuf>,
    session_id: Option<String>,
    started_at: Option<SystemTime>,
    title: Option<String>,
    user_turns: u32,
}

/// Reads at most the first 512 KiB of a Claude log for list metadata.
fn scan_claude_file_head(path: &Path) -> io::Result<ClaudeFileHead> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut head = ClaudeFileHead::default();
    let mut bytes_read = 0usize;
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            break;
        }
        bytes_read = bytes_read.saturating_add(bytes);
        if bytes_read > MAX_HEAD_SCAN_BYTES {
            break;
        }

        let value: serde_json::Value = match serde_json::from_str(line.trim_end()) {
            Ok(value) => value,
            Err(_) => continue,
        };
        head.any_record = true;

        let hint = extract_claude_session_meta_hint(&value);
        if head.cwd.is_none() {
            head.cwd = hint.cwd;
        }
        if head.session_id.is_none() {
            head.session_id = hint.session_id;
        }
        if head.started_at.is_none() {
            head.started_at = hint
                .timestamp
                .as_deref()
                .and_then(parse_rfc3339_to_system_time);
        }

        let Some(text) = parse_claude_user_message_text(&value) else {
            continue;
        };
        if is_metadata_prompt(&text) {
            continue;
        }
        head.user_turns = head.user_turns.saturating_add(1);
        if head.title.is_none() {
            head.title = derive_title_from_user_text(&text);
        }
    }

    Ok(head)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn file_stem_string(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}
