use crate::domain::{
    SessionDescriptor, SessionLocator, SessionSource, SummaryFields, derive_title_from_user_text,
    is_metadata_prompt, parse_rfc3339_to_system_time, parse_session_meta_line,
    parse_user_message_text, span_between,
};
use crate::infra::{ResolveDirError, ScanError, ScanOutput, ScanWarningCount, SourceReader};
use dirs::home_dir;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

pub fn resolve_codex_sessions_dir() -> Result<PathBuf, ResolveDirError> {
    if let Some(override_dir) = std::env::var_os("CODEX_SESSIONS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = home_dir() else {
        return Err(ResolveDirError::HomeDirNotFound);
    };

    Ok(home.join(".codex").join("sessions"))
}

/// Walks `sessions/YYYY/MM/DD/rollout-*.jsonl`.
#[derive(Clone, Debug)]
pub struct CodexTreeReader {
    sessions_dir: PathBuf,
}

impl CodexTreeReader {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }
}

impl SourceReader for CodexTreeReader {
    fn source(&self) -> SessionSource {
        SessionSource::SecondaryTree
    }

    fn scan(&self) -> Result<ScanOutput, ScanError> {
        scan_codex_sessions_dir(&self.sessions_dir)
    }
}

pub fn scan_codex_sessions_dir(sessions_dir: &Path) -> Result<ScanOutput, ScanError> {
    if !sessions_dir.is_dir() {
        return Err(ScanError::unavailable(
            SessionSource::SecondaryTree,
            format!("sessions dir not found: {}", sessions_dir.display()),
        ));
    }

    let mut warnings = 0usize;
    let mut sessions: Vec<SessionDescriptor> = Vec::new();

    let walker = WalkDir::new(sessions_dir).follow_links(false).into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_error) => {
                warnings += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }

        match scan_codex_session_file(entry.path()) {
            Ok(descriptor) => sessions.push(descriptor),
            Err(reason) => {
                debug!(path = %entry.path().display(), %reason, "skipping Codex session file");
                warnings += 1;
            }
        }
    }

    Ok(ScanOutput {
        sessions,
        warnings: ScanWarningCount::from(warnings),
    })
}

const MAX_SCAN_LINES: usize = 2_000;
const MAX_SCAN_BYTES: usize = 512 * 1024;

fn scan_codex_session_file(path: &Path) -> Result<SessionDescriptor, String> {
    let file = File::open(path).map_err(|error| error.to_string())?;
    let metadata = file.metadata().map_err(|error| error.to_string())?;
    let size_bytes = metadata.len();
    let modified = metadata.modified().ok();

    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    let bytes = reader
        .read_line(&mut first_line)
        .map_err(|error| error.to_string())?;
    if bytes == 0 {
        return Err("empty file".to_string());
    }

    let meta = parse_session_meta_line(first_line.trim_end())
        .map_err(|error| format!("failed to parse session_meta: {error}"))?;

    let mut title: Option<String> = None;
    let mut user_turns = 0u32;
    let mut bytes_read = bytes;
    for _ in 0..MAX_SCAN_LINES {
        let mut line = String::new();
        let Ok(bytes) = reader.read_line(&mut line) else {
            break;
        };
        if bytes == 0 {
            break;
        }
        bytes_read = bytes_read.saturating_add(bytes);
        if bytes_read > MAX_SCAN_BYTES {
            break;
        }

        let Ok(Some(text)) = parse_user_message_text(line.trim_end()) else {
            continue;
        };
        if is_metadata_prompt(&text) {
            continue;
        }
        user_turns = user_turns.saturating_add(1);
        if title.is_none() {
            title = derive_title_from_user_text(&text);
        }
    }

    let started_at = parse_rfc3339_to_system_time(&meta.started_at_rfc3339);
    let updated_at = modified.or(started_at).unwrap_or(UNIX_EPOCH);
    let duration = started_at.and_then(|start| span_between(start, updated_at));

    Ok(SessionDescriptor {
        id: meta.id,
        source: SessionSource::SecondaryTree,
        updated_at,
        locator: SessionLocator::File {
            path: path.to_path_buf(),
        },
        summary: SummaryFields {
            title,
            project: Some(meta.cwd),
            turn_count: Some(user_turns),
            duration,
            size_bytes: Some(size_bytes),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_rollout(dir: &Path, name: &str, id: &str, prompts: &[&str]) -> PathBuf {
        let day_dir = dir.join("2026").join("02").join("18");
        fs::create_dir_all(&day_dir).expect("create");
        let path = day_dir.join(name);
        let mut text = format!(
            r#"{{"timestamp":"2026-02-18T21:39:39.022Z","type":"session_meta","payload":{{"id":"{id}","timestamp":"2026-02-18T21:39:39.022Z","cwd":"/tmp/project"}}}}"#
        );
        text.push('\n');
        for prompt in prompts {
            text.push_str(&format!(
                r#"{{"timestamp":"2026-02-18T21:40:00Z","type":"response_item","payload":{{"type":"message","role":"user","content":[{{"type":"input_text","text":"{prompt}"}}]}}}}"#
            ));
            text.push('\n');
        }
        fs::write(&path, text).expect("write");
        path
    }

    #[test]
    fn scans_rollouts_recursively() {
        let dir = tempdir().expect("tempdir");
        write_rollout(
            dir.path(),
            "rollout-a.jsonl",
            "a",
            &["<environment_context>x</environment_context>", "fix the bug", "again"],
        );
        write_rollout(dir.path(), "rollout-b.jsonl", "b", &[]);

        let output = scan_codex_sessions_dir(dir.path()).expect("scan");
        assert_eq!(output.warnings.get(), 0);
        assert_eq!(output.sessions.len(), 2);

        let a = output
            .sessions
            .iter()
            .find(|session| session.id == "a")
            .expect("a");
        assert_eq!(a.source, SessionSource::SecondaryTree);
        assert_eq!(a.summary.title.as_deref(), Some("fix the bug"));
        assert_eq!(a.summary.turn_count, Some(2));
        assert_eq!(a.summary.project, Some(PathBuf::from("/tmp/project")));
    }

    #[test]
    fn counts_files_without_session_meta_as_warnings() {
        let dir = tempdir().expect("tempdir");
        write_rollout(dir.path(), "rollout-ok.jsonl", "ok", &["hi"]);
        fs::write(dir.path().join("broken.jsonl"), "not json\n").expect("write");
        fs::write(dir.path().join("empty.jsonl"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let output = scan_codex_sessions_dir(dir.path()).expect("scan");
        assert_eq!(output.sessions.len(), 1);
        assert_eq!(output.warnings.get(), 2);
    }

    #[test]
    fn missing_dir_is_source_unavailable() {
        let dir = tempdir().expect("tempdir");
        let reader = CodexTreeReader::new(dir.path().join("missing"));
        assert!(matches!(
            reader.scan(),
            Err(ScanError::SourceUnavailable {
                origin: SessionSource::SecondaryTree,
                ..
            })
        ));
    }
}
