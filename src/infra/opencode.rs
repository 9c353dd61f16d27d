use crate::domain::{
    SessionDescriptor, SessionLocator, SessionSource, SessionTimeline, SummaryFields, TimelineItem,
    TimelineItemKind, first_non_empty_line, span_between, system_time_to_unix_ms,
    unix_ms_to_rfc3339, unix_ms_to_system_time,
};
use crate::infra::{
    MAX_TIMELINE_ITEMS, ReplayError, ResolveDirError, ScanError, ScanOutput, ScanWarningCount,
    SourceReader, StoreReader,
};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub fn resolve_opencode_db_path() -> Result<PathBuf, ResolveDirError> {
    if let Some(override_path) = std::env::var_os("REPLAYBOX_STORE_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    if let Some(xdg_data_home) = std::env::var_os("XDG_DATA_HOME") {
        return Ok(PathBuf::from(xdg_data_home)
            .join("opencode")
            .join("opencode.db"));
    }

    let Some(home) = dirs::home_dir() else {
        return Err(ResolveDirError::HomeDirNotFound);
    };

    Ok(home
        .join(".local")
        .join("share")
        .join("opencode")
        .join("opencode.db"))
}

/// Reads session rows from an OpenCode SQLite database. Every call opens its own read-only
/// connection, so the reader can be shared across threads.
#[derive(Clone, Debug)]
pub struct OpenCodeStoreReader {
    db_path: PathBuf,
}

impl OpenCodeStoreReader {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl SourceReader for OpenCodeStoreReader {
    fn source(&self) -> SessionSource {
        SessionSource::Store
    }

    fn scan(&self) -> Result<ScanOutput, ScanError> {
        scan_opencode_db(&self.db_path, None)
    }
}

impl StoreReader for OpenCodeStoreReader {
    fn scan_since(&self, cursor: Option<SystemTime>) -> Result<ScanOutput, ScanError> {
        scan_opencode_db(&self.db_path, cursor)
    }
}

const SESSIONS_SQL: &str = r#"
    SELECT
        s.id,
        s.title,
        s.directory,
        s.time_created,
        s.time_updated,
        p.worktree
    FROM session s
    LEFT JOIN project p ON p.id = s.project_id
    WHERE s.time_archived IS NULL
      AND (?1 IS NULL OR s.time_updated >= ?1)
    ORDER BY s.time_updated DESC, s.id DESC
"#;

const USER_TURNS_SQL: &str = r#"
    SELECT COUNT(*)
    FROM message
    WHERE session_id = ?1
      AND json_extract(data, '$.role') = 'user'
"#;

struct SessionRow {
    id: String,
    title: Option<String>,
    directory: Option<String>,
    time_created_ms: i64,
    time_updated_ms: i64,
    worktree: Option<String>,
}

pub fn scan_opencode_db(
    db_path: &Path,
    cursor: Option<SystemTime>,
) -> Result<ScanOutput, ScanError> {
    if !db_path.is_file() {
        return Err(ScanError::unavailable(
            SessionSource::Store,
            format!("database not found: {}", db_path.display()),
        ));
    }

    let conn = open_db_readonly(db_path).map_err(|error| {
        ScanError::unavailable(
            SessionSource::Store,
            format!("database is not readable: {} ({error})", db_path.display()),
        )
    })?;

    let mut stmt = conn.prepare(SESSIONS_SQL).map_err(|error| ScanError::CorruptStore {
        reason: format!("unexpected schema: {error}"),
    })?;
    let cursor_ms = cursor.map(system_time_to_unix_ms);
    let rows = stmt
        .query_map([cursor_ms], |row| {
            Ok(SessionRow {
                id: row.get(0)?,
                title: row.get(1)?,
                directory: row.get(2)?,
                time_created_ms: row.get(3)?,
                time_updated_ms: row.get(4)?,
                worktree: row.get(5)?,
            })
        })
        .map_err(|error| ScanError::CorruptStore {
            reason: format!("failed to read sessions: {error}"),
        })?;

    // Turn counts are best-effort: databases without a `message` table still list sessions.
    let mut turns_stmt = conn.prepare(USER_TURNS_SQL).ok();

    let mut sessions: Vec<SessionDescriptor> = Vec::new();
    let mut warnings = 0usize;
    for row in rows {
        let row = match row {
            Ok(row) => row,
            Err(error) => {
                debug!(%error, "skipping unreadable OpenCode session row");
                warnings += 1;
                continue;
            }
        };

        let turn_count = turns_stmt.as_mut().and_then(|stmt| {
            stmt.query_row([row.id.as_str()], |r| r.get::<_, i64>(0))
                .ok()
                .and_then(|count| u32::try_from(count).ok())
        });
        sessions.push(descriptor_from_row(db_path, row, turn_count));
    }

    Ok(ScanOutput {
        sessions,
        warnings: ScanWarningCount::from(warnings),
    })
}

fn descriptor_from_row(db_path: &Path, row: SessionRow, turn_count: Option<u32>) -> SessionDescriptor {
    let created = unix_ms_to_system_time(row.time_created_ms);
    let updated_at = unix_ms_to_system_time(row.time_updated_ms)
        .or(created)
        .unwrap_or(UNIX_EPOCH);

    let project = row
        .worktree
        .filter(|worktree| !worktree.trim().is_empty() && worktree != "/")
        .or(row.directory)
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from);

    SessionDescriptor {
        id: row.id.clone(),
        source: SessionSource::Store,
        updated_at,
        locator: SessionLocator::StoreRow {
            db_path: db_path.to_path_buf(),
            session_id: row.id,
        },
        summary: SummaryFields {
            title: row.title,
            project,
            turn_count,
            duration: created.and_then(|start| span_between(start, updated_at)),
            size_bytes: None,
        },
    }
}

fn open_db_readonly(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let _ = conn.busy_timeout(Duration::from_millis(250));
    Ok(conn)
}

#[derive(Clone, Debug)]
struct MessageRow {
    id: String,
    time_created_ms: i64,
    data: Value,
}

/// Loads one session's messages and parts and maps them straight to timeline items.
pub fn load_opencode_session_timeline(
    db_path: &Path,
    session_id: &str,
) -> Result<SessionTimeline, ReplayError> {
    if !db_path.is_file() {
        return Err(ReplayError::StoreMissing(db_path.display().to_string()));
    }
    let conn = open_db_readonly(db_path)?;

    let exists = conn
        .query_row(
            "SELECT id FROM session WHERE id = ?1 LIMIT 1",
            [session_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(ReplayError::SessionNotFound(session_id.to_string()));
    }

    let mut timeline = SessionTimeline::default();

    let mut messages: Vec<MessageRow> = Vec::new();
    {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, time_created, data
            FROM message
            WHERE session_id = ?1
            ORDER BY time_created ASC, id ASC
        "#,
        )?;
        let rows = stmt.query_map([session_id], |row| {
            let id: String = row.get(0)?;
            let time_created_ms: i64 = row.get(1)?;
            let raw: String = row.get(2)?;
            Ok((id, time_created_ms, raw))
        })?;

        for row in rows {
            let (id, time_created_ms, raw) = row?;
            match serde_json::from_str(&raw) {
                Ok(data) => messages.push(MessageRow {
                    id,
                    time_created_ms,
                    data,
                }),
                Err(_) => timeline.warnings += 1,
            }
        }
    }

    let mut parts_by_message: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            r#"
            SELECT message_id, data
            FROM part
            WHERE session_id = ?1
            ORDER BY time_created ASC, message_id ASC, id ASC
        "#,
        )?;
        let rows = stmt.query_map([session_id], |row| {
            let message_id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            Ok((message_id, raw))
        })?;

        for row in rows {
            let (message_id, raw) = row?;
            match serde_json::from_str(&raw) {
                Ok(data) => parts_by_message.entry(message_id).or_default().push(data),
                Err(_) => timeline.warnings += 1,
            }
        }
    }

    for message in &messages {
        let parts = parts_by_message
            .get(&message.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let items = match message.data.get("role").and_then(|v| v.as_str()) {
            Some("user") => user_message_items(message, parts),
            Some("assistant") => assistant_message_items(message, parts),
            _ => Vec::new(),
        };
        for item in items {
            if timeline.items.len() >= MAX_TIMELINE_ITEMS {
                timeline.truncated = true;
                return Ok(timeline);
            }
            timeline.items.push(item);
        }
    }

    Ok(timeline)
}

fn user_message_items(message: &MessageRow, parts: &[Value]) -> Vec<TimelineItem> {
    let mut text = String::new();
    let mut attachments: Vec<String> = Vec::new();

    for part in parts {
        match part.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if part.get("synthetic").and_then(|v| v.as_bool()) == Some(true) {
                    continue;
                }
                if let Some(chunk) = part.get("text").and_then(|v| v.as_str()) {
                    text.push_str(chunk);
                }
            }
            "file" => {
                let mime = part.get("mime").and_then(|v| v.as_str()).unwrap_or("");
                let filename = part.get("filename").and_then(|v| v.as_str()).unwrap_or("");
                let url = part.get("url").and_then(|v| v.as_str()).unwrap_or("");
                let label = if filename.trim().is_empty() {
                    format!("[file] {mime} {url}")
                } else {
                    format!("[file] {mime} {filename}")
                };
                attachments.push(label.trim().to_string());
            }
            _ => {}
        }
    }

    if !attachments.is_empty() {
        if !text.trim().is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&attachments.join("\n"));
    }

    if text.trim().is_empty() {
        return Vec::new();
    }
    vec![TimelineItem {
        kind: TimelineItemKind::User,
        call_id: None,
        timestamp: unix_ms_to_rfc3339(message.time_created_ms),
        summary: first_non_empty_line(&text).unwrap_or_default(),
        detail: text.trim_end().to_string(),
    }]
}

fn assistant_message_items(message: &MessageRow, parts: &[Value]) -> Vec<TimelineItem> {
    let default_ts = unix_ms_to_rfc3339(message.time_created_ms);
    let mut items: Vec<TimelineItem> = Vec::new();
    let mut output_text = String::new();

    for part in parts {
        match part.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "reasoning" => {
                let text = part.get("text").and_then(|v| v.as_str()).unwrap_or("");
                if text.trim().is_empty() {
                    continue;
                }
                let ts = part
                    .get("time")
                    .and_then(|t| t.get("start"))
                    .and_then(|v| v.as_i64())
                    .and_then(unix_ms_to_rfc3339)
                    .or_else(|| default_ts.clone());
                items.push(TimelineItem {
                    kind: TimelineItemKind::Thinking,
                    call_id: None,
                    timestamp: ts,
                    summary: first_non_empty_line(text).unwrap_or_default(),
                    detail: text.trim_end().to_string(),
                });
            }
            "tool" => items.extend(tool_part_items(part, default_ts.as_deref())),
            "text" => {
                if let Some(chunk) = part.get("text").and_then(|v| v.as_str()) {
                    output_text.push_str(chunk);
                }
            }
            _ => {}
        }
    }

    if !output_text.trim().is_empty() {
        items.push(TimelineItem {
            kind: TimelineItemKind::Assistant,
            call_id: None,
            timestamp: default_ts,
            summary: first_non_empty_line(&output_text).unwrap_or_default(),
            detail: output_text.trim_end().to_string(),
        });
    }

    items
}

fn tool_part_items(part: &Value, default_ts: Option<&str>) -> Vec<TimelineItem> {
    let tool = part.get("tool").and_then(|v| v.as_str()).unwrap_or("tool");
    let call_id = part
        .get("callID")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let state = part.get("state").unwrap_or(&Value::Null);
    let status = state.get("status").and_then(|v| v.as_str()).unwrap_or("");

    let time = state.get("time").unwrap_or(&Value::Null);
    let start_ms = time.get("start").and_then(|v| v.as_i64());
    let end_ms = time.get("end").and_then(|v| v.as_i64()).or(start_ms);
    let fallback = || default_ts.map(str::to_string);
    let call_ts = start_ms.and_then(unix_ms_to_rfc3339).or_else(fallback);
    let out_ts = end_ms.and_then(unix_ms_to_rfc3339).or_else(fallback);

    let mut items = vec![TimelineItem {
        kind: TimelineItemKind::ToolCall,
        call_id: call_id.clone(),
        timestamp: call_ts,
        summary: format!("{tool}()"),
        detail: tool_arguments_string(state),
    }];

    let output = match status {
        "completed" => state
            .get("output")
            .and_then(|v| v.as_str())
            .map(|s| s.trim_end().to_string()),
        "error" => state
            .get("error")
            .and_then(|v| v.as_str())
            .map(|s| format!("error: {}", s.trim_end())),
        _ => None,
    };
    if let Some(output) = output.filter(|s| !s.trim().is_empty()) {
        items.push(TimelineItem {
            kind: TimelineItemKind::ToolOutput,
            call_id,
            timestamp: out_ts,
            summary: first_non_empty_line(&output).unwrap_or_default(),
            detail: output,
        });
    }
    items
}

fn tool_arguments_string(state: &Value) -> String {
    if let Some(raw) = state.get("raw").and_then(|v| v.as_str()) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if let Some(input) = state.get("input") {
        return serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
    }

    String::new()
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::{Connection, params};
    use std::path::Path;

    pub fn create_minimal_db(path: &Path) -> Connection {
        let conn = Connection::open(path).expect("open");
        conn.execute_batch(
            r#"
            CREATE TABLE project (
              id TEXT PRIMARY KEY,
              worktree TEXT NOT NULL,
              name TEXT,
              time_created INTEGER NOT NULL,
              time_updated INTEGER NOT NULL,
              sandboxes TEXT NOT NULL
            );
            CREATE TABLE session (
              id TEXT PRIMARY KEY,
              project_id TEXT NOT NULL,
              parent_id TEXT,
              slug TEXT NOT NULL,
              directory TEXT NOT NULL,
              title TEXT NOT NULL,
              version TEXT NOT NULL,
              time_created INTEGER NOT NULL,
              time_updated INTEGER NOT NULL,
              time_archived INTEGER
            );
            INSERT INTO project (id, worktree, name, time_created, time_updated, sandboxes)
              VALUES ('p1', '/tmp/worktree', NULL, 1, 1, '[]');
        "#,
        )
        .expect("schema");
        conn
    }

    pub fn insert_session(conn: &Connection, id: &str, title: &str, created: i64, updated: i64) {
        conn.execute(
            "INSERT INTO session (id, project_id, parent_id, slug, directory, title, version, time_created, time_updated, time_archived) VALUES (?1, 'p1', NULL, 's', '/tmp/worktree', ?2, 'v', ?3, ?4, NULL)",
            params![id, title, created, updated],
        )
        .expect("session");
    }
}
