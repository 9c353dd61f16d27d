use crate::domain::SessionDescriptor;
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodexSessionMeta {
    pub id: String,
    pub cwd: PathBuf,
    pub started_at_rfc3339: String,
}

#[derive(Debug, Deserialize)]
struct SessionMetaLine {
    #[serde(rename = "type")]
    line_type: String,
    payload: SessionMetaPayload,
}

#[derive(Debug, Deserialize)]
struct SessionMetaPayload {
    id: String,
    timestamp: String,
    cwd: String,
}

pub fn parse_session_meta_line(line: &str) -> Result<CodexSessionMeta, ParseError> {
    let parsed: SessionMetaLine = serde_json::from_str(line)?;
    if parsed.line_type != "session_meta" {
        return Err(ParseError::MissingField("type=session_meta"));
    }

    Ok(CodexSessionMeta {
        id: parsed.payload.id,
        cwd: PathBuf::from(parsed.payload.cwd),
        started_at_rfc3339: parsed.payload.timestamp,
    })
}

#[derive(Debug, Deserialize)]
struct ResponseItemLine {
    #[serde(rename = "type")]
    line_type: String,
    payload: ResponseItemPayload,
}

#[derive(Debug, Deserialize)]
struct ResponseItemPayload {
    #[serde(rename = "type")]
    payload_type: String,
    role: Option<String>,
    content: Option<Vec<ContentItem>>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

pub fn parse_user_message_text(line: &str) -> Result<Option<String>, ParseError> {
    let parsed: ResponseItemLine = serde_json::from_str(line)?;
    if parsed.line_type != "response_item" {
        return Ok(None);
    }
    if parsed.payload.payload_type != "message" {
        return Ok(None);
    }
    if parsed.payload.role.as_deref() != Some("user") {
        return Ok(None);
    }

    let Some(content) = parsed.payload.content else {
        return Ok(None);
    };

    for item in content {
        if item.content_type == "input_text" {
            if let Some(text) = item.text {
                return Ok(Some(text));
            }
        }
    }

    Ok(None)
}

pub fn is_metadata_prompt(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("# AGENTS.md instructions")
        || trimmed.starts_with("<environment_context>")
        || trimmed.starts_with("<INSTRUCTIONS>")
        || trimmed.starts_with("<command-name>")
        || trimmed.starts_with("<local-command-stdout>")
        || (trimmed.starts_with("<skill>") && trimmed.contains("</skill>"))
}

pub fn derive_title_from_user_text(text: &str) -> Option<String> {
    let first_line = text
        .lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())?;
    Some(first_line.to_string())
}

/// Strips control characters and surrounding whitespace. Returns `None` when nothing printable
/// remains.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let cleaned = raw
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

pub fn parse_rfc3339_to_system_time(value: &str) -> Option<SystemTime> {
    parse_rfc3339(value).map(SystemTime::from)
}

pub fn unix_ms_to_system_time(ms: i64) -> Option<SystemTime> {
    let ms_u64 = u64::try_from(ms).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_millis(ms_u64))
}

pub fn system_time_to_unix_ms(value: SystemTime) -> i64 {
    match value.duration_since(UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

pub fn unix_ms_to_rfc3339(ms: i64) -> Option<String> {
    let nanos: i128 = i128::from(ms).saturating_mul(1_000_000);
    let timestamp = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    timestamp.format(&Rfc3339).ok()
}

/// Duration between two points, `None` if `end` precedes `start`.
pub fn span_between(start: SystemTime, end: SystemTime) -> Option<Duration> {
    end.duration_since(start).ok()
}

/// Newest first; ties broken by source, then id, so the order is total.
pub fn compare_descriptors(a: &SessionDescriptor, b: &SessionDescriptor) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.id.cmp(&b.id))
}
