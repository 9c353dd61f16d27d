use crate::domain::{TimelineItem, TimelineItemKind, first_non_empty_line};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Clone, Debug, Deserialize)]
pub struct ClaudeSessionsIndex {
    #[serde(rename = "originalPath")]
    pub original_path: Option<String>,

    #[serde(default)]
    pub entries: Vec<ClaudeSessionsIndexEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClaudeSessionsIndexEntry {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,

    #[serde(rename = "fullPath")]
    pub full_path: Option<PathBuf>,

    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub modified: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(rename = "firstPrompt", default)]
    pub first_prompt: Option<String>,

    #[serde(rename = "messageCount", default)]
    pub message_count: Option<u32>,

    #[serde(rename = "projectPath", default)]
    pub project_path: Option<String>,
}

pub fn parse_claude_sessions_index(text: &str) -> Result<ClaudeSessionsIndex, serde_json::Error> {
    serde_json::from_str(text)
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClaudeSessionMetaHint {
    pub cwd: Option<PathBuf>,
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
}

pub fn extract_claude_session_meta_hint(value: &Value) -> ClaudeSessionMetaHint {
    let cwd = value
        .get("cwd")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| {
            value
                .get("projectPath")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
        });
    let session_id = value
        .get("sessionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    ClaudeSessionMetaHint {
        cwd,
        session_id,
        timestamp,
    }
}

/// Text of a human-authored user record. Tool results (also stored as `user` records) yield
/// `None`.
pub fn parse_claude_user_message_text(value: &Value) -> Option<String> {
    if value.get("type").and_then(|v| v.as_str()) != Some("user") {
        return None;
    }

    let message = value.get("message").unwrap_or(&Value::Null);
    let content = message.get("content").unwrap_or(&Value::Null);
    let text = extract_text_blocks(content);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn parse_claude_timeline_items(value: &Value) -> Vec<TimelineItem> {
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match kind {
        "user" => parse_user_items(value, timestamp),
        "assistant" => parse_assistant_items(value, timestamp),
        "summary" => parse_summary_item(value, timestamp).into_iter().collect(),
        "file-history-snapshot" | "progress" | "queue-operation" | "system" | "" => Vec::new(),
        other => vec![TimelineItem {
            kind: TimelineItemKind::Note,
            call_id: None,
            timestamp,
            summary: format!("Claude: {other}"),
            detail: serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }],
    }
}

fn parse_user_items(value: &Value, timestamp: Option<String>) -> Vec<TimelineItem> {
    let message = value.get("message").unwrap_or(&Value::Null);
    let content = message.get("content").unwrap_or(&Value::Null);

    let Some(blocks) = content.as_array() else {
        let text = extract_text_blocks(content).trim_end().to_string();
        if text.trim().is_empty() || super::is_metadata_prompt(&text) {
            return Vec::new();
        }
        return vec![text_item(TimelineItemKind::User, timestamp, text)];
    };

    let mut out: Vec<TimelineItem> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let text = text.trim_end();
                if text.is_empty() || super::is_metadata_prompt(text) {
                    continue;
                }
                out.push(text_item(
                    TimelineItemKind::User,
                    timestamp.clone(),
                    text.to_string(),
                ));
            }
            "tool_result" => {
                let call_id = block
                    .get("tool_use_id")
                    .or_else(|| block.get("toolUseId"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let detail = format_tool_result_detail(block);
                out.push(TimelineItem {
                    kind: TimelineItemKind::ToolOutput,
                    call_id,
                    timestamp: timestamp.clone(),
                    summary: first_non_empty_line(&detail)
                        .unwrap_or_else(|| "tool output".to_string()),
                    detail,
                });
            }
            _ => {}
        }
    }
    out
}

fn parse_assistant_items(value: &Value, timestamp: Option<String>) -> Vec<TimelineItem> {
    let message = value.get("message").unwrap_or(&Value::Null);
    let content = message.get("content").unwrap_or(&Value::Null);

    let Some(blocks) = content.as_array() else {
        let text = extract_text_blocks(content).trim_end().to_string();
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![text_item(TimelineItemKind::Assistant, timestamp, text)];
    };

    let mut out: Vec<TimelineItem> = Vec::new();
    for block in blocks {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match block_type {
            "text" => {
                let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let text = text.trim_end();
                if text.is_empty() {
                    continue;
                }
                out.push(text_item(
                    TimelineItemKind::Assistant,
                    timestamp.clone(),
                    text.to_string(),
                ));
            }
            "thinking" => {
                let thinking = block
                    .get("thinking")
                    .or_else(|| block.get("text"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim_end();
                if thinking.is_empty() {
                    continue;
                }
                out.push(text_item(
                    TimelineItemKind::Thinking,
                    timestamp.clone(),
                    thinking.to_string(),
                ));
            }
            "tool_use" => {
                let call_id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("tool");
                let input = block.get("input").unwrap_or(&Value::Null);
                out.push(TimelineItem {
                    kind: TimelineItemKind::ToolCall,
                    call_id,
                    timestamp: timestamp.clone(),
                    summary: format!("{name}()"),
                    detail: serde_json::to_string_pretty(input)
                        .unwrap_or_else(|_| input.to_string()),
                });
            }
            "" => {}
            other => out.push(TimelineItem {
                kind: TimelineItemKind::Note,
                call_id: None,
                timestamp: timestamp.clone(),
                summary: format!("Claude assistant: {other}"),
                detail: serde_json::to_string_pretty(block).unwrap_or_else(|_| block.to_string()),
            }),
        }
    }

    out
}

fn parse_summary_item(value: &Value, timestamp: Option<String>) -> Option<TimelineItem> {
    let summary = value
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim_end()
        .to_string();
    if summary.trim().is_empty() {
        return None;
    }
    Some(TimelineItem {
        kind: TimelineItemKind::Note,
        call_id: None,
        timestamp,
        summary: "Claude summary".to_string(),
        detail: summary,
    })
}

fn text_item(kind: TimelineItemKind, timestamp: Option<String>, text: String) -> TimelineItem {
    TimelineItem {
        kind,
        call_id: None,
        timestamp,
        summary: first_non_empty_line(&text).unwrap_or_else(|| kind.label().to_lowercase()),
        detail: text,
    }
}

fn extract_text_blocks(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                    return block.get("text").and_then(|v| v.as_str());
                }
                None
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn format_tool_result_detail(block: &Value) -> String {
    let content = block.get("content").unwrap_or(&Value::Null);
    if let Some(text) = content.as_str() {
        return text.trim_end().to_string();
    }
    serde_json::to_string_pretty(content).unwrap_or_else(|_| content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sessions_index_entries() {
        let json = r#"{
            "originalPath": "/tmp/project",
            "entries": [
                {
                    "sessionId": "s1",
                    "fullPath": "/tmp/log.jsonl",
                    "created": "2026-02-19T00:00:00Z",
                    "modified": "2026-02-19T00:01:00Z",
                    "summary": "hello",
                    "firstPrompt": "hello world",
                    "messageCount": 4
                }
            ]
        }"#;
        let parsed = parse_claude_sessions_index(json).expect("parse");
        assert_eq!(parsed.original_path.as_deref(), Some("/tmp/project"));
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].session_id.as_deref(), Some("s1"));
        assert_eq!(parsed.entries[0].message_count, Some(4));
    }

    #[test]
    fn parses_tool_use_and_result_with_call_ids() {
        let tool_use = serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-02-19T00:00:00Z",
            "message": {
                "content": [
                    { "type": "tool_use", "id": "toolu_1", "name": "Bash", "input": { "cmd": "ls" } }
                ]
            }
        });
        let items = parse_claude_timeline_items(&tool_use);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, TimelineItemKind::ToolCall);
        assert_eq!(items[0].call_id.as_deref(), Some("toolu_1"));

        let tool_out = serde_json::json!({
            "type": "user",
            "timestamp": "2026-02-19T00:00:01Z",
            "message": {
                "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "content": "ok" }
                ]
            }
        });
        let out_items = parse_claude_timeline_items(&tool_out);
        assert_eq!(out_items.len(), 1);
        assert_eq!(out_items[0].kind, TimelineItemKind::ToolOutput);
        assert_eq!(out_items[0].call_id.as_deref(), Some("toolu_1"));
        assert_eq!(out_items[0].detail, "ok");
    }

    #[test]
    fn tool_results_are_not_user_prompts() {
        let tool_out = serde_json::json!({
            "type": "user",
            "message": { "content": [{ "type": "tool_result", "tool_use_id": "t", "content": "ok" }] }
        });
        assert_eq!(parse_claude_user_message_text(&tool_out), None);

        let prompt = serde_json::json!({
            "type": "user",
            "message": { "content": "hello\nworld" }
        });
        assert_eq!(
            parse_claude_user_message_text(&prompt),
            Some("hello\nworld".to_string())
        );
    }
}
