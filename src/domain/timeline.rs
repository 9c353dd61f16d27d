use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimelineItemKind {
    User,
    Assistant,
    Thinking,
    ToolCall,
    ToolOutput,
    Note,
}

impl TimelineItemKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::Thinking => "Thinking",
            Self::ToolCall => "Tool",
            Self::ToolOutput => "ToolOut",
            Self::Note => "Note",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimelineItem {
    pub kind: TimelineItemKind,
    pub call_id: Option<String>,
    pub timestamp: Option<String>,
    pub summary: String,
    pub detail: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionTimeline {
    pub items: Vec<TimelineItem>,
    pub warnings: usize,
    pub truncated: bool,
}

/// One rendered row of a transcript. `kind` is set on the header row of each item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TranscriptLine {
    pub kind: Option<TimelineItemKind>,
    pub text: String,
}

/// Flattens a timeline into pager rows: a header per item followed by its indented detail.
pub fn timeline_to_lines(timeline: &SessionTimeline) -> Vec<TranscriptLine> {
    let mut lines = Vec::new();
    for item in &timeline.items {
        let time = item
            .timestamp
            .as_deref()
            .and_then(short_time)
            .map(|time| format!(" {time}"))
            .unwrap_or_default();
        lines.push(TranscriptLine {
            kind: Some(item.kind),
            text: format!("[{}]{time}  {}", item.kind.label(), item.summary),
        });
        let detail = item.detail.trim_end();
        if !detail.is_empty() && detail != item.summary {
            for row in detail.lines() {
                lines.push(TranscriptLine {
                    kind: None,
                    text: format!("    {}", row.replace('\t', "    ")),
                });
            }
        }
        lines.push(TranscriptLine {
            kind: None,
            text: String::new(),
        });
    }

    if timeline.truncated {
        lines.push(TranscriptLine {
            kind: Some(TimelineItemKind::Note),
            text: "[Note]  transcript truncated".to_string(),
        });
    }
    lines
}

fn short_time(timestamp: &str) -> Option<String> {
    let parsed = super::parse_rfc3339(timestamp)?;
    Some(format!(
        "{:02}:{:02}:{:02}",
        parsed.hour(),
        parsed.minute(),
        parsed.second()
    ))
}

/// Parses one Codex rollout record.
pub fn parse_codex_log_value(value: &Value) -> Option<TimelineItem> {
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let line_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if line_type != "response_item" {
        // `event_msg` duplicates user prompts and carries token accounting only.
        return None;
    }

    let payload = value.get("payload").unwrap_or(&Value::Null);
    let payload_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match payload_type {
        "reasoning" => parse_reasoning(payload, timestamp),
        "message" => parse_message_item(payload, timestamp),
        "function_call" | "custom_tool_call" => {
            let name = payload
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(payload_type);
            let detail = payload
                .get("arguments")
                .or_else(|| payload.get("input"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Some(TimelineItem {
                kind: TimelineItemKind::ToolCall,
                call_id: call_id(payload),
                timestamp,
                summary: format!("{name}()"),
                detail,
            })
        }
        "function_call_output" | "custom_tool_call_output" => {
            let output = payload.get("output").unwrap_or(&Value::Null);
            let detail = match output.as_str() {
                Some(text) => text.trim_end().to_string(),
                None => serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string()),
            };
            Some(TimelineItem {
                kind: TimelineItemKind::ToolOutput,
                call_id: call_id(payload),
                timestamp,
                summary: first_non_empty_line(&detail).unwrap_or_else(|| "tool output".to_string()),
                detail,
            })
        }
        _ => None,
    }
}

fn call_id(payload: &Value) -> Option<String> {
    payload
        .get("call_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn parse_reasoning(payload: &Value, timestamp: Option<String>) -> Option<TimelineItem> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(summary) = payload.get("summary").and_then(|v| v.as_array()) {
        for entry in summary {
            if entry.get("type").and_then(|v| v.as_str()) != Some("summary_text") {
                continue;
            }
            if let Some(text) = entry.get("text").and_then(|v| v.as_str()) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }

    if parts.is_empty() {
        return None;
    }
    let detail = parts.join("\n\n");
    Some(TimelineItem {
        kind: TimelineItemKind::Thinking,
        call_id: None,
        timestamp,
        summary: first_non_empty_line(&detail).unwrap_or_else(|| "thinking".to_string()),
        detail,
    })
}

fn parse_message_item(payload: &Value, timestamp: Option<String>) -> Option<TimelineItem> {
    let role = payload.get("role").and_then(|v| v.as_str()).unwrap_or("");
    let content = payload.get("content").and_then(|v| v.as_array())?;

    let texts = content
        .iter()
        .filter(|item| {
            matches!(
                item.get("type").and_then(|v| v.as_str()),
                Some("input_text") | Some("output_text")
            )
        })
        .filter_map(|item| item.get("text").and_then(|v| v.as_str()))
        .collect::<Vec<_>>();
    let joined = texts.join("\n");
    if joined.trim().is_empty() || role == "developer" {
        return None;
    }
    if role == "user" && super::is_metadata_prompt(&joined) {
        return None;
    }

    let kind = match role {
        "assistant" => TimelineItemKind::Assistant,
        "user" => TimelineItemKind::User,
        _ => TimelineItemKind::Note,
    };
    Some(TimelineItem {
        kind,
        call_id: None,
        timestamp,
        summary: first_non_empty_line(&joined).unwrap_or_else(|| "(message)".to_string()),
        detail: joined,
    })
}

pub(crate) fn first_non_empty_line(text: &str) -> Option<String> {
    text.lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_event_msg_user_duplicates() {
        let value = serde_json::json!({
            "timestamp": "2026-02-18T21:45:57.764Z",
            "type": "event_msg",
            "payload": { "type": "user_message", "message": "hello" }
        });
        assert!(parse_codex_log_value(&value).is_none());
    }

    #[test]
    fn parses_user_message_response_item() {
        let value = serde_json::json!({
            "timestamp": "2026-02-18T21:45:57.764Z",
            "type": "response_item",
            "payload": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": "fix the tests\nplease" }]
            }
        });
        let item = parse_codex_log_value(&value).expect("item");
        assert_eq!(item.kind, TimelineItemKind::User);
        assert_eq!(item.summary, "fix the tests");
    }

    #[test]
    fn pairs_function_call_and_output_by_call_id() {
        let call = serde_json::json!({
            "type": "response_item",
            "payload": { "type": "function_call", "name": "shell", "call_id": "c1", "arguments": "{\"cmd\":\"ls\"}" }
        });
        let output = serde_json::json!({
            "type": "response_item",
            "payload": { "type": "function_call_output", "call_id": "c1", "output": "a.txt\nb.txt" }
        });
        let call = parse_codex_log_value(&call).expect("call");
        let output = parse_codex_log_value(&output).expect("output");
        assert_eq!(call.summary, "shell()");
        assert_eq!(call.call_id, output.call_id);
        assert_eq!(output.summary, "a.txt");
    }

    #[test]
    fn renders_headers_and_indented_detail() {
        let timeline = SessionTimeline {
            items: vec![TimelineItem {
                kind: TimelineItemKind::Assistant,
                call_id: None,
                timestamp: Some("2026-02-18T21:45:57Z".to_string()),
                summary: "done".to_string(),
                detail: "done\nall green".to_string(),
            }],
            warnings: 0,
            truncated: false,
        };
        let lines = timeline_to_lines(&timeline);
        assert_eq!(lines[0].text, "[Assistant] 21:45:57  done");
        assert_eq!(lines[0].kind, Some(TimelineItemKind::Assistant));
        assert_eq!(lines[1].text, "    done");
        assert_eq!(lines[2].text, "    all green");
    }
}
