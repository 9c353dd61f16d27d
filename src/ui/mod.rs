mod theme;

use crate::app::{
    AppModel, MAX_NOTICE_ROWS, Prompt, PromptKind, SearchState, TranscriptContent, TranscriptView,
    View,
};
use crate::domain::{SessionDescriptor, TimelineItemKind, TranscriptLine};
use crate::infra::SchedulerState;
use humansize::{DECIMAL, format_size};
use ratatui::prelude::*;
use ratatui::widgets::*;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::macros::format_description;
use unicode_width::UnicodeWidthStr;

const PROJECT_COL: usize = 18;
const TURNS_COL: usize = 5;
const DURATION_COL: usize = 7;
const SIZE_COL: usize = 8;
const COLUMN_GAP: &str = "  ";

pub fn render(frame: &mut Frame, model: &AppModel) {
    let area = frame.area();
    if area.width == 0 || area.height == 0 {
        return;
    }

    match &model.view {
        View::List => render_list(frame, area, model),
        View::Transcript(view) => render_transcript(frame, area, model, view),
    }

    if model.help_open {
        render_help_overlay(frame, area);
    }
}

fn render_list(frame: &mut Frame, area: Rect, model: &AppModel) {
    let notice_rows = model.visible_notice_rows() as u16;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(notice_rows),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    render_bar(frame, chunks[0], list_bar_text(model));
    render_notices(frame, chunks[1], model);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(" Sessions ");

    if model.list.rows.is_empty() {
        let label = Paragraph::new(model.empty_label())
            .style(Style::default().fg(theme::MUTED))
            .block(block);
        frame.render_widget(label, chunks[2]);
    } else {
        let inner_height = chunks[2].height.saturating_sub(2) as usize;
        let max_width = (chunks[2].width as usize).saturating_sub(4);
        let start = model.list.scroll.min(model.list.rows.len());
        let end = (start + inner_height).min(model.list.rows.len());
        let current_match = model.list.search.current();

        let items: Vec<ListItem> = (start..end)
            .filter_map(|row| {
                let session = model.data.sessions.get(model.list.rows[row])?;
                let item = session_list_item(session, max_width);
                Some(if current_match != Some(row) && model.list.search.matches.contains(&row) {
                    item.style(Style::default().bg(theme::MATCH_BG))
                } else {
                    item
                })
            })
            .collect();

        let list = List::new(items)
            .block(block)
            .highlight_style(
                Style::default()
                    .fg(theme::ACCENT)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▸ ");
        let mut state =
            ListState::default().with_selected(model.list.selected.checked_sub(start));
        frame.render_stateful_widget(list, chunks[2], &mut state);
    }

    match &model.prompt {
        Some(prompt) => render_prompt(frame, chunks[3], prompt),
        None => {
            let mut parts = vec![
                "j/k move  Enter open  / search  n/N next/prev  f filter  Tab source  Esc clear  ? help  q quit"
                    .to_string(),
            ];
            if let Some(status) = model.list.search.status() {
                parts.push(status);
            }
            if model.data.warnings > 0 {
                parts.push(format!("warnings: {}", model.data.warnings));
            }
            frame.render_widget(footer_paragraph(parts, model.notice.as_deref()), chunks[3]);
        }
    }
}

fn list_bar_text(model: &AppModel) -> String {
    let total = model.data.sessions.len();
    let shown = model.list.rows.len();
    let noun = if total == 1 { "session" } else { "sessions" };
    let mut text = if shown == total {
        format!("{total} {noun}")
    } else {
        format!("{shown}/{total} {noun}")
    };
    text.push_str(&format!("  ·  source: {}", model.list.source_filter.label()));
    if !model.list.text_filter.is_empty() {
        text.push_str(&format!("  ·  filter: {}", model.list.text_filter));
    }
    if matches!(
        model.scheduler_state,
        SchedulerState::Idle | SchedulerState::InitialScan
    ) {
        text.push_str("  ·  scanning…");
    }
    text
}

fn render_bar(frame: &mut Frame, area: Rect, text: String) {
    let base = Style::default().fg(theme::FG).bg(theme::BAR_BG);
    let name = " replaybox ";
    let used = UnicodeWidthStr::width(name) + 1;
    let text = truncate_end(&text, (area.width as usize).saturating_sub(used));
    let spans = vec![
        Span::styled(
            name,
            Style::default()
                .fg(theme::ACCENT)
                .bg(theme::BAR_BG)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(" ", base),
        Span::styled(text, base),
    ];
    frame.render_widget(Paragraph::new(Line::from(spans)).style(base), area);
}

fn render_notices(frame: &mut Frame, area: Rect, model: &AppModel) {
    if area.height == 0 {
        return;
    }
    let width = area.width as usize;
    let hidden = model.data.notices.len().saturating_sub(MAX_NOTICE_ROWS);
    let lines: Vec<Line> = model
        .data
        .notices
        .iter()
        .take(MAX_NOTICE_ROWS)
        .enumerate()
        .map(|(index, notice)| {
            let mut text = format!("! {}", notice.message);
            if hidden > 0 && index + 1 == MAX_NOTICE_ROWS {
                text.push_str(&format!("  (+{hidden} more)"));
            }
            Line::styled(truncate_end(&text, width), Style::default().fg(theme::WARN))
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), area);
}

fn render_prompt(frame: &mut Frame, area: Rect, prompt: &Prompt) {
    let label = match prompt.kind {
        PromptKind::Search => "/",
        PromptKind::Filter => "filter: ",
    };
    let text = prompt.line.text();
    let line = Line::from(vec![
        Span::styled(label, Style::default().fg(theme::ACCENT)),
        Span::styled(text.to_string(), Style::default().fg(theme::FG)),
    ]);
    frame.render_widget(Paragraph::new(line), area);

    let before_cursor: String = text.chars().take(prompt.line.cursor_chars()).collect();
    let offset = UnicodeWidthStr::width(label) + UnicodeWidthStr::width(before_cursor.as_str());
    let x = area
        .x
        .saturating_add(offset.min(usize::from(u16::MAX)) as u16)
        .min(area.right().saturating_sub(1));
    frame.set_cursor_position((x, area.y));
}

fn footer_paragraph(parts: Vec<String>, notice: Option<&str>) -> Paragraph<'static> {
    let mut spans = vec![Span::styled(
        parts.join("  ·  "),
        Style::default().fg(theme::DIM),
    )];
    if let Some(message) = notice.filter(|message| !message.trim().is_empty()) {
        spans.push(Span::styled("  ·  ", Style::default().fg(theme::DIM)));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().fg(theme::WARN),
        ));
    }
    Paragraph::new(Line::from(spans))
}

fn session_list_item(session: &SessionDescriptor, max_width: usize) -> ListItem<'static> {
    if max_width == 0 {
        return ListItem::new(Line::from(""));
    }

    let lead = format!(
        "{} {}",
        session.source.tag(),
        format_timestamp(session.updated_at)
    );
    let lead_width = UnicodeWidthStr::width(lead.as_str()) + COLUMN_GAP.len();
    let title = session.display_title();

    let right_width = PROJECT_COL + TURNS_COL + DURATION_COL + SIZE_COL + COLUMN_GAP.len() * 4;
    let min_title = 12usize;
    if lead_width + right_width + min_title > max_width {
        let available = max_width.saturating_sub(lead_width);
        return ListItem::new(Line::from(vec![
            Span::styled(lead, Style::default().fg(theme::MUTED)),
            Span::raw(COLUMN_GAP),
            Span::raw(truncate_end(&title, available)),
        ]));
    }

    let title_width = max_width - lead_width - right_width;
    let project = session.project_name().unwrap_or_default();
    let turns = session
        .summary
        .turn_count
        .map(|turns| format!("{turns}t"))
        .unwrap_or_default();
    let duration = session
        .summary
        .duration
        .map(format_duration)
        .unwrap_or_default();
    let size = session
        .summary
        .size_bytes
        .map(|bytes| format_size(bytes, DECIMAL))
        .unwrap_or_default();

    let dim = Style::default().fg(theme::DIM);
    ListItem::new(Line::from(vec![
        Span::styled(lead, Style::default().fg(theme::MUTED)),
        Span::raw(COLUMN_GAP),
        Span::raw(pad_right(&truncate_end(&title, title_width), title_width)),
        Span::raw(COLUMN_GAP),
        Span::styled(pad_right(&truncate_end(&project, PROJECT_COL), PROJECT_COL), dim),
        Span::raw(COLUMN_GAP),
        Span::styled(pad_left(&turns, TURNS_COL), dim),
        Span::raw(COLUMN_GAP),
        Span::styled(pad_left(&duration, DURATION_COL), dim),
        Span::raw(COLUMN_GAP),
        Span::styled(pad_left(&size, SIZE_COL), dim),
    ]))
}

fn render_transcript(frame: &mut Frame, area: Rect, model: &AppModel, view: &TranscriptView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    let session = &view.session;
    render_bar(
        frame,
        chunks[0],
        format!(
            "{}  ·  {}  ·  {}",
            session.source.label(),
            session.id,
            session.locator.display()
        ),
    );

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::BORDER))
        .title(format!(
            " {} ",
            truncate_end(
                &session.display_title(),
                (chunks[1].width as usize).saturating_sub(6)
            )
        ));

    let mut parts = vec!["j/k scroll  PgUp/PgDn page  / search  n/N next/prev  Esc back".to_string()];
    match &view.content {
        TranscriptContent::Loading => {
            let body = Paragraph::new("loading…")
                .style(Style::default().fg(theme::MUTED))
                .block(block);
            frame.render_widget(body, chunks[1]);
        }
        TranscriptContent::Failed(message) => {
            let body = Paragraph::new(format!("failed to load transcript: {message}"))
                .style(Style::default().fg(theme::ERROR))
                .wrap(Wrap { trim: false })
                .block(block);
            frame.render_widget(body, chunks[1]);
        }
        TranscriptContent::Loaded {
            lines,
            warnings,
            truncated,
        } => {
            let height = chunks[1].height.saturating_sub(2) as usize;
            let start = view.scroll.min(lines.len());
            let end = (start + height).min(lines.len());
            let rendered: Vec<Line> = lines[start..end]
                .iter()
                .enumerate()
                .map(|(offset, line)| transcript_line(line, start + offset, &view.search))
                .collect();
            frame.render_widget(Paragraph::new(rendered).block(block), chunks[1]);

            if !lines.is_empty() {
                parts.push(format!("line {}/{}", start + 1, lines.len()));
            }
            if *warnings > 0 {
                parts.push(format!("parse warnings: {warnings}"));
            }
            if *truncated {
                parts.push("truncated".to_string());
            }
        }
    }

    match &model.prompt {
        Some(prompt) => render_prompt(frame, chunks[2], prompt),
        None => {
            if let Some(status) = view.search.status() {
                parts.push(status);
            }
            frame.render_widget(footer_paragraph(parts, model.notice.as_deref()), chunks[2]);
        }
    }
}

fn transcript_line(line: &TranscriptLine, index: usize, search: &SearchState) -> Line<'static> {
    let style = match line.kind {
        Some(kind) => kind_style(kind),
        None => Style::default().fg(theme::FG),
    };
    let line_out = Line::styled(line.text.clone(), style);
    if search.current() == Some(index) {
        line_out.patch_style(Style::default().add_modifier(Modifier::REVERSED))
    } else if search.matches.binary_search(&index).is_ok() {
        line_out.patch_style(Style::default().bg(theme::MATCH_BG))
    } else {
        line_out
    }
}

fn kind_style(kind: TimelineItemKind) -> Style {
    match kind {
        TimelineItemKind::User => Style::default()
            .fg(theme::USER)
            .add_modifier(Modifier::BOLD),
        TimelineItemKind::Assistant => Style::default().fg(theme::ASSISTANT),
        TimelineItemKind::Thinking => Style::default().fg(theme::THINKING),
        TimelineItemKind::ToolCall | TimelineItemKind::ToolOutput => {
            Style::default().fg(theme::TOOL)
        }
        TimelineItemKind::Note => Style::default().fg(theme::DIM),
    }
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup = centered_rect(70, 80, area);
    frame.render_widget(Clear, popup);

    let text = vec![
        Line::from("Session list"),
        Line::from("  - ↑/↓ or j/k: move   PgUp/PgDn: page   Home/End or g/G: jump"),
        Line::from("  - Enter: open transcript"),
        Line::from("  - /: search   n/N: next/previous match (wraps)"),
        Line::from("  - f: filter by text   Tab: cycle source (All/OpenCode/Claude/Codex)"),
        Line::from("  - Esc: clear filters and search"),
        Line::from(""),
        Line::from("Transcript"),
        Line::from("  - ↑/↓ or j/k: scroll   PgUp/PgDn: page   Home/End: jump"),
        Line::from("  - /: search   n/N: next/previous match"),
        Line::from("  - Esc, q or Backspace: back to the list"),
        Line::from(""),
        Line::from("Global"),
        Line::from("  - New OpenCode sessions appear while the viewer is open"),
        Line::from("  - q (list), Ctrl+C or Ctrl+Q: quit"),
        Line::from("  - F1 or ?: toggle this help"),
    ];

    let paragraph = Paragraph::new(text).wrap(Wrap { trim: false }).block(
        Block::default()
            .borders(Borders::ALL)
            .padding(Padding::horizontal(1))
            .title("Help (F1 or ? to close)"),
    );
    frame.render_widget(paragraph, popup);
}

fn format_timestamp(value: SystemTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from(value)
        .format(&format)
        .unwrap_or_else(|_| "????-??-?? ??:??".to_string())
}

fn format_duration(duration: Duration) -> String {
    let total_s = duration.as_secs();
    if total_s < 60 {
        return format!("{total_s}s");
    }
    if total_s < 3_600 {
        return format!("{}m {:02}s", total_s / 60, total_s % 60);
    }
    let total_m = total_s / 60;
    if total_m < 24 * 60 {
        return format!("{}h {:02}m", total_m / 60, total_m % 60);
    }
    format!("{}d {:02}h", total_m / (24 * 60), (total_m / 60) % 24)
}

fn pad_left(text: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(text);
    format!("{}{}", " ".repeat(width.saturating_sub(current)), text)
}

fn pad_right(text: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(text);
    format!("{}{}", text, " ".repeat(width.saturating_sub(current)))
}

fn truncate_end(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let ellipsis = "…";
    let available = max_width.saturating_sub(UnicodeWidthStr::width(ellipsis));
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > available {
            break;
        }
        used += width;
        out.push(ch);
    }
    out.push_str(ellipsis);
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SessionLocator, SessionSource, SourceNotice, SummaryFields};
    use crate::infra::{RegistrySnapshot, RegistryStamp};
    use ratatui::backend::TestBackend;
    use ratatui::buffer::Buffer;
    use std::path::PathBuf;

    fn buffer_text(buffer: &Buffer) -> String {
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn draw(model: &AppModel, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("terminal");
        terminal.draw(|frame| render(frame, model)).expect("draw");
        buffer_text(terminal.backend().buffer())
    }

    fn descriptor(id: &str, title: &str) -> SessionDescriptor {
        SessionDescriptor {
            id: id.to_string(),
            source: SessionSource::PrimaryTree,
            updated_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            locator: SessionLocator::File {
                path: PathBuf::from(format!("/tmp/{id}.jsonl")),
            },
            summary: SummaryFields {
                title: Some(title.to_string()),
                project: Some(PathBuf::from("/work/replaybox")),
                turn_count: Some(7),
                duration: Some(Duration::from_secs(125)),
                size_bytes: Some(2_048),
            },
        }
    }

    fn snapshot(sessions: Vec<SessionDescriptor>, notices: Vec<SourceNotice>) -> RegistrySnapshot {
        RegistrySnapshot {
            sessions: sessions.into(),
            generation: 1,
            notices,
            warnings: 2,
            stamp: RegistryStamp::default(),
        }
    }

    #[test]
    fn list_renders_columns_and_footer_warnings() {
        let mut model = AppModel::new()
            .with_terminal_size(120, 12)
            .with_snapshot(snapshot(vec![descriptor("s1", "Fix the flaky test")], Vec::new()));
        model.scheduler_state = SchedulerState::SteadyState;

        let screen = draw(&model, 120, 12);
        assert!(screen.contains("1 session  ·"));
        assert!(screen.contains("cl 2023-11-14 22:13"));
        assert!(screen.contains("Fix the flaky test"));
        assert!(screen.contains("replaybox"));
        assert!(screen.contains("7t"));
        assert!(screen.contains("2m 05s"));
        assert!(screen.contains("2.05 kB"));
        assert!(screen.contains("warnings: 2"));
        assert!(!screen.contains("scanning"));
    }

    #[test]
    fn bar_counts_sessions_in_singular_and_plural() {
        let mut model = AppModel::new().with_terminal_size(120, 12);
        model.scheduler_state = SchedulerState::SteadyState;
        assert!(list_bar_text(&model).starts_with("0 sessions"));

        let model = model.with_snapshot(snapshot(vec![descriptor("s1", "one")], Vec::new()));
        assert!(list_bar_text(&model).starts_with("1 session  ·"));

        let model = model.with_snapshot(snapshot(
            vec![descriptor("s1", "one"), descriptor("s2", "two")],
            Vec::new(),
        ));
        assert!(list_bar_text(&model).starts_with("2 sessions"));
    }

    #[test]
    fn empty_list_explains_itself() {
        let model = AppModel::new().with_terminal_size(80, 10);
        assert!(draw(&model, 80, 10).contains("Scanning…"));

        let notice = SourceNotice {
            source: SessionSource::Store,
            message: "OpenCode store not found: /nope.db".to_string(),
        };
        let mut model = model.with_snapshot(snapshot(Vec::new(), vec![notice]));
        model.scheduler_state = SchedulerState::SteadyState;
        let screen = draw(&model, 80, 10);
        assert!(screen.contains("no sessions (sources unavailable)"));
        assert!(screen.contains("! OpenCode store not found"));
    }

    #[test]
    fn truncate_end_respects_display_width() {
        assert_eq!(truncate_end("hello", 10), "hello");
        assert_eq!(truncate_end("hello world", 6), "hello…");
        assert_eq!(truncate_end("日本語テキスト", 5), "日本…");
        assert_eq!(truncate_end("abc", 0), "");
    }

    #[test]
    fn durations_are_compact() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 02m");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "1d 01h");
    }
}
