mod prompt;

use crate::domain::{
    SessionDescriptor, SessionLocator, SessionSource, SessionTimeline, SourceNotice,
    TranscriptLine, timeline_to_lines,
};
use crate::infra::{RegistrySnapshot, SchedulerState};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::io;
use std::sync::Arc;
use thiserror::Error;

pub use prompt::PromptLine;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// Title bar, list borders and footer.
const LIST_CHROME_ROWS: usize = 4;
/// Title bar, transcript borders and footer.
const TRANSCRIPT_CHROME_ROWS: usize = 4;
pub const MAX_NOTICE_ROWS: usize = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceFilter {
    All,
    Only(SessionSource),
}

impl SourceFilter {
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Only(source) => source.label(),
        }
    }

    pub fn admits(self, source: SessionSource) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => only == source,
        }
    }

    /// All, then each source in declaration order, then back to All.
    fn next(self) -> Self {
        let position = match self {
            Self::All => 0,
            Self::Only(current) => SessionSource::ALL
                .iter()
                .position(|source| *source == current)
                .map_or(0, |index| index + 1),
        };
        SessionSource::ALL
            .get(position)
            .map_or(Self::All, |source| Self::Only(*source))
    }
}

/// The last registry snapshot the pager picked up.
#[derive(Clone, Debug, Default)]
pub struct ListData {
    pub sessions: Arc<[SessionDescriptor]>,
    pub notices: Vec<SourceNotice>,
    pub warnings: usize,
    pub generation: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchState {
    pub term: String,
    /// Row indices (list rows or transcript lines) that contain `term`.
    pub matches: Vec<usize>,
    pub cursor: usize,
}

impl SearchState {
    pub fn is_active(&self) -> bool {
        !self.term.is_empty()
    }

    pub fn current(&self) -> Option<usize> {
        self.matches.get(self.cursor).copied()
    }

    pub fn status(&self) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        if self.matches.is_empty() {
            return Some(format!("/{}: no matches", self.term));
        }
        Some(format!(
            "/{}: {}/{}",
            self.term,
            self.cursor + 1,
            self.matches.len()
        ))
    }

    fn step(&mut self, forward: bool) -> Option<usize> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.cursor = if forward {
            (self.cursor + 1) % len
        } else {
            (self.cursor + len - 1) % len
        };
        self.current()
    }

    /// Replaces the match list and puts the cursor on the first match at or after `from`,
    /// wrapping to the first match.
    fn rebuild(&mut self, matches: Vec<usize>, from: usize) {
        self.cursor = matches.iter().position(|row| *row >= from).unwrap_or(0);
        self.matches = matches;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PromptKind {
    Search,
    Filter,
}

#[derive(Clone, Debug)]
pub struct Prompt {
    pub kind: PromptKind,
    pub line: PromptLine,
    /// Filter text to restore when the prompt is cancelled.
    previous: String,
}

#[derive(Clone, Debug)]
pub struct ListView {
    pub source_filter: SourceFilter,
    pub text_filter: String,
    /// Indices into `ListData::sessions` that pass both filters, in display order.
    pub rows: Vec<usize>,
    pub selected: usize,
    pub scroll: usize,
    pub search: SearchState,
}

impl ListView {
    fn new() -> Self {
        Self {
            source_filter: SourceFilter::All,
            text_filter: String::new(),
            rows: Vec::new(),
            selected: 0,
            scroll: 0,
            search: SearchState::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TranscriptContent {
    Loading,
    Loaded {
        lines: Arc<[TranscriptLine]>,
        warnings: usize,
        truncated: bool,
    },
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct TranscriptView {
    pub session: SessionDescriptor,
    /// Ties a load result to the selection that asked for it.
    pub request_id: u64,
    pub content: TranscriptContent,
    pub scroll: usize,
    pub search: SearchState,
}

impl TranscriptView {
    fn lines(&self) -> &[TranscriptLine] {
        match &self.content {
            TranscriptContent::Loaded { lines, .. } => lines,
            TranscriptContent::Loading | TranscriptContent::Failed(_) => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub enum View {
    List,
    Transcript(TranscriptView),
}

#[derive(Clone, Debug)]
pub struct AppModel {
    pub data: ListData,
    pub scheduler_state: SchedulerState,
    pub list: ListView,
    pub view: View,
    pub prompt: Option<Prompt>,
    pub terminal_size: (u16, u16),
    pub help_open: bool,
    pub notice: Option<String>,
    next_request_id: u64,
}

impl Default for AppModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AppModel {
    pub fn new() -> Self {
        Self {
            data: ListData::default(),
            scheduler_state: SchedulerState::Idle,
            list: ListView::new(),
            view: View::List,
            prompt: None,
            terminal_size: (0, 0),
            help_open: false,
            notice: None,
            next_request_id: 0,
        }
    }

    pub fn with_terminal_size(mut self, width: u16, height: u16) -> Self {
        self.terminal_size = (width, height);
        self.clamp_scroll();
        self
    }

    /// Swaps in a fresh registry snapshot. Filters and search are re-applied and the selection
    /// stays on the same session id when that session is still visible.
    pub fn with_snapshot(mut self, snapshot: RegistrySnapshot) -> Self {
        let anchor = self.selected_session().map(|session| session.id.clone());
        self.data = ListData {
            sessions: snapshot.sessions,
            notices: snapshot.notices,
            warnings: snapshot.warnings,
            generation: snapshot.generation,
        };
        self.refresh_list(anchor);
        self
    }

    /// Hands a finished load to the transcript view. Returns false when the result belongs to a
    /// selection that is no longer open.
    pub fn apply_transcript(
        &mut self,
        request_id: u64,
        result: Result<SessionTimeline, String>,
    ) -> bool {
        let View::Transcript(view) = &mut self.view else {
            return false;
        };
        if view.request_id != request_id {
            return false;
        }
        view.content = match result {
            Ok(timeline) => TranscriptContent::Loaded {
                lines: timeline_to_lines(&timeline).into(),
                warnings: timeline.warnings,
                truncated: timeline.truncated,
            },
            Err(error) => TranscriptContent::Failed(error),
        };
        view.scroll = 0;
        view.search = SearchState::default();
        true
    }

    pub fn selected_session(&self) -> Option<&SessionDescriptor> {
        self.list
            .rows
            .get(self.list.selected)
            .and_then(|index| self.data.sessions.get(*index))
    }

    pub fn visible_notice_rows(&self) -> usize {
        self.data.notices.len().min(MAX_NOTICE_ROWS)
    }

    pub fn list_viewport_rows(&self) -> usize {
        usize::from(self.terminal_size.1)
            .saturating_sub(LIST_CHROME_ROWS + self.visible_notice_rows())
            .max(1)
    }

    pub fn transcript_viewport_rows(&self) -> usize {
        usize::from(self.terminal_size.1)
            .saturating_sub(TRANSCRIPT_CHROME_ROWS)
            .max(1)
    }

    /// Placeholder for an empty list.
    pub fn empty_label(&self) -> &'static str {
        if !self.data.sessions.is_empty() {
            return "no sessions match the current filter";
        }
        match self.scheduler_state {
            SchedulerState::Idle | SchedulerState::InitialScan => "Scanning…",
            SchedulerState::SteadyState | SchedulerState::Cancelled => {
                if self.data.notices.is_empty() {
                    "no sessions found"
                } else {
                    "no sessions (sources unavailable)"
                }
            }
        }
    }

    /// Keeps the selection inside the list viewport and the transcript inside its content.
    pub fn clamp_scroll(&mut self) {
        let rows = self.list_viewport_rows();
        let list = &mut self.list;
        if list.selected < list.scroll {
            list.scroll = list.selected;
        } else if list.selected >= list.scroll + rows {
            list.scroll = list.selected + 1 - rows;
        }
        list.scroll = list.scroll.min(list.rows.len().saturating_sub(rows));

        let rows = self.transcript_viewport_rows();
        if let View::Transcript(view) = &mut self.view {
            let max = view.lines().len().saturating_sub(rows);
            view.scroll = view.scroll.min(max);
        }
    }

    fn refresh_list(&mut self, anchor: Option<String>) {
        let sessions = &self.data.sessions;
        let needle = self.list.text_filter.to_lowercase();
        self.list.rows = sessions
            .iter()
            .enumerate()
            .filter(|(_, session)| self.list.source_filter.admits(session.source))
            .filter(|(_, session)| needle.is_empty() || session_matches(session, &needle))
            .map(|(index, _)| index)
            .collect();

        if let Some(id) = anchor {
            if let Some(pos) = self
                .list
                .rows
                .iter()
                .position(|index| sessions.get(*index).is_some_and(|s| s.id == id))
            {
                self.list.selected = pos;
            }
        }
        self.list.selected = self
            .list
            .selected
            .min(self.list.rows.len().saturating_sub(1));

        if self.list.search.is_active() {
            let matches = self.list_matches(&self.list.search.term.to_lowercase());
            self.list.search.rebuild(matches, self.list.selected);
        }
        self.clamp_scroll();
    }

    fn list_matches(&self, needle: &str) -> Vec<usize> {
        self.list
            .rows
            .iter()
            .enumerate()
            .filter(|(_, index)| {
                self.data
                    .sessions
                    .get(**index)
                    .is_some_and(|session| session_matches(session, needle))
            })
            .map(|(row, _)| row)
            .collect()
    }

    fn select_row(&mut self, row: usize) {
        self.list.selected = row.min(self.list.rows.len().saturating_sub(1));
        self.clamp_scroll();
    }

    fn move_selection(&mut self, delta: isize) {
        let target = self.list.selected.saturating_add_signed(delta);
        self.select_row(target);
    }
}

fn session_matches(session: &SessionDescriptor, needle: &str) -> bool {
    if session.display_title().to_lowercase().contains(needle) {
        return true;
    }
    if session.id.to_lowercase().contains(needle) {
        return true;
    }
    session
        .summary
        .project
        .as_ref()
        .is_some_and(|project| project.to_string_lossy().to_lowercase().contains(needle))
}

#[derive(Clone, Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize(u16, u16),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppCommand {
    None,
    Quit,
    LoadTranscript {
        request_id: u64,
        locator: SessionLocator,
    },
}

pub fn update(model: AppModel, event: AppEvent) -> (AppModel, AppCommand) {
    match event {
        AppEvent::Key(key) => update_on_key(model, key),
        AppEvent::Resize(width, height) => (
            model.with_terminal_size(width, height),
            AppCommand::None,
        ),
    }
}

fn update_on_key(model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    let mut model = model;
    model.notice = None;

    if key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
    {
        return (model, AppCommand::Quit);
    }

    if model.help_open {
        if matches!(
            key.code,
            KeyCode::Esc | KeyCode::F(1) | KeyCode::Char('?') | KeyCode::Char('q')
        ) {
            model.help_open = false;
        }
        return (model, AppCommand::None);
    }

    if model.prompt.is_some() {
        return (update_prompt(model, key), AppCommand::None);
    }

    if matches!(model.view, View::List) {
        update_list(model, key)
    } else {
        (update_transcript(model, key), AppCommand::None)
    }
}

fn update_prompt(mut model: AppModel, key: KeyEvent) -> AppModel {
    let Some(mut prompt) = model.prompt.take() else {
        return model;
    };

    match key.code {
        KeyCode::Esc => {
            if prompt.kind == PromptKind::Filter {
                set_text_filter(&mut model, prompt.previous);
            }
            return model;
        }
        KeyCode::Enter => {
            let text = prompt.line.text().trim().to_string();
            match prompt.kind {
                PromptKind::Filter => set_text_filter(&mut model, text),
                PromptKind::Search => run_search(&mut model, text),
            }
            return model;
        }
        KeyCode::Backspace => prompt.line.backspace(),
        KeyCode::Delete => prompt.line.delete(),
        KeyCode::Left => prompt.line.left(),
        KeyCode::Right => prompt.line.right(),
        KeyCode::Home => prompt.line.home(),
        KeyCode::End => prompt.line.end(),
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            prompt.line.insert(ch);
        }
        _ => {}
    }

    if prompt.kind == PromptKind::Filter {
        set_text_filter(&mut model, prompt.line.text().trim().to_string());
    }
    model.prompt = Some(prompt);
    model
}

fn set_text_filter(model: &mut AppModel, text: String) {
    if model.list.text_filter == text {
        return;
    }
    let anchor = model.selected_session().map(|session| session.id.clone());
    model.list.text_filter = text;
    model.refresh_list(anchor);
}

fn run_search(model: &mut AppModel, term: String) {
    let needle = term.to_lowercase();
    if let View::Transcript(view) = &mut model.view {
        if term.is_empty() {
            view.search = SearchState::default();
            return;
        }
        let matches = view
            .lines()
            .iter()
            .enumerate()
            .filter(|(_, line)| line.text.to_lowercase().contains(&needle))
            .map(|(index, _)| index)
            .collect();
        view.search.term = term;
        view.search.rebuild(matches, view.scroll);
        match view.search.current() {
            Some(line) => view.scroll = line,
            None => model.notice = Some(format!("no lines match \"{}\"", view.search.term)),
        }
        model.clamp_scroll();
        return;
    }

    if term.is_empty() {
        model.list.search = SearchState::default();
        return;
    }
    let matches = model.list_matches(&needle);
    model.list.search.term = term;
    model.list.search.rebuild(matches, model.list.selected);
    match model.list.search.current() {
        Some(row) => model.select_row(row),
        None => {
            model.notice = Some(format!("no sessions match \"{}\"", model.list.search.term));
        }
    }
}

fn open_prompt(model: &mut AppModel, kind: PromptKind) {
    let previous = model.list.text_filter.clone();
    let line = match kind {
        PromptKind::Filter => PromptLine::with_text(&previous),
        PromptKind::Search => PromptLine::new(),
    };
    model.prompt = Some(Prompt {
        kind,
        line,
        previous,
    });
}

fn update_list(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    let page = model.list_viewport_rows() as isize;
    match key.code {
        KeyCode::Char('q') => return (model, AppCommand::Quit),
        KeyCode::Up | KeyCode::Char('k') => model.move_selection(-1),
        KeyCode::Down | KeyCode::Char('j') => model.move_selection(1),
        KeyCode::PageUp => model.move_selection(-page),
        KeyCode::PageDown => model.move_selection(page),
        KeyCode::Home | KeyCode::Char('g') => model.select_row(0),
        KeyCode::End | KeyCode::Char('G') => model.select_row(usize::MAX),
        KeyCode::Enter => return open_selected(model),
        KeyCode::Char('/') => open_prompt(&mut model, PromptKind::Search),
        KeyCode::Char('f') => open_prompt(&mut model, PromptKind::Filter),
        KeyCode::Char('n') | KeyCode::Char('N') => {
            let forward = key.code == KeyCode::Char('n');
            if let Some(row) = model.list.search.step(forward) {
                model.select_row(row);
            }
        }
        KeyCode::Tab => {
            let anchor = model.selected_session().map(|session| session.id.clone());
            model.list.source_filter = model.list.source_filter.next();
            model.refresh_list(anchor);
        }
        KeyCode::Esc => {
            let anchor = model.selected_session().map(|session| session.id.clone());
            model.list.search = SearchState::default();
            model.list.text_filter.clear();
            model.list.source_filter = SourceFilter::All;
            model.refresh_list(anchor);
        }
        KeyCode::F(1) | KeyCode::Char('?') => model.help_open = true,
        _ => {}
    }
    (model, AppCommand::None)
}

fn open_selected(mut model: AppModel) -> (AppModel, AppCommand) {
    let Some(session) = model.selected_session().cloned() else {
        return (model, AppCommand::None);
    };
    model.next_request_id += 1;
    let request_id = model.next_request_id;
    let locator = session.locator.clone();
    model.view = View::Transcript(TranscriptView {
        session,
        request_id,
        content: TranscriptContent::Loading,
        scroll: 0,
        search: SearchState::default(),
    });
    (model, AppCommand::LoadTranscript {
        request_id,
        locator,
    })
}

fn update_transcript(mut model: AppModel, key: KeyEvent) -> AppModel {
    let page = model.transcript_viewport_rows();
    let View::Transcript(view) = &mut model.view else {
        return model;
    };

    match key.code {
        KeyCode::Esc | KeyCode::Backspace | KeyCode::Char('q') => {
            model.view = View::List;
            return model;
        }
        KeyCode::Up | KeyCode::Char('k') => view.scroll = view.scroll.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => view.scroll = view.scroll.saturating_add(1),
        KeyCode::PageUp => view.scroll = view.scroll.saturating_sub(page),
        KeyCode::PageDown => view.scroll = view.scroll.saturating_add(page),
        KeyCode::Home | KeyCode::Char('g') => view.scroll = 0,
        KeyCode::End | KeyCode::Char('G') => view.scroll = usize::MAX,
        KeyCode::Char('n') | KeyCode::Char('N') => {
            if let Some(line) = view.search.step(key.code == KeyCode::Char('n')) {
                view.scroll = line;
            }
        }
        KeyCode::Char('/') => {
            if matches!(view.content, TranscriptContent::Loaded { .. }) {
                open_prompt(&mut model, PromptKind::Search);
            }
        }
        KeyCode::F(1) | KeyCode::Char('?') => model.help_open = true,
        _ => {}
    }
    model.clamp_scroll();
    model
}
