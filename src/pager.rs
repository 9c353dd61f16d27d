use crate::app::{self, AppCommand, AppError, AppEvent, AppModel};
use crate::domain::{SessionLocator, SessionTimeline};
use crate::infra::{RegistryStamp, ReplayDriver, SchedulerState, SessionRegistry};
use crate::ui;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::Backend;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{Sender, channel};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Longest the loop waits for input before looking at the registry again.
pub const INPUT_POLL: Duration = Duration::from_millis(100);

pub trait InputSource {
    /// Waits up to `timeout` for the next terminal event.
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<Event>>;
}

pub struct CrosstermInput;

impl InputSource for CrosstermInput {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<Event>> {
        if event::poll(timeout)? {
            event::read().map(Some)
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug)]
struct TranscriptSignal {
    request_id: u64,
    result: Result<SessionTimeline, String>,
}

/// The render loop. It owns the terminal; the registry and scheduler are only ever read
/// without blocking.
pub struct Pager {
    registry: Arc<SessionRegistry>,
    scheduler_state: watch::Receiver<SchedulerState>,
    replay: Arc<dyn ReplayDriver>,
}

impl Pager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        scheduler_state: watch::Receiver<SchedulerState>,
        replay: Arc<dyn ReplayDriver>,
    ) -> Self {
        Self {
            registry,
            scheduler_state,
            replay,
        }
    }

    pub fn run<B: Backend, I: InputSource>(
        &self,
        terminal: &mut Terminal<B>,
        input: &mut I,
        model: &mut AppModel,
    ) -> Result<(), AppError> {
        let (replay_tx, replay_rx) = channel::<TranscriptSignal>();
        let mut seen: Option<RegistryStamp> = None;
        let mut dirty = true;

        loop {
            while let Ok(signal) = replay_rx.try_recv() {
                if model.apply_transcript(signal.request_id, signal.result) {
                    dirty = true;
                } else {
                    debug!(request_id = signal.request_id, "dropped stale transcript");
                }
            }

            let state = *self.scheduler_state.borrow();
            if state != model.scheduler_state {
                model.scheduler_state = state;
                dirty = true;
            }

            if seen != Some(self.registry.stamp()) {
                // Contention means the scheduler is merging; the next tick will catch up.
                if let Some(snapshot) = self.registry.try_snapshot() {
                    seen = Some(snapshot.stamp);
                    *model = std::mem::take(model).with_snapshot(snapshot);
                    dirty = true;
                }
            }

            if dirty {
                model.clamp_scroll();
                terminal.draw(|frame| ui::render(frame, model))?;
                dirty = false;
            }

            let Some(event) = input.next_event(INPUT_POLL)? else {
                continue;
            };
            let event = match event {
                Event::Key(key) if key.kind != KeyEventKind::Release => AppEvent::Key(key),
                Event::Resize(width, height) => AppEvent::Resize(width, height),
                _ => continue,
            };

            let (next, command) = app::update(std::mem::take(model), event);
            *model = next;
            dirty = true;
            match command {
                AppCommand::None => {}
                AppCommand::Quit => return Ok(()),
                AppCommand::LoadTranscript {
                    request_id,
                    locator,
                } => spawn_replay(
                    Arc::clone(&self.replay),
                    request_id,
                    locator,
                    replay_tx.clone(),
                ),
            }
        }
    }
}

fn spawn_replay(
    driver: Arc<dyn ReplayDriver>,
    request_id: u64,
    locator: SessionLocator,
    tx: Sender<TranscriptSignal>,
) {
    std::thread::spawn(move || {
        let result = driver.load(&locator).map_err(|error| {
            warn!(%error, locator = %locator.display(), "transcript load failed");
            error.to_string()
        });
        let _ = tx.send(TranscriptSignal { request_id, result });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{TranscriptContent, View};
    use crate::domain::{
        SessionDescriptor, SessionSource, SummaryFields, TimelineItem, TimelineItemKind,
    };
    use crate::infra::{
        AggregationOptions, AggregationScheduler, ReplayError, ScanError, ScanOutput, SourceReader,
        SourceSet,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::backend::TestBackend;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::time::{Instant, SystemTime};

    enum Step {
        Key(KeyCode, KeyModifiers),
        Pause(Duration),
    }

    struct ScriptedInput {
        steps: VecDeque<Step>,
    }

    impl ScriptedInput {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl InputSource for ScriptedInput {
        fn next_event(&mut self, _timeout: Duration) -> io::Result<Option<Event>> {
            match self.steps.pop_front() {
                Some(Step::Key(code, modifiers)) => {
                    Ok(Some(Event::Key(KeyEvent::new(code, modifiers))))
                }
                Some(Step::Pause(pause)) => {
                    std::thread::sleep(pause);
                    Ok(None)
                }
                None => Err(io::Error::other("input script exhausted")),
            }
        }
    }

    fn key(ch: char) -> Step {
        Step::Key(KeyCode::Char(ch), KeyModifiers::NONE)
    }

    fn ctrl_c() -> Step {
        Step::Key(KeyCode::Char('c'), KeyModifiers::CONTROL)
    }

    fn pauses(count: usize) -> Vec<Step> {
        (0..count)
            .map(|_| Step::Pause(Duration::from_millis(40)))
            .collect()
    }

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>()
    }

    fn descriptor(id: &str, title: &str, secs: u64) -> SessionDescriptor {
        SessionDescriptor {
            id: id.to_string(),
            source: SessionSource::Store,
            updated_at: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            locator: SessionLocator::StoreRow {
                db_path: PathBuf::from("/tmp/opencode.db"),
                session_id: id.to_string(),
            },
            summary: SummaryFields {
                title: Some(title.to_string()),
                ..SummaryFields::default()
            },
        }
    }

    struct SlowReader(Duration);

    impl SourceReader for SlowReader {
        fn source(&self) -> SessionSource {
            SessionSource::PrimaryTree
        }

        fn scan(&self) -> Result<ScanOutput, ScanError> {
            std::thread::sleep(self.0);
            Ok(ScanOutput::default())
        }
    }

    struct CannedReplay;

    impl ReplayDriver for CannedReplay {
        fn load(&self, _locator: &SessionLocator) -> Result<SessionTimeline, ReplayError> {
            let item = |summary: &str| TimelineItem {
                kind: TimelineItemKind::Assistant,
                call_id: None,
                timestamp: None,
                summary: summary.to_string(),
                detail: String::new(),
            };
            Ok(SessionTimeline {
                items: vec![item("needle one"), item("haystack"), item("needle two")],
                warnings: 0,
                truncated: false,
            })
        }
    }

    fn steady_scheduler() -> (watch::Sender<SchedulerState>, watch::Receiver<SchedulerState>) {
        watch::channel(SchedulerState::SteadyState)
    }

    #[test]
    fn quit_does_not_wait_for_a_slow_scan() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let registry = Arc::new(SessionRegistry::new());
        let slow: Arc<dyn SourceReader> = Arc::new(SlowReader(Duration::from_secs(3)));
        let sources = SourceSet {
            primary: Some(slow),
            ..SourceSet::default()
        };
        let scheduler = AggregationScheduler::start(
            runtime.handle(),
            Arc::clone(&registry),
            sources,
            AggregationOptions::default(),
        );
        let pager = Pager::new(registry, scheduler.subscribe(), Arc::new(CannedReplay));

        let mut terminal = Terminal::new(TestBackend::new(80, 20)).expect("terminal");
        let mut input = ScriptedInput::new(vec![Step::Pause(Duration::from_millis(50)), key('q')]);
        let mut model = AppModel::new().with_terminal_size(80, 20);

        let started = Instant::now();
        pager
            .run(&mut terminal, &mut input, &mut model)
            .expect("run");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            model.scheduler_state,
            SchedulerState::Idle | SchedulerState::InitialScan
        ));
        assert!(screen(&terminal).contains("Scanning…"));

        runtime.shutdown_background();
    }

    #[test]
    fn registry_changes_show_up_while_running() {
        let registry = Arc::new(SessionRegistry::new());
        registry.merge(vec![descriptor("s1", "first session", 100)], true);
        let (_state_tx, state_rx) = steady_scheduler();
        let pager = Pager::new(Arc::clone(&registry), state_rx, Arc::new(CannedReplay));

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(60));
                registry.merge(vec![descriptor("s2", "arrived later", 200)], true);
            })
        };

        let mut steps = pauses(8);
        steps.push(ctrl_c());
        let mut input = ScriptedInput::new(steps);
        let mut terminal = Terminal::new(TestBackend::new(100, 16)).expect("terminal");
        let mut model = AppModel::new().with_terminal_size(100, 16);
        pager
            .run(&mut terminal, &mut input, &mut model)
            .expect("run");
        writer.join().expect("writer");

        assert_eq!(model.data.sessions.len(), 2);
        assert_eq!(model.data.sessions[0].id, "s2");
        // Selection stays on the session that was selected before the refresh.
        assert_eq!(model.selected_session().map(|s| s.id.as_str()), Some("s1"));
        assert!(screen(&terminal).contains("arrived later"));
    }

    #[test]
    fn opened_transcript_loads_off_thread_and_search_wraps() {
        let registry = Arc::new(SessionRegistry::new());
        registry.merge(vec![descriptor("s1", "first session", 100)], true);
        let (_state_tx, state_rx) = steady_scheduler();
        let pager = Pager::new(registry, state_rx, Arc::new(CannedReplay));

        let mut steps = vec![Step::Key(KeyCode::Enter, KeyModifiers::NONE)];
        steps.extend(pauses(5));
        steps.push(key('/'));
        steps.extend("needle".chars().map(key));
        steps.push(Step::Key(KeyCode::Enter, KeyModifiers::NONE));
        steps.extend([key('n'), key('n'), key('n')]);
        steps.push(ctrl_c());
        let mut input = ScriptedInput::new(steps);
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).expect("terminal");
        let mut model = AppModel::new().with_terminal_size(80, 24);
        pager
            .run(&mut terminal, &mut input, &mut model)
            .expect("run");

        let View::Transcript(view) = &model.view else {
            panic!("expected transcript view");
        };
        assert!(matches!(view.content, TranscriptContent::Loaded { .. }));
        // Items render as header + blank line, so matches land on lines 0 and 4.
        assert_eq!(view.search.matches, vec![0, 4]);
        assert_eq!(view.search.current(), Some(4));
        assert!(screen(&terminal).contains("needle two"));
    }
}
