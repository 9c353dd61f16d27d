mod app;
mod cli;
mod config;
mod domain;
mod infra;
mod pager;
mod ui;

use crate::app::{AppError, AppModel};
use crate::cli::{CliInvocation, ViewerArgs};
use crate::config::{Environment, ViewerConfig};
use crate::infra::{
    AggregationScheduler, LoggingError, SessionRegistry, TranscriptLoader, init_logging,
};
use crate::pager::{CrosstermInput, Pager};
use crossterm::ExecutableCommand;
use crossterm::terminal::size as terminal_size;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// How long blocking scans may keep the process alive after the pager exits.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            let _ = write!(err, "{}", crate::cli::help_text());
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            let mut out = io::stdout().lock();
            let _ = write!(out, "{}", crate::cli::help_text());
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Tui(args) => run_tui(&args),
    }
}

fn run_tui(args: &ViewerArgs) -> Result<(), MainError> {
    let config = ViewerConfig::resolve(args, Environment::from_process());
    init_logging(config.log_file.as_deref())?;
    info!(
        plan = ?config.aggregation.plan,
        poll = ?config.aggregation.poll_interval,
        store_override = config.store_override,
        "starting viewer"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("replaybox-aggregation")
        .build()
        .map_err(AppError::Runtime)?;

    let registry = Arc::new(SessionRegistry::new());
    for notice in &config.notices {
        warn!(source = notice.source.label(), message = %notice.message, "source disabled");
        registry.record_notice(notice.source, Some(notice.message.clone()));
    }

    let scheduler = AggregationScheduler::start(
        runtime.handle(),
        Arc::clone(&registry),
        config.source_set(),
        config.aggregation,
    );
    let pager = Pager::new(
        Arc::clone(&registry),
        scheduler.subscribe(),
        Arc::new(TranscriptLoader),
    );

    let result = run_pager(&pager);

    info!(state = ?scheduler.state(), "stopping aggregation");
    runtime.block_on(scheduler.stop());
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    let last = registry.snapshot();
    if registry.is_empty() {
        info!(notices = last.notices.len(), "viewer stopped without sessions");
    } else {
        info!(
            sessions = last.sessions.len(),
            generation = registry.generation(),
            warnings = last.warnings,
            "viewer stopped"
        );
    }
    Ok(result?)
}

fn run_pager(pager: &Pager) -> Result<(), AppError> {
    let mut model = AppModel::new();
    let mut terminal = setup_terminal()?;
    if let Ok((width, height)) = terminal_size() {
        model = model.with_terminal_size(width, height);
    }
    let result = pager.run(&mut terminal, &mut CrosstermInput, &mut model);
    restore_terminal(&mut terminal)?;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, AppError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), AppError> {
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
