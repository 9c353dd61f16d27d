use crate::domain::SessionSource;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Tui(ViewerArgs),
}

/// Flags for the interactive viewer. `None` means "use the default".
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ViewerArgs {
    pub store: Option<PathBuf>,
    pub source: Option<SessionSource>,
    pub poll_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("--store reads only the given store and cannot be combined with --source {0}")]
    StoreWithTreeSource(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut viewer = ViewerArgs::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String, CliParseError> {
            match inline_value.clone() {
                Some(value) => Ok(value),
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| CliParseError::MissingFlagValue(name.to_string())),
            }
        };

        match flag {
            "--store" => viewer.store = Some(PathBuf::from(value("--store")?)),
            "--source" | "-s" => {
                viewer.source = parse_source_flag("--source", &value("--source")?)?;
            }
            "--poll-secs" => {
                let raw = value("--poll-secs")?;
                viewer.poll_secs = Some(parse_poll_secs("--poll-secs", &raw)?);
            }
            "--log-file" => viewer.log_file = Some(PathBuf::from(value("--log-file")?)),
            _ if flag.starts_with('-') => {
                return Err(CliParseError::UnknownFlag(arg.to_string()));
            }
            _ => {
                return Err(CliParseError::UnexpectedArgument(arg.to_string()));
            }
        }
    }

    if viewer.store.is_some() {
        match viewer.source {
            None | Some(SessionSource::Store) => {}
            Some(other) => {
                return Err(CliParseError::StoreWithTreeSource(
                    source_flag_value(other).to_string(),
                ));
            }
        }
    }

    Ok(CliInvocation::Tui(viewer))
}

fn parse_source_flag(flag: &str, value: &str) -> Result<Option<SessionSource>, CliParseError> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "all" => Ok(None),
        "store" | "opencode" | "oc" => Ok(Some(SessionSource::Store)),
        "primary" | "claude" | "cl" => Ok(Some(SessionSource::PrimaryTree)),
        "secondary" | "codex" | "cx" => Ok(Some(SessionSource::SecondaryTree)),
        other => Err(CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: other.to_string(),
        }),
    }
}

fn source_flag_value(source: SessionSource) -> &'static str {
    match source {
        SessionSource::Store => "store",
        SessionSource::PrimaryTree => "primary",
        SessionSource::SecondaryTree => "secondary",
    }
}

fn parse_poll_secs(flag: &str, value: &str) -> Result<u64, CliParseError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}

pub fn help_text() -> String {
    format!(
        "\
replaybox {version}
Browse and replay AI assistant sessions from OpenCode, Claude, and Codex.

USAGE:
    replaybox [FLAGS]

FLAGS:
    --store PATH        Read only this OpenCode database (tree sources are skipped)
    -s, --source NAME   all | store | primary | secondary (aliases: opencode, claude, codex)
    --poll-secs N       Store polling interval in seconds (default 5)
    --log-file PATH     Append logs to PATH (filter via REPLAYBOX_LOG or RUST_LOG)
    -h, --help          Print help
    -V, --version       Print version

ENVIRONMENT:
    REPLAYBOX_STORE_PATH   OpenCode database location (default: $XDG_DATA_HOME/opencode/opencode.db)
    CLAUDE_PROJECTS_DIR    Claude projects dir (default: ~/.claude/projects)
    CODEX_SESSIONS_DIR     Codex sessions dir (default: ~/.codex/sessions)
    REPLAYBOX_LOG_FILE     Log file when --log-file is not given
",
        version = env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn parse_defaults_to_tui_when_no_args() {
        let parsed = parse_invocation(&args(&["replaybox"])).expect("parse");
        assert_eq!(parsed, CliInvocation::Tui(ViewerArgs::default()));
    }

    #[test]
    fn parse_help_flag_wins() {
        let parsed = parse_invocation(&args(&["replaybox", "--bogus", "--help"])).expect("parse");
        assert_eq!(parsed, CliInvocation::PrintHelp);
    }

    #[test]
    fn parse_viewer_flags() {
        let parsed = parse_invocation(&args(&[
            "replaybox",
            "--source",
            "claude",
            "--poll-secs=2",
            "--log-file",
            "/tmp/rb.log",
        ]))
        .expect("parse");
        assert_eq!(
            parsed,
            CliInvocation::Tui(ViewerArgs {
                store: None,
                source: Some(SessionSource::PrimaryTree),
                poll_secs: Some(2),
                log_file: Some(PathBuf::from("/tmp/rb.log")),
            })
        );
    }

    #[test]
    fn store_override_rejects_tree_source() {
        let parsed = parse_invocation(&args(&[
            "replaybox",
            "--store",
            "/tmp/x.db",
            "--source",
            "codex",
        ]));
        assert!(matches!(parsed, Err(CliParseError::StoreWithTreeSource(_))));

        let parsed =
            parse_invocation(&args(&["replaybox", "--store", "/tmp/x.db", "-s", "store"]))
                .expect("parse");
        assert!(matches!(parsed, CliInvocation::Tui(ViewerArgs { store: Some(_), .. })));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse_invocation(&args(&["replaybox", "--poll-secs", "0"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["replaybox", "--source", "gemini"])),
            Err(CliParseError::InvalidFlagValue { .. })
        ));
        assert!(matches!(
            parse_invocation(&args(&["replaybox", "--store"])),
            Err(CliParseError::MissingFlagValue(_))
        ));
        assert!(matches!(
            parse_invocation(&args(&["replaybox", "extra"])),
            Err(CliParseError::UnexpectedArgument(_))
        ));
    }
}
