use crate::cli::ViewerArgs;
use crate::domain::{SessionSource, SourceNotice};
use crate::infra::{
    AggregationOptions, ClaudeTreeReader, CodexTreeReader, DEFAULT_POLL_INTERVAL,
    OpenCodeStoreReader, ResolveDirError, SourcePlan, SourceReader, SourceSet, StoreReader,
    resolve_claude_projects_dir, resolve_codex_sessions_dir, resolve_opencode_db_path,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default locations as found in the process environment.
#[derive(Clone, Debug)]
pub struct Environment {
    pub store: Result<PathBuf, ResolveDirError>,
    pub primary: Result<PathBuf, ResolveDirError>,
    pub secondary: Result<PathBuf, ResolveDirError>,
    pub log_file: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            store: resolve_opencode_db_path(),
            primary: resolve_claude_projects_dir(),
            secondary: resolve_codex_sessions_dir(),
            log_file: std::env::var_os("REPLAYBOX_LOG_FILE")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Everything the viewer needs to start, resolved once from flags and environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ViewerConfig {
    pub store_path: Option<PathBuf>,
    pub primary_dir: Option<PathBuf>,
    pub secondary_dir: Option<PathBuf>,
    /// Set when `--store` restricts the run to one explicit database.
    pub store_override: bool,
    pub aggregation: AggregationOptions,
    pub log_file: Option<PathBuf>,
    /// Sources that were planned but could not be located.
    pub notices: Vec<SourceNotice>,
}

impl ViewerConfig {
    pub fn resolve(args: &ViewerArgs, env: Environment) -> Self {
        let store_override = args.store.is_some();
        let plan = if store_override {
            SourcePlan::only(SessionSource::Store)
        } else {
            match args.source {
                Some(source) => SourcePlan::only(source),
                None => SourcePlan::all(),
            }
        };

        let mut notices = Vec::new();
        let mut locate = |source: SessionSource, location: Result<PathBuf, ResolveDirError>| {
            if !plan.includes(source) {
                return None;
            }
            match location {
                Ok(path) => Some(path),
                Err(error) => {
                    notices.push(SourceNotice {
                        source,
                        message: format!("{} disabled: {error}", source.label()),
                    });
                    None
                }
            }
        };

        let store_location = match &args.store {
            Some(path) => Ok(path.clone()),
            None => env.store,
        };
        let store_path = locate(SessionSource::Store, store_location);
        let primary_dir = locate(SessionSource::PrimaryTree, env.primary);
        let secondary_dir = locate(SessionSource::SecondaryTree, env.secondary);

        let poll_interval = args
            .poll_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Self {
            store_path,
            primary_dir,
            secondary_dir,
            store_override,
            aggregation: AggregationOptions {
                plan,
                poll_interval,
            },
            log_file: args.log_file.clone().or(env.log_file),
            notices,
        }
    }

    pub fn source_set(&self) -> SourceSet {
        let store = self.store_path.as_ref().map(|path| {
            let reader: Arc<dyn StoreReader> = Arc::new(OpenCodeStoreReader::new(path));
            reader
        });
        let primary = self.primary_dir.as_ref().map(|dir| {
            let reader: Arc<dyn SourceReader> = Arc::new(ClaudeTreeReader::new(dir));
            reader
        });
        let secondary = self.secondary_dir.as_ref().map(|dir| {
            let reader: Arc<dyn SourceReader> = Arc::new(CodexTreeReader::new(dir));
            reader
        });
        SourceSet {
            store,
            primary,
            secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment {
            store: Ok(PathBuf::from("/data/opencode.db")),
            primary: Ok(PathBuf::from("/home/u/.claude/projects")),
            secondary: Ok(PathBuf::from("/home/u/.codex/sessions")),
            log_file: None,
        }
    }

    #[test]
    fn default_run_plans_every_source() {
        let config = ViewerConfig::resolve(&ViewerArgs::default(), env());
        assert_eq!(config.aggregation.plan, SourcePlan::all());
        assert_eq!(config.aggregation.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.store_path, Some(PathBuf::from("/data/opencode.db")));
        assert!(config.primary_dir.is_some());
        assert!(config.secondary_dir.is_some());
        assert!(!config.store_override);
        let sources = config.source_set();
        assert!(sources.store.is_some());
        assert!(sources.primary.is_some());
        assert!(sources.secondary.is_some());
    }

    #[test]
    fn store_override_drops_tree_locations() {
        let args = ViewerArgs {
            store: Some(PathBuf::from("/elsewhere/other.db")),
            ..ViewerArgs::default()
        };
        let config = ViewerConfig::resolve(&args, env());
        assert!(config.store_override);
        assert_eq!(
            config.aggregation.plan,
            SourcePlan::only(SessionSource::Store)
        );
        assert_eq!(config.store_path, Some(PathBuf::from("/elsewhere/other.db")));
        assert_eq!(config.primary_dir, None);
        assert_eq!(config.secondary_dir, None);
    }

    #[test]
    fn missing_home_disables_only_the_affected_source() {
        let mut environment = env();
        environment.primary = Err(ResolveDirError::HomeDirNotFound);
        let config = ViewerConfig::resolve(&ViewerArgs::default(), environment);

        assert_eq!(config.primary_dir, None);
        assert!(config.store_path.is_some());
        assert!(config.secondary_dir.is_some());
        assert_eq!(config.notices.len(), 1);
        assert_eq!(config.notices[0].source, SessionSource::PrimaryTree);
    }

    #[test]
    fn flags_override_environment() {
        let mut environment = env();
        environment.log_file = Some(PathBuf::from("/tmp/env.log"));
        let args = ViewerArgs {
            poll_secs: Some(30),
            log_file: Some(PathBuf::from("/tmp/flag.log")),
            source: Some(SessionSource::SecondaryTree),
            ..ViewerArgs::default()
        };
        let config = ViewerConfig::resolve(&args, environment);
        assert_eq!(config.aggregation.poll_interval, Duration::from_secs(30));
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/flag.log")));
        assert_eq!(config.store_path, None);
        assert!(config.secondary_dir.is_some());
    }
}
