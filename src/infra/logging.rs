use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenLogFile { path: PathBuf, source: io::Error },
}

/// Log filter: `REPLAYBOX_LOG`, then `RUST_LOG`, then `info`.
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env("REPLAYBOX_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The terminal belongs to the pager, so logs go to `log_file` or nowhere.
pub fn init_logging(log_file: Option<&Path>) -> Result<(), LoggingError> {
    let filter = log_filter();
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenLogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unwritable_log_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("replaybox.log");
        let error = init_logging(Some(&path)).expect_err("should fail");
        assert!(error.to_string().contains("replaybox.log"));
    }
}
