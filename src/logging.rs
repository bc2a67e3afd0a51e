// src/logging.rs
//
// Logging bootstrap
//
// PRINCIPLES:
// - Initialized at most once per process
// - Same config twice is a no-op, a different config is rejected
// - Never panics
//
// Library code only talks to the `log` facade. This module is for hosts
// that want the default file + console setup.

use flexi_logger::{
    Age, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::info;
use once_cell::sync::OnceCell;

use crate::config::LoggingConfig;
use crate::error::{DataError, DataResult};

const LOG_FILE_BASENAME: &str = "corebase";
const MAX_LOG_FILES: usize = 31;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    config: LoggingConfig,
    _logger: LoggerHandle,
}

/// Start file logging (rotated daily) with optional stderr duplication.
///
/// # Errors
/// - `DataError::Config` when already initialized with a different config
/// - `DataError::Io` when the log directory cannot be created
/// - `DataError::Config` when the logger backend fails to start
pub fn init_logging(config: &LoggingConfig) -> DataResult<()> {
    let state = LOGGING_STATE.get_or_try_init(|| -> DataResult<LoggingState> {
        std::fs::create_dir_all(&config.directory)?;

        let spec = config.log_spec();
        let duplicate = if config.console {
            Duplicate::All
        } else {
            Duplicate::None
        };

        let logger = Logger::try_with_str(&spec)
            .map_err(|e| DataError::Config(format!("Invalid log spec `{}`: {}", spec, e)))?
            .log_to_file(
                FileSpec::default()
                    .directory(config.directory.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .duplicate_to_stderr(duplicate)
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|e| DataError::Config(format!("Failed to start logger: {}", e)))?;

        info!(
            "event=logging_init module=logging status=ok spec=\"{}\" dir={}",
            spec,
            config.directory.display()
        );

        Ok(LoggingState {
            config: config.clone(),
            _logger: logger,
        })
    })?;

    if &state.config != config {
        return Err(DataError::Config(format!(
            "logging already initialized at `{}` with level `{}`; refusing to reconfigure",
            state.config.directory.display(),
            state.config.minimum_level
        )));
    }

    Ok(())
}

/// Active logging configuration, `None` before `init_logging`.
pub fn logging_status() -> Option<&'static LoggingConfig> {
    LOGGING_STATE.get().map(|state| &state.config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_and_rejects_reconfiguration() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().to_path_buf(),
            minimum_level: "debug".to_string(),
            console: false,
            ..LoggingConfig::default()
        };

        init_logging(&config).unwrap();
        init_logging(&config).unwrap();

        let other = LoggingConfig {
            minimum_level: "error".to_string(),
            ..config.clone()
        };
        let err = init_logging(&other).unwrap_err();
        assert!(err.to_string().contains("refusing to reconfigure"));

        assert_eq!(logging_status(), Some(&config));
    }
}
