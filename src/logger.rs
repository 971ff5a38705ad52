//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after the log level is resolved from config.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Initialise the global tracing subscriber.
///
/// `level` accepts either a bare level (`"info"`, `"debug"`, …) or a full
/// `EnvFilter` directive such as `"admissions_rag=debug,tower=warn"`.
/// The configured level wins; `RUST_LOG` is only consulted when `level`
/// does not parse.
pub fn init(level: &str) -> Result<(), AppError> {
    let filter = match parse_level(level) {
        Ok(filter) => filter,
        Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
            AppError::Logger(format!("{level_err}; RUST_LOG parse failed: {env_err}"))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Parse a configured log level into an [`EnvFilter`].
///
/// A value without `=` or `,` must be a bare level; anything else is parsed
/// as a filter directive. Config resolution calls this so a bad level fails
/// at load time rather than at subscriber install.
pub fn parse_level(level: &str) -> Result<EnvFilter, AppError> {
    let level = level.trim();
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    if level.contains(['=', ',']) {
        return EnvFilter::try_new(level)
            .map_err(|e| AppError::Logger(format!("invalid log filter '{level}': {e}")));
    }
    let bare = level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))?;
    Ok(EnvFilter::default().add_directive(bare.into()))
}
