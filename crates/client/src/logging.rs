//! Log setup for hosts of the engine
//!
//! Everything goes to `<data dir>/logs/client.log` so a terminal host keeps
//! stdout for its own rendering.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tungstenite=warn";
const VERBOSE_FILTER: &str =
    "info,legion_client=debug,legion_cli=debug,hyper=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "client.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than `pretty` means JSON lines.
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

/// `LEGION_LOG_FILTER` > `RUST_LOG` > built-in default; `verbose` only
/// changes the built-in default. Unparseable overrides fall through.
fn filter_directives(
    override_filter: Option<String>,
    rust_log: Option<String>,
    verbose: bool,
) -> String {
    [override_filter, rust_log]
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| {
            if verbose {
                VERBOSE_FILTER.to_string()
            } else {
                DEFAULT_FILTER.to_string()
            }
        })
}

pub struct LoggingHandle {
    pub log_path: PathBuf,
    pub format: LogFormat,
    _guard: WorkerGuard,
}

/// Install the global subscriber. Keep the handle alive until exit so the
/// background writer flushes.
pub fn init_logging(data_dir: &Path, verbose: bool) -> std::io::Result<LoggingHandle> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    let directives = filter_directives(
        std::env::var("LEGION_LOG_FILTER").ok(),
        std::env::var("RUST_LOG").ok(),
        verbose,
    );
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = LogFormat::parse(std::env::var("LEGION_LOG_FORMAT").ok().as_deref());

    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init(),
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        pid = std::process::id(),
        log_path = %log_path.display(),
        format = format.as_str(),
        filter = %directives,
    );

    Ok(LoggingHandle {
        log_path,
        format,
        _guard: guard,
    })
}
