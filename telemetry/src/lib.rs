//! Log setup shared by modemd and modem-cli.
//!
//! The daemon logs to journald when running under systemd, tools log to stderr.
//! `RUST_LOG` overrides the directives a program picks with [`Logging::filter`].
//!
//! ```no_run
//! let flusher = modemd_telemetry::Logging::new("modemd").try_init()?;
//! tracing::info!("modem found");
//! flusher.flush();
//! # Ok::<(), modemd_telemetry::LoggingError>(())
//! ```

use std::io::{IsTerminal as _, Write as _};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Journald,
    Stderr,
}

impl Output {
    /// Journald unless stderr is a terminal, which means someone is watching.
    pub fn detect() -> Self {
        if std::io::stderr().is_terminal() {
            Output::Stderr
        } else {
            Output::Journald
        }
    }
}

#[derive(Debug)]
pub struct Logging {
    identifier: String,
    output: Output,
    directives: String,
}

impl Logging {
    /// `identifier` becomes the journald `SYSLOG_IDENTIFIER`.
    #[must_use]
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            output: Output::detect(),
            directives: String::new(),
        }
    }

    #[must_use]
    pub fn output(self, output: Output) -> Self {
        Self { output, ..self }
    }

    /// Directives such as `"info,zbus=warn"`, used when `RUST_LOG` is unset.
    #[must_use]
    pub fn filter(self, directives: &str) -> Self {
        Self {
            directives: directives.to_owned(),
            ..self
        }
    }

    /// Installs the global subscriber. Fails if one is already installed.
    pub fn try_init(self) -> Result<LogFlusher, LoggingError> {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let filter = build_filter(env.as_deref(), &self.directives);

        let journald_layer = match self.output {
            Output::Journald => tracing_journald::layer()
                .inspect_err(|err| {
                    eprintln!("{}: no journald socket, logging to stderr: {err}", self.identifier);
                })
                .map(|layer| layer.with_syslog_identifier(self.identifier.clone()))
                .ok(),
            Output::Stderr => None,
        };
        let stderr_layer = journald_layer.is_none().then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
        });

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(journald_layer)
            .with(filter)
            .try_init()?;

        Ok(LogFlusher { _priv: () })
    }
}

fn build_filter(env: Option<&str>, directives: &str) -> EnvFilter {
    let directives = env.filter(|env| !env.is_empty()).unwrap_or(directives);

    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives)
}

#[must_use = "call .flush at the end of the program, otherwise the last log lines may get lost"]
pub struct LogFlusher {
    _priv: (),
}

impl LogFlusher {
    pub fn flush(self) {
        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();
    }
}
