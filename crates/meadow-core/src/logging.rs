// SPDX-License-Identifier: CEPL-1.0
//! Process-wide logging context.
//!
//! A [`LogContext`] is built once at startup. It owns a `tracing` dispatcher that
//! writes a compact console stream plus four append-only files, one per
//! [`LogStream`]. Nothing here is lazily initialised: until [`LogContext::install`]
//! runs, events go nowhere.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{Dispatch, Level};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub const DEFAULT_LOG_DIR: &str = "Logs";
pub const DEFAULT_CONSOLE_FILTER: &str = "info";

/// One of the log files written next to each other in the log directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Verbose,
    Info,
    Warning,
    Error,
}

impl LogStream {
    pub const ALL: [LogStream; 4] = [
        LogStream::Verbose,
        LogStream::Info,
        LogStream::Warning,
        LogStream::Error,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            LogStream::Verbose => "verbose.log",
            LogStream::Info => "info.log",
            LogStream::Warning => "warning.log",
            LogStream::Error => "error.log",
        }
    }

    /// Stream an event of `level` is routed to.
    pub fn for_level(level: &Level) -> LogStream {
        match *level {
            Level::ERROR => LogStream::Error,
            Level::WARN => LogStream::Warning,
            Level::INFO => LogStream::Info,
            _ => LogStream::Verbose,
        }
    }

    pub fn accepts(self, level: &Level) -> bool {
        LogStream::for_level(level) == self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub struct LogContext {
    dir: PathBuf,
    dispatch: Dispatch,
}

impl LogContext {
    /// Creates `dir` if needed and opens every stream file in append mode.
    ///
    /// `console_filter` is used when `RUST_LOG` is unset or invalid.
    pub fn new(dir: impl AsRef<Path>, console_filter: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;

        let files = LogStream::ALL
            .into_iter()
            .map(|stream| file_layer(&dir, stream))
            .collect::<Result<Vec<_>>>()?;

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(console_filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_CONSOLE_FILTER));
        let console = fmt::layer()
            .with_target(false)
            .compact()
            .with_filter(env_filter);

        let subscriber = Registry::default().with(files).with(console);

        Ok(Self {
            dir,
            dispatch: Dispatch::new(subscriber),
        })
    }

    /// Makes this context the global default for the rest of the process.
    pub fn install(&self) -> Result<()> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())
            .context("install global tracing dispatcher")
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, stream: LogStream) -> PathBuf {
        self.dir.join(stream.file_name())
    }
}

fn file_layer(dir: &Path, stream: LogStream) -> Result<BoxedLayer> {
    let path = dir.join(stream.file_name());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    Ok(fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter_fn(move |meta| stream.accepts(meta.level())))
        .boxed())
}
