use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_FILTER: &str = "info,aws_config=warn,aws_smithy_runtime=warn,hyper=warn";

/// Stdout writer that hides the batch progress bar while a line is printed.
#[derive(Clone)]
pub struct ConsoleWriter {
    bar: ProgressBar,
}

impl ConsoleWriter {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bar.suspend(|| {
            let mut out = io::stdout().lock();
            out.write_all(buf)?;
            out.flush()
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn timer() -> ChronoUtc {
    ChronoUtc::new(TIMESTAMP_FORMAT.to_string())
}

/// Console and file layers behind one filter. Each event is formatted into
/// a single line and written with one call per sink. Only the console may
/// carry color codes, and only when `ansi` is set.
pub fn build_subscriber<W>(
    console: W,
    ansi: bool,
    log_file: File,
    filter: EnvFilter,
) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let console_layer = fmt::layer()
        .with_timer(timer())
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(console);

    let file_layer = fmt::layer()
        .with_timer(timer())
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
}

pub fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(log_path: &Path, bar: ProgressBar) -> Result<()> {
    let file = open_log_file(log_path)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing::subscriber::set_global_default(build_subscriber(
        ConsoleWriter::new(bar),
        io::stdout().is_terminal(),
        file,
        filter,
    ))
    .context("Failed to install the log subscriber")
}
