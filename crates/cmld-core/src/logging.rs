//! Logging setup for cmld components.
//!
//! All cmld crates log through `tracing`. Binaries call [`init_logging`]
//! once at startup; the verbosity flag picks the level for the cmld
//! targets unless `RUST_LOG` is set.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Crates whose log level follows the verbosity setting.
const LOG_TARGETS: &[&str] = &["cmld_core", "cmld_service", "cml_service", "rattestation"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log collectors.
    Json,
}

/// Install the global subscriber.
///
/// `verbosity` counts `-v` flags: none logs errors only, three or more also
/// records source locations. With `log_file` set, events are appended to
/// that file without ANSI colours; otherwise they go to stderr.
///
/// Fails if the file cannot be opened or a subscriber is already installed.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let locations = verbosity >= 3;
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(locations)
        .with_line_number(locations);

    let registry = tracing_subscriber::registry().with(target_filter(verbosity));
    let installed = match format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
    installed.map_err(|e| Error::Io(io::Error::other(e.to_string())))
}

/// Debug-level text logging for tests. Later calls are no-ops.
pub fn init_test_logging() {
    let _ = init_logging(3, None, LogFormat::Text);
}

// RUST_LOG wins over the verbosity flag
fn target_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = verbosity_level(verbosity);
        let directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect();
        EnvFilter::new(directives.join(","))
    })
}

fn verbosity_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}
