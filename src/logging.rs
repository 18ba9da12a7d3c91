//! Logging setup
//!
//! Two `tracing` layers:
//! - stderr, filtered by `RUST_LOG` (default `info`, `debug` with `--verbose`)
//! - the run transcript, appended to the log file without ANSI colours
//!
//! Every run appends to the same transcript; rotation is left to the
//! system's logrotate.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Open the transcript for appending
pub fn open_transcript(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber.
///
/// Returns `false` when the transcript could not be opened; logging then
/// continues on stderr only. Calling this twice keeps the first subscriber.
pub fn init_logging(transcript: Option<&Path>, verbose: bool) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file, open_error) = match transcript.map(open_transcript) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let transcript_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(transcript_level)
    });

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    match (transcript, open_error) {
        (Some(path), Some(e)) => {
            warn!("Cannot open transcript {}: {}; logging to stderr only", path.display(), e);
            false
        }
        _ => true,
    }
}
