//! Configuration file watcher for hot reload.
//!
//! # Responsibilities
//! - Publish a fresh immutable [`Config`] whenever the file's modification
//!   time advances
//! - Keep the previous configuration when a reload fails to decode
//!
//! The watcher polls the file's mtime once per second rather than using
//! platform change notifications; the one-second granularity also debounces
//! partial writes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::loader::{self, ConfigError};
use crate::config::schema::Config;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Load the configuration file and keep watching it for changes.
///
/// The initial load must succeed; after that, decode failures are logged and
/// the previous configuration stays in effect. The watch task exits when the
/// token is cancelled.
pub fn watch(
    path: PathBuf,
    cancel: CancellationToken,
) -> Result<watch::Receiver<Arc<Config>>, ConfigError> {
    let initial = loader::load(&path)?;
    let mut last_modified = modification_time(&path);
    let (tx, rx) = watch::channel(Arc::new(initial));

    tokio::spawn(async move {
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.tick().await; // The first tick completes immediately.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = poll.tick() => {}
            }

            let Some(modified) = modification_time(&path) else {
                // Transient stat failures (e.g. an editor replacing the
                // file) resolve on a later tick.
                continue;
            };
            if last_modified.is_some_and(|last| modified <= last) {
                continue;
            }
            last_modified = Some(modified);

            match loader::load(&path) {
                Ok(next) => {
                    tracing::debug!(path = %path.display(), "loaded new configuration");
                    if tx.send(Arc::new(next)).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "could not reload configuration");
                }
            }
        }
    });

    Ok(rx)
}

fn modification_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}
