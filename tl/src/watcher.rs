//! Polling reload watcher
//!
//! Calls [`TemplateLoader::reload`] on a fixed interval until asked to stop.
//! Reload errors are handed to the callback and do not end the loop, so a
//! template with a syntax error can be fixed while the watcher keeps running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::loader::{ReloadSummary, TemplateLoader};

pub struct ReloadWatcher {
    loader: Arc<TemplateLoader>,
    interval: Duration,
}

impl ReloadWatcher {
    pub fn new(loader: Arc<TemplateLoader>, interval: Duration) -> Self {
        Self { loader, interval }
    }

    pub fn loader(&self) -> &Arc<TemplateLoader> {
        &self.loader
    }

    /// Run a single reload
    pub fn poll(&self) -> Result<ReloadSummary> {
        debug!("ReloadWatcher::poll: called");
        self.loader.reload()
    }

    /// Poll until `stop` is set, passing every outcome that changed something
    /// or failed to `on_poll`
    ///
    /// Returns the number of polls performed.
    pub fn run<F>(&self, stop: &AtomicBool, mut on_poll: F) -> usize
    where
        F: FnMut(&Result<ReloadSummary>),
    {
        debug!(interval = ?self.interval, "ReloadWatcher::run: called");
        let mut polls = 0;
        while !stop.load(Ordering::SeqCst) {
            let outcome = self.poll();
            polls += 1;
            match &outcome {
                Ok(summary) if summary.is_empty() => {}
                Ok(_) => on_poll(&outcome),
                Err(err) => {
                    warn!(error = %err, "Reload failed");
                    on_poll(&outcome);
                }
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(self.interval);
        }
        debug!(%polls, "ReloadWatcher::run: stopped");
        polls
    }
}
