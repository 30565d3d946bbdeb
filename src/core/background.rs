//! Fixed-interval background loops on dedicated OS threads.
//!
//! Both the liveness sweeper and the pool reaper run through [`BackgroundTask`].
//! The loop blocks on a shutdown channel with a timeout instead of sleeping, so
//! stopping is immediate and dropping the sender is enough to end the thread.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

/// Handle to a running background loop. Stops and joins on drop.
pub struct BackgroundTask {
    name: String,
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn a thread named `name` that calls `tick` every `interval`.
    ///
    /// The first tick happens one full interval after spawning.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread could not be created.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!(task = %thread_name, interval_ms = interval.as_millis(), "background task started");
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(task = %thread_name, "background task exiting");
        })?;

        info!(task = %name, "background task spawned");
        Ok(Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop to exit and wait for it. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and ends the loop.
        self.shutdown_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(task = %self.name, "background task panicked");
            } else {
                debug!(task = %self.name, "background task joined");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
