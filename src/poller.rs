//! A background thread that periodically re-fetches values for the current user.
use std::{sync::mpsc::RecvTimeoutError, time::Duration};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub(crate) struct PollerThreadConfig {
    /// Interval to wait between updates.
    pub interval: Duration,
    /// Randomized duration subtracted from each interval, so that many clients don't update in
    /// lockstep.
    pub jitter: Duration,
}

/// Runs a tick function every `interval` until stopped.
pub(crate) struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    /// Start the thread. The first tick runs after one interval.
    ///
    /// A tick that fails with a configuration error (see [`Error::is_fatal`]) or
    /// [`Error::ShutDown`] stops the thread; other errors are retried on the next tick.
    pub(crate) fn start(
        config: PollerThreadConfig,
        mut tick: impl FnMut() -> Result<()> + Send + 'static,
    ) -> std::io::Result<PollerThread> {
        // Buffer size of 1 is enough: a second stop command can be dropped.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("statsig-poller".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                    let timeout = jitter(config.interval, config.jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) => {
                            log::debug!(target: "statsig", "poller thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            log::debug!(target: "statsig", "poller thread received disconnected");
                            return;
                        }
                    }

                    log::debug!(target: "statsig", "updating values");
                    match tick() {
                        Ok(()) => {}
                        Err(Error::ShutDown) => return,
                        Err(err) if err.is_fatal() => {
                            log::warn!(target: "statsig", "stopping value updates: {err}");
                            return;
                        }
                        Err(err) => {
                            log::debug!(target: "statsig", "value update failed: {err}");
                        }
                    }
                }));

                if result.is_err() {
                    log::warn!(target: "statsig", "{}", Error::ThreadPanicked);
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the poller thread without waiting for it to exit.
    pub(crate) fn stop(&self) {
        // Either the thread already exited or another stop command is pending.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    pub(crate) fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::ThreadPanicked)?;
        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
