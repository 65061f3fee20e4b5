//! Serial background thread for blocking OS calls.
//!
//! The scheduler core runs on a single tokio task and must never wait on a
//! child process. Backends that shell out (`systemd-run`, `systemctl`,
//! `systemd-inhibit`) queue that work here instead.

use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How long dropping a worker waits for queued jobs to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs one at a time, in submission order, on a named thread.
///
/// Dropping the worker lets queued jobs finish (bounded by a timeout) so
/// work queued during shutdown, such as arming the resume alarm, is not lost.
pub(crate) struct BlockingWorker {
    name: &'static str,
    jobs: Option<mpsc::Sender<Job>>,
    finished: Option<mpsc::Receiver<()>>,
}

impl BlockingWorker {
    pub(crate) fn spawn(name: &'static str) -> Self {
        let (jobs, queue) = mpsc::channel::<Job>();
        let (done_tx, finished) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    job();
                }
                let _ = done_tx.send(());
            });
        match spawned {
            Ok(_) => Self {
                name,
                jobs: Some(jobs),
                finished: Some(finished),
            },
            Err(e) => {
                error!(worker = name, "failed to spawn worker thread, running jobs inline: {e}");
                Self {
                    name,
                    jobs: None,
                    finished: None,
                }
            }
        }
    }

    /// Queue `job`. Runs it inline only when the thread is unavailable.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match &self.jobs {
            Some(jobs) => {
                if let Err(mpsc::SendError(job)) = jobs.send(job) {
                    warn!(worker = self.name, "worker thread gone; running job inline");
                    job();
                }
            }
            None => job(),
        }
    }

    /// Wait until every job queued so far has run. Returns `false` on timeout.
    #[cfg(test)]
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack) = mpsc::channel();
        self.submit(move || {
            let _ = ack_tx.send(());
        });
        ack.recv_timeout(timeout).is_ok()
    }
}

impl Drop for BlockingWorker {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(finished) = self.finished.take() {
            match finished.recv_timeout(DRAIN_TIMEOUT) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    debug!(worker = self.name, "worker drained");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(worker = self.name, "worker still busy at shutdown; detaching it");
                }
            }
        }
    }
}
