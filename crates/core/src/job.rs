//! Job launcher: runs a workload on a background thread and hands back the
//! consumer-side poll loop for its progress.

use std::thread::JoinHandle;

use crate::channel::relay;
use crate::config::RelayConfig;
use crate::error::{panic_message, RelayError};
use crate::poll::PollLoop;
use crate::progress::ProgressReporter;

/// Background work that reports progress and returns a human-readable result.
///
/// Implementations should report a final `100` before returning. The reporter
/// is optional so a workload can also run without anyone listening.
pub trait Workload: Send + 'static {
    fn run(self, reporter: Option<&dyn ProgressReporter>) -> String;
}

impl<F> Workload for F
where
    F: FnOnce(Option<&dyn ProgressReporter>) -> String + Send + 'static,
{
    fn run(self, reporter: Option<&dyn ProgressReporter>) -> String {
        self(reporter)
    }
}

/// Handle to the thread running a workload.
#[derive(Debug)]
pub struct WorkerHandle {
    inner: JoinHandle<String>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the workload and return its result. Blocks the caller, so a
    /// UI context should only call this once `is_finished` is true.
    pub fn join(self) -> Result<String, RelayError> {
        self.inner
            .join()
            .map_err(|payload| RelayError::WorkerPanicked(panic_message(payload.as_ref())))
    }
}

/// Create a relay, start `workload` on a background thread with the sending
/// half as its reporter, and return the poll loop for the calling context.
pub fn spawn_job<W: Workload>(
    workload: W,
    config: &RelayConfig,
) -> Result<(PollLoop, WorkerHandle), RelayError> {
    config.validate()?;
    let (sender, receiver) = relay();
    let poll = PollLoop::new(receiver, config);

    let inner = std::thread::Builder::new()
        .name("progress-relay-worker".to_string())
        .spawn(move || workload.run(Some(&sender)))
        .map_err(RelayError::Spawn)?;
    tracing::debug!("Spawned workload, polling every {:?}", poll.interval());

    Ok((poll, WorkerHandle { inner }))
}
