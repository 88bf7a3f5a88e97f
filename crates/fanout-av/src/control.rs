use std::time::Duration;

use fanout_core::events::ProgressSender;
use tokio_util::sync::CancellationToken;

/// Progress, cancellation and time limit for one long-running action.
#[derive(Debug, Clone)]
pub struct JobControl {
    pub progress: ProgressSender,
    pub cancel: CancellationToken,
    /// Per-process limit. `None` lets encodes run to completion.
    pub timeout: Option<Duration>,
}

impl JobControl {
    pub fn new(progress: ProgressSender, cancel: CancellationToken) -> Self {
        Self {
            progress,
            cancel,
            timeout: None,
        }
    }

    /// No progress reporting and a token nobody cancels.
    pub fn detached() -> Self {
        Self::new(ProgressSender::noop(), CancellationToken::new())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn apply_timeout(&self, cmd: &mut crate::ToolCommand) {
        match self.timeout {
            Some(limit) => cmd.timeout(limit),
            None => cmd.no_timeout(),
        };
    }
}
