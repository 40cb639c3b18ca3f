//! Run lifecycle: `Running -> Draining -> Stopped`
//!
//! The cancellation token is the broadcast stop signal every blocking point
//! selects on. The phase is published on a watch channel so hosts can observe
//! when the pipeline has fully stopped.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelinePhase {
    /// All components operate normally
    Running,

    /// A stop was requested or input ran out; pending work is completing
    Draining,

    /// Every component has returned
    Stopped,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared stop signal and phase of one pipeline run
///
/// Cloning is cheap; all clones observe the same run.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    token: CancellationToken,
    phase: Arc<watch::Sender<PipelinePhase>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(PipelinePhase::Running);
        Self {
            token: CancellationToken::new(),
            phase: Arc::new(phase),
        }
    }

    /// Requests a graceful stop. Safe to call any number of times.
    pub fn request_stop(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Stop requested, draining pipeline");
        }
        self.token.cancel();
        self.advance(PipelinePhase::Draining);
    }

    /// Enters `Draining` because no more input will arrive, without
    /// cancelling: remaining work runs to completion instead of being cut
    /// off by the grace period.
    pub fn begin_drain(&self) {
        if self.advance(PipelinePhase::Draining) {
            tracing::info!("Input exhausted, draining pipeline");
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.advance(PipelinePhase::Stopped);
    }

    /// Moves the phase forward; never backwards
    fn advance(&self, to: PipelinePhase) -> bool {
        self.phase.send_if_modified(|current| {
            if *current < to {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The broadcast stop signal
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Completes once a stop has been requested
    pub async fn stop_requested(&self) {
        self.token.cancelled().await
    }

    /// Completes once every pipeline task has returned
    pub async fn wait_stopped(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|phase| *phase == PipelinePhase::Stopped).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
