//! Error sink
//!
//! Components report errors with a non-blocking `try_send`; when the bounded
//! queue is full the event is dropped and counted instead of stalling the
//! reporter. A single task logs each event and forwards it to the operator
//! stream, again without blocking.

use crate::pipeline::stats::PipelineStats;
use crate::record::Identifier;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Pipeline component an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Accumulator,
    Uploader,
    Reporter,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accumulator => "accumulator",
            Self::Uploader => "uploader",
            Self::Reporter => "reporter",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator-facing error
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub component: Component,
    pub identifier: Option<Identifier>,
    pub cause: String,
    pub at: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(
        component: Component,
        identifier: Option<Identifier>,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            component,
            identifier,
            cause: cause.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "[{}] {}: {}", self.component, id, self.cause),
            None => write!(f, "[{}] {}", self.component, self.cause),
        }
    }
}

/// Producer side of the error sink
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::Sender<ErrorEvent>,
    stats: Arc<PipelineStats>,
}

impl ErrorSink {
    pub(crate) fn channel(
        capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> (Self, mpsc::Receiver<ErrorEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, stats }, rx)
    }

    /// Reports an error without ever waiting
    pub fn report(&self, event: ErrorEvent) {
        self.stats.errors_reported.inc();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) | Err(TrySendError::Closed(event)) => {
                self.stats.errors_dropped.inc();
                tracing::debug!("Error sink saturated, dropped: {}", event);
            }
        }
    }
}

/// Spawns the task that logs errors and forwards them to the operator stream
pub(crate) fn spawn_error_sink(
    mut events: mpsc::Receiver<ErrorEvent>,
    operator: mpsc::Sender<ErrorEvent>,
    stats: Arc<PipelineStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::warn!(
                component = %event.component,
                identifier = event.identifier.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                "{}",
                event.cause
            );

            if operator.try_send(event).is_err() {
                stats.errors_dropped.inc();
            }
        }
        tracing::debug!("Error sink closed");
    })
}
