//! Event stream: the pipeline's lifecycle events as a `Stream`.
//!
//! [`crate::coordinator::PipelineManager::subscribe`] returns an
//! [`EventStream`] that yields every event from the moment of subscription.
//! It is the async counterpart of [`crate::progress::PipelineObserver`] and
//! carries the same information. The stream ends when the pipeline shuts
//! down.

use crate::artifact::{ArtifactRecord, Bundle};
use crate::error::StageError;
use crate::job::{JobId, JobState};
use futures::stream::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// One thing that happened in the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    BusyChanged(bool),
    JobStateChanged {
        job: JobId,
        file_name: String,
        state: JobState,
    },
    JobCompleted(ArtifactRecord),
    JobFailed {
        job: JobId,
        error: StageError,
    },
    MergeCompleted(Bundle),
    MergeFailed(StageError),
}

impl PipelineEvent {
    /// Whether this event ends a job.
    pub fn is_job_terminal(&self) -> bool {
        matches!(self, PipelineEvent::JobCompleted(_) | PipelineEvent::JobFailed { .. })
    }
}

/// Stream of [`PipelineEvent`]s for one subscriber.
pub struct EventStream {
    inner: UnboundedReceiverStream<PipelineEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<PipelineEvent>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Only the events that end a job: completions and failures.
    pub fn terminal(self) -> impl Stream<Item = PipelineEvent> + Send + Unpin {
        self.filter(|e| futures::future::ready(e.is_job_terminal()))
    }

    /// Take every event already delivered, without waiting.
    pub fn drain_ready(&mut self) -> Vec<PipelineEvent> {
        let rx = self.inner.as_mut();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
