//! Stage worker pools.
//!
//! Each stage kind has one unbounded queue and a pool of workers pulling
//! from it through a [`SharedReceiver`]. A worker runs one request at a
//! time and reports back to the control task with a [`StageOutcome`]
//! tagged by job or merge id. Workers hold no job state.
//!
//! Read workers stay on the async runtime. Convert and merge workers hand
//! the CPU-bound work to the blocking pool. Panics inside a stage are caught
//! at the worker and reported as [`StageError::Internal`].

use crate::config::PageSize;
use crate::convert::{convert_payload, ConvertedDocument};
use crate::error::StageError;
use crate::job::JobId;
use crate::pipeline::input::SourceFile;
use crate::pipeline::merge::{merge_documents, MergeSource, MergedDocument};
use crate::pipeline::read::{read_in_chunks, ReadPayload};
use crate::pipeline::surface::FrameSurface;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Shared receiver for multiple workers pulling from one unbounded channel.
pub(crate) struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub(crate) fn new_unbounded(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub(crate) async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// Ingest one source file.
#[derive(Debug)]
pub struct ReadRequest {
    pub job_id: JobId,
    pub file: SourceFile,
    pub chunk_size: usize,
}

/// Decode, compose and assemble one payload.
#[derive(Debug)]
pub struct ConvertRequest {
    pub job_id: JobId,
    pub payload: ReadPayload,
    /// The job's own surface, reused across its frames.
    pub surface: FrameSurface,
    pub page_size: PageSize,
}

/// Merge an ordered list of documents.
#[derive(Debug)]
pub struct MergeRequest {
    pub request_id: u64,
    pub sources: Vec<MergeSource>,
}

/// A worker's report to the control task.
#[derive(Debug)]
pub(crate) enum StageOutcome {
    Read {
        job_id: JobId,
        result: Result<ReadPayload, StageError>,
    },
    Converted {
        job_id: JobId,
        result: Result<ConvertedDocument, StageError>,
    },
    Merged {
        request_id: u64,
        result: Result<MergedDocument, StageError>,
    },
}

pub(crate) fn spawn_read_workers(
    count: usize,
    rx: SharedReceiver<ReadRequest>,
    out: mpsc::UnboundedSender<StageOutcome>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let rx = rx.clone();
            let out = out.clone();
            tokio::spawn(async move {
                tracing::debug!(worker = i, "Read worker started");

                while let Some(req) = rx.recv().await {
                    let ReadRequest {
                        job_id,
                        file,
                        chunk_size,
                    } = req;
                    let name = file.name.clone();

                    let result = tokio::spawn(async move { read_in_chunks(&file, chunk_size).await })
                        .await
                        .unwrap_or_else(|e| Err(StageError::internal(&name, e)));

                    if out.send(StageOutcome::Read { job_id, result }).is_err() {
                        break;
                    }
                }

                tracing::debug!(worker = i, "Read worker stopped");
            })
        })
        .collect()
}

pub(crate) fn spawn_convert_workers(
    count: usize,
    rx: SharedReceiver<ConvertRequest>,
    out: mpsc::UnboundedSender<StageOutcome>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let rx = rx.clone();
            let out = out.clone();
            tokio::spawn(async move {
                tracing::debug!(worker = i, "Convert worker started");

                while let Some(req) = rx.recv().await {
                    let ConvertRequest {
                        job_id,
                        payload,
                        mut surface,
                        page_size,
                    } = req;
                    let name = payload.metadata.name.clone();

                    let result =
                        tokio::task::spawn_blocking(move || convert_payload(payload, &mut surface, page_size))
                            .await
                            .unwrap_or_else(|e| Err(StageError::internal(&name, e)));

                    if out.send(StageOutcome::Converted { job_id, result }).is_err() {
                        break;
                    }
                }

                tracing::debug!(worker = i, "Convert worker stopped");
            })
        })
        .collect()
}

pub(crate) fn spawn_merge_workers(
    count: usize,
    rx: SharedReceiver<MergeRequest>,
    out: mpsc::UnboundedSender<StageOutcome>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let rx = rx.clone();
            let out = out.clone();
            tokio::spawn(async move {
                tracing::debug!(worker = i, "Merge worker started");

                while let Some(req) = rx.recv().await {
                    let MergeRequest { request_id, sources } = req;

                    let result = tokio::task::spawn_blocking(move || merge_documents(&sources))
                        .await
                        .unwrap_or_else(|e| Err(StageError::internal("bundle", e)));

                    if out.send(StageOutcome::Merged { request_id, result }).is_err() {
                        break;
                    }
                }

                tracing::debug!(worker = i, "Merge worker stopped");
            })
        })
        .collect()
}
