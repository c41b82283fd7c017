//! The pipeline coordinator: one control task, three worker pools.
//!
//! ```text
//!             submit / merge / subscribe / wait_idle
//! PipelineManager ───────────────▶ control task ──▶ read queue    ──▶ read workers
//!      ▲                              │   ▲     ──▶ convert queue ──▶ convert workers
//!      │ job table, timings, blobs    │   │     ──▶ merge queue   ──▶ merge workers
//!      └──────────────────────────────┘   └──────── StageOutcome ◀────────┘
//! ```
//!
//! The control task is the only writer of job state, the in-flight counter,
//! the timings and the blob store. It reacts to two inputs: commands from
//! the manager and outcomes from workers. Outcomes are correlated by job or
//! merge id, never by arrival order, so jobs may finish in any order.
//!
//! The in-flight counter covers jobs and merges. The busy signal goes up
//! when it leaves zero and down when it returns to zero, once each way.
//!
//! Tearing the manager down aborts the control task and every worker.
//! Whatever was in flight is lost.

use crate::artifact::{ArtifactRecord, BlobStore, Bundle};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::job::{Job, JobId, JobState};
use crate::pipeline::input::SourceFile;
use crate::pipeline::merge::MergeSource;
use crate::pipeline::surface::FrameSurface;
use crate::progress::SharedObserver;
use crate::stream::{EventStream, PipelineEvent};
use crate::timing::{merge_key, processing_key, read_key, Measurement, Timings};
use crate::worker::{
    spawn_convert_workers, spawn_merge_workers, spawn_read_workers, ConvertRequest, MergeRequest, ReadRequest,
    SharedReceiver, StageOutcome,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type JobTable = Arc<RwLock<BTreeMap<JobId, Job>>>;

enum Command {
    Submit(JobId),
    Merge {
        artifacts: Vec<JobId>,
        sources: Vec<MergeSource>,
        reply: oneshot::Sender<Result<Bundle, StageError>>,
    },
    Subscribe(mpsc::UnboundedSender<PipelineEvent>),
    WhenIdle(oneshot::Sender<()>),
}

/// Handle to a running pipeline.
///
/// Created with [`PipelineManager::start`] inside a Tokio runtime. Dropping
/// the manager tears the pipeline down, as does [`PipelineManager::shutdown`].
pub struct PipelineManager {
    config: PipelineConfig,
    cmd_tx: mpsc::UnboundedSender<Command>,
    jobs: JobTable,
    /// Submitted files waiting for the control task to pick them up.
    pending: Arc<Mutex<HashMap<JobId, SourceFile>>>,
    timings: Arc<Mutex<Timings>>,
    busy: watch::Receiver<bool>,
    blobs: BlobStore,
    next_job: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl PipelineManager {
    /// Spawn the worker pools and the control task.
    ///
    /// Fails when called outside a Tokio runtime.
    pub fn start(config: PipelineConfig, observer: SharedObserver) -> Result<Self, PipelineError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::InvalidConfig(format!("pipeline needs a Tokio runtime: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (convert_tx, convert_rx) = mpsc::unbounded_channel();
        let (merge_tx, merge_rx) = mpsc::unbounded_channel();
        let (busy_tx, busy) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.extend(spawn_read_workers(
            config.read_workers,
            SharedReceiver::new_unbounded(read_rx),
            outcome_tx.clone(),
        ));
        tasks.extend(spawn_convert_workers(
            config.convert_workers,
            SharedReceiver::new_unbounded(convert_rx),
            outcome_tx.clone(),
        ));
        tasks.extend(spawn_merge_workers(
            config.merge_workers,
            SharedReceiver::new_unbounded(merge_rx),
            outcome_tx,
        ));

        let jobs: JobTable = Arc::default();
        let pending: Arc<Mutex<HashMap<JobId, SourceFile>>> = Arc::default();
        let timings: Arc<Mutex<Timings>> = Arc::default();
        let blobs = BlobStore::new();

        let control = Control {
            config: config.clone(),
            jobs: jobs.clone(),
            pending: pending.clone(),
            timings: timings.clone(),
            blobs: blobs.clone(),
            observer,
            subscribers: Vec::new(),
            busy_tx,
            in_flight: 0,
            idle_waiters: Vec::new(),
            read_tx,
            convert_tx,
            merge_tx,
            merges: HashMap::new(),
            next_merge: 0,
        };
        tasks.push(tokio::spawn(control.run(cmd_rx, outcome_rx)));

        info!(
            read_workers = config.read_workers,
            convert_workers = config.convert_workers,
            merge_workers = config.merge_workers,
            "Pipeline started"
        );

        Ok(Self {
            config,
            cmd_tx,
            jobs,
            pending,
            timings,
            busy,
            blobs,
            next_job: AtomicU64::new(1),
            tasks,
            closed: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create a job for `file` and start reading it.
    pub fn submit(&self, file: SourceFile) -> Result<JobId, PipelineError> {
        if self.closed {
            return Err(PipelineError::ShutDown);
        }

        let id = JobId(self.next_job.fetch_add(1, Ordering::Relaxed));
        let job = Job::new(id, file.name.clone(), file.media_type, file.len);
        write(&self.jobs).insert(id, job);
        lock(&self.pending).insert(id, file);

        if self.cmd_tx.send(Command::Submit(id)).is_err() {
            write(&self.jobs).remove(&id);
            lock(&self.pending).remove(&id);
            return Err(PipelineError::ShutDown);
        }
        Ok(id)
    }

    /// Submit several files; job ids come back in input order.
    pub fn submit_batch(&self, files: impl IntoIterator<Item = SourceFile>) -> Result<Vec<JobId>, PipelineError> {
        files.into_iter().map(|f| self.submit(f)).collect()
    }

    /// Merge `artifacts`, in the order given, into a bundle.
    ///
    /// An empty list or an unreadable artifact fails the merge as a whole;
    /// nothing partial is published.
    pub async fn merge(&self, artifacts: &[ArtifactRecord]) -> Result<Bundle, PipelineError> {
        if self.closed {
            return Err(PipelineError::ShutDown);
        }

        let (reply, rx) = oneshot::channel();
        let cmd = Command::Merge {
            artifacts: artifacts.iter().map(|a| a.id).collect(),
            sources: artifacts
                .iter()
                .map(|a| MergeSource::new(a.name.clone(), a.bytes.clone()))
                .collect(),
            reply,
        };
        self.cmd_tx.send(cmd).map_err(|_| PipelineError::ShutDown)?;
        let bundle = rx.await.map_err(|_| PipelineError::ShutDown)??;
        Ok(bundle)
    }

    /// Snapshot of one job.
    pub fn job(&self, id: JobId) -> Option<Job> {
        read(&self.jobs).get(&id).cloned()
    }

    /// Snapshot of every job, in submission order.
    pub fn jobs(&self) -> Vec<Job> {
        read(&self.jobs).values().cloned().collect()
    }

    /// Measurements taken so far.
    pub fn timings(&self) -> Vec<Measurement> {
        lock(&self.timings).measurements().to_vec()
    }

    /// Log every measurement and clear them.
    pub fn report_timings(&self) -> Vec<Measurement> {
        lock(&self.timings).report()
    }

    /// Receive every event from now on.
    pub fn subscribe(&self) -> Result<EventStream, PipelineError> {
        if self.closed {
            return Err(PipelineError::ShutDown);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.cmd_tx
            .send(Command::Subscribe(tx))
            .map_err(|_| PipelineError::ShutDown)?;
        Ok(EventStream::new(rx))
    }

    /// Current busy signal. Work submitted an instant ago may not be
    /// reflected yet; use [`PipelineManager::wait_idle`] to wait for it.
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Resolve once every job and merge submitted before this call has
    /// finished.
    pub async fn wait_idle(&self) -> Result<(), PipelineError> {
        if self.closed {
            return Err(PipelineError::ShutDown);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::WhenIdle(tx))
            .map_err(|_| PipelineError::ShutDown)?;
        rx.await.map_err(|_| PipelineError::ShutDown)
    }

    /// The session's displayable references.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Abort the control task and every worker. In-flight work is lost.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Pipeline shut down");
    }
}

impl Drop for PipelineManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct PendingMerge {
    artifacts: Vec<JobId>,
    reply: oneshot::Sender<Result<Bundle, StageError>>,
}

/// State owned by the control task.
struct Control {
    config: PipelineConfig,
    jobs: JobTable,
    pending: Arc<Mutex<HashMap<JobId, SourceFile>>>,
    timings: Arc<Mutex<Timings>>,
    blobs: BlobStore,
    observer: SharedObserver,
    subscribers: Vec<mpsc::UnboundedSender<PipelineEvent>>,
    busy_tx: watch::Sender<bool>,
    in_flight: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    read_tx: mpsc::UnboundedSender<ReadRequest>,
    convert_tx: mpsc::UnboundedSender<ConvertRequest>,
    merge_tx: mpsc::UnboundedSender<MergeRequest>,
    merges: HashMap<u64, PendingMerge>,
    next_merge: u64,
}

impl Control {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut outcome_rx: mpsc::UnboundedReceiver<StageOutcome>,
    ) {
        debug!("Control task started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(outcome) = outcome_rx.recv() => self.handle_outcome(outcome),
            }
        }
        debug!("Control task stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit(id) => self.start_job(id),
            Command::Merge {
                artifacts,
                sources,
                reply,
            } => self.start_merge(artifacts, sources, reply),
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::WhenIdle(tx) => {
                if self.in_flight == 0 {
                    let _ = tx.send(());
                } else {
                    self.idle_waiters.push(tx);
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Read { job_id, result } => self.on_read(job_id, result),
            StageOutcome::Converted { job_id, result } => self.on_converted(job_id, result),
            StageOutcome::Merged { request_id, result } => self.on_merged(request_id, result),
        }
    }

    // ── Jobs ─────────────────────────────────────────────────────────────

    fn start_job(&mut self, id: JobId) {
        let Some(file) = lock(&self.pending).remove(&id) else {
            warn!("{}: submitted without a source file", id);
            return;
        };
        info!("{}: '{}' ({}, {} bytes) submitted", id, file.name, file.media_type, file.len);

        self.begin_work();
        self.notify_state(id, &file.name, JobState::Idle);
        if !self.transition(id, &file.name, JobState::Reading) {
            self.finish_work();
            return;
        }

        lock(&self.timings).mark_start(&read_key(&file.name));
        let name = file.name.clone();
        let req = ReadRequest {
            job_id: id,
            file,
            chunk_size: self.config.chunk_size,
        };
        if self.read_tx.send(req).is_err() {
            self.fail_job(id, StageError::internal(&name, "read workers are gone"));
        }
    }

    fn on_read(&mut self, id: JobId, result: Result<crate::pipeline::read::ReadPayload, StageError>) {
        let Some(name) = self.file_name(id) else {
            warn!("{}: read outcome for unknown job", id);
            return;
        };
        lock(&self.timings).mark_end(&read_key(&name));

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => return self.fail_job(id, e),
        };
        debug!("{}: read {} bytes", id, payload.data.len());

        if !self.transition(id, &name, JobState::Converting) {
            return;
        }
        lock(&self.timings).mark_start(&processing_key(&name));
        let req = ConvertRequest {
            job_id: id,
            payload,
            surface: FrameSurface::default(),
            page_size: self.config.page_size,
        };
        if self.convert_tx.send(req).is_err() {
            self.fail_job(id, StageError::internal(&name, "convert workers are gone"));
        }
    }

    fn on_converted(&mut self, id: JobId, result: Result<crate::convert::ConvertedDocument, StageError>) {
        let Some(job) = read(&self.jobs).get(&id).cloned() else {
            warn!("{}: convert outcome for unknown job", id);
            return;
        };
        lock(&self.timings).mark_end(&processing_key(&job.file_name));

        let doc = match result {
            Ok(doc) => doc,
            Err(e) => return self.fail_job(id, e),
        };

        let artifact = ArtifactRecord {
            id,
            name: doc.name,
            source_name: job.file_name.clone(),
            source_type: job.media_type,
            page_count: doc.page_count,
            blob: self.blobs.register(doc.bytes.clone()),
            bytes: doc.bytes,
        };

        let applied = write(&self.jobs)
            .get_mut(&id)
            .map(|j| j.complete(artifact.clone()));
        match applied {
            Some(Ok(())) => {
                info!(
                    "{}: '{}' complete → '{}' ({} pages, {} bytes)",
                    id,
                    job.file_name,
                    artifact.name,
                    artifact.page_count,
                    artifact.byte_len()
                );
                self.notify_state(id, &job.file_name, JobState::Complete);
                self.observer.on_job_complete(&artifact);
                self.emit(PipelineEvent::JobCompleted(artifact));
            }
            Some(Err(e)) => {
                warn!("{}", e);
                self.blobs.revoke(&artifact.blob);
            }
            None => {
                self.blobs.revoke(&artifact.blob);
            }
        }
        self.finish_work();
    }

    fn fail_job(&mut self, id: JobId, error: StageError) {
        let applied = write(&self.jobs).get_mut(&id).map(|j| j.fail(error.clone()));
        match applied {
            Some(Ok(())) => {
                warn!("{}: {}", id, error);
                self.notify_state(id, error.file(), JobState::Failed);
                self.observer.on_job_failed(id, &error);
                self.emit(PipelineEvent::JobFailed { job: id, error });
            }
            Some(Err(e)) => warn!("{}", e),
            None => warn!("{}: failure for unknown job: {}", id, error),
        }
        self.finish_work();
    }

    /// Apply a transition; on an illegal edge log it and report `false`.
    fn transition(&mut self, id: JobId, name: &str, state: JobState) -> bool {
        let applied = write(&self.jobs).get_mut(&id).map(|j| j.advance(state));
        match applied {
            Some(Ok(())) => {
                self.notify_state(id, name, state);
                true
            }
            Some(Err(e)) => {
                warn!("{}", e);
                false
            }
            None => false,
        }
    }

    fn file_name(&self, id: JobId) -> Option<String> {
        read(&self.jobs).get(&id).map(|j| j.file_name.clone())
    }

    // ── Merges ───────────────────────────────────────────────────────────

    fn start_merge(
        &mut self,
        artifacts: Vec<JobId>,
        sources: Vec<MergeSource>,
        reply: oneshot::Sender<Result<Bundle, StageError>>,
    ) {
        self.next_merge += 1;
        let request_id = self.next_merge;
        info!("merge-{}: {} documents", request_id, sources.len());

        self.begin_work();
        lock(&self.timings).mark_start(&merge_key(request_id));
        self.merges.insert(request_id, PendingMerge { artifacts, reply });

        if self.merge_tx.send(MergeRequest { request_id, sources }).is_err() {
            self.on_merged(request_id, Err(StageError::internal("bundle", "merge workers are gone")));
        }
    }

    fn on_merged(&mut self, request_id: u64, result: Result<crate::pipeline::merge::MergedDocument, StageError>) {
        lock(&self.timings).mark_end(&merge_key(request_id));
        let Some(PendingMerge { artifacts, reply }) = self.merges.remove(&request_id) else {
            warn!("merge-{}: outcome for unknown merge", request_id);
            return;
        };

        match result {
            Ok(doc) => {
                let bundle = Bundle {
                    artifacts,
                    page_count: doc.page_count,
                    blob: self.blobs.register(doc.bytes.clone()),
                    bytes: doc.bytes,
                };
                info!("merge-{}: {} pages", request_id, bundle.page_count);
                self.observer.on_merge_complete(&bundle);
                self.emit(PipelineEvent::MergeCompleted(bundle.clone()));
                if let Err(Ok(orphan)) = reply.send(Ok(bundle)) {
                    self.blobs.revoke(&orphan.blob);
                }
            }
            Err(error) => {
                warn!("merge-{}: {}", request_id, error);
                self.observer.on_merge_failed(&error);
                self.emit(PipelineEvent::MergeFailed(error.clone()));
                let _ = reply.send(Err(error));
            }
        }
        self.finish_work();
    }

    // ── Busy signal and fan-out ──────────────────────────────────────────

    fn begin_work(&mut self) {
        self.in_flight += 1;
        if self.in_flight == 1 {
            self.set_busy(true);
        }
    }

    fn finish_work(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.set_busy(false);
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy_tx.send_replace(busy);
        self.observer.on_busy_changed(busy);
        self.emit(PipelineEvent::BusyChanged(busy));
    }

    fn notify_state(&mut self, id: JobId, name: &str, state: JobState) {
        self.observer.on_job_state_changed(id, name, state);
        self.emit(PipelineEvent::JobStateChanged {
            job: id,
            file_name: name.to_string(),
            state,
        });
    }

    fn emit(&mut self, event: PipelineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}
