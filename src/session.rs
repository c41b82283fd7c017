//! A user session: the artifact list a person builds up and bundles.
//!
//! The session owns its [`PipelineManager`], created when the session
//! starts and torn down when it ends. Completed artifacts join the list
//! newest first, checked, and become the selected artifact. The list order
//! is the merge order for [`Session::preview_bundle`]; reordering it never
//! touches artifact bytes.

use crate::artifact::{display_target, ArtifactRecord, BlobRef, Bundle, ViewMode};
use crate::config::PipelineConfig;
use crate::coordinator::PipelineManager;
use crate::error::{PipelineError, StageError};
use crate::job::JobId;
use crate::pipeline::input::{accept_supported, UploadItem};
use crate::progress::SharedObserver;
use crate::stream::{EventStream, PipelineEvent};
use tracing::{debug, info};

/// One artifact in the session list.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub artifact: ArtifactRecord,
    /// Included in the next bundle.
    pub checked: bool,
}

pub struct Session {
    manager: PipelineManager,
    events: EventStream,
    entries: Vec<ArtifactEntry>,
    selected: Option<JobId>,
    bundle: Option<Bundle>,
    failures: Vec<(JobId, StageError)>,
    view_mode: ViewMode,
}

impl Session {
    /// Start a session and its pipeline.
    pub fn start(config: PipelineConfig, observer: SharedObserver) -> Result<Self, PipelineError> {
        let manager = PipelineManager::start(config, observer)?;
        let events = manager.subscribe()?;
        Ok(Self {
            manager,
            events,
            entries: Vec::new(),
            selected: None,
            bundle: None,
            failures: Vec::new(),
            view_mode: ViewMode::default(),
        })
    }

    pub fn manager(&self) -> &PipelineManager {
        &self.manager
    }

    /// Accept the supported items and submit one job per item, in order.
    /// Unsupported items are dropped without creating a job.
    pub fn upload(&mut self, items: impl IntoIterator<Item = UploadItem>) -> Result<Vec<JobId>, PipelineError> {
        let files = accept_supported(items);
        debug!("Uploading {} accepted files", files.len());
        self.manager.submit_batch(files)
    }

    /// Apply every event delivered so far and return them.
    pub fn poll_events(&mut self) -> Vec<PipelineEvent> {
        let events = self.events.drain_ready();
        for event in &events {
            match event {
                PipelineEvent::JobCompleted(artifact) => {
                    self.entries.insert(
                        0,
                        ArtifactEntry {
                            artifact: artifact.clone(),
                            checked: true,
                        },
                    );
                    self.selected = Some(artifact.id);
                }
                PipelineEvent::JobFailed { job, error } => self.failures.push((*job, error.clone())),
                _ => {}
            }
        }
        events
    }

    /// Wait for all submitted work, then apply its events.
    pub async fn wait_idle(&mut self) -> Result<Vec<PipelineEvent>, PipelineError> {
        self.manager.wait_idle().await?;
        Ok(self.poll_events())
    }

    /// The list, in display and merge order.
    pub fn artifacts(&self) -> &[ArtifactEntry] {
        &self.entries
    }

    /// Failures seen so far, one per failed job.
    pub fn failures(&self) -> &[(JobId, StageError)] {
        &self.failures
    }

    pub fn selected(&self) -> Option<&ArtifactRecord> {
        let id = self.selected?;
        self.entry(id).map(|e| &e.artifact)
    }

    pub fn select(&mut self, id: JobId) -> Result<(), PipelineError> {
        self.position(id)?;
        self.selected = Some(id);
        Ok(())
    }

    /// Move the entry at `from` to `to`. Returns `false` if either index is
    /// out of range.
    pub fn move_artifact(&mut self, from: usize, to: usize) -> bool {
        if from >= self.entries.len() || to >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        true
    }

    pub fn set_checked(&mut self, id: JobId, checked: bool) -> Result<(), PipelineError> {
        let idx = self.position(id)?;
        self.entries[idx].checked = checked;
        Ok(())
    }

    /// Uncheck everything if everything is checked, otherwise check
    /// everything.
    pub fn toggle_all(&mut self) {
        let all_checked = self.entries.iter().all(|e| e.checked);
        for entry in &mut self.entries {
            entry.checked = !all_checked;
        }
    }

    /// Checked artifacts in list order.
    pub fn checked(&self) -> Vec<&ArtifactRecord> {
        self.entries
            .iter()
            .filter(|e| e.checked)
            .map(|e| &e.artifact)
            .collect()
    }

    /// Discard one artifact and revoke its reference. The first remaining
    /// artifact becomes selected.
    pub fn remove(&mut self, id: JobId) -> Result<ArtifactRecord, PipelineError> {
        let idx = self.position(id)?;
        let entry = self.entries.remove(idx);
        self.manager.blobs().revoke(&entry.artifact.blob);
        self.reselect();
        Ok(entry.artifact)
    }

    /// Discard every checked artifact. Returns how many were removed.
    pub fn remove_checked(&mut self) -> usize {
        let before = self.entries.len();
        let blobs = self.manager.blobs().clone();
        self.entries.retain(|e| {
            if e.checked {
                blobs.revoke(&e.artifact.blob);
            }
            !e.checked
        });
        self.reselect();
        before - self.entries.len()
    }

    /// Merge the checked artifacts, in list order, into a new bundle.
    ///
    /// The previous bundle, if any, is revoked once the new one exists.
    pub async fn preview_bundle(&mut self) -> Result<Bundle, PipelineError> {
        let selection: Vec<ArtifactRecord> = self.checked().into_iter().cloned().collect();
        if selection.is_empty() {
            return Err(PipelineError::EmptySelection);
        }

        let bundle = self.manager.merge(&selection).await?;
        info!("Bundle of {} artifacts: {} pages", bundle.artifacts.len(), bundle.page_count);
        self.poll_events();
        if let Some(old) = self.bundle.replace(bundle.clone()) {
            self.manager.blobs().revoke(&old.blob);
        }
        Ok(bundle)
    }

    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    /// Dismiss the current bundle and revoke its reference.
    pub fn close_bundle(&mut self) -> bool {
        match self.bundle.take() {
            Some(bundle) => self.manager.blobs().revoke(&bundle.blob),
            None => false,
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    /// Where a presentation layer should load `blob` in `mode`.
    pub fn display_target(&self, blob: &BlobRef, mode: ViewMode) -> String {
        display_target(blob, mode)
    }

    /// Display target of the selected artifact in the session's view mode.
    pub fn selected_target(&self) -> Option<String> {
        self.selected().map(|a| display_target(&a.blob, self.view_mode))
    }

    /// End the session: revoke every reference and tear the pipeline down.
    pub fn shutdown(mut self) {
        self.close_bundle();
        for entry in self.entries.drain(..) {
            self.manager.blobs().revoke(&entry.artifact.blob);
        }
        self.manager.shutdown();
    }

    fn entry(&self, id: JobId) -> Option<&ArtifactEntry> {
        self.entries.iter().find(|e| e.artifact.id == id)
    }

    fn position(&self, id: JobId) -> Result<usize, PipelineError> {
        self.entries
            .iter()
            .position(|e| e.artifact.id == id)
            .ok_or(PipelineError::UnknownArtifact(id))
    }

    fn reselect(&mut self) {
        self.selected = self.entries.first().map(|e| e.artifact.id);
    }
}
