//! Configuration types for the conversion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config is cloned into the control task
//! when the pipeline starts and never changes afterwards.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Default ingestion chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Configuration for a [`crate::coordinator::PipelineManager`].
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docbundle::{PageSize, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .chunk_size(256 * 1024)
///     .convert_workers(4)
///     .page_size(PageSize::Letter)
///     .build()
///     .unwrap();
/// assert_eq!(config.convert_workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bytes read per increment during ingestion. Default: 1 MiB.
    ///
    /// Only the increment is bounded; the reassembled payload is always the
    /// whole file.
    pub chunk_size: usize,

    /// Number of read workers. Default: 1.
    pub read_workers: usize,

    /// Number of decode/compose/assemble workers. Default: 2.
    ///
    /// Each convert job runs on the blocking thread pool, so this bounds how
    /// many CPU-heavy decodes run at once.
    pub convert_workers: usize,

    /// Number of merge workers. Default: 1.
    pub merge_workers: usize,

    /// Page size for JPEG and PNG inputs. TIFF frames always use their
    /// native pixel size. Default: [`PageSize::A4`].
    pub page_size: PageSize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_workers: 1,
            convert_workers: 2,
            merge_workers: 1,
            page_size: PageSize::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    pub fn read_workers(mut self, n: usize) -> Self {
        self.config.read_workers = n.max(1);
        self
    }

    pub fn convert_workers(mut self, n: usize) -> Self {
        self.config.convert_workers = n.max(1);
        self
    }

    pub fn merge_workers(mut self, n: usize) -> Self {
        self.config.merge_workers = n.max(1);
        self
    }

    pub fn page_size(mut self, size: PageSize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "Chunk size must be ≥ 1 byte".into(),
            ));
        }
        let (w, h) = c.page_size.dimensions();
        if !(w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "Page size must be positive, got {w}×{h}"
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Page size used for single-frame raster inputs, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PageSize {
    /// ISO A4, 595.28 × 841.89 pt. (default)
    #[default]
    A4,
    /// US Letter, 612 × 792 pt.
    Letter,
    /// Explicit width and height in points.
    Custom { width: f32, height: f32 },
}

impl PageSize {
    /// Width and height in points.
    pub fn dimensions(&self) -> (f32, f32) {
        match *self {
            PageSize::A4 => (595.28, 841.89),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Custom { width, height } => (width, height),
        }
    }
}
