//! Async worker pool for decode and mask-apply work.
//!
//! The [`LoaderPool`] runs CPU-bound image work off the orchestrator thread
//! and delivers results back over a completion channel. Workers never touch
//! the cache, the observer lists or GPU resources; every completion is a
//! plain value the orchestrator folds into its state machine during
//! `process_tick`.
//!
//! Concurrency is bounded by a semaphore; the actual pixel work runs via
//! `spawn_blocking` so it cannot starve the async runtime.

use crate::decoder::{ImageDecoder, MaskApplier};
use crate::error::{DecodeError, MaskError};
use crate::pixel::PixelBuffer;
use crate::request::{FittingMode, ImageDimensions, SamplingMode, TextureId};
use crate::source::{AnimatedImage, ImageSource};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One decode of a static image source.
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub source: ImageSource,
    pub desired_size: ImageDimensions,
    pub fitting: FittingMode,
    pub sampling: SamplingMode,
    pub orientation_correction: bool,
    /// Ask the decoder for separate planes (YUV) where supported.
    pub want_planes: bool,
    /// Premultiply the result (single-plane only).
    pub pre_multiply: bool,
}

/// One decode of an animated-image frame.
#[derive(Clone)]
pub struct FrameJob {
    pub image: Arc<dyn AnimatedImage>,
    pub frame_index: u32,
    pub desired_size: ImageDimensions,
    pub fitting: FittingMode,
    pub sampling: SamplingMode,
    pub pre_multiply: bool,
}

/// One mask blend of an already-decoded image.
#[derive(Debug, Clone)]
pub struct MaskJob {
    pub image: PixelBuffer,
    pub mask: PixelBuffer,
    pub content_scale: f32,
    pub crop_to_mask: bool,
    pub pre_multiply: bool,
}

/// Result of one unit of background work.
#[derive(Debug)]
pub enum WorkOutcome {
    /// Decoded planes for a static or animated source.
    Decoded(Result<Vec<PixelBuffer>, DecodeError>),
    /// The mask-blended image.
    MaskApplied(Result<PixelBuffer, MaskError>),
}

/// Message delivered on the completion channel.
#[derive(Debug)]
pub struct LoadCompletion {
    /// The resource this work belongs to.
    pub texture_id: TextureId,
    /// What happened.
    pub outcome: WorkOutcome,
}

/// Semaphore-bounded pool of decode/mask workers.
pub struct LoaderPool {
    decoder: Arc<dyn ImageDecoder>,
    masker: Arc<dyn MaskApplier>,
    runtime: tokio::runtime::Handle,
    permits: Arc<Semaphore>,
    completion_tx: mpsc::UnboundedSender<LoadCompletion>,
    shutdown: CancellationToken,
}

impl LoaderPool {
    /// Create a pool and the receiving end of its completion channel.
    pub fn new(
        decoder: Arc<dyn ImageDecoder>,
        masker: Arc<dyn MaskApplier>,
        runtime: tokio::runtime::Handle,
        max_concurrent: usize,
    ) -> (Self, mpsc::UnboundedReceiver<LoadCompletion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let pool = Self {
            decoder,
            masker,
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            completion_tx,
            shutdown: CancellationToken::new(),
        };
        (pool, completion_rx)
    }

    /// Stop starting new work. In-flight tasks finish and their results are
    /// dropped by the closed channel or ignored by the orchestrator.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Queue a static-image decode for `texture_id`.
    pub fn dispatch_decode(&self, texture_id: TextureId, job: DecodeJob) {
        debug!(texture_id = %texture_id, source = %job.source, "dispatching decode");
        let decoder = Arc::clone(&self.decoder);
        let permits = Arc::clone(&self.permits);
        let tx = self.completion_tx.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if shutdown.is_cancelled() {
                return;
            }
            let joined = tokio::task::spawn_blocking(move || {
                decoder
                    .decode(
                        &job.source,
                        job.desired_size,
                        job.fitting,
                        job.sampling,
                        job.orientation_correction,
                        job.want_planes,
                    )
                    .map(|planes| premultiply_planes(planes, job.pre_multiply))
            })
            .await;
            let outcome = flatten_decode(joined);
            let _ = tx.send(LoadCompletion {
                texture_id,
                outcome: WorkOutcome::Decoded(outcome),
            });
        });
    }

    /// Queue an animated-frame decode for `texture_id`.
    pub fn dispatch_frame(&self, texture_id: TextureId, job: FrameJob) {
        debug!(texture_id = %texture_id, frame = job.frame_index, "dispatching frame decode");
        let permits = Arc::clone(&self.permits);
        let tx = self.completion_tx.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if shutdown.is_cancelled() {
                return;
            }
            let joined = tokio::task::spawn_blocking(move || {
                job.image
                    .decode_frame(job.frame_index, job.desired_size, job.fitting, job.sampling)
                    .map(|buffer| premultiply_planes(vec![buffer], job.pre_multiply))
            })
            .await;
            let outcome = flatten_decode(joined);
            let _ = tx.send(LoadCompletion {
                texture_id,
                outcome: WorkOutcome::Decoded(outcome),
            });
        });
    }

    /// Queue a mask blend for `texture_id`.
    pub fn dispatch_mask_apply(&self, texture_id: TextureId, job: MaskJob) {
        debug!(texture_id = %texture_id, "dispatching mask apply");
        let masker = Arc::clone(&self.masker);
        let permits = Arc::clone(&self.permits);
        let tx = self.completion_tx.clone();
        let shutdown = self.shutdown.clone();

        self.runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if shutdown.is_cancelled() {
                return;
            }
            let joined = tokio::task::spawn_blocking(move || {
                masker
                    .apply(job.image, &job.mask, job.content_scale, job.crop_to_mask)
                    .map(|buffer| {
                        if job.pre_multiply {
                            buffer.premultiplied()
                        } else {
                            buffer
                        }
                    })
            })
            .await;
            let outcome = match joined {
                Ok(result) => result,
                Err(join_error) => Err(MaskError::new(format!(
                    "mask task panicked: {}",
                    join_error
                ))),
            };
            let _ = tx.send(LoadCompletion {
                texture_id,
                outcome: WorkOutcome::MaskApplied(outcome),
            });
        });
    }
}

impl std::fmt::Debug for LoaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderPool")
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

/// Premultiply a single-plane result when requested. Multi-plane (YUV)
/// results are never premultiplied.
fn premultiply_planes(mut planes: Vec<PixelBuffer>, pre_multiply: bool) -> Vec<PixelBuffer> {
    if pre_multiply && planes.len() == 1 {
        let buffer = planes.remove(0);
        planes.push(buffer.premultiplied());
    }
    planes
}

fn flatten_decode(
    joined: Result<Result<Vec<PixelBuffer>, DecodeError>, tokio::task::JoinError>,
) -> Result<Vec<PixelBuffer>, DecodeError> {
    match joined {
        Ok(result) => result,
        Err(join_error) => Err(DecodeError::new(format!(
            "decode task panicked: {}",
            join_error
        ))),
    }
}
