//! The load orchestrator.
//!
//! [`TextureEngine`] is the facade consumers talk to: request a load, get a
//! [`TextureId`](crate::request::TextureId) back, receive exactly one
//! [`LoadResult`] per attempt through an [`UploadObserver`], and release the
//! resource with `request_remove`. One engine instance is constructed
//! explicitly by the rendering root and owned for the render-thread
//! lifetime.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TextureEngine                          │
//! │  request_load / request_remove / process_tick / texture_set  │
//! ├──────────────┬──────────────┬──────────────┬─────────────────┤
//! │ TextureCache │ RemovalQueue │ PendingOps   │ observer lists  │
//! │ id + key map │ FIFO, per-   │ two-phase    │ weak, FIFO      │
//! │              │ tick drain   │ fan-out      │                 │
//! ├──────────────┴──────────────┴──────────────┴─────────────────┤
//! │                     LoaderPool (workers)                      │
//! │      decode / mask-apply off-thread, completion channel      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Threading
//!
//! The engine is single-writer: every method runs on the thread that
//! constructed it (the engine is deliberately not `Send`), so the cache
//! needs no locks. Workers communicate only through the completion
//! channel, which `process_tick` drains once per frame. Observer callbacks
//! run on the orchestrator thread and may freely re-enter the engine;
//! requests raised during a fan-out are buffered and replayed afterwards.

mod cache;
mod complete;
mod load;
mod notify;
mod observer;
mod pending;
mod removal;
mod state;

pub use observer::{LoadPayload, LoadResult, UploadObserver};
pub use state::LoadState;

use crate::config::EngineConfig;
use crate::decoder::{ImageDecoder, MaskApplier};
use crate::engine::cache::{TextureCache, TextureRecord};
use crate::engine::pending::PendingOps;
use crate::engine::removal::RemovalQueue;
use crate::pool::{LoadCompletion, LoaderPool};
use crate::request::{
    FittingMode, LoadRequest, MaskStorage, PreMultiply, SamplingMode, StorageIntent, TextureId,
};
use crate::source::ImageSource;
use crate::texture::{AtlasSite, AtlasSlot, GpuUploader, TextureSet};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// External collaborators the engine is wired to.
pub struct EngineServices {
    /// Static-image decoder, shared with worker tasks.
    pub decoder: Arc<dyn ImageDecoder>,
    /// Alpha-mask blender, shared with worker tasks.
    pub masker: Arc<dyn MaskApplier>,
    /// GPU uploader; called only on the orchestrator thread.
    pub uploader: Box<dyn GpuUploader>,
    /// Runtime the worker pool spawns onto.
    pub runtime: tokio::runtime::Handle,
}

impl EngineServices {
    /// Bundle the collaborators.
    pub fn new(
        decoder: Arc<dyn ImageDecoder>,
        masker: Arc<dyn MaskApplier>,
        uploader: Box<dyn GpuUploader>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            decoder,
            masker,
            uploader,
            runtime,
        }
    }
}

/// Result of an atlas-first load attempt.
#[derive(Debug)]
pub enum AtlasOutcome {
    /// The image was packed into a shared atlas.
    Atlased(AtlasSlot),
    /// The atlas refused the image; a standalone load was started instead.
    Fallback(TextureId),
}

/// Mutable orchestrator state, kept behind a `RefCell` so observer
/// callbacks can re-enter the engine through `&self`.
pub(crate) struct EngineState {
    pub(crate) cache: TextureCache,
    pub(crate) removals: RemovalQueue,
    pub(crate) pending: PendingOps,
    /// Set while a fan-out for this entry is executing.
    pub(crate) notifying: Option<TextureId>,
    pub(crate) completion_rx: mpsc::UnboundedReceiver<LoadCompletion>,
}

/// Asynchronous texture loading/caching engine.
///
/// See the [module documentation](self) for the architecture.
pub struct TextureEngine {
    pub(crate) state: RefCell<EngineState>,
    pub(crate) pool: LoaderPool,
    pub(crate) decoder: Arc<dyn ImageDecoder>,
    pub(crate) masker: Arc<dyn MaskApplier>,
    pub(crate) uploader: Box<dyn GpuUploader>,
    pub(crate) config: EngineConfig,
}

impl TextureEngine {
    /// Create an engine wired to the given collaborators.
    pub fn new(config: EngineConfig, services: EngineServices) -> Self {
        let (pool, completion_rx) = LoaderPool::new(
            Arc::clone(&services.decoder),
            Arc::clone(&services.masker),
            services.runtime,
            config.max_concurrent_loads,
        );
        Self {
            state: RefCell::new(EngineState {
                cache: TextureCache::new(),
                removals: RemovalQueue::new(),
                pending: PendingOps::default(),
                notifying: None,
                completion_rx,
            }),
            pool,
            decoder: services.decoder,
            masker: services.masker,
            uploader: services.uploader,
            config,
        }
    }

    /// Request an image load.
    ///
    /// Returns a handle to the (possibly shared) cache entry. The observer,
    /// when given, receives exactly one [`LoadResult`] for this attempt:
    /// immediately if the resource is already resident, later via
    /// [`process_tick`](Self::process_tick) otherwise. Call
    /// [`request_remove`](Self::request_remove) once per successful request
    /// when the resource is no longer needed.
    pub fn request_load(
        &self,
        request: LoadRequest,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) -> TextureId {
        self.request_load_internal(request, observer)
    }

    /// Load synchronously and return the payload directly.
    ///
    /// Bypasses the worker pool; decode, mask blend and upload all happen on
    /// the calling thread. No observer is involved. `ReturnPixelBuffer`
    /// requests decode without touching the cache at all.
    pub fn request_load_sync(&self, request: LoadRequest) -> Result<LoadResult, crate::error::TextureError> {
        self.load_sync_internal(request)
    }

    /// Request an alpha-mask resource for later use in [`LoadRequest::with_mask`].
    ///
    /// The mask is loaded without premultiplication and kept CPU-side
    /// ([`MaskStorage::KeepPixelBuffer`]) or uploaded as a second texture
    /// ([`MaskStorage::KeepTexture`]).
    pub fn request_mask_load(
        &self,
        mask_source: ImageSource,
        storage: MaskStorage,
        synchronous: bool,
    ) -> TextureId {
        let request = LoadRequest::new(mask_source)
            .with_fitting(FittingMode::ScaleToFill)
            .with_sampling(SamplingMode::NoFilter)
            .with_storage(storage.into())
            .with_pre_multiply(PreMultiply::LoadWithoutMultiply)
            .with_synchronous(synchronous);
        self.request_load_internal(request, None)
    }

    /// Try to pack a small image into the given atlas, falling back to a
    /// standalone [`request_load`](Self::request_load) when the atlas
    /// refuses it. The fallback is silent: whether an image is atlased is
    /// an implementation detail.
    pub fn load_atlased(
        &self,
        request: LoadRequest,
        atlas: &dyn AtlasSite,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) -> AtlasOutcome {
        if let Some(slot) = atlas.add(&request.source, request.desired_size, request.fitting) {
            debug!(source = %request.source, "image atlased");
            return AtlasOutcome::Atlased(slot);
        }
        AtlasOutcome::Fallback(self.request_load(request, observer))
    }

    /// Release one reference to a resource.
    ///
    /// Detaches the observer (if given) from pending notifications and
    /// queues the entry for removal; the cache table itself is only
    /// modified by the next [`process_tick`](Self::process_tick).
    pub fn request_remove(
        &self,
        texture_id: TextureId,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) {
        self.request_remove_internal(texture_id, observer)
    }

    /// Drain completed background work and the deferred removal queue.
    ///
    /// Must be called once per render/processing cycle by the host. Safe to
    /// call more often: with nothing queued it is a no-op.
    pub fn process_tick(&self) {
        // A fan-out is executing further up the stack; its epilogue will
        // replay anything we would process here.
        if self.state.borrow().notifying.is_some() {
            return;
        }
        loop {
            let completion = self.state.borrow_mut().completion_rx.try_recv();
            match completion {
                Ok(completion) => self.handle_completion(completion),
                Err(_) => break,
            }
        }
        loop {
            let next = self.state.borrow_mut().removals.pop();
            match next {
                Some(texture_id) => self.finalize_removal(texture_id),
                None => break,
            }
        }
    }

    /// The uploaded texture set for a resource, once it reaches
    /// [`LoadState::Uploaded`]. A mask kept as a texture occupies slot 1.
    pub fn texture_set(&self, texture_id: TextureId) -> Option<TextureSet> {
        let state = self.state.borrow();
        let record = state.cache.get(texture_id)?;
        if record.load_state != LoadState::Uploaded {
            return None;
        }
        Self::assemble_texture_set(&state.cache, record)
    }

    /// Current state of a resource.
    pub fn load_state(&self, texture_id: TextureId) -> Option<LoadState> {
        self.state
            .borrow()
            .cache
            .get(texture_id)
            .map(|record| record.load_state)
    }

    /// Live reference count of a resource.
    pub fn reference_count(&self, texture_id: TextureId) -> Option<u32> {
        self.state
            .borrow()
            .cache
            .get(texture_id)
            .map(|record| record.reference_count)
    }

    /// Number of live cache entries.
    pub fn entry_count(&self) -> usize {
        self.state.borrow().cache.len()
    }

    /// Broadcast cleanup for an observer whose lifetime is ending: removes
    /// it from every entry's list and from the deferred-operation queues.
    ///
    /// Dropping the observer's `Rc` achieves the same lazily; this is the
    /// eager form.
    pub fn observer_destroyed(&self, observer: &Rc<dyn UploadObserver>) {
        let weak = Rc::downgrade(observer);
        let mut state = self.state.borrow_mut();
        state.cache.detach_observer(&weak);
        state.pending.purge_observer(&weak);
    }

    /// Build the notification texture set for a record: its own planes,
    /// plus a texture-stored mask in slot 1 for single-plane images.
    pub(crate) fn assemble_texture_set(
        cache: &TextureCache,
        record: &TextureRecord,
    ) -> Option<TextureSet> {
        if record.textures.is_empty() {
            return None;
        }
        let mut set = TextureSet::from_textures(record.textures.clone());
        if record.textures.len() == 1 {
            if let Some(mask_id) = record.mask_id {
                if let Some(mask) = cache.get(mask_id) {
                    let texture_backed = matches!(
                        mask.storage,
                        StorageIntent::UploadToTexture | StorageIntent::KeepTexture
                    );
                    if texture_backed {
                        if let Some(texture) = mask.textures.first() {
                            set.push(*texture);
                        }
                    }
                }
            }
        }
        Some(set)
    }
}

impl Drop for TextureEngine {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for TextureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("TextureEngine")
            .field("entries", &state.cache.len())
            .field("pending_removals", &state.removals.len())
            .field("notifying", &state.notifying)
            .finish_non_exhaustive()
    }
}
