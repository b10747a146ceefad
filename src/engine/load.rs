//! Request-path internals: cache probe, state dispatch, synchronous loads.

use super::cache::{CacheKey, TextureRecord};
use super::observer::{LoadPayload, LoadResult, UploadObserver};
use super::state::LoadState;
use super::TextureEngine;
use crate::error::{DecodeError, TextureError};
use crate::pixel::PixelBuffer;
use crate::pool::{DecodeJob, FrameJob};
use crate::request::{LoadRequest, PreMultiply, ReloadPolicy, StorageIntent, TextureId};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the request path decided to do after resolving the cache entry.
enum RequestDispatch {
    /// Nothing further; the observer (if any) is attached to in-flight work.
    None,
    /// Start a load now, or queue it if a fan-out is executing.
    LoadOrQueue,
}

enum StartJob {
    Decode(DecodeJob),
    Frame(FrameJob),
}

impl TextureEngine {
    pub(crate) fn request_load_internal(
        &self,
        request: LoadRequest,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) -> TextureId {
        if request.synchronous {
            if request.storage == StorageIntent::ReturnPixelBuffer {
                warn!(
                    source = %request.source,
                    "synchronous ReturnPixelBuffer loads bypass the cache; use request_load_sync"
                );
                return TextureId::INVALID;
            }
            return match self.load_synchronously(&request) {
                Ok(texture_id) => texture_id,
                Err(error) => {
                    warn!(source = %request.source, error = %error, "synchronous load failed");
                    TextureId::INVALID
                }
            };
        }

        let texture_id = self.probe_or_create(&request);
        if let RequestDispatch::LoadOrQueue = self.dispatch_for_state(texture_id, observer) {
            self.load_or_queue(texture_id, observer);
        }
        texture_id
    }

    /// Find the shared entry for the request, or create a fresh one.
    ///
    /// Handles reference counting (a `Cached` hit bumps the count; a
    /// `Forced` hit replaces the texture under the existing reference), the
    /// entry's implicit reference on its mask, and forced state resets.
    fn probe_or_create(&self, request: &LoadRequest) -> TextureId {
        let mut state = self.state.borrow_mut();
        let key =
            (request.storage != StorageIntent::ReturnPixelBuffer).then(|| CacheKey::new(request));

        let texture_id = match key.as_ref().and_then(|k| state.cache.find_by_key(k)) {
            Some(texture_id) => {
                if request.reload == ReloadPolicy::Cached {
                    if let Some(record) = state.cache.get_mut(texture_id) {
                        record.reference_count += 1;
                        debug!(
                            texture_id = %texture_id,
                            reference_count = record.reference_count,
                            source = %request.source,
                            "reusing cached texture"
                        );
                    }
                }
                texture_id
            }
            None => {
                let texture_id = state.cache.generate_id();
                let mut record = TextureRecord::new(texture_id, request, key);
                record.load_planes = self.config.load_yuv_planes
                    && record.mask_id.is_none()
                    && record.storage == StorageIntent::UploadToTexture;
                debug!(texture_id = %texture_id, source = %request.source, "new cache entry");
                state.cache.insert(record);

                // The entry itself holds one reference on its mask for as
                // long as it lives; released when the entry is erased.
                if let Some(mask_id) = request.mask.map(|m| m.mask_id) {
                    match state.cache.get_mut(mask_id) {
                        Some(mask) => mask.reference_count += 1,
                        None => warn!(
                            texture_id = %texture_id,
                            mask_id = %mask_id,
                            "mask is not cached; it will not be applied"
                        ),
                    }
                }
                texture_id
            }
        };

        if request.reload == ReloadPolicy::Forced {
            if let Some(record) = state.cache.get_mut(texture_id) {
                let resettable = !record.load_state.is_in_flight()
                    && !record.load_state.is_cancelled()
                    && record.load_state != LoadState::NotStarted;
                if resettable {
                    debug!(texture_id = %texture_id, "forced reload");
                    record.load_state = LoadState::NotStarted;
                }
            }
        }

        texture_id
    }

    /// Decide what the current state of the entry requires.
    fn dispatch_for_state(
        &self,
        texture_id: TextureId,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) -> RequestDispatch {
        let mut state = self.state.borrow_mut();
        let Some(record) = state.cache.get_mut(texture_id) else {
            return RequestDispatch::None;
        };
        match record.load_state {
            LoadState::NotStarted | LoadState::LoadFailed => RequestDispatch::LoadOrQueue,
            LoadState::Loading
            | LoadState::WaitingForMask
            | LoadState::MaskApplying
            | LoadState::MaskApplied => {
                if let Some(obs) = observer {
                    record.observers.attach(Rc::downgrade(obs));
                }
                RequestDispatch::None
            }
            LoadState::Uploaded => {
                if observer.is_some() {
                    RequestDispatch::LoadOrQueue
                } else {
                    RequestDispatch::None
                }
            }
            LoadState::Cancelled => {
                // The background decode is still in flight; resurrect.
                record.load_state = LoadState::Loading;
                if let Some(obs) = observer {
                    record.observers.attach(Rc::downgrade(obs));
                }
                RequestDispatch::None
            }
            LoadState::MaskCancelled => {
                record.load_state = LoadState::MaskApplying;
                if let Some(obs) = observer {
                    record.observers.attach(Rc::downgrade(obs));
                }
                RequestDispatch::None
            }
            LoadState::LoadFinished => {
                if observer.is_some() && record.storage == StorageIntent::ReturnPixelBuffer {
                    RequestDispatch::LoadOrQueue
                } else {
                    RequestDispatch::None
                }
            }
        }
    }

    /// Start a load, emit a late notification, or defer the whole request
    /// when a fan-out is executing.
    pub(crate) fn load_or_queue(
        &self,
        texture_id: TextureId,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) {
        {
            let mut state = self.state.borrow_mut();
            if state.notifying.is_some() {
                state.pending.push_load(texture_id, observer.map(Rc::downgrade));
                return;
            }
        }

        enum Action {
            Start,
            NotifyLate,
            Nothing,
        }
        let action = {
            let state = self.state.borrow();
            let Some(record) = state.cache.get(texture_id) else {
                return;
            };
            match record.load_state {
                LoadState::NotStarted | LoadState::LoadFailed => Action::Start,
                LoadState::Uploaded => Action::NotifyLate,
                LoadState::LoadFinished
                    if record.storage == StorageIntent::ReturnPixelBuffer =>
                {
                    Action::NotifyLate
                }
                _ => Action::Nothing,
            }
        };
        match action {
            Action::Start => self.start_load(texture_id, observer),
            Action::NotifyLate => {
                if let Some(obs) = observer {
                    self.emit_late(texture_id, obs);
                }
            }
            Action::Nothing => {}
        }
    }

    /// Mark the entry loading, attach the observer and hand the decode to
    /// the worker pool.
    pub(crate) fn start_load(
        &self,
        texture_id: TextureId,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) {
        let job = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.cache.get_mut(texture_id) else {
                return;
            };
            debug!(texture_id = %texture_id, source = %record.source, "starting load");
            record.load_state = LoadState::Loading;
            if let Some(obs) = observer {
                record.observers.attach(Rc::downgrade(obs));
            }
            // Masked images premultiply after the blend, not during decode.
            let pre_multiply = record.pre_multiply_on_load && record.mask_id.is_none();
            match &record.animation {
                Some(animation) => StartJob::Frame(FrameJob {
                    image: Arc::clone(&animation.image),
                    frame_index: animation.frame_index,
                    desired_size: record.desired_size,
                    fitting: record.fitting,
                    sampling: record.sampling,
                    pre_multiply,
                }),
                None => StartJob::Decode(DecodeJob {
                    source: record.source.clone(),
                    desired_size: record.desired_size,
                    fitting: record.fitting,
                    sampling: record.sampling,
                    orientation_correction: record.orientation_correction,
                    want_planes: record.load_planes,
                    pre_multiply,
                }),
            }
        };
        match job {
            StartJob::Decode(job) => self.pool.dispatch_decode(texture_id, job),
            StartJob::Frame(job) => self.pool.dispatch_frame(texture_id, job),
        }
    }

    /// Replay one load deferred during a fan-out.
    pub(crate) fn replay_pending_load(
        &self,
        texture_id: TextureId,
        observer: Option<std::rc::Weak<dyn UploadObserver>>,
    ) {
        // An observer destroyed while queued is dropped silently.
        let observer = observer.and_then(|weak| weak.upgrade());

        enum Action {
            Start,
            NotifyLate,
            Nothing,
        }
        let action = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.cache.get_mut(texture_id) else {
                return;
            };
            match record.load_state {
                LoadState::Uploaded => Action::NotifyLate,
                LoadState::LoadFinished
                    if record.storage == StorageIntent::ReturnPixelBuffer =>
                {
                    Action::NotifyLate
                }
                LoadState::Loading
                | LoadState::WaitingForMask
                | LoadState::MaskApplying
                | LoadState::MaskApplied => {
                    if let Some(obs) = &observer {
                        record.observers.attach(Rc::downgrade(obs));
                    }
                    Action::Nothing
                }
                _ => Action::Start,
            }
        };
        match action {
            Action::Start => self.start_load(texture_id, observer.as_ref()),
            Action::NotifyLate => {
                if let Some(obs) = &observer {
                    self.emit_late(texture_id, obs);
                }
            }
            Action::Nothing => {}
        }
    }

    /// Release one reference; detach the observer; queue the entry for the
    /// next tick's removal pass.
    pub(crate) fn request_remove_internal(
        &self,
        texture_id: TextureId,
        observer: Option<&Rc<dyn UploadObserver>>,
    ) {
        if !texture_id.is_valid() {
            return;
        }
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        let Some(record) = state.cache.get_mut(texture_id) else {
            return;
        };
        if let Some(obs) = observer {
            record.observers.detach(obs);
        }

        if state.notifying.is_some() {
            let weak = observer.map(Rc::downgrade);
            if let Some(weak) = &weak {
                state.pending.cancel_load(texture_id, weak);
            }
            state.pending.push_remove(texture_id, weak);
            return;
        }

        if record.reference_count > 0 {
            record.reference_count -= 1;
        }
        if record.reference_count == 0 {
            match record.load_state {
                // Background work cannot be interrupted mid-decode; mark the
                // entry and discard the result when it arrives.
                LoadState::Loading => record.load_state = LoadState::Cancelled,
                LoadState::MaskApplying => record.load_state = LoadState::MaskCancelled,
                _ => {}
            }
        }
        debug!(
            texture_id = %texture_id,
            reference_count = record.reference_count,
            load_state = %record.load_state,
            "remove requested"
        );
        state.removals.enqueue(texture_id);
    }

    /// Synchronous variant returning the payload directly.
    pub(crate) fn load_sync_internal(
        &self,
        request: LoadRequest,
    ) -> Result<LoadResult, TextureError> {
        if request.storage == StorageIntent::ReturnPixelBuffer {
            // One-shot: decode without creating a cache entry.
            let planes = self.decode_inline(&request)?;
            let buffer = planes
                .into_iter()
                .next()
                .ok_or_else(|| TextureError::from(DecodeError::new("decoder returned no planes")))?;
            let buffer = if request.pre_multiply == PreMultiply::MultiplyOnLoad {
                buffer.premultiplied()
            } else {
                buffer
            };
            let pre_multiplied = buffer.is_pre_multiplied();
            return Ok(LoadResult {
                texture_id: TextureId::INVALID,
                success: true,
                payload: LoadPayload::PixelBuffer(Some(buffer)),
                pre_multiplied,
                load_state: LoadState::LoadFinished,
            });
        }

        let request = request.with_synchronous(true);
        let texture_id = self.load_synchronously(&request)?;
        Ok(self.build_result(texture_id, true))
    }

    /// Inline decode/mask/upload path shared by the synchronous entry
    /// points. Never touches the observer list. A decode failure cleans up
    /// the fresh entry via `request_remove` and propagates the error.
    pub(crate) fn load_synchronously(
        &self,
        request: &LoadRequest,
    ) -> Result<TextureId, TextureError> {
        let texture_id = self.probe_or_create(request);

        let already_loaded = {
            let state = self.state.borrow();
            state
                .cache
                .get(texture_id)
                .map(|record| record.load_state.is_terminal_success())
                .unwrap_or(false)
        };
        if already_loaded {
            return Ok(texture_id);
        }

        let mut planes = match self.decode_inline(request) {
            Ok(planes) if !planes.is_empty() => planes,
            Ok(_) => {
                self.request_remove(texture_id, None);
                return Err(DecodeError::new("decoder returned no planes").into());
            }
            Err(error) => {
                self.request_remove(texture_id, None);
                return Err(error);
            }
        };

        if request.storage == StorageIntent::KeepPixelBuffer {
            let mut state = self.state.borrow_mut();
            if let Some(record) = state.cache.get_mut(texture_id) {
                record.pre_multiplied = planes[0].is_pre_multiplied();
                record.pixel_buffers = planes;
                record.load_state = LoadState::LoadFinished;
            }
            return Ok(texture_id);
        }

        if let Some(mask) = request.mask {
            let mask_buffer = {
                let state = self.state.borrow();
                match state.cache.get(mask.mask_id) {
                    Some(record) if record.storage == StorageIntent::KeepPixelBuffer => {
                        record.pixel_buffers.first().cloned()
                    }
                    // Texture-stored masks attach at texture_set() time.
                    Some(record) if record.storage == StorageIntent::KeepTexture => None,
                    _ => {
                        warn!(
                            mask_id = %mask.mask_id,
                            "mask is not cached; image will not be masked"
                        );
                        None
                    }
                }
            };
            if let Some(mask_buffer) = mask_buffer {
                let image = planes.remove(0);
                match self
                    .masker
                    .apply(image.clone(), &mask_buffer, mask.content_scale, mask.crop_to_mask)
                {
                    Ok(masked) => planes.insert(0, masked),
                    Err(error) => {
                        warn!(
                            texture_id = %texture_id,
                            error = %error,
                            "mask apply failed; image will not be masked"
                        );
                        planes.insert(0, image);
                    }
                }
            }
        }

        if request.pre_multiply == PreMultiply::MultiplyOnLoad && planes.len() == 1 {
            let buffer = planes.remove(0);
            planes.insert(0, buffer.premultiplied());
        }

        if self.upload_textures(texture_id, planes) {
            Ok(texture_id)
        } else {
            Err(crate::error::UploadError::new("synchronous upload failed").into())
        }
    }

    fn decode_inline(&self, request: &LoadRequest) -> Result<Vec<PixelBuffer>, TextureError> {
        let planes = match &request.animation {
            Some(animation) => animation
                .image
                .decode_frame(
                    animation.frame_index,
                    request.desired_size,
                    request.fitting,
                    request.sampling,
                )
                .map(|buffer| vec![buffer])?,
            None => self.decoder.decode(
                &request.source,
                request.desired_size,
                request.fitting,
                request.sampling,
                request.orientation_correction,
                false,
            )?,
        };
        Ok(planes)
    }
}
