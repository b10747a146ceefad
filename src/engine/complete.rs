//! Completion-side internals: folding worker results into the state
//! machine, the waiting-for-mask scan, uploads and teardown.

use super::state::LoadState;
use super::TextureEngine;
use crate::error::{DecodeError, MaskError, UploadError};
use crate::pixel::PixelBuffer;
use crate::pool::{LoadCompletion, MaskJob, WorkOutcome};
use crate::request::{StorageIntent, TextureId};
use tracing::{debug, error, warn};

/// What `post_load` decided to do with a decoded result.
enum PostLoad {
    /// Upload the planes, then fan out.
    Upload(Vec<PixelBuffer>),
    /// Blend the mask on the worker pool.
    ApplyMask(MaskJob),
    /// Buffer stored; nothing to do until the mask resolves.
    Wait,
    /// Pixel-storage terminal state reached; notify observers.
    Notify,
    /// Pixel-storage terminal state reached for a mask; scan dependents.
    WaitingScan,
}

impl TextureEngine {
    /// Fold one worker completion into the cache.
    pub(crate) fn handle_completion(&self, completion: LoadCompletion) {
        let texture_id = completion.texture_id;
        let cancelled = {
            let state = self.state.borrow();
            match state.cache.get(texture_id) {
                // Entry already gone; nothing to fold the result into.
                None => return,
                Some(record) => record.load_state.is_cancelled(),
            }
        };
        if cancelled {
            debug!(texture_id = %texture_id, "discarding result for cancelled load");
            self.discard_cancelled(texture_id);
            return;
        }

        match completion.outcome {
            WorkOutcome::Decoded(Ok(planes)) if !planes.is_empty() => {
                self.post_load(texture_id, planes)
            }
            WorkOutcome::Decoded(Ok(_)) => {
                self.load_failed(texture_id, DecodeError::new("decoder returned no planes"))
            }
            WorkOutcome::Decoded(Err(decode_error)) => self.load_failed(texture_id, decode_error),
            WorkOutcome::MaskApplied(result) => self.mask_apply_complete(texture_id, result),
        }
    }

    /// A decode failed: flip to `LoadFailed` and tell whoever is waiting.
    fn load_failed(&self, texture_id: TextureId, decode_error: DecodeError) {
        warn!(texture_id = %texture_id, error = %decode_error, "load failed");
        let is_mask_storage = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.cache.get_mut(texture_id) else {
                return;
            };
            record.load_state = LoadState::LoadFailed;
            matches!(
                record.storage,
                StorageIntent::KeepPixelBuffer | StorageIntent::KeepTexture
            )
        };
        if is_mask_storage {
            // A failed mask degrades its dependents; they upload unmasked.
            self.check_for_waiting_textures(texture_id);
        } else {
            self.notify_observers(texture_id, false);
        }
    }

    /// Successful decode: route by storage intent and mask state.
    fn post_load(&self, texture_id: TextureId, planes: Vec<PixelBuffer>) {
        let mut planes = planes;
        let next = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            let Some(record) = state.cache.get(texture_id) else {
                return;
            };
            let storage = record.storage;
            let load_state = record.load_state;
            let mask_id = record.mask_id;
            let content_scale = record.content_scale;
            let crop_to_mask = record.crop_to_mask;
            let pre_multiply = record.pre_multiply_on_load;

            if planes.len() > 1 {
                // Planar (YUV) result: one texture per plane, never
                // premultiplied.
                PostLoad::Upload(planes)
            } else if storage == StorageIntent::UploadToTexture {
                match mask_id {
                    Some(mask_id) if load_state != LoadState::Uploaded => {
                        let mask_view = state.cache.get(mask_id).map(|mask| {
                            (
                                mask.load_state,
                                mask.storage,
                                mask.pixel_buffers.first().cloned(),
                            )
                        });
                        match mask_view {
                            Some((
                                LoadState::NotStarted | LoadState::Loading,
                                _,
                                _,
                            )) => {
                                if let Some(record) = state.cache.get_mut(texture_id) {
                                    record.pixel_buffers = planes;
                                    record.load_state = LoadState::WaitingForMask;
                                }
                                PostLoad::Wait
                            }
                            Some((
                                LoadState::LoadFinished,
                                StorageIntent::KeepPixelBuffer,
                                Some(mask_buffer),
                            )) => {
                                let image = planes.remove(0);
                                if let Some(record) = state.cache.get_mut(texture_id) {
                                    // Keep the unmasked buffer so a failed
                                    // blend can degrade instead of failing.
                                    record.pixel_buffers = vec![image.clone()];
                                    record.load_state = LoadState::MaskApplying;
                                }
                                PostLoad::ApplyMask(MaskJob {
                                    image,
                                    mask: mask_buffer,
                                    content_scale,
                                    crop_to_mask,
                                    pre_multiply,
                                })
                            }
                            Some((
                                LoadState::LoadFinished | LoadState::Uploaded,
                                StorageIntent::KeepTexture,
                                _,
                            )) => PostLoad::Upload(planes),
                            _ => {
                                warn!(
                                    texture_id = %texture_id,
                                    mask_id = %mask_id,
                                    "alpha mask load failed; image will not be masked"
                                );
                                PostLoad::Upload(planes)
                            }
                        }
                    }
                    _ => PostLoad::Upload(planes),
                }
            } else {
                // Pixel-storage intents keep the decoded buffer CPU-side.
                let notify = storage == StorageIntent::ReturnPixelBuffer;
                if let Some(record) = state.cache.get_mut(texture_id) {
                    record.pre_multiplied = planes[0].is_pre_multiplied();
                    record.pixel_buffers = planes;
                    record.load_state = LoadState::LoadFinished;
                }
                if notify {
                    PostLoad::Notify
                } else {
                    PostLoad::WaitingScan
                }
            }
        };

        match next {
            PostLoad::Upload(planes) => {
                let uploaded = self.upload_textures(texture_id, planes);
                self.notify_observers(texture_id, uploaded);
            }
            PostLoad::ApplyMask(job) => self.pool.dispatch_mask_apply(texture_id, job),
            PostLoad::Wait => {}
            PostLoad::Notify => self.notify_observers(texture_id, true),
            PostLoad::WaitingScan => self.check_for_waiting_textures(texture_id),
        }
    }

    /// A mask blend came back.
    fn mask_apply_complete(
        &self,
        texture_id: TextureId,
        result: Result<PixelBuffer, MaskError>,
    ) {
        let planes = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.cache.get_mut(texture_id) else {
                return;
            };
            record.load_state = LoadState::MaskApplied;
            match result {
                Ok(masked) => {
                    record.pixel_buffers.clear();
                    vec![masked]
                }
                Err(mask_error) => {
                    warn!(
                        texture_id = %texture_id,
                        error = %mask_error,
                        "mask apply failed; image will not be masked"
                    );
                    let pre_multiply = record.pre_multiply_on_load;
                    let mut fallback = std::mem::take(&mut record.pixel_buffers);
                    if pre_multiply && fallback.len() == 1 {
                        let buffer = fallback.remove(0);
                        fallback.push(buffer.premultiplied());
                    }
                    fallback
                }
            }
        };
        let uploaded = self.upload_textures(texture_id, planes);
        self.notify_observers(texture_id, uploaded);
    }

    /// A mask source finished (or failed): resolve every entry waiting on
    /// it.
    pub(crate) fn check_for_waiting_textures(&self, mask_id: TextureId) {
        // A texture-stored mask uploads itself first.
        let upload_mask = {
            let state = self.state.borrow();
            state
                .cache
                .get(mask_id)
                .map(|mask| {
                    mask.load_state == LoadState::LoadFinished
                        && mask.storage == StorageIntent::KeepTexture
                })
                .unwrap_or(false)
        };
        if upload_mask {
            let planes = {
                let mut state = self.state.borrow_mut();
                state
                    .cache
                    .get_mut(mask_id)
                    .map(|mask| std::mem::take(&mut mask.pixel_buffers))
                    .unwrap_or_default()
            };
            self.upload_textures(mask_id, planes);
        }

        let waiting = {
            let state = self.state.borrow();
            state.cache.waiting_on_mask(mask_id)
        };
        if waiting.is_empty() {
            return;
        }

        let mask_view = {
            let state = self.state.borrow();
            state.cache.get(mask_id).map(|mask| {
                (
                    mask.load_state,
                    mask.storage,
                    mask.pixel_buffers.first().cloned(),
                )
            })
        };

        let mut notifications: Vec<(TextureId, bool)> = Vec::new();
        for waiter_id in waiting {
            match &mask_view {
                Some((
                    LoadState::LoadFinished,
                    StorageIntent::KeepPixelBuffer,
                    Some(mask_buffer),
                )) => {
                    let job = {
                        let mut state = self.state.borrow_mut();
                        let Some(record) = state.cache.get_mut(waiter_id) else {
                            continue;
                        };
                        let Some(image) = record.pixel_buffers.first().cloned() else {
                            continue;
                        };
                        record.load_state = LoadState::MaskApplying;
                        MaskJob {
                            image,
                            mask: mask_buffer.clone(),
                            content_scale: record.content_scale,
                            crop_to_mask: record.crop_to_mask,
                            pre_multiply: record.pre_multiply_on_load,
                        }
                    };
                    self.pool.dispatch_mask_apply(waiter_id, job);
                }
                Some((LoadState::Uploaded, StorageIntent::KeepTexture, _)) => {
                    let planes = self.take_pixel_buffers(waiter_id);
                    let uploaded = self.upload_textures(waiter_id, planes);
                    notifications.push((waiter_id, uploaded));
                }
                _ => {
                    warn!(
                        texture_id = %waiter_id,
                        mask_id = %mask_id,
                        "alpha mask load failed; image will not be masked"
                    );
                    let planes = self.take_pixel_buffers(waiter_id);
                    let uploaded = self.upload_textures(waiter_id, planes);
                    notifications.push((waiter_id, uploaded));
                }
            }
        }

        for (waiter_id, success) in notifications {
            self.notify_observers(waiter_id, success);
        }
    }

    fn take_pixel_buffers(&self, texture_id: TextureId) -> Vec<PixelBuffer> {
        let mut state = self.state.borrow_mut();
        state
            .cache
            .get_mut(texture_id)
            .map(|record| std::mem::take(&mut record.pixel_buffers))
            .unwrap_or_default()
    }

    /// Upload every plane and flip the entry to `Uploaded`.
    ///
    /// Returns false (and flips to `LoadFailed`) when the uploader refuses
    /// a plane or there is nothing to upload; upload failures notify like
    /// decode failures.
    pub(crate) fn upload_textures(&self, texture_id: TextureId, planes: Vec<PixelBuffer>) -> bool {
        let already_uploaded = {
            let state = self.state.borrow();
            state
                .cache
                .get(texture_id)
                .map(|record| record.load_state == LoadState::Uploaded)
                .unwrap_or(false)
        };
        if already_uploaded {
            // A synchronous load got there first; keep its textures.
            return true;
        }

        let mut textures = Vec::with_capacity(planes.len());
        let mut failure: Option<UploadError> = None;
        if planes.is_empty() {
            failure = Some(UploadError::new("no pixel data to upload"));
        }
        for plane in &planes {
            match self.uploader.upload(plane) {
                Ok(texture) => textures.push(texture),
                Err(upload_error) => {
                    failure = Some(upload_error);
                    break;
                }
            }
        }

        let mut state = self.state.borrow_mut();
        let Some(record) = state.cache.get_mut(texture_id) else {
            return false;
        };
        match failure {
            Some(upload_error) => {
                error!(texture_id = %texture_id, error = %upload_error, "upload failed");
                record.load_state = LoadState::LoadFailed;
                false
            }
            None => {
                debug!(
                    texture_id = %texture_id,
                    planes = textures.len(),
                    "uploaded"
                );
                record.pre_multiplied = planes
                    .first()
                    .map(|plane| plane.is_pre_multiplied())
                    .unwrap_or(false);
                record.textures = textures;
                record.pixel_buffers = Vec::new();
                record.load_state = LoadState::Uploaded;
                true
            }
        }
    }

    /// The discarded completion of a cancelled entry is its last sign of
    /// life: erase it now and release its mask reference.
    fn discard_cancelled(&self, texture_id: TextureId) {
        let mask_id = {
            let mut state = self.state.borrow_mut();
            state
                .cache
                .remove(texture_id)
                .and_then(|record| record.mask_id)
        };
        if let Some(mask_id) = mask_id {
            self.request_remove(mask_id, None);
        }
    }

    /// Erase one zero-reference entry during the tick's removal pass.
    pub(crate) fn finalize_removal(&self, texture_id: TextureId) {
        let mask_id = {
            let mut state = self.state.borrow_mut();
            let Some(record) = state.cache.get(texture_id) else {
                return;
            };
            if record.reference_count > 0 {
                debug!(texture_id = %texture_id, "entry resurrected; skipping removal");
                return;
            }
            if record.load_state.is_cancelled() {
                // Erased when the in-flight completion is discarded.
                return;
            }
            debug!(texture_id = %texture_id, load_state = %record.load_state, "erasing cache entry");
            state
                .cache
                .remove(texture_id)
                .and_then(|record| record.mask_id)
        };
        // Cascade: the erased entry held one reference on its mask.
        if let Some(mask_id) = mask_id {
            self.request_remove(mask_id, None);
        }
    }
}
