//! Notification fan-out.
//!
//! Observers attached to an entry are notified exactly once each, in FIFO
//! attach order, with every observer detached before its callback runs so a
//! re-entrant removal cannot double-notify. Loads and removals raised from
//! inside callbacks are buffered in `PendingOps` and replayed afterwards;
//! the cache table is never structurally modified while a fan-out runs.

use super::observer::{LoadPayload, LoadResult, UploadObserver};
use super::state::LoadState;
use super::TextureEngine;
use crate::request::{StorageIntent, TextureId};
use std::rc::Rc;
use tracing::debug;

impl TextureEngine {
    /// Notify every observer of `texture_id` exactly once, then replay
    /// deferred operations.
    pub(crate) fn notify_observers(&self, texture_id: TextureId, success: bool) {
        let observers = {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            let Some(record) = state.cache.get_mut(texture_id) else {
                return;
            };
            // Capture animated metadata, then drop the decoder handle; it
            // is only needed for the first notification.
            if let Some(animation) = record.animation.take() {
                if success {
                    record.frame_count = animation.image.frame_count();
                    record.frame_interval = animation.image.frame_interval(animation.frame_index);
                }
            }
            let observers = record.observers.take_all();
            state.notifying = Some(texture_id);
            observers
        };

        debug!(
            texture_id = %texture_id,
            success,
            observers = observers.len(),
            "notifying observers"
        );

        let result = self.build_result(texture_id, success);
        for weak in observers {
            match weak.upgrade() {
                Some(observer) => observer.on_load_complete(&result),
                // Observer destroyed before completion: skipped silently.
                None => debug!(texture_id = %texture_id, "skipping destroyed observer"),
            }
        }

        let (loads, removals) = {
            let mut state = self.state.borrow_mut();
            state.notifying = None;
            state.pending.drain()
        };
        for load in loads {
            self.replay_pending_load(load.texture_id, load.observer);
        }
        for removal in removals {
            let observer = removal.observer.and_then(|weak| weak.upgrade());
            self.request_remove(removal.texture_id, observer.as_ref());
        }

        // One-shot pixel-buffer loads are done once everyone has the
        // buffer.
        let one_shot_done = {
            let state = self.state.borrow();
            state
                .cache
                .get(texture_id)
                .map(|record| {
                    record.storage == StorageIntent::ReturnPixelBuffer
                        && record.observers.is_empty()
                })
                .unwrap_or(false)
        };
        if one_shot_done {
            self.request_remove(texture_id, None);
        }
    }

    /// Late notification for an observer that requested an
    /// already-resident resource.
    pub(crate) fn emit_late(&self, texture_id: TextureId, observer: &Rc<dyn UploadObserver>) {
        let result = self.build_result(texture_id, true);
        observer.on_load_complete(&result);
    }

    /// Assemble the notification for an entry's current state.
    pub(crate) fn build_result(&self, texture_id: TextureId, success: bool) -> LoadResult {
        let state = self.state.borrow();
        let Some(record) = state.cache.get(texture_id) else {
            return LoadResult {
                texture_id,
                success: false,
                payload: LoadPayload::Texture(None),
                pre_multiplied: false,
                load_state: LoadState::LoadFailed,
            };
        };

        let payload = match record.storage {
            StorageIntent::ReturnPixelBuffer | StorageIntent::KeepPixelBuffer => {
                let buffer = if success {
                    record.pixel_buffers.first().cloned()
                } else {
                    None
                };
                LoadPayload::PixelBuffer(buffer)
            }
            _ if record.is_animated() => {
                let texture_set = if success {
                    Self::assemble_texture_set(&state.cache, record)
                } else {
                    None
                };
                LoadPayload::AnimatedTexture {
                    texture_set,
                    frame_count: record.frame_count,
                    frame_interval: record.frame_interval,
                }
            }
            _ => {
                let texture_set = if success {
                    Self::assemble_texture_set(&state.cache, record)
                } else {
                    None
                };
                LoadPayload::Texture(texture_set)
            }
        };

        LoadResult {
            texture_id,
            success,
            payload,
            pre_multiplied: record.pre_multiplied,
            load_state: record.load_state,
        }
    }
}
