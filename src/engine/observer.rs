//! Upload observers and notification payloads.
//!
//! Consumers implement [`UploadObserver`] and hand the engine an
//! `Rc<dyn UploadObserver>`. The engine keeps only a [`Weak`] reference:
//! dropping the `Rc` is the auto-detaching token, so an observer that dies
//! before its load completes is silently skipped during fan-out.

use crate::engine::state::LoadState;
use crate::pixel::PixelBuffer;
use crate::request::TextureId;
use crate::texture::TextureSet;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Receives exactly one notification per load attempt.
pub trait UploadObserver {
    /// Called on the orchestrator thread when a load attempt completes,
    /// successfully or not. Re-entering the engine from here is safe.
    fn on_load_complete(&self, result: &LoadResult);
}

/// What a completed load produced.
#[derive(Debug, Clone)]
pub enum LoadPayload {
    /// A CPU pixel buffer (`ReturnPixelBuffer`/`KeepPixelBuffer` storage).
    PixelBuffer(Option<PixelBuffer>),
    /// An uploaded texture set.
    Texture(Option<TextureSet>),
    /// One frame of an animated image.
    AnimatedTexture {
        texture_set: Option<TextureSet>,
        frame_count: u32,
        frame_interval: Duration,
    },
}

/// Notification handed to observers.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Handle of the resource the notification is about.
    pub texture_id: TextureId,
    /// Whether usable pixels were produced.
    pub success: bool,
    /// The produced payload; empty variants on failure.
    pub payload: LoadPayload,
    /// Whether colour channels were multiplied by alpha. Always false when
    /// the decoded format had no alpha channel, regardless of the request.
    pub pre_multiplied: bool,
    /// Final state of the resource at notification time.
    pub load_state: LoadState,
}

/// FIFO list of weak observer references attached to one cache entry.
#[derive(Default)]
pub struct ObserverList {
    observers: Vec<Weak<dyn UploadObserver>>,
}

impl ObserverList {
    /// Attach an observer. Attaching the same observer twice to one entry
    /// is a caller error but is absorbed as a no-op.
    pub fn attach(&mut self, observer: Weak<dyn UploadObserver>) {
        if self.contains(&observer) {
            return;
        }
        self.observers.push(observer);
    }

    /// Detach an observer; no-op when it is not attached.
    pub fn detach(&mut self, observer: &Rc<dyn UploadObserver>) {
        let target = Rc::downgrade(observer);
        self.observers.retain(|weak| !Weak::ptr_eq(weak, &target));
    }

    /// Remove by weak identity (used by the destroyed-observer broadcast).
    pub fn detach_weak(&mut self, observer: &Weak<dyn UploadObserver>) {
        self.observers.retain(|weak| !Weak::ptr_eq(weak, observer));
    }

    /// Take the whole list for a fan-out, leaving it empty.
    pub fn take_all(&mut self) -> Vec<Weak<dyn UploadObserver>> {
        std::mem::take(&mut self.observers)
    }

    /// Number of attached observers (dead weaks included until fan-out).
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// True when nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn contains(&self, observer: &Weak<dyn UploadObserver>) -> bool {
        self.observers
            .iter()
            .any(|weak| Weak::ptr_eq(weak, observer))
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.observers.len())
            .finish()
    }
}
