//! Two-phase buffer for requests that arrive during a notification fan-out.
//!
//! While observers are being notified the cache must not start loads or
//! process removals, because callbacks may re-enter the engine. Every
//! side-effecting request raised during a fan-out is collected here and
//! replayed afterwards: loads first, then removals.

use crate::engine::observer::UploadObserver;
use crate::request::TextureId;
use std::rc::Weak;

/// A load (or late notification) deferred until after the fan-out.
pub struct PendingLoad {
    pub texture_id: TextureId,
    pub observer: Option<Weak<dyn UploadObserver>>,
}

/// A removal deferred until after the fan-out.
pub struct PendingRemove {
    pub texture_id: TextureId,
    pub observer: Option<Weak<dyn UploadObserver>>,
}

/// Collected side effects of one fan-out.
#[derive(Default)]
pub struct PendingOps {
    loads: Vec<PendingLoad>,
    removals: Vec<PendingRemove>,
}

impl PendingOps {
    /// Defer a load.
    pub fn push_load(&mut self, texture_id: TextureId, observer: Option<Weak<dyn UploadObserver>>) {
        self.loads.push(PendingLoad {
            texture_id,
            observer,
        });
    }

    /// Defer a removal.
    pub fn push_remove(
        &mut self,
        texture_id: TextureId,
        observer: Option<Weak<dyn UploadObserver>>,
    ) {
        self.removals.push(PendingRemove {
            texture_id,
            observer,
        });
    }

    /// Drop a deferred load again because its requester removed the
    /// resource before the fan-out finished.
    pub fn cancel_load(&mut self, texture_id: TextureId, observer: &Weak<dyn UploadObserver>) {
        self.loads.retain(|load| {
            !(load.texture_id == texture_id
                && load
                    .observer
                    .as_ref()
                    .is_some_and(|weak| Weak::ptr_eq(weak, observer)))
        });
    }

    /// Drop every deferred load raised by a now-destroyed observer.
    pub fn purge_observer(&mut self, observer: &Weak<dyn UploadObserver>) {
        self.loads.retain(|load| {
            !load
                .observer
                .as_ref()
                .is_some_and(|weak| Weak::ptr_eq(weak, observer))
        });
    }

    /// Take everything for replay, leaving the buffer empty.
    pub fn drain(&mut self) -> (Vec<PendingLoad>, Vec<PendingRemove>) {
        (
            std::mem::take(&mut self.loads),
            std::mem::take(&mut self.removals),
        )
    }

    /// True when nothing is deferred.
    pub fn is_empty(&self) -> bool {
        self.loads.is_empty() && self.removals.is_empty()
    }
}

impl std::fmt::Debug for PendingOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOps")
            .field("loads", &self.loads.len())
            .field("removals", &self.removals.len())
            .finish()
    }
}
