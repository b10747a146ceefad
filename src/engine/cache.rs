//! The resource cache table.
//!
//! Entries are owned exclusively by this table and addressed two ways: by
//! [`TextureId`] (the slot map; nothing outside ever holds a direct
//! reference to a record, so callbacks can never dangle) and by structural
//! [`CacheKey`] for shared entries. Key equality covers every normalized
//! request field, which enforces the verify-the-full-key contract without a
//! separate collision check.

use crate::engine::observer::{ObserverList, UploadObserver};
use crate::engine::state::LoadState;
use crate::pixel::PixelBuffer;
use crate::request::{
    AnimationParams, FittingMode, ImageDimensions, LoadRequest, PreMultiply, SamplingMode,
    StorageIntent, TextureId,
};
use crate::source::ImageSource;
use crate::texture::GpuTexture;
use std::collections::HashMap;
use std::rc::Weak;
use std::time::Duration;

/// Structural cache key: the normalized identity of a shareable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: ImageSource,
    desired_size: ImageDimensions,
    fitting: FittingMode,
    sampling: SamplingMode,
    storage: StorageIntent,
    mask_id: Option<TextureId>,
    crop_to_mask: bool,
    orientation_correction: bool,
    pre_multiply: PreMultiply,
    animated: bool,
    frame_index: u32,
}

impl CacheKey {
    /// Build the key for a request.
    ///
    /// An unspecified desired size decodes at natural size, where fitting
    /// and sampling cannot change the result, so both are normalized to
    /// their defaults before keying.
    pub fn new(request: &LoadRequest) -> Self {
        let (fitting, sampling) = if request.desired_size.is_unspecified() {
            (FittingMode::default(), SamplingMode::default())
        } else {
            (request.fitting, request.sampling)
        };
        Self {
            source: request.source.clone(),
            desired_size: request.desired_size,
            fitting,
            sampling,
            storage: request.storage,
            mask_id: request.mask.map(|m| m.mask_id),
            crop_to_mask: request.mask.map(|m| m.crop_to_mask).unwrap_or(false),
            orientation_correction: request.orientation_correction,
            pre_multiply: request.pre_multiply,
            animated: request.animation.is_some(),
            frame_index: request
                .animation
                .as_ref()
                .map(|a| a.frame_index)
                .unwrap_or(0),
        }
    }
}

/// One cached texture resource.
#[derive(Debug)]
pub struct TextureRecord {
    /// Unique handle of this record.
    pub id: TextureId,
    /// Structural key; `None` for never-shared (`ReturnPixelBuffer`) loads.
    pub key: Option<CacheKey>,
    /// Where the pixels come from.
    pub source: ImageSource,
    /// Decode constraints.
    pub desired_size: ImageDimensions,
    pub fitting: FittingMode,
    pub sampling: SamplingMode,
    pub orientation_correction: bool,
    /// What to keep once loaded.
    pub storage: StorageIntent,
    /// Current state-machine state.
    pub load_state: LoadState,
    /// Number of live external holders.
    pub reference_count: u32,
    /// Alpha-mask dependency, if any.
    pub mask_id: Option<TextureId>,
    pub content_scale: f32,
    pub crop_to_mask: bool,
    /// Premultiplication intent and outcome.
    pub pre_multiply_on_load: bool,
    pub pre_multiplied: bool,
    /// Observers awaiting this entry's next notification.
    pub observers: ObserverList,
    /// Decoded planes retained CPU-side (storage intent or mask wait).
    pub pixel_buffers: Vec<PixelBuffer>,
    /// Uploaded textures, one per plane.
    pub textures: Vec<GpuTexture>,
    /// Animated-source handle; dropped after the first notification.
    pub animation: Option<AnimationParams>,
    /// Frame metadata captured at notification time.
    pub frame_count: u32,
    pub frame_interval: Duration,
    /// Whether the decoder was asked for separate YUV planes.
    pub load_planes: bool,
}

impl TextureRecord {
    /// Create a fresh record for a request, with one reference held.
    pub fn new(id: TextureId, request: &LoadRequest, key: Option<CacheKey>) -> Self {
        Self {
            id,
            key,
            source: request.source.clone(),
            desired_size: request.desired_size,
            fitting: request.fitting,
            sampling: request.sampling,
            orientation_correction: request.orientation_correction,
            storage: request.storage,
            load_state: LoadState::NotStarted,
            reference_count: 1,
            mask_id: request.mask.map(|m| m.mask_id),
            content_scale: request.mask.map(|m| m.content_scale).unwrap_or(1.0),
            crop_to_mask: request.mask.map(|m| m.crop_to_mask).unwrap_or(false),
            pre_multiply_on_load: request.pre_multiply == PreMultiply::MultiplyOnLoad,
            pre_multiplied: false,
            observers: ObserverList::default(),
            pixel_buffers: Vec::new(),
            textures: Vec::new(),
            animation: request.animation.clone(),
            frame_count: 0,
            frame_interval: Duration::ZERO,
            load_planes: false,
        }
    }

    /// True when this record is an animated-image frame.
    pub fn is_animated(&self) -> bool {
        self.animation.is_some() || self.frame_count > 0
    }
}

/// Id-indexed table of cache records with a structural-key index.
#[derive(Default)]
pub struct TextureCache {
    next_id: u64,
    records: HashMap<TextureId, TextureRecord>,
    by_key: HashMap<CacheKey, TextureId>,
}

impl TextureCache {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id. Strictly increasing; never the sentinel.
    pub fn generate_id(&mut self) -> TextureId {
        self.next_id += 1;
        TextureId(self.next_id)
    }

    /// Look up a shared entry by structural key.
    pub fn find_by_key(&self, key: &CacheKey) -> Option<TextureId> {
        self.by_key.get(key).copied()
    }

    /// Insert a record, indexing its key when it has one.
    pub fn insert(&mut self, record: TextureRecord) {
        if let Some(key) = record.key.clone() {
            self.by_key.insert(key, record.id);
        }
        self.records.insert(record.id, record);
    }

    /// Borrow a record.
    pub fn get(&self, id: TextureId) -> Option<&TextureRecord> {
        self.records.get(&id)
    }

    /// Mutably borrow a record.
    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut TextureRecord> {
        self.records.get_mut(&id)
    }

    /// Erase a record and its key index entry.
    pub fn remove(&mut self, id: TextureId) -> Option<TextureRecord> {
        let record = self.records.remove(&id)?;
        if let Some(key) = &record.key {
            // Guard against the key having been re-pointed by a forced
            // replacement before this erase ran.
            if self.by_key.get(key) == Some(&id) {
                self.by_key.remove(key);
            }
        }
        Some(record)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove an observer from every record's list.
    pub fn detach_observer(&mut self, observer: &Weak<dyn UploadObserver>) {
        for record in self.records.values_mut() {
            record.observers.detach_weak(observer);
        }
    }

    /// Ids of every record waiting for the given mask to resolve.
    pub fn waiting_on_mask(&self, mask_id: TextureId) -> Vec<TextureId> {
        let mut ids: Vec<TextureId> = self
            .records
            .values()
            .filter(|record| {
                record.mask_id == Some(mask_id)
                    && record.load_state == LoadState::WaitingForMask
            })
            .map(|record| record.id)
            .collect();
        // Deterministic order for notification fan-outs.
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for TextureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureCache")
            .field("records", &self.records.len())
            .field("keyed", &self.by_key.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
