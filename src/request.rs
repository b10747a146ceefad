//! Load request vocabulary.
//!
//! A [`LoadRequest`] describes one image the engine should produce: the
//! source, the constraints handed to the decoder, the optional alpha mask
//! and animation frame, and how the result should be stored.

use crate::source::{AnimatedImage, ImageSource};
use std::sync::Arc;

/// Handle to a cached texture resource.
///
/// Ids are allocated strictly increasing and are never reused while any
/// reference to the resource survives. [`TextureId::INVALID`] is the
/// sentinel for "no texture".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

impl TextureId {
    /// Sentinel id that never names a cached resource.
    pub const INVALID: TextureId = TextureId(0);

    /// Returns true unless this is the invalid sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested output dimensions.
///
/// `0x0` means "decode at natural size".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    /// Natural-size marker.
    pub const UNSPECIFIED: ImageDimensions = ImageDimensions {
        width: 0,
        height: 0,
    };

    /// Create explicit dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when the caller did not constrain the output size.
    pub fn is_unspecified(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How the decoded image is fitted into the desired dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FittingMode {
    /// Fill the target, cropping excess.
    #[default]
    ScaleToFill,
    /// Fit entirely inside the target, preserving aspect ratio.
    ShrinkToFit,
    /// Match the target width, scale height proportionally.
    FitWidth,
    /// Match the target height, scale width proportionally.
    FitHeight,
}

/// Resampling filter used when scaling during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplingMode {
    /// Area-averaging box filter.
    #[default]
    Box,
    /// Nearest-neighbour sampling.
    Nearest,
    /// Bilinear sampling.
    Linear,
    /// Box filter to the nearest power of two, then bilinear.
    BoxThenLinear,
    /// No filtering at all (used for masks).
    NoFilter,
}

/// Whether colour channels should be multiplied by alpha on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreMultiply {
    /// Multiply colour by alpha before upload.
    MultiplyOnLoad,
    /// Leave colour channels untouched.
    #[default]
    LoadWithoutMultiply,
}

/// What the engine keeps once the load finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageIntent {
    /// Upload to a GPU texture; the terminal success state is `Uploaded`.
    #[default]
    UploadToTexture,
    /// Hand the decoded buffer to the observer; never cache-shared.
    ReturnPixelBuffer,
    /// Keep the decoded buffer CPU-side (mask sources for CPU blending).
    KeepPixelBuffer,
    /// Keep the decoded buffer and upload it (mask sources for GPU blending).
    KeepTexture,
}

/// Storage used for an alpha-mask resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskStorage {
    /// Mask stays a CPU pixel buffer and is blended on load.
    KeepPixelBuffer,
    /// Mask is uploaded and attached as a second texture.
    KeepTexture,
}

impl From<MaskStorage> for StorageIntent {
    fn from(storage: MaskStorage) -> Self {
        match storage {
            MaskStorage::KeepPixelBuffer => StorageIntent::KeepPixelBuffer,
            MaskStorage::KeepTexture => StorageIntent::KeepTexture,
        }
    }
}

/// Cache behaviour when an identical resource is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReloadPolicy {
    /// Reuse the cached resource.
    #[default]
    Cached,
    /// Reload the source even if cached.
    Forced,
}

/// Alpha-masking parameters attached to a load request.
///
/// The mask must have been requested beforehand via
/// `TextureEngine::request_mask_load`; `mask_id` is its handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskParams {
    /// Handle of the mask resource.
    pub mask_id: TextureId,
    /// Scale applied to the content before masking.
    pub content_scale: f32,
    /// Crop the scaled content to the mask size instead of stretching the
    /// mask over the content.
    pub crop_to_mask: bool,
}

impl MaskParams {
    /// Mask parameters with no scaling and mask-fit cropping.
    pub fn new(mask_id: TextureId) -> Self {
        Self {
            mask_id,
            content_scale: 1.0,
            crop_to_mask: true,
        }
    }
}

/// A frame of an animated image to load.
#[derive(Clone)]
pub struct AnimationParams {
    /// Decoder handle for the animated source.
    pub image: Arc<dyn AnimatedImage>,
    /// Which frame to decode.
    pub frame_index: u32,
}

impl std::fmt::Debug for AnimationParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationParams")
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}

/// Full description of one texture load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Where the pixels come from.
    pub source: ImageSource,
    /// Desired output dimensions (`0x0` for natural size).
    pub desired_size: ImageDimensions,
    /// Fitting policy for the desired size.
    pub fitting: FittingMode,
    /// Sampling filter for the desired size.
    pub sampling: SamplingMode,
    /// Rotate/flip per embedded orientation metadata.
    pub orientation_correction: bool,
    /// Optional alpha mask.
    pub mask: Option<MaskParams>,
    /// Optional animated-image frame.
    pub animation: Option<AnimationParams>,
    /// What to keep when the load finishes.
    pub storage: StorageIntent,
    /// Cache reuse policy.
    pub reload: ReloadPolicy,
    /// Premultiplication intent.
    pub pre_multiply: PreMultiply,
    /// Load inline on the calling thread instead of the worker pool.
    pub synchronous: bool,
}

impl LoadRequest {
    /// A request with default parameters for the given source.
    pub fn new(source: ImageSource) -> Self {
        Self {
            source,
            desired_size: ImageDimensions::UNSPECIFIED,
            fitting: FittingMode::default(),
            sampling: SamplingMode::default(),
            orientation_correction: true,
            mask: None,
            animation: None,
            storage: StorageIntent::default(),
            reload: ReloadPolicy::default(),
            pre_multiply: PreMultiply::default(),
            synchronous: false,
        }
    }

    /// Set the desired output dimensions.
    pub fn with_desired_size(mut self, size: ImageDimensions) -> Self {
        self.desired_size = size;
        self
    }

    /// Set the fitting mode.
    pub fn with_fitting(mut self, fitting: FittingMode) -> Self {
        self.fitting = fitting;
        self
    }

    /// Set the sampling mode.
    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    /// Enable or disable orientation correction.
    pub fn with_orientation_correction(mut self, correct: bool) -> Self {
        self.orientation_correction = correct;
        self
    }

    /// Attach an alpha mask.
    pub fn with_mask(mut self, mask: MaskParams) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Request one frame of an animated image.
    pub fn with_animation(mut self, image: Arc<dyn AnimatedImage>, frame_index: u32) -> Self {
        self.animation = Some(AnimationParams { image, frame_index });
        self
    }

    /// Set the storage intent.
    pub fn with_storage(mut self, storage: StorageIntent) -> Self {
        self.storage = storage;
        self
    }

    /// Set the reload policy.
    pub fn with_reload(mut self, reload: ReloadPolicy) -> Self {
        self.reload = reload;
        self
    }

    /// Set the premultiplication intent.
    pub fn with_pre_multiply(mut self, pre_multiply: PreMultiply) -> Self {
        self.pre_multiply = pre_multiply;
        self
    }

    /// Load inline on the calling thread.
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id_is_not_valid() {
        assert!(!TextureId::INVALID.is_valid());
        assert!(TextureId(1).is_valid());
    }

    #[test]
    fn test_dimensions_unspecified() {
        assert!(ImageDimensions::UNSPECIFIED.is_unspecified());
        assert!(ImageDimensions::default().is_unspecified());
        assert!(!ImageDimensions::new(100, 100).is_unspecified());
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(format!("{}", ImageDimensions::new(640, 480)), "640x480");
    }

    #[test]
    fn test_mask_storage_into_intent() {
        assert_eq!(
            StorageIntent::from(MaskStorage::KeepPixelBuffer),
            StorageIntent::KeepPixelBuffer
        );
        assert_eq!(
            StorageIntent::from(MaskStorage::KeepTexture),
            StorageIntent::KeepTexture
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = LoadRequest::new(ImageSource::url("a.png"));
        assert!(request.desired_size.is_unspecified());
        assert_eq!(request.storage, StorageIntent::UploadToTexture);
        assert_eq!(request.reload, ReloadPolicy::Cached);
        assert_eq!(request.pre_multiply, PreMultiply::LoadWithoutMultiply);
        assert!(request.mask.is_none());
        assert!(!request.synchronous);
    }

    #[test]
    fn test_request_builder() {
        let request = LoadRequest::new(ImageSource::url("a.png"))
            .with_desired_size(ImageDimensions::new(64, 64))
            .with_fitting(FittingMode::ShrinkToFit)
            .with_sampling(SamplingMode::Linear)
            .with_mask(MaskParams::new(TextureId(7)))
            .with_reload(ReloadPolicy::Forced)
            .with_pre_multiply(PreMultiply::MultiplyOnLoad)
            .with_synchronous(true);

        assert_eq!(request.desired_size, ImageDimensions::new(64, 64));
        assert_eq!(request.fitting, FittingMode::ShrinkToFit);
        assert_eq!(request.sampling, SamplingMode::Linear);
        assert_eq!(request.mask.map(|m| m.mask_id), Some(TextureId(7)));
        assert_eq!(request.reload, ReloadPolicy::Forced);
        assert_eq!(request.pre_multiply, PreMultiply::MultiplyOnLoad);
        assert!(request.synchronous);
    }
}
