//! GPU-side contracts.
//!
//! Texture and atlas object creation belong to the renderer, not to this
//! engine. The traits here are the seam: the engine hands finished pixel
//! buffers to a [`GpuUploader`] and treats the returned [`GpuTexture`]
//! handles as opaque. Uploads happen only on the orchestrator thread, so
//! implementations do not need to be thread-safe.

use crate::error::UploadError;
use crate::pixel::PixelBuffer;
use crate::request::{FittingMode, ImageDimensions};
use crate::source::ImageSource;

/// Opaque handle to an uploaded GPU texture.
///
/// The id is chosen by the uploader; the engine only stores and compares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuTexture {
    id: u64,
    width: u32,
    height: u32,
}

impl GpuTexture {
    /// Create a handle. Called by uploader implementations.
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    /// Uploader-chosen id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Texture width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Texture height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// An ordered set of textures forming one drawable image.
///
/// Slot 0 is the content; slot 1 carries a GPU-blended mask when one is
/// attached. Multi-plane (YUV) images occupy one slot per plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureSet {
    textures: Vec<GpuTexture>,
}

impl TextureSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from textures in slot order.
    pub fn from_textures(textures: Vec<GpuTexture>) -> Self {
        Self { textures }
    }

    /// Append a texture in the next slot.
    pub fn push(&mut self, texture: GpuTexture) {
        self.textures.push(texture);
    }

    /// Texture at the given slot.
    pub fn texture(&self, slot: usize) -> Option<&GpuTexture> {
        self.textures.get(slot)
    }

    /// All textures in slot order.
    pub fn textures(&self) -> &[GpuTexture] {
        &self.textures
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// True when no texture has been uploaded.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Uploads pixel buffers to GPU textures.
///
/// Called only from the orchestrator thread.
pub trait GpuUploader {
    /// Upload one buffer and return its handle.
    fn upload(&self, buffer: &PixelBuffer) -> Result<GpuTexture, UploadError>;
}

/// Normalized uv rectangle within an atlas texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl UvRect {
    /// The rectangle covering a full texture.
    pub const FULL: UvRect = UvRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };
}

/// A successful atlas placement.
#[derive(Debug, Clone)]
pub struct AtlasSlot {
    /// The shared atlas texture set.
    pub texture_set: TextureSet,
    /// Where the image landed within the atlas.
    pub uv_rect: UvRect,
    /// Actual pixel size of the packed image.
    pub actual_size: ImageDimensions,
}

/// External atlas packer for small images.
///
/// Returning `None` means the image could not be atlased (too large, atlas
/// full, source unavailable); the engine then falls back to a standalone
/// texture without surfacing a distinct error.
pub trait AtlasSite {
    /// Try to pack the image into an atlas.
    fn add(
        &self,
        source: &ImageSource,
        desired_size: ImageDimensions,
        fitting: FittingMode,
    ) -> Option<AtlasSlot>;
}
