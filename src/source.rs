//! Image sources.
//!
//! The engine accepts either a url (typically a file path) or an encoded
//! in-memory buffer that the host registered earlier. Animated sources are
//! represented by an external decoder handle, so the frame-decoding codec
//! stays outside the engine.

use crate::error::DecodeError;
use crate::pixel::PixelBuffer;
use crate::request::{FittingMode, ImageDimensions, SamplingMode};
use bytes::Bytes;
use std::time::Duration;

/// An encoded (not yet decoded) image held in memory.
///
/// The id identifies the registered buffer for caching purposes; two buffers
/// with the same id are considered the same resource.
#[derive(Debug, Clone)]
pub struct EncodedBuffer {
    id: u64,
    bytes: Bytes,
}

impl EncodedBuffer {
    /// Wrap encoded bytes under a host-assigned id.
    pub fn new(id: u64, bytes: impl Into<Bytes>) -> Self {
        Self {
            id,
            bytes: bytes.into(),
        }
    }

    /// Host-assigned identity of this buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The encoded payload.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Where an image comes from.
///
/// Equality and hashing follow resource identity: urls compare by string,
/// buffers by their registered id (not by payload bytes).
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// A url, typically a filesystem path.
    Url(String),
    /// An encoded in-memory buffer.
    Buffer(EncodedBuffer),
}

impl ImageSource {
    /// Convenience constructor for a url source.
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    /// Convenience constructor for a buffer source.
    pub fn buffer(id: u64, bytes: impl Into<Bytes>) -> Self {
        Self::Buffer(EncodedBuffer::new(id, bytes))
    }
}

impl PartialEq for ImageSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Url(a), Self::Url(b)) => a == b,
            (Self::Buffer(a), Self::Buffer(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for ImageSource {}

impl std::hash::Hash for ImageSource {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::Url(url) => {
                0u8.hash(state);
                url.hash(state);
            }
            Self::Buffer(buffer) => {
                1u8.hash(state);
                buffer.id.hash(state);
            }
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Buffer(buffer) => write!(f, "buffer://{}", buffer.id),
        }
    }
}

/// External decoder handle for an animated image.
///
/// Implementations own the codec state (frame cache, file handle) and are
/// shared with worker tasks, so they must be thread-safe.
pub trait AnimatedImage: Send + Sync {
    /// Total number of frames in the animation.
    fn frame_count(&self) -> u32;

    /// Display interval for the given frame.
    fn frame_interval(&self, frame_index: u32) -> Duration;

    /// Decode one frame.
    fn decode_frame(
        &self,
        frame_index: u32,
        desired_size: ImageDimensions,
        fitting: FittingMode,
        sampling: SamplingMode,
    ) -> Result<PixelBuffer, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(source: &ImageSource) -> u64 {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_url_equality() {
        assert_eq!(ImageSource::url("a.png"), ImageSource::url("a.png"));
        assert_ne!(ImageSource::url("a.png"), ImageSource::url("b.png"));
    }

    #[test]
    fn test_buffer_identity_by_id() {
        let a = ImageSource::buffer(1, vec![1, 2, 3]);
        let b = ImageSource::buffer(1, vec![9, 9, 9]);
        let c = ImageSource::buffer(2, vec![1, 2, 3]);

        assert_eq!(a, b, "buffers with the same id are the same resource");
        assert_ne!(a, c);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_url_and_buffer_never_equal() {
        assert_ne!(ImageSource::url("a.png"), ImageSource::buffer(1, vec![]));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ImageSource::url("a.png")), "a.png");
        assert_eq!(
            format!("{}", ImageSource::buffer(7, vec![1])),
            "buffer://7"
        );
    }
}
