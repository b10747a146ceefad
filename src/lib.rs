//! texlayer - Asynchronous texture loading and caching for retained-mode UI rendering
//!
//! This library turns an image source (file url or encoded buffer) plus a set of
//! load parameters into a GPU-resident texture that can be shared safely across
//! many visual consumers. It provides caching with reference counting, CPU-side
//! alpha masking, animated-image frames, multi-plane (YUV) uploads and deferred
//! teardown.
//!
//! # High-Level API
//!
//! The [`engine`] module provides the orchestrator facade:
//!
//! ```ignore
//! use texlayer::engine::{TextureEngine, EngineServices};
//! use texlayer::config::EngineConfig;
//! use texlayer::request::LoadRequest;
//! use texlayer::source::ImageSource;
//!
//! let engine = TextureEngine::new(EngineConfig::default(), services);
//!
//! let id = engine.request_load(
//!     LoadRequest::new(ImageSource::url("images/background.png")),
//!     Some(observer),
//! );
//!
//! // Once per frame:
//! engine.process_tick();
//! ```

pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod logging;
pub mod pixel;
pub mod pool;
pub mod request;
pub mod source;
pub mod texture;

pub use config::EngineConfig;
pub use engine::{
    AtlasOutcome, EngineServices, LoadPayload, LoadResult, LoadState, TextureEngine,
    UploadObserver,
};
pub use error::{DecodeError, MaskError, TextureError, UploadError};
pub use pixel::{PixelBuffer, PixelFormat};
pub use request::{
    AnimationParams, FittingMode, ImageDimensions, LoadRequest, MaskParams, MaskStorage,
    PreMultiply, ReloadPolicy, SamplingMode, StorageIntent, TextureId,
};
pub use source::{AnimatedImage, EncodedBuffer, ImageSource};
pub use texture::{AtlasSite, AtlasSlot, GpuTexture, GpuUploader, TextureSet, UvRect};

/// Version of the texlayer library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
