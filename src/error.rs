//! Error types for the texture engine.
//!
//! Background failures never unwind into the orchestrator: decode and
//! mask-apply errors travel back over the completion channel as values and
//! are converted into observer notifications. The types here are therefore
//! `Clone` so a single failure can be reported to several observers.

use thiserror::Error;

/// Failure to decode an image source into pixel data.
#[derive(Debug, Clone, Error)]
#[error("decode failed: {message}")]
pub struct DecodeError {
    /// Human-readable reason.
    pub message: String,
}

impl DecodeError {
    /// Create a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure to blend an alpha mask into an image.
///
/// Mask failures degrade to the unmasked image; they are never fatal to the
/// owning load.
#[derive(Debug, Clone, Error)]
#[error("mask apply failed: {message}")]
pub struct MaskError {
    /// Human-readable reason.
    pub message: String,
}

impl MaskError {
    /// Create a new mask error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure to upload pixel data to a GPU texture.
///
/// Treated like a decode failure for notification purposes.
#[derive(Debug, Clone, Error)]
#[error("texture upload failed: {message}")]
pub struct UploadError {
    /// Human-readable reason.
    pub message: String,
}

impl UploadError {
    /// Create a new upload error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for fallible engine operations.
#[derive(Debug, Clone, Error)]
pub enum TextureError {
    /// The image source could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The alpha mask could not be applied.
    #[error(transparent)]
    MaskApply(#[from] MaskError),

    /// The decoded pixels could not be uploaded.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// The request itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
