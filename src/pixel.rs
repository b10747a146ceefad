//! Decoded pixel data.
//!
//! A [`PixelBuffer`] is the unit of exchange between decoders, the mask
//! applier, the worker pool and the GPU uploader. The payload is stored as
//! [`bytes::Bytes`] so a buffer can be handed to many observers without
//! copying the pixels.

use bytes::Bytes;

/// Pixel layout of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA, 4 bytes per pixel.
    Rgba8888,
    /// 8-bit RGB, 3 bytes per pixel.
    Rgb888,
    /// Single 8-bit channel (luminance or one YUV plane).
    L8,
}

impl PixelFormat {
    /// Returns true if the format carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(self, Self::Rgba8888)
    }

    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Rgb888 => 3,
            Self::L8 => 1,
        }
    }
}

/// An immutable decoded image plane.
///
/// Cloning is cheap: the payload is reference counted. The
/// `pre_multiplied` flag records whether colour channels have already been
/// multiplied by alpha, so premultiplication is applied at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Bytes,
    pre_multiplied: bool,
}

impl PixelBuffer {
    /// Create a buffer from raw pixel data.
    ///
    /// The payload length must equal `width * height * bytes_per_pixel`.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * format.bytes_per_pixel(),
            "pixel payload length does not match {}x{} {:?}",
            width,
            height,
            format
        );
        Self {
            width,
            height,
            format,
            data: Bytes::from(data),
            pre_multiplied: false,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether colour channels are already multiplied by alpha.
    pub fn is_pre_multiplied(&self) -> bool {
        self.pre_multiplied
    }

    /// Multiply colour channels by alpha, exactly once.
    ///
    /// If the format has no alpha channel the buffer is returned unchanged
    /// with `pre_multiplied` left false, so callers learn the request was
    /// downgraded. A buffer that is already premultiplied is returned as is.
    pub fn premultiplied(self) -> PixelBuffer {
        if !self.format.has_alpha() {
            return PixelBuffer {
                pre_multiplied: false,
                ..self
            };
        }
        if self.pre_multiplied {
            return self;
        }
        let mut data = self.data.to_vec();
        for px in data.chunks_exact_mut(4) {
            let alpha = px[3] as u16;
            px[0] = ((px[0] as u16 * alpha) / 255) as u8;
            px[1] = ((px[1] as u16 * alpha) / 255) as u8;
            px[2] = ((px[2] as u16 * alpha) / 255) as u8;
        }
        PixelBuffer {
            data: Bytes::from(data),
            pre_multiplied: true,
            ..self
        }
    }

    /// Read one pixel as RGBA, expanding narrower formats.
    ///
    /// Out-of-range coordinates are clamped to the edge.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        let bpp = self.format.bytes_per_pixel();
        let offset = (y * self.width as usize + x) * bpp;
        let px = &self.data[offset..offset + bpp];
        match self.format {
            PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Rgb888 => [px[0], px[1], px[2], 255],
            PixelFormat::L8 => [px[0], px[0], px[0], 255],
        }
    }
}
