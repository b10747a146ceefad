//! Decode and mask-apply contracts, with default software implementations.
//!
//! The codec work itself is external to the engine: workers call an
//! [`ImageDecoder`] to turn a source into pixel planes and a [`MaskApplier`]
//! to blend an alpha mask. Both run on worker threads and must be
//! thread-safe.
//!
//! [`StaticImageDecoder`] is the production adapter backed by the `image`
//! crate; [`SoftwareMaskApplier`] is a plain CPU blend. Hosts with their own
//! codecs substitute their own implementations.

use crate::error::{DecodeError, MaskError};
use crate::pixel::{PixelBuffer, PixelFormat};
use crate::request::{FittingMode, ImageDimensions, SamplingMode};
use crate::source::ImageSource;
use image::imageops::FilterType;
use image::DynamicImage;

/// Turns an image source into decoded pixel planes.
///
/// Returns one buffer for ordinary images. Decoders that support planar
/// output return one buffer per plane when `want_planes` is set; returning a
/// single interleaved buffer instead is always acceptable.
pub trait ImageDecoder: Send + Sync {
    /// Decode a source under the given constraints.
    fn decode(
        &self,
        source: &ImageSource,
        desired_size: ImageDimensions,
        fitting: FittingMode,
        sampling: SamplingMode,
        orientation_correction: bool,
        want_planes: bool,
    ) -> Result<Vec<PixelBuffer>, DecodeError>;
}

/// Blends an alpha mask into an image buffer.
pub trait MaskApplier: Send + Sync {
    /// Apply `mask` to `image`.
    ///
    /// `content_scale` scales the image before masking. With `crop_to_mask`
    /// the scaled image is cropped to the mask dimensions; otherwise the
    /// mask is stretched over the image.
    fn apply(
        &self,
        image: PixelBuffer,
        mask: &PixelBuffer,
        content_scale: f32,
        crop_to_mask: bool,
    ) -> Result<PixelBuffer, MaskError>;
}

/// `image`-crate backed decoder for static images.
///
/// Urls are treated as filesystem paths. Embedded orientation metadata is
/// not consulted; hosts that need EXIF-aware rotation supply their own
/// decoder.
#[derive(Debug, Clone, Default)]
pub struct StaticImageDecoder;

impl StaticImageDecoder {
    /// Create the default decoder.
    pub fn new() -> Self {
        Self
    }

    fn filter_for(sampling: SamplingMode) -> FilterType {
        match sampling {
            SamplingMode::Nearest | SamplingMode::NoFilter => FilterType::Nearest,
            SamplingMode::Linear | SamplingMode::Box => FilterType::Triangle,
            SamplingMode::BoxThenLinear => FilterType::CatmullRom,
        }
    }

    fn fit(
        image: DynamicImage,
        desired_size: ImageDimensions,
        fitting: FittingMode,
        sampling: SamplingMode,
    ) -> DynamicImage {
        if desired_size.is_unspecified() {
            return image;
        }
        let filter = Self::filter_for(sampling);
        let (w, h) = (desired_size.width, desired_size.height);
        match fitting {
            FittingMode::ScaleToFill => image.resize_to_fill(w, h, filter),
            FittingMode::ShrinkToFit => {
                if image.width() <= w && image.height() <= h {
                    image
                } else {
                    image.resize(w, h, filter)
                }
            }
            FittingMode::FitWidth => {
                let height = (u64::from(image.height()) * u64::from(w)
                    / u64::from(image.width().max(1))) as u32;
                image.resize_exact(w, height.max(1), filter)
            }
            FittingMode::FitHeight => {
                let width = (u64::from(image.width()) * u64::from(h)
                    / u64::from(image.height().max(1))) as u32;
                image.resize_exact(width.max(1), h, filter)
            }
        }
    }
}

impl ImageDecoder for StaticImageDecoder {
    fn decode(
        &self,
        source: &ImageSource,
        desired_size: ImageDimensions,
        fitting: FittingMode,
        sampling: SamplingMode,
        _orientation_correction: bool,
        _want_planes: bool,
    ) -> Result<Vec<PixelBuffer>, DecodeError> {
        let decoded = match source {
            ImageSource::Url(url) => image::open(url)
                .map_err(|e| DecodeError::new(format!("cannot open {}: {}", url, e)))?,
            ImageSource::Buffer(buffer) => image::load_from_memory(buffer.bytes())
                .map_err(|e| DecodeError::new(format!("cannot decode buffer://{}: {}", buffer.id(), e)))?,
        };

        let fitted = Self::fit(decoded, desired_size, fitting, sampling);
        let rgba = fitted.to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());
        Ok(vec![PixelBuffer::new(
            width,
            height,
            PixelFormat::Rgba8888,
            rgba.into_raw(),
        )])
    }
}

/// Plain CPU alpha blend.
///
/// The mask's alpha channel (or its single channel for `L8` masks)
/// multiplies the image alpha. Output is always RGBA.
#[derive(Debug, Clone, Default)]
pub struct SoftwareMaskApplier;

impl SoftwareMaskApplier {
    /// Create the default mask applier.
    pub fn new() -> Self {
        Self
    }

    fn mask_alpha(mask: &PixelBuffer, x: u32, y: u32) -> u8 {
        let px = mask.rgba_at(x, y);
        match mask.format() {
            PixelFormat::Rgba8888 => px[3],
            // Single-channel and RGB masks use their first channel as coverage.
            PixelFormat::L8 | PixelFormat::Rgb888 => px[0],
        }
    }
}

impl MaskApplier for SoftwareMaskApplier {
    fn apply(
        &self,
        image: PixelBuffer,
        mask: &PixelBuffer,
        content_scale: f32,
        crop_to_mask: bool,
    ) -> Result<PixelBuffer, MaskError> {
        if mask.width() == 0 || mask.height() == 0 {
            return Err(MaskError::new("mask has no pixels"));
        }
        if !(content_scale.is_finite() && content_scale > 0.0) {
            return Err(MaskError::new(format!(
                "invalid content scale {}",
                content_scale
            )));
        }

        let scaled_w = ((image.width() as f32) * content_scale).round().max(1.0) as u32;
        let scaled_h = ((image.height() as f32) * content_scale).round().max(1.0) as u32;

        let (out_w, out_h) = if crop_to_mask {
            (mask.width().min(scaled_w), mask.height().min(scaled_h))
        } else {
            (scaled_w, scaled_h)
        };

        let mut data = Vec::with_capacity(out_w as usize * out_h as usize * 4);
        for y in 0..out_h {
            for x in 0..out_w {
                // Nearest sampling of the scaled content.
                let src_x = ((x as f32) / content_scale) as u32;
                let src_y = ((y as f32) / content_scale) as u32;
                let px = image.rgba_at(src_x, src_y);

                let (mask_x, mask_y) = if crop_to_mask {
                    (x, y)
                } else {
                    (
                        x * mask.width() / out_w.max(1),
                        y * mask.height() / out_h.max(1),
                    )
                };
                let coverage = Self::mask_alpha(mask, mask_x, mask_y) as u16;

                data.push(px[0]);
                data.push(px[1]);
                data.push(px[2]);
                data.push(((px[3] as u16 * coverage) / 255) as u8);
            }
        }

        Ok(PixelBuffer::new(out_w, out_h, PixelFormat::Rgba8888, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgba(width: u32, height: u32, px: [u8; 4]) -> PixelBuffer {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            data.extend_from_slice(&px);
        }
        PixelBuffer::new(width, height, PixelFormat::Rgba8888, data)
    }

    #[test]
    fn test_decoder_reports_missing_file() {
        let decoder = StaticImageDecoder::new();
        let result = decoder.decode(
            &ImageSource::url("definitely/not/here.png"),
            ImageDimensions::UNSPECIFIED,
            FittingMode::ScaleToFill,
            SamplingMode::Box,
            true,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_decoder_reports_garbage_buffer() {
        let decoder = StaticImageDecoder::new();
        let result = decoder.decode(
            &ImageSource::buffer(1, vec![0u8, 1, 2, 3]),
            ImageDimensions::UNSPECIFIED,
            FittingMode::ScaleToFill,
            SamplingMode::Box,
            true,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_decoder_decodes_png_buffer() {
        // Encode a 2x2 image with the image crate, then decode it back.
        let mut encoded = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Png,
            )
            .unwrap();

        let decoder = StaticImageDecoder::new();
        let planes = decoder
            .decode(
                &ImageSource::buffer(1, encoded),
                ImageDimensions::UNSPECIFIED,
                FittingMode::ScaleToFill,
                SamplingMode::Box,
                true,
                false,
            )
            .unwrap();

        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].width(), 2);
        assert_eq!(planes[0].height(), 2);
        assert_eq!(planes[0].rgba_at(0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn test_decoder_resizes_to_fill() {
        let mut encoded = Vec::new();
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut encoded),
                image::ImageFormat::Png,
            )
            .unwrap();

        let decoder = StaticImageDecoder::new();
        let planes = decoder
            .decode(
                &ImageSource::buffer(1, encoded),
                ImageDimensions::new(4, 4),
                FittingMode::ScaleToFill,
                SamplingMode::Nearest,
                true,
                false,
            )
            .unwrap();

        assert_eq!(planes[0].width(), 4);
        assert_eq!(planes[0].height(), 4);
    }

    #[test]
    fn test_mask_multiplies_alpha() {
        let image = solid_rgba(2, 2, [100, 100, 100, 255]);
        let mask = solid_rgba(2, 2, [0, 0, 0, 128]);

        let masked = SoftwareMaskApplier::new()
            .apply(image, &mask, 1.0, true)
            .unwrap();

        assert_eq!(masked.width(), 2);
        assert_eq!(masked.height(), 2);
        assert_eq!(masked.rgba_at(0, 0), [100, 100, 100, 128]);
    }

    #[test]
    fn test_mask_crop_to_mask_size() {
        let image = solid_rgba(4, 4, [9, 9, 9, 255]);
        let mask = solid_rgba(2, 2, [0, 0, 0, 255]);

        let masked = SoftwareMaskApplier::new()
            .apply(image, &mask, 1.0, true)
            .unwrap();

        assert_eq!(masked.width(), 2);
        assert_eq!(masked.height(), 2);
    }

    #[test]
    fn test_mask_stretch_keeps_image_size() {
        let image = solid_rgba(4, 4, [9, 9, 9, 255]);
        let mask = solid_rgba(2, 2, [0, 0, 0, 64]);

        let masked = SoftwareMaskApplier::new()
            .apply(image, &mask, 1.0, false)
            .unwrap();

        assert_eq!(masked.width(), 4);
        assert_eq!(masked.height(), 4);
        assert_eq!(masked.rgba_at(3, 3)[3], 64);
    }

    #[test]
    fn test_mask_l8_uses_single_channel() {
        let image = solid_rgba(1, 1, [50, 60, 70, 200]);
        let mask = PixelBuffer::new(1, 1, PixelFormat::L8, vec![128]);

        let masked = SoftwareMaskApplier::new()
            .apply(image, &mask, 1.0, true)
            .unwrap();

        assert_eq!(masked.rgba_at(0, 0)[3], (200u16 * 128 / 255) as u8);
    }

    #[test]
    fn test_mask_rejects_bad_scale() {
        let image = solid_rgba(1, 1, [0, 0, 0, 255]);
        let mask = solid_rgba(1, 1, [0, 0, 0, 255]);
        assert!(SoftwareMaskApplier::new()
            .apply(image, &mask, 0.0, true)
            .is_err());
    }
}
