//! Fallback path: crop a full-viewport screenshot down to the video
//! rectangle.
//!
//! The screenshot arrives at device resolution while the rectangle was
//! measured in CSS pixels, so the rectangle is scaled by the page's device
//! pixel ratio before cropping. The crop is clamped to the image bounds; a
//! JPEG encode failure falls back to lossless PNG rather than failing the
//! capture.

use anyhow::{bail, Context, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat};
use log::warn;
use std::io::Cursor;

use crate::inspector::frame::JPEG_QUALITY;
use crate::inspector::{OutputFormat, Rect};

pub fn crop_to_rect(
    screenshot: &[u8],
    rect: &Rect,
    device_pixel_ratio: f64,
    format: OutputFormat,
) -> Result<Vec<u8>> {
    let image = image::load_from_memory(screenshot).context("failed to decode screenshot")?;

    let scale = if device_pixel_ratio > 0.0 {
        device_pixel_ratio
    } else {
        1.0
    };

    let sx = ((rect.x * scale).round().max(0.0) as u32).min(image.width());
    let sy = ((rect.y * scale).round().max(0.0) as u32).min(image.height());
    let sw = ((rect.width * scale).round() as u32).min(image.width().saturating_sub(sx));
    let sh = ((rect.height * scale).round() as u32).min(image.height().saturating_sub(sy));

    if sw == 0 || sh == 0 {
        bail!(
            "crop region {}x{} at ({sx},{sy}) is empty for {}x{} screenshot",
            sw,
            sh,
            image.width(),
            image.height()
        );
    }

    let cropped = image.crop_imm(sx, sy, sw, sh);
    encode(&cropped, format)
}

pub fn encode(image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Jpeg => match encode_jpeg(image) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                warn!("jpeg encode failed, falling back to png: {err:#}");
                encode_png(image)
            }
        },
        OutputFormat::Png => encode_png(image),
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    // The JPEG encoder rejects alpha channels.
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .context("jpeg encode failed")?;
    Ok(out)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("png encode failed")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn screenshot(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([40, 80, 120, 255]),
        ));
        encode_png(&image).unwrap()
    }

    fn rect(x: f64, y: f64, width: f64, height: f64) -> Rect {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn crop_scales_by_device_pixel_ratio() {
        let shot = screenshot(400, 300);
        let out = crop_to_rect(&shot, &rect(10.0, 10.0, 100.0, 50.0), 2.0, OutputFormat::Png)
            .unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 200);
        assert_eq!(decoded.height(), 100);
    }

    #[test]
    fn crop_clamps_to_image_bounds() {
        let shot = screenshot(100, 100);
        let out = crop_to_rect(&shot, &rect(60.0, 60.0, 200.0, 200.0), 1.0, OutputFormat::Png)
            .unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 40);
        assert_eq!(decoded.height(), 40);
    }

    #[test]
    fn empty_region_is_rejected() {
        let shot = screenshot(100, 100);
        assert!(crop_to_rect(&shot, &rect(0.0, 0.0, 0.0, 50.0), 1.0, OutputFormat::Png).is_err());
        assert!(crop_to_rect(&shot, &rect(150.0, 0.0, 50.0, 50.0), 1.0, OutputFormat::Png).is_err());
    }

    #[test]
    fn jpeg_output_is_decodable() {
        let shot = screenshot(64, 64);
        let out =
            crop_to_rect(&shot, &rect(0.0, 0.0, 32.0, 32.0), 1.0, OutputFormat::Jpeg).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 32);
        assert_eq!(
            image::guess_format(&out).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn undecodable_screenshot_is_an_error() {
        assert!(crop_to_rect(b"junk", &rect(0.0, 0.0, 10.0, 10.0), 1.0, OutputFormat::Jpeg).is_err());
    }
}
