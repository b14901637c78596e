use std::io::Cursor;

use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::errors::{PhoneClawError, PhoneClawResult};

pub const FALLBACK_WIDTH: u32 = 1080;
pub const FALLBACK_HEIGHT: u32 = 2400;

/// Longest side of placeholder images; they carry no information worth pixels.
const PLACEHOLDER_SIDE: u32 = 160;

/// A captured screen, encoded for the model.
///
/// `width`/`height` are the device dimensions used for coordinate mapping; the
/// encoded image itself may be smaller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub is_sensitive: bool,
}

impl Screenshot {
    /// Decodes raw capture bytes, downscales to `max_side` (0 keeps the original
    /// size) and re-encodes as PNG.
    pub fn from_png(bytes: &[u8], max_side: u32) -> PhoneClawResult<Self> {
        let img = image::load_from_memory(bytes)?;
        Self::from_image(&img, max_side)
    }

    pub fn from_image(img: &DynamicImage, max_side: u32) -> PhoneClawResult<Self> {
        let (width, height) = (img.width(), img.height());
        let base64_data = match scaled_size(width, height, max_side) {
            Some((w, h)) => {
                tracing::debug!(width, height, scaled_w = w, scaled_h = h, "downscaling screenshot");
                encode_png(&img.resize_exact(w, h, FilterType::Lanczos3))?
            }
            None => encode_png(img)?,
        };
        Ok(Self {
            base64_data,
            width,
            height,
            is_sensitive: false,
        })
    }

    /// Black stand-in reporting the given device dimensions.
    pub fn blank(width: u32, height: u32, is_sensitive: bool) -> Self {
        let (w, h) = scaled_size(width.max(1), height.max(1), PLACEHOLDER_SIDE)
            .unwrap_or((width.max(1), height.max(1)));
        let img = DynamicImage::ImageRgb8(RgbImage::new(w, h));
        let base64_data = match encode_png(&img) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "placeholder encoding failed");
                String::new()
            }
        };
        Self {
            base64_data,
            width,
            height,
            is_sensitive,
        }
    }

    /// Used when capture fails; `is_sensitive` marks screens the device refused
    /// to capture (payment pages and the like).
    pub fn fallback(is_sensitive: bool) -> Self {
        Self::blank(FALLBACK_WIDTH, FALLBACK_HEIGHT, is_sensitive)
    }

    /// Shrinks the encoded image so its longest side fits `max_side`, keeping
    /// the device dimensions. Left untouched when already small enough, when
    /// `max_side` is 0, or when the payload cannot be decoded.
    pub fn bounded(self, max_side: u32) -> Self {
        if max_side == 0 || !self.has_image() {
            return self;
        }
        match self.downscaled(max_side) {
            Ok(Some(base64_data)) => Self {
                base64_data,
                ..self
            },
            Ok(None) => self,
            Err(e) => {
                tracing::warn!(error = %e, "screenshot left at original size");
                self
            }
        }
    }

    fn downscaled(&self, max_side: u32) -> PhoneClawResult<Option<String>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.base64_data)
            .map_err(|e| PhoneClawError::Perception(format!("screenshot payload: {e}")))?;
        let img = image::load_from_memory(&bytes)?;
        scaled_size(img.width(), img.height(), max_side)
            .map(|(w, h)| encode_png(&img.resize_exact(w, h, FilterType::Lanczos3)))
            .transpose()
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.base64_data)
    }

    pub fn has_image(&self) -> bool {
        !self.base64_data.is_empty()
    }
}

/// Target size when the longest side exceeds `max_side`; `None` when no resize is needed.
fn scaled_size(width: u32, height: u32, max_side: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return None;
    }
    let scale = max_side as f64 / longest as f64;
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    Some((w, h))
}

fn encode_png(img: &DynamicImage) -> PhoneClawResult<String> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn decoded(shot: &Screenshot) -> DynamicImage {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&shot.base64_data)
            .unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn downscale_keeps_device_dimensions() {
        let shot = Screenshot::from_png(&png(400, 800), 200).unwrap();
        assert_eq!((shot.width, shot.height), (400, 800));
        let img = decoded(&shot);
        assert_eq!((img.width(), img.height()), (100, 200));
    }

    #[test]
    fn zero_max_side_disables_downscaling() {
        let shot = Screenshot::from_png(&png(30, 60), 0).unwrap();
        let img = decoded(&shot);
        assert_eq!((img.width(), img.height()), (30, 60));
    }

    #[test]
    fn fallback_reports_default_screen() {
        let shot = Screenshot::fallback(true);
        assert_eq!((shot.width, shot.height), (1080, 2400));
        assert!(shot.is_sensitive);
        assert!(shot.data_url().starts_with("data:image/png;base64,"));
        assert!(shot.has_image());
    }

    #[test]
    fn bounded_shrinks_oversized_captures() {
        let shot = Screenshot::from_png(&png(300, 600), 0).unwrap().bounded(150);
        assert_eq!((shot.width, shot.height), (300, 600));
        let img = decoded(&shot);
        assert_eq!((img.width(), img.height()), (75, 150));

        let small = Screenshot::from_png(&png(30, 60), 0).unwrap();
        let before = small.base64_data.clone();
        assert_eq!(small.bounded(150).base64_data, before);
    }

    #[test]
    fn bounded_keeps_undecodable_payloads() {
        let shot = Screenshot {
            base64_data: "@@not base64@@".into(),
            width: 10,
            height: 10,
            is_sensitive: false,
        };
        assert_eq!(shot.bounded(5).base64_data, "@@not base64@@");
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(Screenshot::from_png(b"not a png", 100).is_err());
    }
}
