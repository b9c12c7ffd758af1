// src/services/image_processor.rs
use crate::errors::StyleError;
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, ImageFormat as ImgFormat};

/// Longest edge sent to the analysis model.
const MAX_ANALYSIS_EDGE: u32 = 1536;
const MAX_INPUT_EDGE: u32 = 4096;
const JPEG_QUALITY: u8 = 80;

pub struct ImageProcessor {
    max_edge: u32,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            max_edge: MAX_ANALYSIS_EDGE,
        }
    }

    pub fn with_max_edge(max_edge: u32) -> Self {
        Self { max_edge }
    }

    pub fn validate_image(&self, data: &[u8]) -> Result<(u32, u32), StyleError> {
        let img = image::load_from_memory(data)
            .map_err(|e| StyleError::ImageProcessing(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();

        if width > MAX_INPUT_EDGE || height > MAX_INPUT_EDGE {
            return Err(StyleError::ImageProcessing(format!(
                "Image dimensions exceed {0}x{0}",
                MAX_INPUT_EDGE
            )));
        }

        Ok((width, height))
    }

    /// Downscales to the analysis edge limit and re-encodes as JPEG.
    /// Small JPEGs are passed through untouched.
    pub fn prepare_for_analysis(&self, data: &[u8]) -> Result<Vec<u8>, StyleError> {
        let format = image::guess_format(data)
            .map_err(|e| StyleError::ImageProcessing(format!("Unknown image format: {}", e)))?;
        let img = image::load_from_memory(data)
            .map_err(|e| StyleError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let (width, height) = img.dimensions();
        let fits = width <= self.max_edge && height <= self.max_edge;

        if fits && format == ImgFormat::Jpeg {
            return Ok(data.to_vec());
        }

        let img = if fits {
            img
        } else {
            let ratio = self.max_edge as f32 / width.max(height) as f32;
            let new_width = ((width as f32 * ratio) as u32).max(1);
            let new_height = ((height as f32 * ratio) as u32).max(1);
            img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
        };

        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY)
            .encode_image(&img.to_rgb8())
            .map_err(|e| {
                StyleError::ImageProcessing(format!("Failed to encode resized image: {}", e))
            })?;

        Ok(output)
    }
}

/// MIME type for generated image bytes, defaulting to JPEG as requested from the backend.
pub fn detect_mime(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImgFormat::Png) => "image/png",
        Ok(ImgFormat::WebP) => "image/webp",
        Ok(ImgFormat::Gif) => "image/gif",
        _ => "image/jpeg",
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "jpg",
    }
}
