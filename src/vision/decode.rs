//! Image decoding from raw bytes and base64 data URLs

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;

use crate::error::ImageDecodeError;

/// Raw image input as received from a caller
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Encoded image bytes (JPEG, PNG, ...)
    Bytes(Vec<u8>),
    /// `data:image/...;base64,` URL or a bare base64 string
    DataUrl(String),
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::Bytes(bytes)
    }
}

impl From<String> for ImageInput {
    fn from(data_url: String) -> Self {
        ImageInput::DataUrl(data_url)
    }
}

/// Decoded RGB pixel grid owned by a single request
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pixels: RgbImage,
}

impl ImageBuffer {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Get dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Pixels in RGB channel order
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Build a buffer from already decoded pixels
    pub fn from_rgb(pixels: RgbImage) -> Result<Self, ImageDecodeError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(ImageDecodeError::ZeroArea { width, height });
        }
        Ok(Self { pixels })
    }
}

/// Decode any supported input
pub fn decode(input: &ImageInput) -> Result<ImageBuffer, ImageDecodeError> {
    match input {
        ImageInput::Bytes(bytes) => decode_bytes(bytes),
        ImageInput::DataUrl(text) => decode_data_url(text),
    }
}

/// Decode encoded image bytes
pub fn decode_bytes(bytes: &[u8]) -> Result<ImageBuffer, ImageDecodeError> {
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }
    let img = image::load_from_memory(bytes)?;
    ImageBuffer::from_rgb(img.to_rgb8())
}

/// Decode a `data:image/<type>;base64,<payload>` URL or a bare base64 string
pub fn decode_data_url(text: &str) -> Result<ImageBuffer, ImageDecodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let payload = match text.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ImageDecodeError::MalformedDataUrl("missing ',' separator".into()))?;
            let media_type = header
                .strip_suffix(";base64")
                .ok_or_else(|| ImageDecodeError::MalformedDataUrl(format!("not base64 encoded: '{header}'")))?;
            if !media_type.is_empty() && !media_type.starts_with("image/") {
                return Err(ImageDecodeError::MalformedDataUrl(format!(
                    "unsupported media type '{media_type}'"
                )));
            }
            payload
        }
        None => text,
    };

    // Some clients wrap long payloads
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if payload.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let bytes = STANDARD.decode(payload.as_bytes())?;
    decode_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_bytes() {
        let buffer = decode_bytes(&png_bytes(4, 3)).unwrap();
        assert_eq!(buffer.dimensions(), (4, 3));
        assert_eq!(buffer.pixels().get_pixel(0, 0).0, [200, 10, 10]);
    }

    #[test]
    fn test_decode_data_url() {
        let url = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(2, 2)));
        let buffer = decode_data_url(&url).unwrap();
        assert_eq!(buffer.dimensions(), (2, 2));
    }

    #[test]
    fn test_decode_bare_base64() {
        let encoded = STANDARD.encode(png_bytes(5, 1));
        let buffer = decode(&ImageInput::DataUrl(encoded)).unwrap();
        assert_eq!(buffer.width(), 5);
    }

    #[test]
    fn test_malformed_base64() {
        let err = decode_data_url("invalid_base64_data!!").unwrap_err();
        assert!(matches!(err, ImageDecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_malformed_data_url_prefix() {
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(ImageDecodeError::MalformedDataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png,abcd"),
            Err(ImageDecodeError::MalformedDataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:text/plain;base64,aGVsbG8="),
            Err(ImageDecodeError::MalformedDataUrl(_))
        ));
    }

    #[test]
    fn test_valid_base64_but_not_an_image() {
        let err = decode_data_url("aGVsbG8gd29ybGQ=").unwrap_err();
        assert!(matches!(err, ImageDecodeError::Undecodable(_)));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(matches!(decode_bytes(&[]), Err(ImageDecodeError::Empty)));
        assert!(matches!(decode_data_url("   "), Err(ImageDecodeError::Empty)));
        assert!(matches!(
            decode_data_url("data:image/jpeg;base64,"),
            Err(ImageDecodeError::Empty)
        ));
    }

    #[test]
    fn test_zero_area_rejected() {
        let err = ImageBuffer::from_rgb(RgbImage::new(0, 10)).unwrap_err();
        assert!(matches!(err, ImageDecodeError::ZeroArea { width: 0, height: 10 }));
    }
}
