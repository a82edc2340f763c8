//! Image preprocessing for inference models
//!
//! Handles resizing, rescaling and tensor conversion to the model input contract:
//! `[1, 3, S, S]` float tensor, RGB channel-first, values in `[0, 1]`.

use image::imageops::{self, FilterType};
use ndarray::{Array3, Array4};

use super::decode::ImageBuffer;

/// Model input tensor (batch, channel, height, width)
pub type Tensor = Array4<f32>;

/// Input size for detection models (YOLO-style)
pub const DETECTION_INPUT_SIZE: u32 = 640;

/// Input size for classification models
pub const CLASSIFICATION_INPUT_SIZE: u32 = 224;

/// Expected tensor shape for a square input of `size`
pub fn input_shape(size: u32) -> [usize; 4] {
    [1, 3, size as usize, size as usize]
}

/// Convert RGB image data to an HWC f32 array rescaled to 0-1
pub fn rgb_to_hwc_f32(data: &[u8], width: u32, height: u32) -> Array3<f32> {
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for y in 0..height as usize {
        for x in 0..width as usize {
            let idx = (y * width as usize + x) * 3;
            if idx + 2 < data.len() {
                rgb[[y, x, 0]] = data[idx] as f32 / 255.0;
                rgb[[y, x, 1]] = data[idx + 1] as f32 / 255.0;
                rgb[[y, x, 2]] = data[idx + 2] as f32 / 255.0;
            }
        }
    }

    rgb
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Tensor {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Resize to a `target_size` square and convert to the model tensor.
///
/// The image is stretched, not letterboxed; models are trained on stretched
/// inputs. Pure and deterministic for a given input and size.
pub fn normalize(image: &ImageBuffer, target_size: u32) -> Tensor {
    let resized = if image.dimensions() == (target_size, target_size) {
        image.pixels().clone()
    } else {
        imageops::resize(image.pixels(), target_size, target_size, FilterType::Triangle)
    };

    let hwc = rgb_to_hwc_f32(resized.as_raw(), target_size, target_size);
    hwc_to_nchw(&hwc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_rgb_to_hwc() {
        let rgb = vec![
            255, 0, 0,     // Red
            0, 255, 0,     // Green
            0, 0, 255,     // Blue
            128, 128, 128, // Gray
        ];

        let hwc = rgb_to_hwc_f32(&rgb, 2, 2);

        assert!((hwc[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(hwc[[0, 0, 1]].abs() < 0.01);
        assert!((hwc[[0, 1, 1]] - 1.0).abs() < 0.01);
        assert!((hwc[[1, 0, 2]] - 1.0).abs() < 0.01);
        assert!((hwc[[1, 1, 0]] - 128.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize_shapes_for_both_backends() {
        let img = ImageBuffer::from_rgb(RgbImage::from_pixel(300, 120, Rgb([255, 128, 0]))).unwrap();

        let det = normalize(&img, DETECTION_INPUT_SIZE);
        assert_eq!(det.shape(), &input_shape(DETECTION_INPUT_SIZE));

        let cls = normalize(&img, CLASSIFICATION_INPUT_SIZE);
        assert_eq!(cls.shape(), &input_shape(CLASSIFICATION_INPUT_SIZE));

        assert!(cls.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((cls[[0, 0, 100, 100]] - 1.0).abs() < 0.01);
        assert!(cls[[0, 2, 100, 100]].abs() < 0.01);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let img = ImageBuffer::from_rgb(RgbImage::from_fn(37, 53, |x, y| {
            Rgb([(x * 7) as u8, (y * 3) as u8, ((x + y) % 256) as u8])
        }))
        .unwrap();

        assert_eq!(normalize(&img, 224), normalize(&img, 224));
    }
}
