//! Image Normalizer
//!
//! Decodes caller-supplied images and converts them to the inference input
//! contract. Decoded buffers are owned by one request and dropped after inference.

pub mod decode;
pub mod preprocess;

pub use decode::{decode, decode_bytes, decode_data_url, ImageBuffer, ImageInput};
pub use preprocess::{
    input_shape, normalize, Tensor, CLASSIFICATION_INPUT_SIZE, DETECTION_INPUT_SIZE,
};
