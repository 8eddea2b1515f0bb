//! Decoded image frames handed to the inference models.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
    #[error("invalid RGB buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A decoded RGB8 image.
///
/// Each capability receives its own clone so that no model can observe
/// another model's modifications to a shared buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = img.dimensions();
        Self::from_rgb(img.into_raw(), width, height)
    }

    /// Read and decode an image file.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path)?.to_rgb8();
        let (width, height) = img.dimensions();
        Self::from_rgb(img.into_raw(), width, height)
    }

    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Grayscale conversion with ITU-R BT.601 luma weights.
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|p| {
                let y = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let frame = Frame::decode(&png_bytes(4, 3, [10, 20, 30])).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 4 * 3 * 3);
        assert_eq!(frame.data[frame.data.len() - 3..], [10, 20, 30]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            Frame::decode(b"definitely not an image"),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(Frame::decode(&[]).is_err());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        std::fs::write(&path, png_bytes(2, 2, [1, 2, 3])).unwrap();
        let frame = Frame::open(&path).unwrap();
        assert_eq!(frame.data[9..12], [1, 2, 3]);
    }

    #[test]
    fn test_from_rgb_validates_length() {
        assert!(matches!(
            Frame::from_rgb(vec![0; 5], 2, 1),
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
        assert!(matches!(Frame::from_rgb(vec![], 0, 1), Err(FrameError::Empty)));
    }

    #[test]
    fn test_to_luma() {
        let frame = Frame::from_rgb(vec![255, 255, 255, 0, 0, 0], 2, 1).unwrap();
        assert_eq!(frame.to_luma(), vec![255, 0]);
    }

    #[test]
    fn test_clones_are_independent() {
        let original = Frame::from_rgb(vec![7; 12], 2, 2).unwrap();
        let mut copy = original.clone();
        copy.data[0] = 0;
        assert_eq!(original.data[0], 7);
    }
}
