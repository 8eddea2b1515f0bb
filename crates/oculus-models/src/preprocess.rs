//! Shared pre/post-processing: letterbox resize, box geometry, NMS.

use crate::ModelError;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};
use ndarray::Array4;
use oculus_core::{Frame, PixelBox};

/// Metadata for mapping model-space coordinates back onto the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Fit a `width` × `height` frame inside a centered `size` × `size` square.
    pub fn fit(width: u32, height: u32, size: usize) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (size as f32 - new_w) / 2.0,
            pad_y: (size as f32 - new_h) / 2.0,
        }
    }

    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Per-model input normalization: `(pixel - mean) / std`, padding filled with `pad`.
pub(crate) struct Normalize {
    pub mean: f32,
    pub std: f32,
    pub pad: f32,
}

/// Letterbox an RGB frame into a `[1, 3, size, size]` tensor.
pub(crate) fn letterbox_tensor(
    frame: &Frame,
    size: usize,
    norm: &Normalize,
) -> Result<(Array4<f32>, Letterbox), ModelError> {
    let src = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.data[..])
        .ok_or_else(|| {
            ModelError::InferenceFailed("frame buffer does not match its dimensions".into())
        })?;

    let letterbox = Letterbox::fit(frame.width, frame.height, size);
    let new_w = ((frame.width as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    let new_h = ((frame.height as f32 * letterbox.scale).round() as u32).clamp(1, size as u32);
    // Triangle = bilinear, keeps edges sharp enough for detection.
    let resized = imageops::resize(&src, new_w, new_h, FilterType::Triangle);

    let pad_x0 = letterbox.pad_x.floor() as usize;
    let pad_y0 = letterbox.pad_y.floor() as usize;
    let fill = (norm.pad - norm.mean) / norm.std;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), fill);

    for (x, y, px) in resized.enumerate_pixels() {
        let tx = x as usize + pad_x0;
        let ty = y as usize + pad_y0;
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px.0[c] as f32 - norm.mean) / norm.std;
        }
    }

    Ok((tensor, letterbox))
}

/// Axis-aligned box in floating-point pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Rect {
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-Union with `other`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = Rect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    pub fn unmap(&self, letterbox: &Letterbox) -> Rect {
        let (x1, y1) = letterbox.unmap(self.x1, self.y1);
        let (x2, y2) = letterbox.unmap(self.x2, self.y2);
        Rect { x1, y1, x2, y2 }
    }

    pub fn clamp(&self, width: u32, height: u32) -> Rect {
        let (w, h) = (width as f32, height as f32);
        Rect {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Truncate to integer pixels.
    pub fn to_pixel_box(&self) -> PixelBox {
        PixelBox {
            x1: self.x1 as i32,
            y1: self.y1 as i32,
            x2: self.x2 as i32,
            y2: self.y2 as i32,
        }
    }
}

/// Anything NMS can rank and compare.
pub(crate) trait Candidate {
    fn rect(&self) -> Rect;
    fn score(&self) -> f32;
    /// Boxes only suppress boxes of the same class.
    fn class_id(&self) -> usize {
        0
    }
}

/// Greedy class-aware Non-Maximum Suppression. Output is sorted by score, highest first.
pub(crate) fn nms<T: Candidate>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
    items.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<T> = Vec::new();
    for item in items {
        let suppressed = keep.iter().any(|k| {
            k.class_id() == item.class_id() && k.rect().iou(&item.rect()) > iou_threshold
        });
        if !suppressed {
            keep.push(item);
        }
    }
    keep
}

/// Dimensions of a channel-major YOLO head output `[1, channels, anchors]`.
pub(crate) fn yolo_dims(
    shape: &[i64],
    model: &'static str,
    min_channels: usize,
) -> Result<(usize, usize), ModelError> {
    match shape {
        [1, c, n] if *c >= min_channels as i64 && *n > 0 => Ok((*c as usize, *n as usize)),
        _ => Err(ModelError::UnexpectedShape {
            model,
            shape: shape.to_vec(),
        }),
    }
}
