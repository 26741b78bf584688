//! Foreground extraction from a source image and its saliency mask

use crate::{
    config::DEFAULT_MASK_THRESHOLD,
    error::{CompositeError, Result},
    mask::SaliencyMap,
};
use image::{RgbImage, Rgba, RgbaImage};
use serde::Serialize;

/// Tight, inclusive rectangle around every opaque foreground pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl BoundingBox {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    /// Whether pixel at column `x`, row `y` lies inside the box
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_col..=self.max_col).contains(&x) && (self.min_row..=self.max_row).contains(&y)
    }
}

/// Source pixels with a binary alpha channel and their extent
#[derive(Debug, Clone)]
pub struct Foreground {
    pub image: RgbaImage,
    /// `None` when no pixel passed the threshold
    pub bbox: Option<BoundingBox>,
}

impl Foreground {
    /// Whether anything survived thresholding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bbox.is_none()
    }
}

/// Thresholds a resized saliency map into a foreground cut-out
#[derive(Debug, Clone, Copy)]
pub struct ForegroundExtractor {
    threshold: f32,
}

impl Default for ForegroundExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_THRESHOLD)
    }
}

impl ForegroundExtractor {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Binary alpha for a single saliency value
    #[must_use]
    pub fn alpha(&self, saliency: f32) -> f32 {
        if saliency > self.threshold {
            1.0
        } else {
            0.0
        }
    }

    /// Build the RGBA cut-out and its bounding box
    ///
    /// RGB values are copied unchanged; alpha is 255 where the mask exceeds
    /// the threshold and 0 elsewhere.
    ///
    /// # Errors
    /// - Mask and source dimensions differ
    pub fn extract(&self, source: &RgbImage, mask: &SaliencyMap) -> Result<Foreground> {
        if source.dimensions() != mask.dimensions() {
            let (mw, mh) = mask.dimensions();
            return Err(CompositeError::processing_stage_error(
                "foreground extraction",
                &format!("mask is {mw}x{mh}"),
                Some(&format!("{}x{}", source.width(), source.height())),
            ));
        }

        let mut bbox: Option<BoundingBox> = None;
        let image = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
            let [r, g, b] = source.get_pixel(x, y).0;
            if self.alpha(mask.value(x, y)) > 0.0 {
                bbox = Some(match bbox {
                    None => BoundingBox {
                        min_row: y,
                        min_col: x,
                        max_row: y,
                        max_col: x,
                    },
                    Some(prev) => BoundingBox {
                        min_row: prev.min_row.min(y),
                        min_col: prev.min_col.min(x),
                        max_row: prev.max_row.max(y),
                        max_col: prev.max_col.max(x),
                    },
                });
                Rgba([r, g, b, 255])
            } else {
                Rgba([r, g, b, 0])
            }
        });

        Ok(Foreground { image, bbox })
    }
}
