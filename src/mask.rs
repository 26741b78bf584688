//! Saliency map normalization and resizing

use crate::error::{CompositeError, Result};
use image::{imageops::FilterType, ImageBuffer, Luma};
use ndarray::Array4;

/// Single-channel float raster
pub type MaskBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel saliency, raw from the model or rescaled into `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    buffer: MaskBuffer,
}

impl SaliencyMap {
    /// Take the first channel of the first batch item of a model output
    ///
    /// # Errors
    /// - Output is empty or has a zero spatial dimension
    /// - Output contains NaN or infinite values
    pub fn from_model_output(output: &Array4<f32>) -> Result<Self> {
        let &[batch, channels, height, width] = output.shape() else {
            return Err(CompositeError::inference("Model output is not 4-dimensional"));
        };
        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(CompositeError::inference(format!(
                "Model output has an empty dimension: {:?}",
                output.shape()
            )));
        }

        let plane = output.slice(ndarray::s![0, 0, .., ..]);
        if plane.iter().any(|v| !v.is_finite()) {
            return Err(CompositeError::inference(
                "Model output contains non-finite values",
            ));
        }

        let width = u32::try_from(width)
            .map_err(|_| CompositeError::inference("Model output width out of range"))?;
        let height = u32::try_from(height)
            .map_err(|_| CompositeError::inference("Model output height out of range"))?;

        // `iter()` walks a 2D view in row-major order regardless of memory layout
        let data: Vec<f32> = plane.iter().copied().collect();
        Self::from_raw(width, height, data)
    }

    /// Wrap a row-major buffer of `width * height` values
    ///
    /// # Errors
    /// - Buffer length does not match the dimensions
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let buffer = MaskBuffer::from_raw(width, height, data).ok_or_else(|| {
            CompositeError::processing(format!(
                "Saliency buffer does not match {width}x{height}"
            ))
        })?;
        Ok(Self { buffer })
    }

    /// Min-max rescale into `[0, 1]`
    ///
    /// A constant map carries no saliency information and becomes all zeros.
    #[must_use]
    pub fn normalize(self) -> Self {
        let (min, max) = self.value_range();
        let range = max - min;

        let mut buffer = self.buffer;
        if range > 0.0 {
            for pixel in buffer.pixels_mut() {
                pixel.0[0] = (pixel.0[0] - min) / range;
            }
        } else {
            log::debug!("Constant saliency map ({min}), treating as empty");
            for pixel in buffer.pixels_mut() {
                pixel.0[0] = 0.0;
            }
        }

        Self { buffer }
    }

    /// Lanczos3 resample to `width x height`, clamped to `[0, 1]`
    ///
    /// # Errors
    /// - Zero target dimension
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CompositeError::processing_stage_error(
                "mask resize",
                "target dimensions must be non-zero",
                Some(&format!("{width}x{height}")),
            ));
        }

        let mut buffer = image::imageops::resize(&self.buffer, width, height, FilterType::Lanczos3);
        for pixel in buffer.pixels_mut() {
            pixel.0[0] = pixel.0[0].clamp(0.0, 1.0);
        }

        Ok(Self { buffer })
    }

    /// Smallest and largest value in the map
    #[must_use]
    pub fn value_range(&self) -> (f32, f32) {
        self.buffer
            .pixels()
            .map(|p| p.0[0])
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Value at column `x`, row `y`
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> f32 {
        self.buffer.get_pixel(x, y).0[0]
    }

    #[must_use]
    pub fn as_buffer(&self) -> &MaskBuffer {
        &self.buffer
    }
}
