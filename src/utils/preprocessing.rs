//! Image preprocessing for the segmentation model
//!
//! The model expects a square RGB input. The source is stretched to the
//! target size without letterboxing: the saliency map is resized back to
//! the source dimensions afterwards, so the distortion cancels out.

use crate::{
    error::{CompositeError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Build the normalized NCHW input tensor for `image`
    ///
    /// Handles RGB conversion, Lanczos3 resize to the model size and
    /// per-channel mean/std normalization.
    ///
    /// # Errors
    /// - Empty source image
    /// - Zero target size in the preprocessing config
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [target_width, target_height] = preprocessing_config.target_size;

        if image.width() == 0 || image.height() == 0 {
            return Err(CompositeError::invalid_input("Image has zero width or height"));
        }
        if target_width == 0 || target_height == 0 {
            return Err(CompositeError::invalid_config(
                "Model target size must be non-zero",
            ));
        }

        let rgb_image = image.to_rgb8();
        let resized = image::imageops::resize(
            &rgb_image,
            target_width,
            target_height,
            FilterType::Lanczos3,
        );

        Ok(Self::canvas_to_tensor(&resized, preprocessing_config))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}
