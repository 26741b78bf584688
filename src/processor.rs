//! End-to-end compositing pipeline
//!
//! preprocess → segment → normalize → resize mask → extract → composite

use crate::{
    compositor::{Compositor, Placement, ScaleFactor},
    error::Result,
    foreground::{BoundingBox, Foreground, ForegroundExtractor},
    mask::SaliencyMap,
    segmentation::SegmentationService,
    utils::ImagePreprocessor,
};
use image::{DynamicImage, RgbImage};
use instant::Instant;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, span, Level};

/// Wall-clock time spent in each pipeline stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingTimings {
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub mask_ms: u64,
    pub compositing_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    fn elapsed_ms(start: Instant) -> u64 {
        u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone)]
pub struct CompositeResult {
    /// Background-sized RGB composite
    pub image: RgbImage,
    /// Subject extent in source coordinates
    pub bbox: Option<BoundingBox>,
    /// Subject position on the background
    pub placement: Option<Placement>,
    pub timings: ProcessingTimings,
}

impl CompositeResult {
    /// Whether a subject was found and pasted
    #[must_use]
    pub fn has_subject(&self) -> bool {
        self.bbox.is_some()
    }
}

/// Runs the full pipeline against a shared segmentation service
#[derive(Debug, Clone)]
pub struct CompositeProcessor {
    segmentation: Arc<SegmentationService>,
    extractor: ForegroundExtractor,
    compositor: Compositor,
}

impl CompositeProcessor {
    #[must_use]
    pub fn new(segmentation: Arc<SegmentationService>, mask_threshold: f32) -> Self {
        Self {
            segmentation,
            extractor: ForegroundExtractor::new(mask_threshold),
            compositor: Compositor::new(),
        }
    }

    #[must_use]
    pub fn segmentation(&self) -> &Arc<SegmentationService> {
        &self.segmentation
    }

    /// Cut the salient subject out of `source`
    ///
    /// # Errors
    /// - Model load or inference failures
    /// - Non-finite model output
    pub fn extract_foreground(&self, source: &DynamicImage) -> Result<Foreground> {
        let mut timings = ProcessingTimings::default();
        self.extract_with_timings(source, &mut timings)
    }

    fn extract_with_timings(
        &self,
        source: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<Foreground> {
        let (width, height) = (source.width(), source.height());

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing", width, height).entered();
            let start = Instant::now();
            let preprocessing_config = self.segmentation.preprocessing_config()?;
            let tensor = ImagePreprocessor::preprocess_for_inference(source, &preprocessing_config)?;
            timings.preprocessing_ms = ProcessingTimings::elapsed_ms(start);
            tensor
        };

        let output_tensor = {
            let _span = span!(Level::INFO, "inference").entered();
            let start = Instant::now();
            let output = self.segmentation.predict(&input_tensor)?;
            timings.inference_ms = ProcessingTimings::elapsed_ms(start);
            output
        };

        let _span = span!(Level::DEBUG, "mask", width, height).entered();
        let start = Instant::now();
        let mask = SaliencyMap::from_model_output(&output_tensor)?
            .normalize()
            .resize(width, height)?;
        let foreground = self.extractor.extract(&source.to_rgb8(), &mask)?;
        timings.mask_ms = ProcessingTimings::elapsed_ms(start);

        debug!(bbox = ?foreground.bbox, "Foreground extracted");
        Ok(foreground)
    }

    /// Composite the subject of `source` onto `background`
    ///
    /// # Errors
    /// - Model load or inference failures
    /// - Non-finite model output
    #[instrument(
        skip(self, source, background),
        fields(
            source = %format!("{}x{}", source.width(), source.height()),
            background = %format!("{}x{}", background.width(), background.height()),
            scale = scale.get()
        )
    )]
    pub fn process(
        &self,
        source: &DynamicImage,
        background: &DynamicImage,
        scale: ScaleFactor,
    ) -> Result<CompositeResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let foreground = self.extract_with_timings(source, &mut timings)?;

        let image = {
            let _span = span!(Level::DEBUG, "compositing").entered();
            let start = Instant::now();
            let image = self.compositor.composite(&foreground, background, scale);
            timings.compositing_ms = ProcessingTimings::elapsed_ms(start);
            image
        };

        timings.total_ms = ProcessingTimings::elapsed_ms(total_start);
        info!(
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            subject = foreground.bbox.is_some(),
            "Composite complete"
        );

        Ok(CompositeResult {
            image,
            bbox: foreground.bbox,
            placement: Compositor::placement(foreground.bbox, background, scale),
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::test_utils::{MockBackend, MockBackendFactory, MockOutput},
        config::{InferenceConfig, DEFAULT_MASK_THRESHOLD},
        error::CompositeError,
    };
    use image::Rgb;

    fn processor_with(backend: MockBackend) -> CompositeProcessor {
        let service = SegmentationService::with_factory(
            InferenceConfig::default(),
            Box::new(MockBackendFactory::new(backend)),
        );
        CompositeProcessor::new(Arc::new(service), DEFAULT_MASK_THRESHOLD)
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_subject_lands_bottom_centre() {
        let processor = processor_with(MockBackend::new());
        let source = solid(160, 160, [250, 10, 10]);
        let background = solid(400, 300, [0, 0, 200]);

        let result = processor
            .process(&source, &background, ScaleFactor::new(0.5))
            .unwrap();

        assert_eq!(result.image.dimensions(), (400, 300));
        let placement = result.placement.unwrap();
        assert_eq!(placement.height, 150);
        assert_eq!(placement.y + placement.height, 300);
        let left = placement.x;
        let right = 400 - (placement.x + i64::from(placement.width));
        assert!(left.abs_diff(right) <= 1);

        // Disc centre is foreground, top-left corner is untouched background
        let centre = result.image.get_pixel(200, 300 - 75);
        assert!(centre[0] > 200);
        assert_eq!(result.image.get_pixel(0, 0), &Rgb([0, 0, 200]));
    }

    #[test]
    fn test_constant_saliency_returns_background() {
        let processor = processor_with(MockBackend::new().with_output(MockOutput::Constant(3.0)));
        let background = solid(64, 32, [1, 2, 3]);

        let result = processor
            .process(&solid(50, 50, [200, 200, 200]), &background, ScaleFactor::default())
            .unwrap();

        assert!(!result.has_subject());
        assert!(result.placement.is_none());
        assert_eq!(result.image.as_raw(), background.to_rgb8().as_raw());
    }

    #[test]
    fn test_non_finite_output_is_inference_error() {
        let processor =
            processor_with(MockBackend::new().with_output(MockOutput::Constant(f32::NAN)));

        let err = processor
            .process(&solid(8, 8, [0, 0, 0]), &solid(8, 8, [0, 0, 0]), ScaleFactor::default())
            .unwrap_err();
        assert!(matches!(err, CompositeError::Inference(_)));
    }

    #[test]
    fn test_model_failure_propagates() {
        let processor = processor_with(MockBackend::new_failing_init());

        let err = processor.extract_foreground(&solid(8, 8, [0, 0, 0])).unwrap_err();
        assert!(matches!(err, CompositeError::Model(_)));
    }

    #[test]
    fn test_rect_mask_maps_to_source_coordinates() {
        // Right half of the model frame is salient
        let processor =
            processor_with(MockBackend::new().with_output(MockOutput::Rect(0, 160, 319, 319)));

        let foreground = processor
            .extract_foreground(&solid(200, 100, [5, 5, 5]))
            .unwrap();
        let bbox = foreground.bbox.unwrap();

        assert_eq!(bbox.min_row, 0);
        assert_eq!(bbox.max_row, 99);
        assert_eq!(bbox.max_col, 199);
        assert!((95..=105).contains(&bbox.min_col));
    }
}
