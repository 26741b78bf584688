//! Scale-to-fit compositing of a foreground cut-out onto a background
//!
//! The subject is cropped to its bounding box, scaled so its height is a
//! fraction of the background height, centred horizontally and anchored to
//! the bottom edge, then alpha-blended over the background.

use crate::{
    config::DEFAULT_RESIZE_PERCENTAGE,
    error::{CompositeError, Result},
    foreground::{BoundingBox, Foreground},
};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage, RgbaImage};
use serde::Serialize;

/// Share of the background height the subject occupies, always in `[MIN, MAX]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct ScaleFactor(f32);

impl ScaleFactor {
    pub const MIN: f32 = 0.1;
    pub const MAX: f32 = 1.0;

    /// Clamp `value` into range; NaN maps to [`ScaleFactor::MIN`]
    #[must_use]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(Self::MIN);
        }
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    /// Parse a user-supplied percentage, clamping out-of-range numbers
    ///
    /// # Errors
    /// - Text is not a number, or is NaN/infinite
    pub fn parse(text: &str) -> Result<Self> {
        let value: f32 = text.trim().parse().map_err(|_| {
            CompositeError::invalid_input(format!(
                "resize_percentage must be a number, got '{text}'"
            ))
        })?;
        if !value.is_finite() {
            return Err(CompositeError::invalid_input(
                "resize_percentage must be a finite number",
            ));
        }

        let scale = Self::new(value);
        if (scale.get() - value).abs() > f32::EPSILON {
            log::debug!("resize_percentage {value} clamped to {}", scale.get());
        }
        Ok(scale)
    }

    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::new(DEFAULT_RESIZE_PERCENTAGE)
    }
}

/// Where the scaled subject lands on the background
///
/// `x` goes negative when the subject is wider than the background; the
/// overhang is then split evenly between both edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub x: i64,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Size and position a `crop_width x crop_height` subject on a
    /// `bg_width x bg_height` background
    ///
    /// Height follows the scale factor, width follows the crop's aspect
    /// ratio. Both are at least one pixel.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn compute(
        crop_width: u32,
        crop_height: u32,
        bg_width: u32,
        bg_height: u32,
        scale: ScaleFactor,
    ) -> Self {
        let height = ((f64::from(bg_height) * f64::from(scale.get())).round() as u32).max(1);
        let width = if crop_height == 0 {
            1
        } else {
            ((f64::from(crop_width) * f64::from(height) / f64::from(crop_height)).round() as u32)
                .max(1)
        };

        Self {
            x: (i64::from(bg_width) - i64::from(width)).div_euclid(2),
            y: bg_height.saturating_sub(height),
            width,
            height,
        }
    }

    /// Columns of the scaled subject, in subject coordinates, that fall
    /// inside `[0, bg_width)`; `None` when nothing is visible
    #[must_use]
    pub fn visible_columns(&self, bg_width: u32) -> Option<(u32, u32)> {
        let width = i64::from(self.width);
        let start = (-self.x).clamp(0, width);
        let end = (i64::from(bg_width) - self.x).clamp(0, width);
        if start >= end {
            return None;
        }
        Some((u32::try_from(start).ok()?, u32::try_from(end).ok()?))
    }
}

/// Pastes foreground cut-outs onto backgrounds
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    filter: FilterType,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl Compositor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Placement the subject would get, `None` for an empty foreground
    #[must_use]
    pub fn placement(
        bbox: Option<BoundingBox>,
        background: &DynamicImage,
        scale: ScaleFactor,
    ) -> Option<Placement> {
        bbox.map(|b| {
            Placement::compute(b.width(), b.height(), background.width(), background.height(), scale)
        })
    }

    /// Composite `foreground` over `background`
    ///
    /// The result has the background's dimensions and no alpha. An empty
    /// foreground yields the background unchanged.
    #[must_use]
    pub fn composite(
        &self,
        foreground: &Foreground,
        background: &DynamicImage,
        scale: ScaleFactor,
    ) -> RgbImage {
        let mut result = background.to_rgb8();

        let Some(bbox) = foreground.bbox else {
            log::debug!("Empty foreground, returning background unchanged");
            return result;
        };

        let placement = Placement::compute(
            bbox.width(),
            bbox.height(),
            result.width(),
            result.height(),
            scale,
        );
        log::debug!(
            "Placing {}x{} subject as {}x{} at ({}, {})",
            bbox.width(),
            bbox.height(),
            placement.width,
            placement.height,
            placement.x,
            placement.y
        );

        let Some((visible_start, visible_end)) = placement.visible_columns(result.width()) else {
            return result;
        };
        let (src_start, src_end) =
            Self::source_columns(bbox.width(), placement.width, visible_start, visible_end);

        // Only the part of the subject that lands on the canvas is resampled,
        // so a very wide subject never allocates more than the background
        let crop = image::imageops::crop_imm(
            &foreground.image,
            bbox.min_col + src_start,
            bbox.min_row,
            src_end - src_start,
            bbox.height(),
        )
        .to_image();
        let scaled = image::imageops::resize(
            &crop,
            visible_end - visible_start,
            placement.height,
            self.filter,
        );

        let mut canvas = RgbaImage::new(result.width(), result.height());
        image::imageops::replace(
            &mut canvas,
            &scaled,
            placement.x + i64::from(visible_start),
            i64::from(placement.y),
        );

        Self::blend_over(&canvas, &mut result);
        result
    }

    /// Crop columns `[start, end)` that cover scaled columns
    /// `[visible_start, visible_end)` of a `crop_width` crop stretched to
    /// `scaled_width`, at least one column wide
    fn source_columns(
        crop_width: u32,
        scaled_width: u32,
        visible_start: u32,
        visible_end: u32,
    ) -> (u32, u32) {
        if visible_start == 0 && visible_end == scaled_width {
            return (0, crop_width);
        }
        let crop = u64::from(crop_width);
        let scaled = u64::from(scaled_width.max(1));
        let start = u64::from(visible_start) * crop / scaled;
        let end = (u64::from(visible_end) * crop).div_ceil(scaled).min(crop);
        let start = u32::try_from(start).unwrap_or(crop_width).min(crop_width.saturating_sub(1));
        let end = u32::try_from(end).unwrap_or(crop_width).max(start + 1);
        (start, end)
    }

    /// `out = fg * a + bg * (1 - a)` with an opaque background
    fn blend_over(canvas: &RgbaImage, background: &mut RgbImage) {
        for (fg, bg) in canvas.pixels().zip(background.pixels_mut()) {
            let alpha = u32::from(fg[3]);
            if alpha == 0 {
                continue;
            }
            let mix = |f: u8, b: u8| -> u8 {
                let value = (u32::from(f) * alpha + u32::from(b) * (255 - alpha) + 127) / 255;
                u8::try_from(value).unwrap_or(u8::MAX)
            };
            *bg = Rgb([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2])]);
        }
    }
}
