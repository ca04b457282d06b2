use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use std::io::Cursor;

use crate::config::ImageConfig;
use crate::models::{OutputFormat, ProcessingOptions};

const AVIF_ENCODE_SPEED: u8 = 8;

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    /// Encoded format. May be a source format outside [`OutputFormat`]
    /// (gif, bmp, tiff) when the image was only resized.
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ProcessedImage {
    pub fn output_format(&self) -> Option<OutputFormat> {
        OutputFormat::from_image_format(self.format)
    }

    pub fn mime_type(&self) -> &'static str {
        match self.output_format() {
            Some(format) => format.mime_type(),
            None => self.format.to_mime_type(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransformOutcome {
    /// Nothing to do; store the original bytes.
    Unchanged,
    Processed(ProcessedImage),
    /// The stage failed; the original bytes are stored instead.
    Fallback { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    target: Option<(u32, u32)>,
    format: ImageFormat,
    quality: u8,
}

#[derive(Debug, Clone)]
pub struct ImageTransformer {
    config: ImageConfig,
}

impl ImageTransformer {
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    pub fn applies_to(&self, mime_type: &str) -> bool {
        self.config.processing_enabled
            && mime_type.starts_with("image/")
            && mime_type != "image/svg+xml"
    }

    /// Resizes and re-encodes on the blocking pool. Never returns an error:
    /// failures are reported as [`TransformOutcome::Fallback`].
    pub async fn transform(
        &self,
        bytes: Bytes,
        mime_type: &str,
        options: &ProcessingOptions,
    ) -> TransformOutcome {
        if !self.applies_to(mime_type) {
            return TransformOutcome::Unchanged;
        }

        let config = self.config.clone();
        let options = *options;
        match tokio::task::spawn_blocking(move || run(&config, &bytes, &options)).await {
            Ok(Ok(Some(processed))) => TransformOutcome::Processed(processed),
            Ok(Ok(None)) => TransformOutcome::Unchanged,
            Ok(Err(reason)) => TransformOutcome::Fallback { reason },
            Err(error) => TransformOutcome::Fallback {
                reason: format!("image worker failed: {error}"),
            },
        }
    }
}

/// Aspect-preserving fit of `width`x`height` into `box_width`x`box_height`.
/// Never enlarges; each side is at least one pixel.
pub fn fit_within(width: u32, height: u32, box_width: u32, box_height: u32) -> (u32, u32) {
    if width <= box_width && height <= box_height {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(box_width) / f64::from(width),
        f64::from(box_height) / f64::from(height),
    );
    let scaled = |side: u32, bound: u32| {
        ((f64::from(side) * scale).round() as u32).clamp(1, bound.max(1))
    };

    (scaled(width, box_width), scaled(height, box_height))
}

fn uses_quality(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Jpeg | ImageFormat::Avif)
}

fn build_plan(
    config: &ImageConfig,
    options: &ProcessingOptions,
    source_format: ImageFormat,
    dimensions: (u32, u32),
) -> Option<Plan> {
    let (width, height) = dimensions;
    let (box_width, box_height) = match options.resize {
        Some((w, h)) => (w.min(config.max_width), h.min(config.max_height)),
        None => (config.max_width, config.max_height),
    };
    let fitted = fit_within(width, height, box_width, box_height);
    let target = (fitted != dimensions).then_some(fitted);

    let format = options
        .output_format
        .or(config.auto_convert_format)
        .map(OutputFormat::image_format)
        .unwrap_or(source_format);

    let quality = options
        .quality
        .unwrap_or(config.default_quality)
        .clamp(1, 100);

    let requantize = options.quality.is_some() && uses_quality(format);
    if target.is_none() && format == source_format && !requantize {
        return None;
    }

    Some(Plan {
        target,
        format,
        quality,
    })
}

fn run(
    config: &ImageConfig,
    bytes: &[u8],
    options: &ProcessingOptions,
) -> Result<Option<ProcessedImage>, String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|error| format!("failed to inspect image: {error}"))?;
    let source_format = reader
        .format()
        .ok_or_else(|| "unrecognized image format".to_string())?;
    let dimensions = reader
        .into_dimensions()
        .map_err(|error| format!("failed to read image dimensions: {error}"))?;

    let Some(plan) = build_plan(config, options, source_format, dimensions) else {
        return Ok(None);
    };

    let image = image::load_from_memory(bytes)
        .map_err(|error| format!("failed to decode image: {error}"))?;

    let image = match plan.target {
        Some((width, height)) => image.resize_exact(width, height, FilterType::Lanczos3),
        None => image,
    };

    let (width, height) = image.dimensions();
    let encoded = encode(&image, plan.format, plan.quality)?;

    tracing::debug!(
        from_width = dimensions.0,
        from_height = dimensions.1,
        width,
        height,
        format = ?plan.format,
        quality = plan.quality,
        "Image transformed"
    );

    Ok(Some(ProcessedImage {
        bytes: encoded,
        format: plan.format,
        width,
        height,
    }))
}

/// Encodes into `format`. Formats the `image` crate cannot write are an
/// error, which the caller turns into a fallback.
fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, String> {
    let mut cursor = Cursor::new(Vec::<u8>::new());

    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut cursor, quality))
        }
        ImageFormat::Avif => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut cursor,
                AVIF_ENCODE_SPEED,
                quality,
            ))
        }
        // the webp and gif encoders only take rgba8
        ImageFormat::WebP | ImageFormat::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut cursor, format)
        }
        other => image.write_to(&mut cursor, other),
    };

    result.map_err(|error| format!("failed to encode {format:?}: {error}"))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{gif, png};

    fn config(max: u32) -> ImageConfig {
        ImageConfig {
            processing_enabled: true,
            max_width: max,
            max_height: max,
            default_quality: 80,
            auto_convert_format: None,
        }
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        assert_eq!(fit_within(4000, 3000, 2000, 2000), (2000, 1500));
        assert_eq!(fit_within(3000, 4000, 2000, 2000), (1500, 2000));
        assert_eq!(fit_within(1001, 333, 100, 100), (100, 33));
        assert_eq!(fit_within(10, 10, 100, 100), (10, 10));
        assert_eq!(fit_within(5000, 1, 100, 100), (100, 1));
    }

    #[tokio::test]
    async fn oversized_image_is_clamped_to_max() {
        let transformer = ImageTransformer::new(config(100));

        let outcome = transformer
            .transform(
                Bytes::from(png(300, 150)),
                "image/png",
                &ProcessingOptions::default(),
            )
            .await;

        let TransformOutcome::Processed(processed) = outcome else {
            panic!("expected processed image, got {outcome:?}");
        };
        assert_eq!((processed.width, processed.height), (100, 50));
        assert_eq!(processed.format, ImageFormat::Png);
        assert_eq!(decoded_dimensions(&processed.bytes), (100, 50));
    }

    #[tokio::test]
    async fn oversized_gif_is_clamped_in_its_own_format() {
        let transformer = ImageTransformer::new(config(100));

        let outcome = transformer
            .transform(
                Bytes::from(gif(300, 150)),
                "image/gif",
                &ProcessingOptions::default(),
            )
            .await;

        let TransformOutcome::Processed(processed) = outcome else {
            panic!("expected processed image, got {outcome:?}");
        };
        assert_eq!(processed.format, ImageFormat::Gif);
        assert_eq!(processed.output_format(), None);
        assert_eq!(processed.mime_type(), "image/gif");
        assert_eq!(&processed.bytes[..3], b"GIF");
        assert_eq!(decoded_dimensions(&processed.bytes), (100, 50));
    }

    #[tokio::test]
    async fn quality_alone_does_not_reencode_lossless_sources() {
        let transformer = ImageTransformer::new(config(100));
        let options = ProcessingOptions {
            quality: Some(40),
            ..Default::default()
        };

        for (bytes, mime_type) in [(gif(10, 10), "image/gif"), (png(10, 10), "image/png")] {
            let outcome = transformer
                .transform(Bytes::from(bytes), mime_type, &options)
                .await;
            assert!(matches!(outcome, TransformOutcome::Unchanged), "{outcome:?}");
        }
    }

    #[tokio::test]
    async fn explicit_resize_never_enlarges() {
        let transformer = ImageTransformer::new(config(1000));
        let options = ProcessingOptions {
            resize: Some((400, 400)),
            ..Default::default()
        };

        let outcome = transformer
            .transform(Bytes::from(png(20, 10)), "image/png", &options)
            .await;

        assert!(matches!(outcome, TransformOutcome::Unchanged), "{outcome:?}");
    }

    #[tokio::test]
    async fn explicit_resize_is_capped_by_config() {
        let transformer = ImageTransformer::new(config(50));
        let options = ProcessingOptions {
            resize: Some((80, 200)),
            ..Default::default()
        };

        let outcome = transformer
            .transform(Bytes::from(png(200, 100)), "image/png", &options)
            .await;

        let TransformOutcome::Processed(processed) = outcome else {
            panic!("expected processed image, got {outcome:?}");
        };
        assert_eq!((processed.width, processed.height), (50, 25));
    }

    #[tokio::test]
    async fn format_override_beats_auto_convert() {
        let mut image_config = config(1000);
        image_config.auto_convert_format = Some(OutputFormat::Webp);
        let transformer = ImageTransformer::new(image_config.clone());

        let auto = transformer
            .transform(Bytes::from(png(8, 8)), "image/png", &ProcessingOptions::default())
            .await;
        assert!(matches!(
            auto,
            TransformOutcome::Processed(ProcessedImage { format: ImageFormat::WebP, .. })
        ));

        let options = ProcessingOptions {
            output_format: Some(OutputFormat::Jpg),
            quality: Some(60),
            ..Default::default()
        };
        let explicit = transformer
            .transform(Bytes::from(png(8, 8)), "image/png", &options)
            .await;
        let TransformOutcome::Processed(processed) = explicit else {
            panic!("expected processed image");
        };
        assert_eq!(processed.format, ImageFormat::Jpeg);
        assert_eq!(processed.mime_type(), "image/jpeg");
        assert_eq!(&processed.bytes[..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn corrupt_image_falls_back() {
        let transformer = ImageTransformer::new(config(100));
        let options = ProcessingOptions {
            output_format: Some(OutputFormat::Jpg),
            ..Default::default()
        };

        let outcome = transformer
            .transform(Bytes::from_static(b"\x89PNGnot really"), "image/png", &options)
            .await;

        assert!(matches!(outcome, TransformOutcome::Fallback { .. }), "{outcome:?}");
    }

    #[tokio::test]
    async fn disabled_processing_or_non_images_are_untouched() {
        let mut image_config = config(1);
        image_config.processing_enabled = false;
        let disabled = ImageTransformer::new(image_config);
        assert!(matches!(
            disabled
                .transform(Bytes::from(png(10, 10)), "image/png", &ProcessingOptions::default())
                .await,
            TransformOutcome::Unchanged
        ));

        let enabled = ImageTransformer::new(config(1));
        assert!(!enabled.applies_to("application/pdf"));
        assert!(!enabled.applies_to("image/svg+xml"));
    }
}
