use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::errors::AppError;
use crate::uploads::intake::TempUpload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[serde(alias = "jpeg")]
    Jpg,
    Png,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Webp => image::ImageFormat::WebP,
            OutputFormat::Avif => image::ImageFormat::Avif,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(OutputFormat::Jpg),
            image::ImageFormat::Png => Some(OutputFormat::Png),
            image::ImageFormat::WebP => Some(OutputFormat::Webp),
            image::ImageFormat::Avif => Some(OutputFormat::Avif),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            other => Err(format!(
                "Unsupported output format '{other}'. Allowed: jpg, png, webp, avif"
            )),
        }
    }
}

/// Per-request image options, parsed once from the multipart text fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub resize: Option<(u32, u32)>,
    pub quality: Option<u8>,
    pub output_format: Option<OutputFormat>,
}

impl ProcessingOptions {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, AppError> {
        let field = |name: &str| {
            fields
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };

        let resize = field("resize").map(parse_resize).transpose()?;

        let quality = field("quality")
            .map(|value| {
                value
                    .parse::<u8>()
                    .ok()
                    .filter(|quality| (1..=100).contains(quality))
                    .ok_or_else(|| {
                        AppError::BadRequest("Quality must be an integer between 1 and 100".into())
                    })
            })
            .transpose()?;

        let output_format = field("outputFormat")
            .map(|value| value.parse::<OutputFormat>().map_err(AppError::BadRequest))
            .transpose()?;

        Ok(Self {
            resize,
            quality,
            output_format,
        })
    }
}

fn parse_resize(value: &str) -> Result<(u32, u32), AppError> {
    let invalid =
        || AppError::BadRequest("Resize must use the format WIDTHxHEIGHT, e.g. 800x600".into());

    let (width, height) = value
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().parse::<u32>(), h.trim().parse::<u32>()))
        .ok_or_else(invalid)?;

    match (width, height) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(invalid()),
    }
}

/// A file part spooled to disk by the multipart intake. Dropping it removes
/// the spooled bytes.
#[derive(Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub temp: TempUpload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileRecord {
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    pub url: String,
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub url: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Result slot for one file of a batch upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Persisted(StoredFileRecord),
    #[serde(rename_all = "camelCase")]
    Failed { original_name: String, error: String },
}

impl FileOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, FileOutcome::Persisted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_all_options() {
        let options = ProcessingOptions::from_fields(&fields(&[
            ("resize", "800x600"),
            ("quality", "75"),
            ("outputFormat", "JPEG"),
        ]))
        .unwrap();

        assert_eq!(options.resize, Some((800, 600)));
        assert_eq!(options.quality, Some(75));
        assert_eq!(options.output_format, Some(OutputFormat::Jpg));
    }

    #[test]
    fn empty_fields_mean_no_options() {
        let options =
            ProcessingOptions::from_fields(&fields(&[("resize", ""), ("quality", " ")])).unwrap();
        assert_eq!(options, ProcessingOptions::default());
    }

    #[test]
    fn rejects_malformed_options() {
        for (name, value) in [
            ("resize", "800"),
            ("resize", "0x10"),
            ("resize", "axb"),
            ("quality", "0"),
            ("quality", "101"),
            ("outputFormat", "tiff"),
        ] {
            let result = ProcessingOptions::from_fields(&fields(&[(name, value)]));
            assert!(
                matches!(result, Err(AppError::BadRequest(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn failed_outcome_serializes_with_status_tag() {
        let outcome = FileOutcome::Failed {
            original_name: "b.png".into(),
            error: "File not found".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["originalName"], "b.png");
    }
}
