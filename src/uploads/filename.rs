use chrono::Utc;
use std::path::Path;
use uuid::Uuid;

use crate::models::OutputFormat;

const MAX_BASE_LEN: usize = 50;

fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Builds `[prefix-]{millis}-{random}-{base}.{ext}`.
///
/// The random part is 64 bits taken from a v4 UUID, so two calls never
/// collide in practice even within the same millisecond.
pub fn generate_filename(
    original_name: &str,
    prefix: Option<&str>,
    output_format: Option<OutputFormat>,
) -> String {
    let path = Path::new(original_name);

    let mut base: String = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(sanitize)
        .unwrap_or_default();
    base.truncate(MAX_BASE_LEN);
    if base.is_empty() {
        base.push_str("file");
    }

    let extension = match output_format {
        Some(format) => format.extension().to_string(),
        None => path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| sanitize(ext).to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "bin".to_string()),
    };

    let random = &Uuid::new_v4().simple().to_string()[..16];
    let timestamp = Utc::now().timestamp_millis();

    match prefix.map(sanitize).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}-{timestamp}-{random}-{base}.{extension}"),
        None => format!("{timestamp}-{random}-{base}.{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::validate_key;

    #[test]
    fn successive_calls_differ() {
        let first = generate_filename("holiday.png", None, None);
        let second = generate_filename("holiday.png", None, None);
        assert_ne!(first, second);
    }

    #[test]
    fn keeps_sanitized_stem_and_extension() {
        let name = generate_filename("My Holiday (1).PNG", None, None);
        assert!(name.ends_with("-MyHoliday1.png"), "{name}");
        validate_key(&name).unwrap();
    }

    #[test]
    fn output_format_overrides_extension() {
        let name = generate_filename("scan.tiff", Some("avatar"), Some(OutputFormat::Webp));
        assert!(name.starts_with("avatar-"), "{name}");
        assert!(name.ends_with("-scan.webp"), "{name}");
    }

    #[test]
    fn hostile_names_become_safe_keys() {
        for original in ["../../etc/passwd", "..\\..\\boot.ini", "....", "", "résumé.pdf"] {
            let name = generate_filename(original, Some("../x"), None);
            validate_key(&name).unwrap();
        }
        assert!(generate_filename("", None, None).ends_with("-file.bin"));
    }

    #[test]
    fn long_stems_are_truncated() {
        let long = format!("{}.txt", "a".repeat(200));
        let name = generate_filename(&long, None, None);
        assert!(name.ends_with(&format!("-{}.txt", "a".repeat(MAX_BASE_LEN))));
    }
}
