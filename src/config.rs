use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::models::OutputFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
}

impl FromStr for StorageKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            _ => Err(ConfigError::Invalid {
                name: "STORAGE_BACKEND",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageKind,
    #[serde(default = "default_storage_local_root")]
    pub local_root: String,
    #[serde(default = "default_storage_public_prefix")]
    pub public_prefix: String,
    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_s3_key_prefix")]
    pub key_prefix: String,
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_upload_max_files")]
    pub max_files: usize,
    #[serde(default = "default_upload_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    #[serde(default = "default_upload_temp_dir")]
    pub temp_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_true")]
    pub processing_enabled: bool,
    #[serde(default = "default_image_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_image_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_image_quality")]
    pub default_quality: u8,
    #[serde(default)]
    pub auto_convert_format: Option<OutputFormat>,
}

fn default_true() -> bool {
    true
}

fn default_storage_backend() -> StorageKind {
    StorageKind::Local
}

fn default_storage_local_root() -> String {
    "data/uploads".to_string()
}

fn default_storage_public_prefix() -> String {
    "/uploads".to_string()
}

fn default_s3_key_prefix() -> String {
    "uploads/".to_string()
}

fn default_upload_max_file_size() -> usize {
    10 * 1024 * 1024
}

fn default_upload_max_files() -> usize {
    10
}

fn default_upload_allowed_mime_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/avif",
        "application/pdf",
        "text/plain",
        "text/csv",
        "application/zip",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_upload_temp_dir() -> String {
    std::env::temp_dir()
        .join("uploadkit")
        .to_string_lossy()
        .into_owned()
}

fn default_image_max_dimension() -> u32 {
    2048
}

fn default_image_quality() -> u8 {
    80
}

impl StorageConfig {
    /// `public_prefix` normalised to `/segment` form with no trailing slash,
    /// or empty when files are served from the root.
    pub fn mount_prefix(&self) -> String {
        match self.public_prefix.trim_matches('/') {
            "" => String::new(),
            trimmed => format!("/{trimmed}"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local_root: default_storage_local_root(),
            public_prefix: default_storage_public_prefix(),
            s3: S3Config::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: None,
            bucket: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            key_prefix: default_s3_key_prefix(),
            public_url: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_upload_max_file_size(),
            max_files: default_upload_max_files(),
            allowed_mime_types: default_upload_allowed_mime_types(),
            temp_dir: default_upload_temp_dir(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            processing_enabled: true,
            max_width: default_image_max_dimension(),
            max_height: default_image_max_dimension(),
            default_quality: default_image_quality(),
            auto_convert_format: None,
        }
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &'static str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".into());

        if Path::new(&config_path).exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                    path: config_path.clone(),
                    source,
                })?;
            return Ok(toml::from_str(&contents)?);
        }

        // Fall back to environment variables
        let auto_convert_format = match std::env::var("IMAGE_AUTO_CONVERT_FORMAT") {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.parse().map_err(|_| ConfigError::Invalid {
                    name: "IMAGE_AUTO_CONVERT_FORMAT",
                    value,
                })?)
            }
            _ => None,
        };

        let allowed_mime_types = std::env::var("UPLOAD_ALLOWED_MIME_TYPES")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|item| item.trim().to_ascii_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_else(default_upload_allowed_mime_types);

        Ok(AppConfig {
            server: ServerConfig {
                host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port: env_or("PORT", 3000)?,
            },
            jwt: JwtConfig {
                secret: std::env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
                expiration_hours: env_or("JWT_EXPIRATION_HOURS", 24)?,
            },
            storage: StorageConfig {
                backend: env_or("STORAGE_BACKEND", default_storage_backend())?,
                local_root: std::env::var("STORAGE_LOCAL_ROOT")
                    .unwrap_or_else(|_| default_storage_local_root()),
                public_prefix: std::env::var("STORAGE_PUBLIC_PREFIX")
                    .unwrap_or_else(|_| default_storage_public_prefix()),
                s3: S3Config {
                    endpoint: std::env::var("S3_ENDPOINT").ok(),
                    region: std::env::var("S3_REGION").ok(),
                    bucket: std::env::var("S3_BUCKET").ok(),
                    access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
                    secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
                    force_path_style: env_flag("S3_FORCE_PATH_STYLE", false),
                    key_prefix: std::env::var("S3_KEY_PREFIX")
                        .unwrap_or_else(|_| default_s3_key_prefix()),
                    public_url: std::env::var("S3_PUBLIC_URL").ok(),
                },
            },
            upload: UploadConfig {
                max_file_size: env_or("UPLOAD_MAX_FILE_SIZE", default_upload_max_file_size())?,
                max_files: env_or("UPLOAD_MAX_FILES", default_upload_max_files())?,
                allowed_mime_types,
                temp_dir: std::env::var("UPLOAD_TEMP_DIR")
                    .unwrap_or_else(|_| default_upload_temp_dir()),
            },
            image: ImageConfig {
                processing_enabled: env_flag("IMAGE_PROCESSING_ENABLED", true),
                max_width: env_or("IMAGE_MAX_WIDTH", default_image_max_dimension())?,
                max_height: env_or("IMAGE_MAX_HEIGHT", default_image_max_dimension())?,
                default_quality: env_or("IMAGE_DEFAULT_QUALITY", default_image_quality())?,
                auto_convert_format,
            },
        })
    }
}
