use std::path::{Path, PathBuf};

use common::{deserialize, FileExtensionError, FileFormat, SerdeFormatError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::analysis::Criterion;
use crate::image::{ImageError, Pixel, PixelImage, PIXEL_MAX};
use crate::source::{ImageList, ImageSource, RepeatImage};

pub const DEFAULT_TARGET_VALUE: Pixel = 128;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;
pub const DEFAULT_LOG_PATH: &str = "pixel_flow.log";

/// Largest limit whose widest stage queue still fits in a tokio semaphore.
pub const MAX_CONCURRENCY_LIMIT: usize = Semaphore::MAX_PERMITS / Criterion::COUNT;

pub const DEFAULT_IMAGE_COUNT: usize = 64;
pub const DEFAULT_IMAGE_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target_value must be within 0..={max}, got {value}")]
    TargetValueOutOfRange { value: i64, max: Pixel },
    #[error("{name} must be a positive integer, got {value}")]
    NotPositive { name: &'static str, value: i64 },
    #[error("concurrency_limit must be at most {max}, got {value}")]
    LimitTooLarge { value: u64, max: usize },
    #[error("Failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported config file")]
    Format(#[from] FileExtensionError),
    #[error("Failed to parse config file")]
    Parse(#[from] SerdeFormatError),
}

/// Settings of the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub target_value: Pixel,
    pub concurrency_limit: usize,
    pub log_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_value: DEFAULT_TARGET_VALUE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
        }
    }
}

impl PipelineConfig {
    /// Validates raw numeric settings.
    pub fn new(
        target_value: i64,
        concurrency_limit: i64,
        log_path: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            target_value: validate_target_value(target_value)?,
            concurrency_limit: validate_concurrency_limit(concurrency_limit)?,
            log_path: log_path.into(),
        })
    }

    /// Re-checks values that may have been set directly on the public fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = i64::try_from(self.concurrency_limit).unwrap_or(i64::MAX);
        validate_concurrency_limit(limit)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Every image is generated independently.
    #[default]
    Distinct,
    /// One generated image is fed `image_count` times.
    Repeat,
}

/// Where the images of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub image_count: usize,
    pub width: usize,
    pub height: usize,
    pub seed: Option<u64>,
    pub mode: SourceMode,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            image_count: DEFAULT_IMAGE_COUNT,
            width: DEFAULT_IMAGE_SIZE,
            height: DEFAULT_IMAGE_SIZE,
            seed: None,
            mode: SourceMode::Distinct,
        }
    }
}

impl SourceConfig {
    /// Generates the random images for this run.
    pub fn build(&self) -> Result<Box<dyn ImageSource>, ImageError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let source: Box<dyn ImageSource> = match self.mode {
            SourceMode::Distinct => {
                let images = (0..self.image_count)
                    .map(|_| PixelImage::random(self.width, self.height, &mut rng))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(ImageList::new(images))
            }
            SourceMode::Repeat => {
                let image = PixelImage::random(self.width, self.height, &mut rng)?;
                Box::new(RepeatImage::new(image, self.image_count))
            }
        };
        Ok(source)
    }
}

/// On-disk form; every field optional, numbers read wide so range errors are ours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub target_value: Option<i64>,
    pub concurrency_limit: Option<i64>,
    pub log_path: Option<PathBuf>,
    pub source: SourceSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSection {
    pub image_count: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub seed: Option<u64>,
    pub mode: Option<SourceMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = FileFormat::from_file_name(&path.to_string_lossy())?;
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, format)
    }

    pub fn parse(text: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let file: ConfigFile = deserialize(text, format)?;
        Config::default().merged(&file)
    }

    /// Applies every value present in `file` on top of `self`.
    pub fn merged(mut self, file: &ConfigFile) -> Result<Self, ConfigError> {
        if let Some(value) = file.target_value {
            self.pipeline.target_value = validate_target_value(value)?;
        }
        if let Some(value) = file.concurrency_limit {
            self.pipeline.concurrency_limit = validate_concurrency_limit(value)?;
        }
        if let Some(path) = &file.log_path {
            self.pipeline.log_path = path.clone();
        }

        let section = &file.source;
        if let Some(value) = section.image_count {
            self.source.image_count = validate_positive("image_count", value)?;
        }
        if let Some(value) = section.width {
            self.source.width = validate_positive("width", value)?;
        }
        if let Some(value) = section.height {
            self.source.height = validate_positive("height", value)?;
        }
        if section.seed.is_some() {
            self.source.seed = section.seed;
        }
        if let Some(mode) = section.mode {
            self.source.mode = mode;
        }

        Ok(self)
    }
}

fn validate_target_value(value: i64) -> Result<Pixel, ConfigError> {
    Pixel::try_from(value).map_err(|_| ConfigError::TargetValueOutOfRange {
        value,
        max: PIXEL_MAX,
    })
}

fn validate_concurrency_limit(value: i64) -> Result<usize, ConfigError> {
    let limit = validate_positive("concurrency_limit", value)?;
    if limit > MAX_CONCURRENCY_LIMIT {
        return Err(ConfigError::LimitTooLarge {
            value: limit as u64,
            max: MAX_CONCURRENCY_LIMIT,
        });
    }
    Ok(limit)
}

fn validate_positive(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    match usize::try_from(value) {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::NotPositive { name, value }),
    }
}
