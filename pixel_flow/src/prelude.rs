//! Common imports for driving the pipeline.
//!
//! ```rust,ignore
//! use pixel_flow::prelude::*;
//! ```

pub use crate::admission::{Admission, AdmissionController, CompletionToken};
pub use crate::analysis::{Criterion, SelectionResult};
pub use crate::config::{Config, PipelineConfig, SourceConfig, SourceMode};
pub use crate::consumer::JoinedRecord;
pub use crate::error::{Error, InvariantViolation, Result};
pub use crate::image::{invert, Pixel, PixelImage, PIXEL_MAX};
pub use crate::pipeline::{EventCallback, Pipeline, PipelineEvent, PipelineStats};
pub use crate::source::{ImageList, ImageSource, RepeatImage};
pub use crate::Seq;
