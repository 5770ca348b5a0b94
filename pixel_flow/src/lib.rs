pub mod admission;
pub mod analysis;
pub mod barrier;
pub mod config;
pub mod consumer;
pub mod error;
pub mod image;
pub mod log_writer;
pub mod pipeline;
pub mod prelude;
pub mod source;

/// Admission order of an image within one run.
pub type Seq = u64;
