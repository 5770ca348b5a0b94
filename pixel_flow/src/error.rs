use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::image::ImageError;
use crate::Seq;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid image: {0}")]
    Image(#[from] ImageError),
    #[error("Pipeline invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error("Failed to open log file {}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write log file")]
    LogWrite(#[source] std::io::Error),
    #[error("Log writer stopped before acknowledging a line")]
    LogWriterClosed,
    #[error("Stage {stage} panicked or was cancelled")]
    StagePanicked {
        stage: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("Downstream of stage {0} is gone")]
    ChannelClosed(&'static str),
}

/// Wiring defects. Never recoverable at runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{barrier} received a second value on port {port} for sequence {seq}")]
    DuplicateArrival {
        barrier: &'static str,
        seq: Seq,
        port: usize,
    },
    #[error("{barrier} port {port} does not exist")]
    UnknownPort { barrier: &'static str, port: usize },
    #[error("{barrier} lost values of sequence {seq} while releasing it")]
    IncompleteJoin { barrier: &'static str, seq: Seq },
    #[error("{barrier} shut down with unjoined sequences {seqs:?}")]
    Unjoined { barrier: &'static str, seqs: Vec<Seq> },
    #[error("Joined record {seq} mixes results from different images")]
    MismatchedImage { seq: Seq },
    #[error("Sequence {seq} released with no image in flight")]
    ReleaseWithoutAdmission { seq: Seq },
    #[error("Sequence {seq} has no selected pixels to average")]
    EmptySelection { seq: Seq },
    #[error("{admitted} images admitted but {released} released")]
    Unreleased { admitted: usize, released: usize },
    #[error("{released} images released but the log holds {log_lines} lines")]
    LogLineMismatch { log_lines: usize, released: usize },
}

impl Error {
    /// Errors that only report that another stage already failed.
    pub fn is_secondary(&self) -> bool {
        matches!(self, Error::ChannelClosed(_) | Error::LogWriterClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
