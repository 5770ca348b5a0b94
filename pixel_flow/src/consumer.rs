use std::future::Future;
use std::sync::Arc;

use strum_macros::{Display, IntoStaticStr};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::analysis::SelectionResult;
use crate::error::{Error, InvariantViolation, Result};
use crate::image::{invert, PixelImage};
use crate::log_writer::LogHandle;
use crate::Seq;

/// The three selections made for one image.
#[derive(Debug)]
pub struct JoinedRecord {
    pub seq: Seq,
    pub image: Arc<PixelImage>,
    pub max: SelectionResult,
    pub min: SelectionResult,
    pub target: SelectionResult,
}

impl JoinedRecord {
    /// Builds a record, checking that all three selections were made on `image`.
    pub fn new(seq: Seq, [max, min, target]: [SelectionResult; 3]) -> Result<Self> {
        let image = Arc::clone(&max.image);
        let same_image = [&min, &target]
            .iter()
            .all(|selection| Arc::ptr_eq(&selection.image, &image));
        if !same_image {
            return Err(InvariantViolation::MismatchedImage { seq }.into());
        }

        Ok(Self {
            seq,
            image,
            max,
            min,
            target,
        })
    }

    pub fn selections(&self) -> [&SelectionResult; 3] {
        [&self.max, &self.min, &self.target]
    }

    pub fn selected_count(&self) -> usize {
        self.selections().iter().map(|s| s.indices.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Consumer {
    BorderMutator,
    AverageLogger,
}

impl Consumer {
    pub const COUNT: usize = 2;

    pub fn port(&self) -> usize {
        match self {
            Consumer::BorderMutator => 0,
            Consumer::AverageLogger => 1,
        }
    }

    pub fn stage_name(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerReport {
    Inverted(BorderInversion),
    Logged { average: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerDone {
    pub seq: Seq,
    pub consumer: Consumer,
    pub report: ConsumerReport,
}

/// Summary of border inversion for one record. The image itself is left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderInversion {
    pub selected: usize,
    pub inverted: usize,
    pub inverted_sum: u64,
}

pub fn invert_borders(record: &JoinedRecord) -> BorderInversion {
    let image = &record.image;
    let mut summary = BorderInversion::default();

    for selection in record.selections() {
        for &index in &selection.indices {
            summary.selected += 1;
            for neighbor in image.get_border(index) {
                summary.inverted += 1;
                summary.inverted_sum += u64::from(invert(image.get_pixel(neighbor)));
            }
        }
    }

    summary
}

/// Truncated mean of every selected pixel value across the three selections.
pub fn selection_average(record: &JoinedRecord) -> Result<u64> {
    let (sum, count) = record
        .selections()
        .iter()
        .flat_map(|selection| selection.values())
        .fold((0u64, 0u64), |(sum, count), value| {
            (sum + u64::from(value), count + 1)
        });

    if count == 0 {
        return Err(InvariantViolation::EmptySelection { seq: record.seq }.into());
    }
    Ok(sum / count)
}

pub(crate) async fn mutate_borders(record: Arc<JoinedRecord>) -> Result<ConsumerDone> {
    let summary = invert_borders(&record);
    trace!(seq = record.seq, inverted = summary.inverted, "borders inverted");
    Ok(ConsumerDone {
        seq: record.seq,
        consumer: Consumer::BorderMutator,
        report: ConsumerReport::Inverted(summary),
    })
}

pub(crate) async fn log_average(record: Arc<JoinedRecord>, log: LogHandle) -> Result<ConsumerDone> {
    let average = selection_average(&record)?;
    log.append(average.to_string()).await?;
    trace!(seq = record.seq, average, "average logged");
    Ok(ConsumerDone {
        seq: record.seq,
        consumer: Consumer::AverageLogger,
        report: ConsumerReport::Logged { average },
    })
}

/// Runs `work` for every incoming record with no concurrency bound.
///
/// Completions go downstream as each task finishes, not in arrival order.
pub(crate) async fn run_consumer_stage<F, Fut>(
    consumer: Consumer,
    mut rx: Receiver<Arc<JoinedRecord>>,
    tx: Sender<ConsumerDone>,
    work: F,
) -> Result<()>
where
    F: Fn(Arc<JoinedRecord>) -> Fut,
    Fut: Future<Output = Result<ConsumerDone>> + Send + 'static,
{
    let stage = consumer.stage_name();
    let mut tasks: JoinSet<Result<ConsumerDone>> = JoinSet::new();
    let mut inputs_open = true;

    while inputs_open || !tasks.is_empty() {
        tokio::select! {
            record = rx.recv(), if inputs_open => match record {
                Some(record) => {
                    tasks.spawn(work(record));
                }
                None => inputs_open = false,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let done = joined.map_err(|source| Error::StagePanicked { stage, source })??;
                tx.send(done).await.map_err(|_| Error::ChannelClosed(stage))?;
            }
        }
    }

    debug!(stage, "consumer stage drained");
    Ok(())
}
