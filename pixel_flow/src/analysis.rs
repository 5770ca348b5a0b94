use std::sync::Arc;

use strum_macros::{Display, IntoStaticStr};
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::debug;

use crate::error::{Error, Result};
use crate::image::{Pixel, PixelImage};
use crate::Seq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Criterion {
    MaxValue,
    MinValue,
    TargetValue(Pixel),
}

impl Criterion {
    pub const COUNT: usize = 3;

    pub fn all(target_value: Pixel) -> [Criterion; Criterion::COUNT] {
        [
            Criterion::MaxValue,
            Criterion::MinValue,
            Criterion::TargetValue(target_value),
        ]
    }

    /// Barrier port this criterion's results arrive on.
    pub fn port(&self) -> usize {
        match self {
            Criterion::MaxValue => 0,
            Criterion::MinValue => 1,
            Criterion::TargetValue(_) => 2,
        }
    }

    /// The pixel value this criterion picks out of `image`.
    pub fn reference_value(&self, image: &PixelImage) -> Pixel {
        match self {
            Criterion::MaxValue => image.max_value(),
            Criterion::MinValue => image.min_value(),
            Criterion::TargetValue(value) => *value,
        }
    }

    pub fn stage_name(&self) -> &'static str {
        self.into()
    }
}

/// Pixels of one image that satisfy one criterion, in ascending index order.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub image: Arc<PixelImage>,
    pub criterion: Criterion,
    pub indices: Vec<usize>,
}

impl SelectionResult {
    pub fn values(&self) -> impl Iterator<Item = Pixel> + '_ {
        self.indices.iter().map(|&index| self.image.get_pixel(index))
    }
}

pub fn select(image: &Arc<PixelImage>, criterion: Criterion) -> SelectionResult {
    let reference = criterion.reference_value(image);
    let indices = image
        .pixels()
        .iter()
        .enumerate()
        .filter(|(_, &value)| value == reference)
        .map(|(index, _)| index)
        .collect();

    SelectionResult {
        image: Arc::clone(image),
        criterion,
        indices,
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub seq: Seq,
    pub image: Arc<PixelImage>,
}

#[derive(Debug)]
pub struct AnalysisOutput {
    pub seq: Seq,
    pub result: SelectionResult,
}

/// One analysis stage: handles a single image at a time, in arrival order.
pub(crate) async fn run_analysis_stage(
    criterion: Criterion,
    mut rx: Receiver<AnalysisInput>,
    tx: Sender<AnalysisOutput>,
) -> Result<()> {
    while let Some(AnalysisInput { seq, image }) = rx.recv().await {
        let result = select(&image, criterion);
        debug!(
            seq,
            stage = criterion.stage_name(),
            selected = result.indices.len(),
            "analysis done"
        );

        tx.send(AnalysisOutput { seq, result })
            .await
            .map_err(|_| Error::ChannelClosed(criterion.stage_name()))?;
    }

    Ok(())
}
