use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info};

use crate::admission::{Admission, AdmissionController, CompletionToken};
use crate::analysis::{run_analysis_stage, AnalysisInput, AnalysisOutput, Criterion, SelectionResult};
use crate::barrier::Join;
use crate::config::PipelineConfig;
use crate::consumer::{
    log_average, mutate_borders, run_consumer_stage, Consumer, ConsumerDone, ConsumerReport,
    JoinedRecord,
};
use crate::error::{Error, InvariantViolation, Result};
use crate::log_writer::LogWriter;
use crate::source::ImageSource;
use crate::Seq;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Admitted { seq: Seq },
    Joined { seq: Seq },
    Logged { seq: Seq, average: u64 },
    Released { seq: Seq },
}

/// Callback fired from stage tasks as images move through the graph.
#[derive(Clone)]
pub struct EventCallback(Arc<dyn Fn(PipelineEvent) + Send + Sync>);

impl EventCallback {
    pub fn new<F: Fn(PipelineEvent) + Send + Sync + 'static>(f: F) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, event: PipelineEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for EventCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCallback").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
struct Events(Option<EventCallback>);

impl Events {
    fn emit(&self, event: PipelineEvent) {
        if let Some(callback) = &self.0 {
            callback.call(event);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub admitted: usize,
    pub released: usize,
    pub log_lines: usize,
    pub peak_in_flight: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Default)]
struct RunCounters {
    admitted: AtomicUsize,
    released: AtomicUsize,
}

/// The fixed analysis graph:
///
/// source -> admission -> {max, min, target} -> stage1 join
///        -> {border mutator, average logger} -> stage2 join -> release
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    events: Events,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            events: Events::default(),
        }
    }

    pub fn with_callback(mut self, callback: EventCallback) -> Self {
        self.events = Events(Some(callback));
        self
    }

    /// Pushes every image of `source` through the graph and waits until all are released.
    ///
    /// Settings are re-validated before the log is touched. The first failing stage
    /// cancels the rest and its error is returned.
    pub async fn run<S>(&self, source: S) -> Result<PipelineStats>
    where
        S: ImageSource + 'static,
    {
        let started = Instant::now();
        self.config.validate()?;
        let limit = self.config.concurrency_limit;

        let log = LogWriter::create(&self.config.log_path).await?;
        let admission = Arc::new(AdmissionController::new(limit));
        let counters = Arc::new(RunCounters::default());
        info!(
            limit,
            target_value = self.config.target_value,
            log_path = %log.path().display(),
            "pipeline started"
        );

        let mut stages = StageSet::default();

        let (analysis_tx, analysis_rx) = channel::<AnalysisOutput>(limit * Criterion::COUNT);
        let mut source_txs = Vec::with_capacity(Criterion::COUNT);
        for criterion in Criterion::all(self.config.target_value) {
            let (tx, rx) = channel::<AnalysisInput>(limit);
            stages.spawn(
                criterion.stage_name(),
                run_analysis_stage(criterion, rx, analysis_tx.clone()),
            );
            source_txs.push(tx);
        }
        drop(analysis_tx);

        let (mutator_tx, mutator_rx) = channel::<Arc<JoinedRecord>>(limit);
        let (logger_tx, logger_rx) = channel::<Arc<JoinedRecord>>(limit);
        let (done_tx, done_rx) = channel::<ConsumerDone>(limit * Consumer::COUNT);

        stages.spawn(
            "stage1_barrier",
            run_stage1_barrier(analysis_rx, [mutator_tx, logger_tx], self.events.clone()),
        );
        stages.spawn(
            Consumer::BorderMutator.stage_name(),
            run_consumer_stage(
                Consumer::BorderMutator,
                mutator_rx,
                done_tx.clone(),
                mutate_borders,
            ),
        );
        let log_handle = log.handle();
        stages.spawn(
            Consumer::AverageLogger.stage_name(),
            run_consumer_stage(Consumer::AverageLogger, logger_rx, done_tx, move |record| {
                log_average(record, log_handle.clone())
            }),
        );
        stages.spawn(
            "stage2_barrier",
            run_stage2_barrier(
                done_rx,
                Arc::clone(&admission),
                Arc::clone(&counters),
                self.events.clone(),
            ),
        );
        stages.spawn(
            "source",
            run_source(
                source,
                Arc::clone(&admission),
                source_txs,
                Arc::clone(&counters),
                self.events.clone(),
            ),
        );

        if let Err(err) = stages.join_all().await {
            error!(%err, "pipeline failed");
            log.abort();
            return Err(err);
        }

        let log_lines = log.finish().await?;
        let admitted = counters.admitted.load(Ordering::SeqCst);
        let released = counters.released.load(Ordering::SeqCst);
        check_totals(admitted, released, log_lines)?;

        let stats = PipelineStats {
            admitted,
            released,
            log_lines,
            peak_in_flight: admission.peak(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            images = stats.released,
            peak_in_flight = stats.peak_in_flight,
            elapsed_secs = stats.elapsed_secs,
            "pipeline finished"
        );
        Ok(stats)
    }
}

/// Every admitted image must be released and leave exactly one log line.
fn check_totals(
    admitted: usize,
    released: usize,
    log_lines: usize,
) -> std::result::Result<(), InvariantViolation> {
    if admitted != released {
        return Err(InvariantViolation::Unreleased { admitted, released });
    }
    if log_lines != released {
        return Err(InvariantViolation::LogLineMismatch {
            log_lines,
            released,
        });
    }
    Ok(())
}

/// Stage tasks of one run, remembered by name for error reports.
#[derive(Default)]
struct StageSet {
    tasks: JoinSet<Result<()>>,
    names: HashMap<task::Id, &'static str>,
}

impl StageSet {
    fn spawn<F>(&mut self, name: &'static str, stage: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self.tasks.spawn(stage);
        self.names.insert(handle.id(), name);
    }

    /// Waits for every stage. On the first failure cancels the others and
    /// returns the root cause rather than the knock-on channel errors.
    async fn join_all(mut self) -> Result<()> {
        let mut failure: Option<Error> = None;

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, outcome)) => {
                    debug!(stage = self.name(id), ok = outcome.is_ok(), "stage exited");
                    outcome
                }
                Err(join_error) if join_error.is_cancelled() && failure.is_some() => continue,
                Err(join_error) => Err(Error::StagePanicked {
                    stage: self.name(join_error.id()),
                    source: join_error,
                }),
            };

            let Err(err) = outcome else { continue };
            let replace = match &failure {
                None => {
                    self.tasks.abort_all();
                    true
                }
                Some(first) => first.is_secondary() && !err.is_secondary(),
            };
            if replace {
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn name(&self, id: task::Id) -> &'static str {
        self.names.get(&id).copied().unwrap_or("unknown")
    }
}

async fn run_source<S: ImageSource>(
    mut source: S,
    admission: Arc<AdmissionController>,
    txs: Vec<Sender<AnalysisInput>>,
    counters: Arc<RunCounters>,
    events: Events,
) -> Result<()> {
    while let Some(image) = source.next_image() {
        let Admission { seq } = admission.admit().await;
        counters.admitted.fetch_add(1, Ordering::SeqCst);
        events.emit(PipelineEvent::Admitted { seq });

        for tx in &txs {
            let input = AnalysisInput {
                seq,
                image: Arc::clone(&image),
            };
            tx.send(input)
                .await
                .map_err(|_| Error::ChannelClosed("source"))?;
        }
    }

    debug!(
        admitted = counters.admitted.load(Ordering::SeqCst),
        "source exhausted"
    );
    Ok(())
}

async fn run_stage1_barrier(
    mut rx: Receiver<AnalysisOutput>,
    outputs: [Sender<Arc<JoinedRecord>>; Consumer::COUNT],
    events: Events,
) -> Result<()> {
    let mut join: Join<SelectionResult, { Criterion::COUNT }> = Join::new("stage1_barrier");

    while let Some(AnalysisOutput { seq, result }) = rx.recv().await {
        let port = result.criterion.port();
        let Some(results) = join.offer(seq, port, result)? else {
            continue;
        };

        let record = Arc::new(JoinedRecord::new(seq, results)?);
        debug!(seq, selected = record.selected_count(), "analysis joined");
        events.emit(PipelineEvent::Joined { seq });

        for tx in &outputs {
            tx.send(Arc::clone(&record))
                .await
                .map_err(|_| Error::ChannelClosed(join.name()))?;
        }
    }

    join.finish()?;
    Ok(())
}

async fn run_stage2_barrier(
    mut rx: Receiver<ConsumerDone>,
    admission: Arc<AdmissionController>,
    counters: Arc<RunCounters>,
    events: Events,
) -> Result<()> {
    let mut join: Join<ConsumerReport, { Consumer::COUNT }> = Join::new("stage2_barrier");

    while let Some(ConsumerDone {
        seq,
        consumer,
        report,
    }) = rx.recv().await
    {
        if let ConsumerReport::Logged { average } = report {
            events.emit(PipelineEvent::Logged { seq, average });
        }

        let Some([inverted, _logged]) = join.offer(seq, consumer.port(), report)? else {
            continue;
        };
        if let ConsumerReport::Inverted(summary) = inverted {
            debug!(seq, inverted = summary.inverted, "consumers joined");
        }

        counters.released.fetch_add(1, Ordering::SeqCst);
        events.emit(PipelineEvent::Released { seq });
        admission.release(CompletionToken::new(seq))?;
    }

    join.finish()?;
    Ok(())
}
