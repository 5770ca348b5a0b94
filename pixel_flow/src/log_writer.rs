use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Error, Result};

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
struct LogRequest {
    line: String,
    ack: oneshot::Sender<()>,
}

/// Sole owner of the output log. Appenders talk to it through [`LogHandle`].
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    tx: Sender<LogRequest>,
    task: JoinHandle<Result<usize>>,
}

/// Cloneable appender for the output log.
#[derive(Debug, Clone)]
pub struct LogHandle {
    tx: Sender<LogRequest>,
}

impl LogWriter {
    /// Creates (truncating) the log file. Fails before any line is queued.
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await.map_err(|source| Error::LogOpen {
            path: path.to_path_buf(),
            source,
        })?;

        let (tx, rx) = channel::<LogRequest>(QUEUE_CAPACITY);
        let task = tokio::spawn(writer_loop(BufWriter::new(file), rx));

        Ok(Self {
            path: path.to_path_buf(),
            tx,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn handle(&self) -> LogHandle {
        LogHandle {
            tx: self.tx.clone(),
        }
    }

    /// Waits for every outstanding handle to drop, flushes, and returns the line count.
    pub async fn finish(self) -> Result<usize> {
        let Self { tx, task, .. } = self;
        drop(tx);
        task.await.map_err(|source| Error::StagePanicked {
            stage: "log_writer",
            source,
        })?
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl LogHandle {
    /// Appends one line; returns once the writer has written it.
    pub async fn append(&self, line: String) -> Result<()> {
        let (ack, acked) = oneshot::channel();
        self.tx
            .send(LogRequest { line, ack })
            .await
            .map_err(|_| Error::LogWriterClosed)?;
        acked.await.map_err(|_| Error::LogWriterClosed)
    }
}

async fn writer_loop(mut out: BufWriter<File>, mut rx: Receiver<LogRequest>) -> Result<usize> {
    let mut batch: Vec<LogRequest> = Vec::new();
    let mut written = 0usize;

    'writer: loop {
        let Some(request) = rx.recv().await else {
            break;
        };
        batch.push(request);

        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        for request in batch.iter() {
            if let Err(err) = write_line(&mut out, &request.line).await {
                error!(%err, "failed to write log line");
                return Err(Error::LogWrite(err));
            }
        }
        out.flush().await.map_err(Error::LogWrite)?;

        written += batch.len();
        debug!(lines = batch.len(), total = written, "log batch flushed");
        for request in batch.drain(..) {
            let _ = request.ack.send(());
        }

        if closed {
            break 'writer;
        }
    }

    out.flush().await.map_err(Error::LogWrite)?;
    Ok(written)
}

async fn write_line(out: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await
}

#[cfg(test)]
mod tests {
    use common::test_utils::{test_output_dir, test_output_path};

    use super::*;

    #[tokio::test]
    async fn lines_from_many_handles_all_land() -> anyhow::Result<()> {
        let path = test_output_path("log_writer_many_handles.log");
        let writer = LogWriter::create(&path).await?;

        let mut tasks = tokio::task::JoinSet::new();
        for task_idx in 0..8 {
            let handle = writer.handle();
            tasks.spawn(async move {
                for line_idx in 0..25 {
                    handle.append(format!("{}", task_idx * 100 + line_idx)).await?;
                }
                Ok::<_, Error>(())
            });
        }
        while let Some(result) = tasks.join_next().await {
            result??;
        }

        assert_eq!(writer.finish().await?, 200);

        let text = std::fs::read_to_string(&path)?;
        let mut values: Vec<u32> = text
            .lines()
            .map(|line| line.parse())
            .collect::<std::result::Result<_, _>>()?;
        values.sort_unstable();
        let expected: Vec<u32> = (0..8)
            .flat_map(|t| (0..25).map(move |l| t * 100 + l))
            .collect();
        assert_eq!(values, expected);

        Ok(())
    }

    #[tokio::test]
    async fn acknowledged_line_is_on_disk() -> anyhow::Result<()> {
        let path = test_output_path("log_writer_ack.log");
        let writer = LogWriter::create(&path).await?;

        writer.handle().append("42".to_string()).await?;
        assert_eq!(std::fs::read_to_string(&path)?, "42\n");

        assert_eq!(writer.finish().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unopenable_path_is_reported() {
        let path = test_output_dir().join("missing_dir").join("out.log");
        let result = LogWriter::create(&path).await;
        assert!(matches!(result, Err(Error::LogOpen { .. })));
    }

    #[tokio::test]
    async fn append_after_abort_fails() -> anyhow::Result<()> {
        let path = test_output_path("log_writer_abort.log");
        let writer = LogWriter::create(&path).await?;
        let handle = writer.handle();

        writer.abort();
        let result = writer.finish().await;
        assert!(matches!(result, Err(Error::StagePanicked { .. })));

        let appended = handle.append("1".to_string()).await;
        assert!(matches!(appended, Err(Error::LogWriterClosed)));
        Ok(())
    }
}
