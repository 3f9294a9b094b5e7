//! Streaming classification job: request, framing, dispatch and settlement.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::buffer_utils::{parse_sse_stream, ChunkEvents, JobEventParser};
use crate::error::{ClassifyError, Result};
use crate::streaming::{EventPayload, JobOutcome, JobResult, Progress};
use crate::transport::{ByteStream, StreamTransport};
use crate::types::ClassificationRequest;

/// Path of the streaming classification endpoint, relative to the API base.
pub const STREAM_PATH: &str = "/classify/stream";

/// Receiver of progress updates for a running job.
pub trait ProgressSink: Send {
    fn on_progress(&mut self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: FnMut(Progress) + Send,
{
    fn on_progress(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Forwards progress into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: tokio::sync::mpsc::UnboundedSender<Progress>,
}

impl ChannelProgressSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<Progress>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn on_progress(&mut self, progress: Progress) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.tx.send(progress);
    }
}

/// Terminal state of a job.
#[derive(Debug)]
enum Settlement {
    Pending,
    Fulfilled(JobResult),
    Rejected(ClassifyError),
}

/// What a dispatched event did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A progress update was forwarded to the sink.
    Forwarded,
    /// This event settled the job.
    Settled,
    /// The job was already settled; the event had no effect.
    Ignored,
}

/// Single-settlement state for one job.
///
/// Settles at most once. Every event arriving after settlement is a no-op,
/// so the sink never sees progress after the outcome is known.
#[derive(Debug)]
pub struct JobState {
    settlement: Settlement,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            settlement: Settlement::Pending,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.settlement, Settlement::Pending)
    }

    pub fn dispatch<S: ProgressSink + ?Sized>(&mut self, event: EventPayload, sink: &mut S) -> Dispatch {
        if self.is_settled() {
            tracing::debug!(?event, "Ignoring event after settlement");
            return Dispatch::Ignored;
        }

        match event {
            EventPayload::Progress(progress) => {
                tracing::trace!(current = progress.current, total = progress.total, "Progress");
                sink.on_progress(progress);
                Dispatch::Forwarded
            }
            EventPayload::Complete(result) => {
                tracing::info!(history_id = %result.history_id, "Job completed");
                self.settlement = Settlement::Fulfilled(result);
                Dispatch::Settled
            }
            EventPayload::Error { message } => {
                tracing::warn!(%message, "Job failed on the backend");
                self.settlement = Settlement::Rejected(ClassifyError::Job(message));
                Dispatch::Settled
            }
        }
    }

    /// Reject the job with a transport failure unless it already settled.
    pub fn fail(&mut self, error: ClassifyError) -> bool {
        if self.is_settled() {
            tracing::debug!(error = %error, "Transport error after settlement ignored");
            return false;
        }
        tracing::error!(error = %error, "Job stream failed");
        self.settlement = Settlement::Rejected(error);
        true
    }

    /// Resolve the job once the stream has ended.
    pub fn finish(self) -> Result<JobOutcome> {
        match self.settlement {
            Settlement::Fulfilled(result) => Ok(JobOutcome::Completed(result)),
            Settlement::Rejected(error) => Err(error),
            Settlement::Pending => {
                tracing::error!("Stream ended without a terminal event");
                Err(ClassifyError::StreamTruncated)
            }
        }
    }

    /// Resolve the job after the caller cancelled it.
    pub fn cancel(self) -> Result<JobOutcome> {
        match self.settlement {
            Settlement::Pending => {
                tracing::info!("Job cancelled");
                Ok(JobOutcome::Cancelled)
            }
            _ => self.finish(),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume a job response stream until the job settles, the stream ends or
/// `cancel` fires.
///
/// Cancellation is checked between chunks; the events of a chunk that has
/// already arrived are always dispatched together. Returns right after the
/// chunk holding the terminal record. The rest of the stream is drained in a
/// background task that dispatches nothing and stops early on `cancel`.
pub async fn drive<S: ProgressSink>(
    stream: ByteStream,
    mut sink: S,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    let mut batches = parse_sse_stream(stream, JobEventParser);
    let mut state = JobState::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return state.cancel(),
            next = batches.next() => next,
        };

        match next {
            Some(Ok(events)) => {
                for event in events {
                    state.dispatch(event, &mut sink);
                }
                if state.is_settled() {
                    tokio::spawn(drain(batches, cancel.clone()).in_current_span());
                    break;
                }
            }
            Some(Err(e)) => {
                state.fail(e);
                break;
            }
            None => break,
        }
    }

    state.finish()
}

async fn drain(mut batches: ChunkEvents<EventPayload>, cancel: CancellationToken) {
    let mut ignored = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = batches.next() => next,
        };
        match next {
            Some(Ok(events)) => ignored += events.len(),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Transport error after settlement ignored");
                break;
            }
            None => break,
        }
    }
    tracing::debug!(ignored, "Drained job stream after settlement");
}

/// Client that runs classification jobs over a streaming transport.
pub struct StreamingJobClient<T> {
    transport: T,
}

impl<T: StreamTransport> StreamingJobClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one classification job, reporting progress to `sink`.
    ///
    /// Resolves as soon as the job settles: `Completed` on a `complete`
    /// event, `Err` on an `error` event, transport failure or a stream that
    /// ends early, `Cancelled` when `cancel` fires before either. A request that fails before any
    /// data arrives never touches `sink`.
    pub async fn run<S: ProgressSink>(
        &self,
        request: &ClassificationRequest,
        sink: S,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome> {
        let job_id = Uuid::new_v4();
        let span = tracing::info_span!("classify_job", %job_id, file_path = %request.file_path);

        async move {
            let body = serde_json::to_value(request)?;

            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Job cancelled before the request completed");
                    return Ok(JobOutcome::Cancelled);
                }
                opened = self.transport.open_stream(STREAM_PATH, &body) => opened?,
            };

            tracing::info!("Job stream opened");
            drive(stream, sink, cancel).await
        }
        .instrument(span)
        .await
    }
}
