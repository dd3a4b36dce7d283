//! Async item processing with backpressure.
//!
//! The key concepts here are borrowed from ["Queues Don't Fix
//! Overload"](https://ferd.ca/queues-don-t-fix-overload.html). In order to
//! prevent overflow, we limit the number of work items that may be "in flight"
//! at any one time, and once that limit is reached, trying to submit more items
//! for processing will block until one of the in-flight items is completed.
//!
//! Work items must be independent of each other. A work function receives its
//! input by value and shares nothing mutable with other items, which is what
//! allows us to run items either inside the queue's own worker task or on
//! separate runtime threads.
//!
//! Normally, you will want [`run_all`], which creates a queue, pushes every
//! input through it, waits for the queue to drain, and returns the outputs in
//! the order they finished.

use std::sync::Arc;

use futures::{
    FutureExt as _, SinkExt as _, StreamExt as _,
    channel::{mpsc, oneshot},
    stream,
};

use crate::{
    async_utils::{BoxedFuture, BoxedStream, JoinWorker},
    prelude::*,
};

/// How a [`WorkQueue`] runs its work items.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Drive each item from the queue's worker task. Items spend their time
    /// waiting on external OCR and rendering processes, so this gives us
    /// process-level parallelism with very little overhead.
    #[default]
    Process,

    /// Spawn each item as its own Tokio task, so that any in-process CPU work
    /// runs in parallel on the runtime's worker threads.
    Thread,
}

/// Work items contain an input, and a one-shot channel on which to return the
/// result.
#[derive(Debug)]
pub struct WorkItem<InputData, OutputData>
where
    InputData: 'static,
    OutputData: 'static,
{
    /// The input to the work item.
    pub input: InputData,

    /// The one-shot channel on which to return the result.
    pub tx: oneshot::Sender<Result<OutputData>>,
}

/// An async work function.
pub type WorkFn<InputData, OutputData> =
    Arc<dyn Fn(InputData) -> BoxedFuture<Result<OutputData>> + Send + Sync + 'static>;

/// A handle to a [`WorkQueue`].
///
/// This is basically just a wrapper around a [`mpsc::Sender`]. It can be
/// cloned cheaply and passed around.
pub struct WorkQueueHandle<InputData, OutputData>
where
    InputData: 'static,
    OutputData: 'static,
{
    /// Our sender.
    tx: mpsc::Sender<WorkItem<InputData, OutputData>>,
}

impl<InputData, OutputData> WorkQueueHandle<InputData, OutputData>
where
    InputData: Send + 'static,
    OutputData: Send + 'static,
{
    /// Submit an input and return a channel that will receive the output.
    ///
    /// This will only block if our processing capacity has been maxed out.
    pub async fn submit_input(
        &self,
        input: InputData,
    ) -> Result<oneshot::Receiver<Result<OutputData>>> {
        let (tx, rx) = oneshot::channel();
        // We need a mutable copy of `tx` to send the item, so we clone it here.
        let mut queue_tx = self.tx.clone();
        queue_tx
            .send(WorkItem { input, tx })
            .await
            .context("failed to send work item")?;
        Ok(rx)
    }

    /// Process an input and wait for the output.
    pub async fn process_blocking(&self, input: InputData) -> Result<OutputData> {
        let rx = self.submit_input(input).await?;
        rx.await.context("failed to receive work item result")?
    }

    /// Process a stream of inputs, returning a stream of futures that will
    /// yield outputs. Typically used with [`futures::StreamExt::buffered`] or
    /// [`futures::StreamExt::buffer_unordered`] to resolve the futures.
    ///
    /// Whatever concurrency the caller picks, the underlying concurrency limit
    /// on the [`WorkQueue`] will still be enforced normally.
    pub fn process_stream(
        &self,
        input: BoxedStream<InputData>,
    ) -> BoxedStream<BoxedFuture<Result<OutputData>>> {
        let handle = self.clone();
        input
            .map(move |input| {
                let handle = handle.clone();
                async move { handle.process_blocking(input).await }.boxed()
            })
            .boxed()
    }
}

// Override `Clone` so that `Input` and `Output` are not required to be `Clone`.
impl<InputData, OutputData> Clone for WorkQueueHandle<InputData, OutputData> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// A queue of work items which are processed concurrently by a background
/// worker.
///
/// We maintain backpressure by limiting the number of work items queued, and
/// the number currently being processed.
pub struct WorkQueue<InputData, OutputData>
where
    InputData: 'static,
    OutputData: 'static,
{
    /// Queue for submitting work items.
    tx: mpsc::Sender<WorkItem<InputData, OutputData>>,
}

impl<InputData, OutputData> WorkQueue<InputData, OutputData>
where
    InputData: Send + 'static,
    OutputData: Send + 'static,
{
    /// Create a new work queue with the given concurrency limit.
    ///
    /// Note that up to `concurrency_limit` work may be waiting at any one time,
    /// and another `concurrency_limit` work items may be in progress.
    ///
    /// The returned [`JoinWorker`] completes once every handle has been
    /// dropped and every in-flight item has finished.
    pub fn new(
        kind: WorkerKind,
        concurrency_limit: usize,
        work_fn: WorkFn<InputData, OutputData>,
    ) -> (Self, JoinWorker) {
        // `for_each_concurrent` treats 0 as "unlimited", which we never want.
        let concurrency_limit = concurrency_limit.max(1);
        let (tx, rx) = mpsc::channel(concurrency_limit);
        let worker = tokio::spawn(async move {
            rx.for_each_concurrent(
                concurrency_limit,
                |WorkItem { input, tx }: WorkItem<InputData, OutputData>| {
                    let future = work_fn(input);
                    async move {
                        let result = match kind {
                            WorkerKind::Process => future.await,
                            WorkerKind::Thread => join_spawned(tokio::spawn(future)).await,
                        };
                        if let Err(_sent_value) = tx.send(result) {
                            debug!(
                                "failed to send work item result because receiver was dropped"
                            );
                        }
                    }
                },
            )
            .await;
            Ok(())
        });
        (Self { tx }, JoinWorker::from_handle(worker))
    }

    /// Get a handle for submitting items to the work queue.
    pub fn handle(&self) -> WorkQueueHandle<InputData, OutputData> {
        WorkQueueHandle {
            tx: self.tx.clone(),
        }
    }
}

/// Wait for a spawned work item, propagating any panic.
async fn join_spawned<T>(handle: tokio::task::JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(anyhow!("work item did not complete: {}", err)),
    }
}

/// Run `work_fn` over every input using a scoped [`WorkQueue`].
///
/// Outputs are returned in completion order, not input order. Every item is
/// allowed to finish, and the queue's worker is joined, before we return. If
/// any item failed, the first failure (in completion order) is returned and
/// all outputs are discarded.
#[instrument(level = "debug", skip_all, fields(kind = ?kind, concurrency_limit = concurrency_limit, count = inputs.len()))]
pub async fn run_all<InputData, OutputData>(
    kind: WorkerKind,
    concurrency_limit: usize,
    inputs: Vec<InputData>,
    work_fn: WorkFn<InputData, OutputData>,
) -> Result<Vec<OutputData>>
where
    InputData: Send + 'static,
    OutputData: Send + 'static,
{
    let concurrency_limit = concurrency_limit.max(1);
    let (queue, worker) = WorkQueue::new(kind, concurrency_limit, work_fn);
    let handle = queue.handle();
    // Only `handle` (and its clones) may keep the queue open from here on.
    drop(queue);

    let outputs = handle
        .process_stream(stream::iter(inputs).boxed())
        .buffer_unordered(concurrency_limit)
        // Collect all the results (including failures) so that nothing is
        // still running when we return.
        .collect::<Vec<_>>()
        .await;
    drop(handle);
    worker.join().await?;

    // Convert from `Vec<Result<T>>` to `Result<Vec<T>>`.
    outputs.into_iter().collect::<Result<Vec<_>>>()
}
