// THEORY:
// Images are independent: each one is a pure function of its index. The
// `ParallelIndexer` exploits that by fanning image indices out over a pool of
// workers, then funnels the results back through a reorder buffer so the
// running-offset bookkeeping in `DatasetIndexer::assemble` still sees images
// strictly in index order. The output is identical to the sequential indexer.
//
// Shape of the pool:
// 1.  A dispatcher task receives `ImageTask`s and hands them round-robin to the
//     per-worker channels.
// 2.  Each worker owns its channel and runs generation on the blocking pool
//     (sampling, rasterization and encoding are CPU- and disk-bound).
// 3.  Every task carries a `oneshot` sender for its result.
// 4.  Completed results land in a pending map keyed by index; the contiguous
//     prefix starting at `next_expected` is drained into the ordered output.
// 5.  The first failed image cancels the pool. Workers answer every task still
//     queued with an error instead of rendering it, and `run` drains the pool
//     before returning, so no image is written after `run` has returned.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core_modules::canvas::Rasterizer;
use crate::core_modules::tabular_store::TabularStore;
use crate::error::{Error, Result};
use crate::pipeline::{DatasetIndexer, GeneratedDataset, GeneratedImage};

const PROGRESS_EVERY: usize = 128;

pub struct ImageTask {
    pub idx: usize,
    pub result_sender: oneshot::Sender<Result<GeneratedImage>>,
}

/// Round-robin pool of image generation workers.
pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ImageTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new<R, S>(indexer: Arc<DatasetIndexer<R, S>>, num_workers: usize) -> Self
    where
        R: Rasterizer + Send + Sync + 'static,
        S: TabularStore + Send + Sync + 'static,
    {
        let num_workers = num_workers.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ImageTask>();
        let mut workers = Vec::with_capacity(num_workers + 1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..num_workers)
            .map(|_| mpsc::unbounded_channel::<ImageTask>())
            .unzip();

        // Dispatcher
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    let _ = task
                        .result_sender
                        .send(Err(Error::Worker(format!("worker {worker_idx} has stopped"))));
                }
                worker_idx = (worker_idx + 1) % num_workers;
            }
        }));

        for (worker_id, mut worker_receiver) in worker_receivers.into_iter().enumerate() {
            let indexer = Arc::clone(&indexer);
            let cancelled = Arc::clone(&cancelled);
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let idx = task.idx;
                    if cancelled.load(Ordering::Acquire) {
                        let _ = task
                            .result_sender
                            .send(Err(Error::Worker(format!("image {idx} cancelled"))));
                        continue;
                    }
                    let job_indexer = Arc::clone(&indexer);
                    let result = tokio::task::spawn_blocking(move || job_indexer.generate_image(idx))
                        .await
                        .unwrap_or_else(|e| Err(Error::Worker(format!("image {idx} panicked: {e}"))));
                    debug!(worker_id, idx, "worker finished image");
                    let _ = task.result_sender.send(result);
                }
            }));
        }

        Self {
            task_sender,
            workers,
            cancelled,
        }
    }

    /// Queues image `idx`; the receiver resolves with its result.
    pub fn submit(&self, idx: usize) -> Result<oneshot::Receiver<Result<GeneratedImage>>> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(ImageTask { idx, result_sender })
            .map_err(|_| Error::Worker("failed to send task to worker pool".into()))?;
        Ok(result_receiver)
    }

    /// Skips every task a worker has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Closes the queue and waits for every worker to drain.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Restores index order over results that complete in any order.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: HashMap<usize, GeneratedImage>,
    next_expected: usize,
    ordered: Vec<GeneratedImage>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image: GeneratedImage) {
        self.pending.insert(image.record.idx, image);
        while let Some(next) = self.pending.remove(&self.next_expected) {
            self.ordered.push(next);
            self.next_expected += 1;
        }
    }

    /// Number of images released in order so far.
    pub fn released(&self) -> usize {
        self.ordered.len()
    }

    /// The ordered images, or an error if any index is still missing.
    pub fn finish(self) -> Result<Vec<GeneratedImage>> {
        if !self.pending.is_empty() {
            return Err(Error::Worker(format!(
                "image {} never completed ({} results held back)",
                self.next_expected,
                self.pending.len()
            )));
        }
        Ok(self.ordered)
    }
}

/// Generates a dataset over a worker pool; output matches `DatasetIndexer::run`.
pub struct ParallelIndexer<R: Rasterizer, S: TabularStore> {
    indexer: Arc<DatasetIndexer<R, S>>,
    num_workers: usize,
}

impl<R, S> ParallelIndexer<R, S>
where
    R: Rasterizer + Send + Sync + 'static,
    S: TabularStore + Send + Sync + 'static,
{
    pub fn new(indexer: DatasetIndexer<R, S>) -> Self {
        Self {
            indexer: Arc::new(indexer),
            num_workers: num_cpus::get(),
        }
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn indexer(&self) -> &DatasetIndexer<R, S> {
        &self.indexer
    }

    pub async fn run(&self) -> Result<GeneratedDataset> {
        let total = self.indexer.dataset_config().num_images;
        info!(
            key = %self.indexer.dataset_key(),
            images = total,
            workers = self.num_workers,
            "generating dataset in parallel"
        );

        let pool = WorkerPool::new(Arc::clone(&self.indexer), self.num_workers);
        let collected = self.collect(&pool, total).await;
        if let Err(e) = &collected {
            warn!("cancelling remaining images: {e}");
            pool.cancel();
        }
        pool.shutdown().await;

        let dataset = DatasetIndexer::<R, S>::assemble(collected?);
        self.indexer.persist(&dataset)?;
        info!(
            images = dataset.images.len(),
            boxes = dataset.boxes.len(),
            "dataset written"
        );
        Ok(dataset)
    }

    /// Submits every image and gathers the results in index order.
    async fn collect(&self, pool: &WorkerPool, total: usize) -> Result<Vec<GeneratedImage>> {
        let mut in_flight = FuturesUnordered::new();
        for idx in 0..total {
            let receiver = pool.submit(idx)?;
            in_flight.push(async move { (idx, receiver.await) });
        }

        let mut buffer = ReorderBuffer::new();
        while let Some((idx, received)) = in_flight.next().await {
            let image = received.map_err(|_| Error::Worker(format!("result of image {idx} was dropped")))??;
            buffer.insert(image);
            if buffer.released() > 0 && buffer.released() % PROGRESS_EVERY == 0 {
                info!("Generating: {}/{}", buffer.released(), total);
            }
        }
        buffer.finish()
    }
}
