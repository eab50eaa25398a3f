//! Batched, order-preserving parallel frame processing.
//!
//! Frames are pulled from the source until a batch is full, the batch is
//! fanned out over a rayon thread pool, and results are handed to the sink in
//! source order before the next batch is read. Batches never overlap, so at
//! most one batch of frames (inputs plus outputs) is resident at a time.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default batch ceiling, in frames.
pub const DEFAULT_BATCH_SIZE: usize = 300;

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Total frames handed to the sink.
    pub frames: usize,
    /// Size of every flushed batch, in flush order.
    pub batches: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct FramePipeline {
    pool: Arc<ThreadPool>,
    workers: usize,
    batch_size: usize,
}

impl FramePipeline {
    /// Builds the worker pool once. `workers` and `batch_size` are clamped to at least 1.
    pub fn new(workers: usize, batch_size: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("reface-worker-{i}"))
            .build()?;

        Ok(Self {
            pool: Arc::new(pool),
            workers,
            batch_size: batch_size.max(1),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Stream `source` through `work` into `sink`, batch by batch.
    ///
    /// The sink sees results in source order. The first error from the source,
    /// a work unit, or the sink aborts the run; results of a failed batch are
    /// never handed to the sink.
    pub fn run<I, T, R, E, F, S>(&self, source: I, work: F, mut sink: S) -> Result<PipelineReport, E>
    where
        I: IntoIterator<Item = Result<T, E>>,
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
        S: FnMut(R) -> Result<(), E>,
    {
        let started = Instant::now();
        let mut report = PipelineReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        for item in source {
            batch.push(item?);
            if batch.len() == self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.flush(full, &work, &mut sink, &mut report)?;
            }
        }
        if !batch.is_empty() {
            self.flush(batch, &work, &mut sink, &mut report)?;
        }

        tracing::info!(
            frames = report.frames,
            batches = report.batches.len(),
            workers = self.workers,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "frame pipeline finished"
        );

        Ok(report)
    }

    fn flush<T, R, E, F, S>(
        &self,
        batch: Vec<T>,
        work: &F,
        sink: &mut S,
        report: &mut PipelineReport,
    ) -> Result<(), E>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
        S: FnMut(R) -> Result<(), E>,
    {
        let started = Instant::now();
        let len = batch.len();

        let results = self.process_batch(batch, work)?;
        for result in results {
            sink(result)?;
        }

        report.frames += len;
        report.batches.push(len);
        tracing::debug!(
            batch = report.batches.len(),
            frames = len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch flushed"
        );
        Ok(())
    }

    /// Apply `work` to every item on the worker pool; results come back in input order.
    ///
    /// Each result is placed in the slot of its input index. After the first
    /// failure no further item is started, and the earliest failing index wins.
    pub fn process_batch<T, R, E, F>(&self, items: Vec<T>, work: &F) -> Result<Vec<R>, E>
    where
        T: Send,
        R: Send,
        E: Send,
        F: Fn(T) -> Result<R, E> + Sync,
    {
        let len = items.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let failed = AtomicBool::new(false);
        let done: Vec<(usize, Option<Result<R, E>>)> = self.pool.install(|| {
            items
                .into_par_iter()
                .enumerate()
                .map(|(index, item)| {
                    if failed.load(Ordering::Acquire) {
                        return (index, None);
                    }
                    let result = work(item);
                    if result.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    (index, Some(result))
                })
                .collect()
        });

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(len).collect();
        let mut first_error: Option<(usize, E)> = None;
        for (index, result) in done {
            match result {
                Some(Ok(value)) => slots[index] = Some(value),
                Some(Err(err)) => {
                    if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_error = Some((index, err));
                    }
                }
                None => {}
            }
        }

        if let Some((_, err)) = first_error {
            return Err(err);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
