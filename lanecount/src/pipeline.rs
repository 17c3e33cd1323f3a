//! # Counting pipeline
//!
//! Frames are read from a [`FrameSource`], thresholded, counted and accumulated one after another.
//! With `batch_size > 1` a batch of frames is thresholded and counted in parallel, but counts are
//! always accumulated in frame order.

use crate::prelude::v1::*;
use log::*;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag for stopping a run early.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The frame source ran out of frames.
    Exhausted,
    /// The run was cancelled through its [`CancelToken`].
    Cancelled,
}

/// Outcome of a counting run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of frames whose counts were accumulated.
    pub frames: usize,
    /// Number of checkpoint records written.
    pub checkpoints: usize,
    /// Number of failed checkpoint writes.
    pub failed_checkpoints: usize,
    /// Number of frames counted as 0 because their detector failed.
    pub suppressed_failures: usize,
    /// Number of trailing counts that never filled a checkpoint window.
    pub discarded: usize,
    pub stop: StopReason,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            frames: 0,
            checkpoints: 0,
            failed_checkpoints: 0,
            suppressed_failures: 0,
            discarded: 0,
            stop: StopReason::Exhausted,
        }
    }
}

/// Frame counting pipeline.
pub struct Pipeline {
    config: RunConfig,
    masker: MotionMasker,
    counter: Box<dyn Counter + Send + Sync>,
    accumulator: CountAccumulator,
    visualiser: Option<Box<dyn Visualiser>>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Create a new pipeline.
    ///
    /// # Arguments
    ///
    /// * `config` - run configuration. It is validated once the frame shape is known.
    /// * `counter` - per-frame counting strategy.
    /// * `sink` - storage for checkpoint records.
    pub fn new(
        config: RunConfig,
        counter: impl Counter + Send + Sync + 'static,
        sink: impl CheckpointSink + 'static,
    ) -> Self {
        Self::with_boxed(config, Box::new(counter), Box::new(sink))
    }

    pub fn with_boxed(
        config: RunConfig,
        counter: Box<dyn Counter + Send + Sync>,
        sink: Box<dyn CheckpointSink>,
    ) -> Self {
        Self {
            masker: MotionMasker::new(config.threshold),
            accumulator: CountAccumulator::with_boxed_sink(config.checkpoint.window, sink),
            config,
            counter,
            visualiser: None,
            cancel: CancelToken::new(),
        }
    }

    /// Attach a visualiser observing every processed frame.
    pub fn with_visualiser(mut self, visualiser: impl Visualiser + 'static) -> Self {
        self.visualiser = Some(Box::new(visualiser));
        self
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the pipeline until the source is exhausted or the run is cancelled.
    ///
    /// Configuration errors are returned before any frame is processed. Fatal errors (broken
    /// source, mismatched frame shape, propagated detector failures, and persistence failures if
    /// `abort_on_persistence_error` is set) end the run with `Err`. Cancellation is not an error;
    /// it is reported through [`RunSummary::stop`].
    ///
    /// Counts that did not complete a checkpoint window are never written.
    pub fn run(mut self, source: &mut dyn FrameSource) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let result = self.process(source, &mut summary);

        if let Some(visualiser) = &mut self.visualiser {
            visualiser.finish();
        }

        summary.stop = result?;

        let discarded = self.accumulator.finish();
        summary.discarded = discarded.len();

        if !discarded.is_empty() {
            debug!(
                "Dropping {} counts after frame {} that did not fill a window",
                discarded.len(),
                summary.frames.saturating_sub(discarded.len())
            );
        }

        info!(
            "Run stopped ({:?}) after {} frames, {} checkpoints written",
            summary.stop, summary.frames, summary.checkpoints
        );

        Ok(summary)
    }

    fn process(
        &mut self,
        source: &mut dyn FrameSource,
        summary: &mut RunSummary,
    ) -> Result<StopReason> {
        let mut shape = source.dims();

        if let Some(shape) = shape {
            self.config.validate(shape)?;
        }

        info!(
            "Counting {:?} with threshold {} and {}-frame checkpoints",
            self.config.mode, self.config.threshold, self.config.checkpoint.window
        );

        let batch_size = self.config.batch_size;
        let mut index = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            let mut batch = Vec::with_capacity(batch_size);
            let mut exhausted = false;

            while batch.len() < batch_size {
                let mut frame = Frame::default();

                if !source.read_frame(&mut frame)? {
                    exhausted = true;
                    break;
                }

                let expected = match shape {
                    Some(shape) => shape,
                    None => {
                        self.config.validate(frame.shape())?;
                        *shape.insert(frame.shape())
                    }
                };

                if frame.shape() != expected {
                    return Err(Error::ShapeMismatch {
                        index: index + batch.len(),
                        expected,
                        actual: frame.shape(),
                    });
                }

                batch.push(frame);
            }

            if batch.is_empty() {
                return Ok(StopReason::Exhausted);
            }

            let masker = self.masker;
            let counter = &*self.counter;
            let detect = |frame: &Frame| {
                let mask = masker.mask(frame);
                let detection = counter.detect(frame, &mask);
                (mask, detection)
            };

            let results = if batch.len() > 1 {
                batch.par_iter().map(detect).collect::<Vec<_>>()
            } else {
                batch.iter().map(detect).collect::<Vec<_>>()
            };

            for (frame, (mask, detection)) in batch.iter().zip(results) {
                let detection = match detection {
                    Ok(detection) => detection,
                    Err(e) => match self.config.on_detector_error {
                        FailurePolicy::Propagate => return Err(e),
                        FailurePolicy::Suppress => {
                            warn!("Frame {index} counted as 0 after detector failure: {e}");
                            summary.suppressed_failures += 1;
                            Detection::Count(0)
                        }
                    },
                };

                if let Some(visualiser) = &mut self.visualiser {
                    visualiser.on_frame(&FrameView {
                        index,
                        frame,
                        mask: &mask,
                        detection: &detection,
                    });
                }

                if self.cancel.is_cancelled() {
                    return Ok(StopReason::Cancelled);
                }

                match self.accumulator.push(index, detection.count()) {
                    Ok(Some(record)) => {
                        summary.checkpoints += 1;
                        debug!(
                            "Checkpoint of {} counts ending at frame {}",
                            record.count.len(),
                            record.index
                        );
                    }
                    Ok(None) => {}
                    Err(e @ Error::Persistence { .. }) => {
                        summary.failed_checkpoints += 1;
                        if self.config.abort_on_persistence_error {
                            return Err(e);
                        }
                        error!("{e}, counts are kept until the next window");
                    }
                    Err(e) => return Err(e),
                }

                summary.frames += 1;
                index += 1;
            }

            if exhausted {
                return Ok(StopReason::Exhausted);
            }
        }
    }
}
