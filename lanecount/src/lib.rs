//! # Lane Occupancy and Blob Counting Library
//!
//! This library provides a framework for turning a stream of motion magnitude frames into one
//! activity count per frame. Frames are thresholded into masks, passed to a [`Counter`]
//! (lane occupancy discriminator, blob counter, or any external strategy) and the resulting counts
//! are checkpointed to durable storage every fixed number of frames.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use lanecount::prelude::v1::*;
//! ```
//!
//! [`Counter`]: crate::detection::Counter

pub mod checkpoint;
pub mod config;
pub mod detection;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod source;
pub mod utils;
pub mod visualiser;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            checkpoint::{
                CheckpointRecord, CheckpointSink, CountAccumulator, DirectorySink, MemorySink,
                NullSink,
            },
            config::*,
            detection::{Blob, BlobCounter, BlobDetector, BlobReport, Counter, Detection, LaneReport},
            error::{Error, Result},
            frame::{Frame, Mask, MotionMasker},
            pipeline::{CancelToken, Pipeline, RunSummary, StopReason},
            source::{FrameSource, VecSource},
            visualiser::{FrameView, Visualiser},
        };
        pub use anyhow::anyhow;
    }
}
