//! # Blob detection backends
//!
//! Both backends implement [`BlobDetector`] and report raw blobs. Edge filtering and counting is
//! done by [`BlobCounter`], so the same fixtures validate either backend.

use lanecount::prelude::v1::*;

pub mod components;
pub mod hessian;

pub use components::ConnectedComponents;
pub use hessian::HessianBlobs;

/// Create the blob detector selected by the configuration.
pub fn create_detector(config: &BlobConfig) -> Box<dyn BlobDetector + Send + Sync> {
    match config.backend {
        BlobBackend::Components => Box::new(ConnectedComponents::new(config.components.clone())),
        BlobBackend::Hessian => Box::new(HessianBlobs::new(config.hessian.clone())),
    }
}

/// Create an edge filtering blob counter with the configured backend.
pub fn create_counter(config: &BlobConfig) -> BlobCounter<Box<dyn BlobDetector + Send + Sync>> {
    BlobCounter::new(create_detector(config), config.margin)
}
