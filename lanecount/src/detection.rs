//! # Per-frame detection
//!
//! Every way of turning a frame into an activity count implements [`Counter`]. The lane
//! discriminator and the blob counter are the built-in strategies; anything else (such as a
//! cascade classifier run on the raw video) plugs into the pipeline through the same trait and
//! reports [`Detection::Count`].

use crate::prelude::v1::*;

/// Generic per-frame activity counter.
pub trait Counter {
    /// Detect activity in a single frame.
    ///
    /// Counters are stateless across frames. The same frame and mask always produce the same
    /// detection, no matter which frames were seen before.
    ///
    /// # Arguments
    ///
    /// * `frame` - raw motion magnitude frame.
    /// * `mask` - `frame` thresholded with the run threshold.
    fn detect(&self, frame: &Frame, mask: &Mask) -> Result<Detection>;
}

/// Output of a single frame's detection.
#[derive(Clone, Debug)]
pub enum Detection {
    /// One report per configured lane band.
    Lanes(Vec<LaneReport>),
    Blobs(BlobReport),
    /// Bare count produced by an external strategy.
    Count(usize),
}

impl Detection {
    /// Get the frame count of this detection.
    pub fn count(&self) -> usize {
        match self {
            Self::Lanes(lanes) => lanes.iter().filter(|l| l.occupied).count(),
            Self::Blobs(report) => report.accepted.len(),
            Self::Count(n) => *n,
        }
    }
}

/// Occupancy analysis of a single lane band.
#[derive(Clone, Debug)]
pub struct LaneReport {
    pub band: LaneBand,
    /// Column sums of the band.
    pub projection: Vec<u32>,
    /// Zero-frequency centered power spectrum of `projection`.
    pub spectrum: Vec<f64>,
    /// Integrated spectrum index range.
    pub window: (usize, usize),
    /// Spectrum energy within `window`.
    pub energy: f64,
    pub occupied: bool,
}

/// Detected region of motion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub row: f64,
    pub col: f64,
    /// Backend specific size (diameter or scale).
    pub size: f64,
}

impl Blob {
    pub fn new(row: f64, col: f64, size: f64) -> Self {
        Self { row, col, size }
    }

    /// Check whether the blob center lies at least `margin` away from every edge.
    ///
    /// A blob is rejected if its row is below `margin` or above `height - margin`, and likewise
    /// for its column.
    pub fn is_interior(&self, (height, width): (usize, usize), margin: usize) -> bool {
        let margin = margin as f64;
        let (height, width) = (height as f64, width as f64);
        self.row >= margin
            && self.row <= height - margin
            && self.col >= margin
            && self.col <= width - margin
    }
}

/// Blob detection backend.
pub trait BlobDetector {
    /// Find all blobs in a mask, without any edge filtering.
    fn detect(&self, mask: &Mask) -> Result<Vec<Blob>>;
}

impl<T: BlobDetector + ?Sized> BlobDetector for Box<T> {
    fn detect(&self, mask: &Mask) -> Result<Vec<Blob>> {
        (**self).detect(mask)
    }
}

/// Blobs of a single frame, split by the edge filter.
#[derive(Clone, Debug, Default)]
pub struct BlobReport {
    /// Counted blobs.
    pub accepted: Vec<Blob>,
    /// Blobs too close to the frame edge.
    pub rejected: Vec<Blob>,
}

impl BlobReport {
    /// Split blobs into accepted and rejected by their distance to the frame edges.
    pub fn filter(
        blobs: impl IntoIterator<Item = Blob>,
        shape: (usize, usize),
        margin: usize,
    ) -> Self {
        let (accepted, rejected): (Vec<_>, Vec<_>) = blobs
            .into_iter()
            .partition(|b: &Blob| b.is_interior(shape, margin));
        Self { accepted, rejected }
    }

    /// Draw accepted blobs on top of the mask.
    ///
    /// Occupied pixels are drawn at half intensity, and each accepted blob is outlined at full
    /// intensity with a circle of its size.
    pub fn annotate(&self, mask: &Mask) -> Frame {
        let (height, width) = mask.shape();
        let mut out = Frame::new(height, width);

        for r in 0..height {
            for c in 0..width {
                if mask.get(r, c) {
                    out.set(r, c, 128);
                }
            }
        }

        for blob in &self.accepted {
            let radius = (blob.size * 0.5).max(1.0);
            let steps = (radius * 8.0).ceil() as usize;
            for i in 0..steps {
                let angle = i as f64 * std::f64::consts::TAU / steps as f64;
                let (r, c) = (
                    (blob.row + radius * angle.sin()).round(),
                    (blob.col + radius * angle.cos()).round(),
                );
                if r >= 0.0 && c >= 0.0 && (r as usize) < height && (c as usize) < width {
                    out.set(r as usize, c as usize, 255);
                }
            }
        }

        out
    }
}

/// Counts blobs that are not touching the frame edges.
pub struct BlobCounter<T> {
    detector: T,
    margin: usize,
}

impl<T: BlobDetector> BlobCounter<T> {
    /// Create a new blob counter.
    ///
    /// # Arguments
    ///
    /// * `detector` - blob detection backend.
    /// * `margin` - minimum distance of a counted blob's center to every frame edge.
    pub fn new(detector: T, margin: usize) -> Self {
        Self { detector, margin }
    }

    pub fn detector(&self) -> &T {
        &self.detector
    }

    /// Detect and edge filter blobs in a mask.
    pub fn blobs(&self, mask: &Mask) -> Result<BlobReport> {
        let blobs = self.detector.detect(mask)?;
        Ok(BlobReport::filter(blobs, mask.shape(), self.margin))
    }
}

impl<T: BlobDetector> Counter for BlobCounter<T> {
    fn detect(&self, _: &Frame, mask: &Mask) -> Result<Detection> {
        self.blobs(mask).map(Detection::Blobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBlobs(Vec<Blob>);

    impl BlobDetector for FixedBlobs {
        fn detect(&self, _: &Mask) -> Result<Vec<Blob>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn edge_blobs_are_rejected() {
        let shape = (40, 40);

        for col in 6..34 {
            let col = col as f64;
            assert!(!Blob::new(4.0, col, 3.0).is_interior(shape, 5));
            assert!(Blob::new(6.0, col, 3.0).is_interior(shape, 5));
            assert!(!Blob::new(col, 4.0, 3.0).is_interior(shape, 5));
            assert!(Blob::new(col, 6.0, 3.0).is_interior(shape, 5));
        }

        assert!(!Blob::new(35.5, 20.0, 3.0).is_interior(shape, 5));
        assert!(!Blob::new(20.0, 36.0, 3.0).is_interior(shape, 5));
    }

    #[test]
    fn counter_counts_interior_blobs() {
        let counter = BlobCounter::new(
            FixedBlobs(vec![
                Blob::new(4.0, 20.0, 2.0),
                Blob::new(6.0, 20.0, 2.0),
                Blob::new(20.0, 20.0, 2.0),
                Blob::new(20.0, 39.0, 2.0),
            ]),
            5,
        );

        let mask = Mask::new(40, 40);
        let frame = Frame::new(40, 40);
        let detection = counter.detect(&frame, &mask).unwrap();

        assert_eq!(detection.count(), 2);
        match detection {
            Detection::Blobs(report) => {
                assert_eq!(report.rejected.len(), 2);
                assert_eq!(report.accepted[0], Blob::new(6.0, 20.0, 2.0));
            }
            d => panic!("unexpected detection {d:?}"),
        }
    }

    #[test]
    fn lane_count_is_number_of_occupied_bands() {
        let report = |occupied| LaneReport {
            band: LaneBand::new(0, 1),
            projection: vec![],
            spectrum: vec![],
            window: (0, 0),
            energy: 0.0,
            occupied,
        };

        assert_eq!(Detection::Lanes(vec![]).count(), 0);
        assert_eq!(
            Detection::Lanes(vec![report(true), report(false), report(true)]).count(),
            2
        );
        assert_eq!(Detection::Count(7).count(), 7);
    }

    #[test]
    fn annotation_marks_mask_and_blobs() {
        let mut mask = Mask::new(20, 20);
        mask.set(10, 10, true);

        let report = BlobReport {
            accepted: vec![Blob::new(10.0, 10.0, 6.0)],
            rejected: vec![],
        };

        let frame = report.annotate(&mask);

        assert_eq!(frame.get(10, 10), 128);
        assert_eq!(frame.get(10, 13), 255);
        assert_eq!(frame.get(7, 10), 255);
        assert_eq!(frame.get(0, 0), 0);
    }
}
