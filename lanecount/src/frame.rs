//! # Motion magnitude frames and occupancy masks

use nalgebra::DMatrix;
use std::ops::Range;

/// Fixed size motion magnitude frame.
///
/// Samples are addressed by `(row, col)`, with row 0 at the top of the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: DMatrix<u8>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Frame {
    /// Create a new blank frame.
    ///
    /// # Arguments
    ///
    /// * `height` - number of rows.
    /// * `width` - number of columns.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            data: DMatrix::from_element(height, width, 0),
        }
    }

    /// Create a frame from samples in row-major order.
    ///
    /// # Panics
    ///
    /// If `samples.len() != height * width`.
    pub fn from_row_slice(height: usize, width: usize, samples: &[u8]) -> Self {
        Self {
            data: DMatrix::from_row_slice(height, width, samples),
        }
    }

    /// Get `(height, width)` of the frame.
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Get the sample at given position.
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[(row, col)]
    }

    /// Set the sample at given position.
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.data[(row, col)] = value;
    }

    /// Iterate every sample of the frame in row-major order.
    ///
    /// The resulting iterator yields `(row, col, sample)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, u8)> + '_ {
        let (height, width) = self.shape();
        (0..height).flat_map(move |r| (0..width).map(move |c| (r, c, self.data[(r, c)])))
    }

    /// Rotate the frame by 90 degrees counter-clockwise.
    ///
    /// Row `r` of the output is column `width - 1 - r` of the input, so a `h x w` frame becomes
    /// `w x h`.
    pub fn rotate_ccw(&self) -> Self {
        let (height, width) = self.shape();
        Self {
            data: DMatrix::from_fn(width, height, |r, c| self.data[(c, width - 1 - r)]),
        }
    }

    /// Access the underlying matrix.
    pub fn as_matrix(&self) -> &DMatrix<u8> {
        &self.data
    }
}

impl From<DMatrix<u8>> for Frame {
    fn from(data: DMatrix<u8>) -> Self {
        Self { data }
    }
}

/// Binary occupancy mask.
///
/// Same shape as the frame it was derived from. `true` marks pixels with motion above the run
/// threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    data: DMatrix<bool>,
}

impl Mask {
    /// Create an empty mask.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            data: DMatrix::from_element(height, width, false),
        }
    }

    /// Get `(height, width)` of the mask.
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.data[(row, col)] = value;
    }

    /// Number of occupied pixels.
    pub fn occupied(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Sum the given rows column-wise.
    ///
    /// The output has one entry per column, holding the number of occupied pixels of that column
    /// within `rows`.
    ///
    /// # Panics
    ///
    /// If `rows` extends past the bottom of the mask.
    pub fn project_rows(&self, rows: Range<usize>) -> Vec<u32> {
        let band = self.data.rows(rows.start, rows.len());
        band.column_iter()
            .map(|col| col.iter().filter(|&&v| v).count() as u32)
            .collect()
    }

    /// Convert into a floating point image, `1.0` for occupied pixels.
    pub fn to_image(&self) -> DMatrix<f32> {
        self.data.map(|v| if v { 1.0 } else { 0.0 })
    }
}

impl From<DMatrix<bool>> for Mask {
    fn from(data: DMatrix<bool>) -> Self {
        Self { data }
    }
}

/// Thresholds motion magnitude into occupancy masks.
#[derive(Clone, Copy, Debug)]
pub struct MotionMasker {
    threshold: f32,
}

impl MotionMasker {
    /// Create a new masker.
    ///
    /// # Arguments
    ///
    /// * `threshold` - magnitude a sample must strictly exceed to be marked occupied.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Threshold a frame into a mask.
    pub fn mask(&self, frame: &Frame) -> Mask {
        let threshold = self.threshold;
        Mask {
            data: frame.data.map(|v| v as f32 > threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn mask_matches_strict_threshold() {
        let mut rng = rand::thread_rng();
        let samples = (0..30 * 40).map(|_| rng.gen::<u8>()).collect::<Vec<_>>();
        let frame = Frame::from_row_slice(30, 40, &samples);

        for threshold in [0.0, 15.0, 127.5, 254.0, 255.0] {
            let mask = MotionMasker::new(threshold).mask(&frame);
            assert_eq!(mask.shape(), frame.shape());
            for (r, c, v) in frame.iter() {
                assert_eq!(mask.get(r, c), v as f32 > threshold, "{r} {c} {v} {threshold}");
            }
        }
    }

    #[test]
    fn sample_equal_to_threshold_is_unoccupied() {
        let mut frame = Frame::new(3, 3);
        frame.set(0, 0, 15);
        frame.set(1, 1, 16);

        let mask = MotionMasker::new(15.0).mask(&frame);

        assert!(!mask.get(0, 0));
        assert!(mask.get(1, 1));
        assert_eq!(mask.occupied(), 1);
    }

    #[test]
    fn row_slice_is_row_major() {
        let frame = Frame::from_row_slice(2, 3, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.get(0, 2), 3);
        assert_eq!(frame.get(1, 0), 4);
    }

    #[test]
    fn rotation_is_counter_clockwise() {
        // 1 2 3      3 6
        // 4 5 6  ->  2 5
        //            1 4
        let frame = Frame::from_row_slice(2, 3, &[1, 2, 3, 4, 5, 6]);
        let rotated = frame.rotate_ccw();

        assert_eq!(rotated.shape(), (3, 2));
        assert_eq!(rotated, Frame::from_row_slice(3, 2, &[3, 6, 2, 5, 1, 4]));
    }

    #[test]
    fn projection_sums_band_columns() {
        let mut mask = Mask::new(6, 4);
        mask.set(1, 0, true);
        mask.set(2, 0, true);
        mask.set(2, 3, true);
        mask.set(5, 3, true);

        assert_eq!(mask.project_rows(1..3), vec![2, 0, 0, 1]);
        assert_eq!(mask.project_rows(3..6), vec![0, 0, 0, 1]);
        assert_eq!(mask.project_rows(0..0), vec![0, 0, 0, 0]);
    }
}
