//! # Run configuration
//!
//! Every parameter of a counting run lives here. The configuration is built once at startup
//! (defaults, then an optional JSON file, then command line overrides), validated against the frame
//! shape, and handed to each component by value. Nothing mutates it while frames are processed.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

/// Half-open range of mask rows modelling one lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneBand {
    pub start: usize,
    pub end: usize,
}

impl LaneBand {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Fractional index range of the centered power spectrum that gets integrated.
///
/// For a spectrum of length `L` the window is `[floor(L * start / divisor), floor(L * end /
/// divisor))`. The product is taken before the division so integer fractions stay exact.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassWindow {
    pub start: f64,
    pub end: f64,
    pub divisor: f64,
}

impl Default for LowPassWindow {
    fn default() -> Self {
        Self {
            start: 4.0,
            end: 5.2,
            divisor: 9.0,
        }
    }
}

impl LowPassWindow {
    /// Compute window bounds for a spectrum of length `len`.
    ///
    /// The bounds are clamped to the spectrum. If they collide the window is empty.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let l = len as f64;
        let start = (l * self.start / self.divisor).floor().max(0.0) as usize;
        let end = ((l * self.end / self.divisor).floor().max(0.0) as usize).min(len);
        (start.min(end), end)
    }
}

/// Spatial frequency lane discriminator parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub bands: Vec<LaneBand>,
    pub window: LowPassWindow,
    /// Lowest integrated energy that counts as occupied.
    pub min_energy: f64,
    /// Highest integrated energy that counts as occupied. `None` is unbounded.
    pub max_energy: Option<f64>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            bands: vec![LaneBand::new(25, 27), LaneBand::new(35, 40)],
            window: Default::default(),
            min_energy: 500.0,
            max_energy: None,
        }
    }
}

impl LaneConfig {
    /// Whether an integrated energy value counts as occupancy.
    pub fn accepts(&self, energy: f64) -> bool {
        energy >= self.min_energy && self.max_energy.map(|max| energy <= max).unwrap_or(true)
    }
}

/// Connected component blob backend parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentsConfig {
    /// Blobs with centers closer than this are merged into the largest one.
    pub min_distance: f64,
    pub min_area: usize,
    /// `None` is unbounded.
    pub max_area: Option<usize>,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            min_distance: 10.0,
            min_area: 4,
            max_area: None,
        }
    }
}

/// Determinant of Hessian blob backend parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HessianConfig {
    pub min_sigma: f64,
    pub max_sigma: f64,
    /// Number of linearly spaced scales between `min_sigma` and `max_sigma`.
    pub num_sigma: usize,
    /// Lowest scale-normalised response of a blob.
    pub threshold: f64,
    /// Blobs overlapping by more than this fraction are pruned, keeping the stronger one.
    pub overlap: f64,
}

impl Default for HessianConfig {
    fn default() -> Self {
        Self {
            min_sigma: 2.0,
            max_sigma: 8.0,
            num_sigma: 7,
            threshold: 0.01,
            overlap: 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Components,
    Hessian,
}

impl FromStr for BlobBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "components" => Ok(Self::Components),
            "hessian" => Ok(Self::Hessian),
            _ => Err(Error::config(format!("unknown blob backend `{s}`"))),
        }
    }
}

/// Blob counting parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub backend: BlobBackend,
    /// Blobs with centers closer than this to any frame edge are not counted.
    pub margin: usize,
    pub components: ComponentsConfig,
    pub hessian: HessianConfig,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Components,
            margin: 5,
            components: Default::default(),
            hessian: Default::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Number of frames per checkpoint record.
    pub window: usize,
    /// Filename prefix of checkpoint records.
    pub stem: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            window: 500,
            stem: "count".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    Lanes,
    Blobs,
}

impl FromStr for DetectorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lanes" => Ok(Self::Lanes),
            "blobs" => Ok(Self::Blobs),
            _ => Err(Error::config(format!("unknown detector mode `{s}`"))),
        }
    }
}

/// What to do when a single frame's detector fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Count the frame as 0, log it and record it in the run summary.
    Suppress,
    /// Abort the run with the detector's error.
    Propagate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Motion magnitude a sample must strictly exceed to be occupied.
    pub threshold: f32,
    pub mode: DetectorMode,
    pub lanes: LaneConfig,
    pub blobs: BlobConfig,
    pub checkpoint: CheckpointConfig,
    pub on_detector_error: FailurePolicy,
    pub abort_on_persistence_error: bool,
    /// Frames detected in parallel before their counts are accumulated in order.
    pub batch_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threshold: 15.0,
            mode: DetectorMode::Lanes,
            lanes: Default::default(),
            blobs: Default::default(),
            checkpoint: Default::default(),
            on_detector_error: FailurePolicy::Suppress,
            abort_on_persistence_error: false,
            batch_size: 1,
        }
    }
}

impl RunConfig {
    /// Load a configuration from a JSON file.
    ///
    /// Sections and fields missing from the file keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Check the configuration against the frame shape of the run.
    ///
    /// # Arguments
    ///
    /// * `shape` - `(height, width)` of every frame in the run.
    pub fn validate(&self, (height, width): (usize, usize)) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(Error::config(format!(
                "threshold must be a non-negative number, got {}",
                self.threshold
            )));
        }

        if height == 0 || width == 0 {
            return Err(Error::config(format!(
                "frames must not be empty, got {height}x{width}"
            )));
        }

        if self.checkpoint.window == 0 {
            return Err(Error::config("checkpoint window must be at least 1 frame"));
        }

        if self.batch_size == 0 {
            return Err(Error::config("batch size must be at least 1"));
        }

        match self.mode {
            DetectorMode::Lanes => self.validate_lanes(height),
            DetectorMode::Blobs => self.validate_blobs(),
        }
    }

    fn validate_lanes(&self, height: usize) -> Result<()> {
        let lanes = &self.lanes;

        if lanes.bands.is_empty() {
            return Err(Error::config("at least one lane band is required"));
        }

        for band in &lanes.bands {
            if band.start >= band.end || band.end > height {
                return Err(Error::config(format!(
                    "lane band {}..{} is not a non-empty range within 0..{height}",
                    band.start, band.end
                )));
            }
        }

        let window = &lanes.window;
        if !(window.start >= 0.0 && window.end >= window.start && window.divisor > 0.0) {
            return Err(Error::config(format!(
                "low-pass window {}/{}..{}/{} is not an ordered non-negative range",
                window.start, window.divisor, window.end, window.divisor
            )));
        }

        if !lanes.min_energy.is_finite() {
            return Err(Error::config("minimum lane energy must be finite"));
        }

        if let Some(max) = lanes.max_energy {
            if max.is_nan() || max < lanes.min_energy {
                return Err(Error::config(format!(
                    "maximum lane energy {max} is below the minimum {}",
                    lanes.min_energy
                )));
            }
        }

        Ok(())
    }

    fn validate_blobs(&self) -> Result<()> {
        let blobs = &self.blobs;

        match blobs.backend {
            BlobBackend::Components => {
                let c = &blobs.components;
                if !(c.min_distance >= 0.0) {
                    return Err(Error::config("blob distance must be non-negative"));
                }
                if matches!(c.max_area, Some(max) if max < c.min_area) {
                    return Err(Error::config("maximum blob area is below the minimum"));
                }
            }
            BlobBackend::Hessian => {
                let h = &blobs.hessian;
                if !(h.min_sigma > 0.0 && h.max_sigma >= h.min_sigma) || h.num_sigma == 0 {
                    return Err(Error::config(format!(
                        "sigma range {}..{} in {} steps is invalid",
                        h.min_sigma, h.max_sigma, h.num_sigma
                    )));
                }
                if !(0.0..=1.0).contains(&h.overlap) {
                    return Err(Error::config("blob overlap must be within 0..=1"));
                }
                if !h.threshold.is_finite() {
                    return Err(Error::config("blob threshold must be finite"));
                }
            }
        }

        Ok(())
    }
}
