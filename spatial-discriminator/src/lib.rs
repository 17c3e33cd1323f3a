//! # Spatial frequency lane discriminator
//!
//! Each lane band of a mask is collapsed into a 1-D column-sum projection. Broad, slowly varying
//! motion (camera shake, lighting changes) and pixel noise spread their energy across the power
//! spectrum of that projection, while a vehicle occupying the lane concentrates it in a narrow band
//! of spatial frequencies. The discriminator integrates the centered power spectrum over a fixed
//! fractional window and declares the lane occupied when the integrated energy lies within the
//! configured bounds.
//!
//! Every frame is transformed from scratch. Only FFT plans are cached between frames.

use lanecount::prelude::v1::*;
use log::*;
use realfft::RealFftPlanner;
use std::cell::RefCell;

thread_local! {
    static FFT_PLANNER: RefCell<RealFftPlanner<f64>> = RefCell::new(RealFftPlanner::new());
}

/// Compute the zero-frequency centered power spectrum of a real signal.
///
/// The output has the same length `L` as the input. Index `L / 2` holds the zero frequency,
/// negative frequencies come before it and positive ones after it.
pub fn power_spectrum(signal: &[f64]) -> Result<Vec<f64>> {
    let len = signal.len();

    if len == 0 {
        return Err(Error::detection("cannot transform an empty projection"));
    }

    let fft = FFT_PLANNER.with(|p| p.borrow_mut().plan_fft_forward(len));

    let mut input = signal.to_vec();
    let mut output = fft.make_output_vec();

    fft.process(&mut input, &mut output)
        .map_err(|e| Error::detection(format!("FFT of {len} samples failed: {e}")))?;

    // Only non-negative frequencies are computed. The magnitudes of the rest mirror them.
    let half = len / 2;
    let shift = len - half;

    Ok((0..len)
        .map(|i| {
            let k = (i + shift) % len;
            let k = if k < output.len() { k } else { len - k };
            output[k].norm_sqr()
        })
        .collect())
}

/// Sum spectrum values within `[start, end)`.
///
/// An empty or out of range window sums to 0.
pub fn band_energy(spectrum: &[f64], (start, end): (usize, usize)) -> f64 {
    spectrum
        .get(start..end)
        .map(|s| s.iter().sum())
        .unwrap_or(0.0)
}

/// Spectral occupancy test result of a single signal.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub spectrum: Vec<f64>,
    pub window: (usize, usize),
    pub energy: f64,
    pub occupied: bool,
}

/// Lane occupancy counter.
///
/// The frame count is the number of configured lane bands declared occupied.
#[derive(Clone, Debug, Default)]
pub struct SpatialDiscriminator {
    config: LaneConfig,
}

impl SpatialDiscriminator {
    pub fn new(config: LaneConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LaneConfig {
        &self.config
    }

    /// Run the occupancy test on an arbitrary projection.
    pub fn evaluate(&self, signal: &[f64]) -> Result<Evaluation> {
        let spectrum = power_spectrum(signal)?;
        let window = self.config.window.bounds(spectrum.len());
        let energy = band_energy(&spectrum, window);

        if !energy.is_finite() {
            return Err(Error::detection(format!(
                "spectrum energy is not finite ({energy})"
            )));
        }

        Ok(Evaluation {
            occupied: self.config.accepts(energy),
            spectrum,
            window,
            energy,
        })
    }

    /// Analyse a single lane band of a mask.
    pub fn analyse(&self, mask: &Mask, band: LaneBand) -> Result<LaneReport> {
        if band.start >= band.end || band.end > mask.height() {
            return Err(Error::detection(format!(
                "lane band {}..{} does not fit a mask of {} rows",
                band.start,
                band.end,
                mask.height()
            )));
        }

        let projection = mask.project_rows(band.rows());
        let signal = projection.iter().map(|&v| v as f64).collect::<Vec<_>>();

        let Evaluation {
            spectrum,
            window,
            energy,
            occupied,
        } = self.evaluate(&signal)?;

        trace!(
            "Band {}..{}: energy {energy:.1} in {}..{}",
            band.start,
            band.end,
            window.0,
            window.1
        );

        Ok(LaneReport {
            band,
            projection,
            spectrum,
            window,
            energy,
            occupied,
        })
    }
}

impl Counter for SpatialDiscriminator {
    fn detect(&self, _: &Frame, mask: &Mask) -> Result<Detection> {
        self.config
            .bands
            .iter()
            .map(|&band| self.analyse(mask, band))
            .collect::<Result<Vec<_>>>()
            .map(Detection::Lanes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::TAU;

    fn cosine(len: usize, cycles: usize, amplitude: f64) -> Vec<f64> {
        (0..len)
            .map(|i| amplitude * (TAU * (cycles * i) as f64 / len as f64).cos())
            .collect()
    }

    #[test]
    fn zero_projection_is_unoccupied() {
        let discriminator = SpatialDiscriminator::default();
        let eval = discriminator.evaluate(&[0.0; 64]).unwrap();

        assert!(eval.spectrum.iter().all(|&v| v == 0.0));
        assert_eq!(eval.energy, 0.0);
        assert!(!eval.occupied);

        // Only a zero minimum accepts silence.
        let discriminator = SpatialDiscriminator::new(LaneConfig {
            min_energy: 0.0,
            ..Default::default()
        });
        assert!(discriminator.evaluate(&[0.0; 64]).unwrap().occupied);
    }

    #[test]
    fn zero_frequency_is_centered() {
        for len in [8, 9] {
            let spectrum = power_spectrum(&vec![1.0; len]).unwrap();
            let dc = len / 2;

            assert_approx_eq!(spectrum[dc], (len * len) as f64, 1e-6);
            for (i, v) in spectrum.iter().enumerate().filter(|&(i, _)| i != dc) {
                assert!(v.abs() < 1e-9, "len {len} bin {i}: {v}");
            }
        }
    }

    #[test]
    fn sinusoid_peaks_symmetrically_around_center() {
        let spectrum = power_spectrum(&cosine(90, 3, 1.0)).unwrap();

        // |X[k]| = A * L / 2 for a real cosine.
        assert_approx_eq!(spectrum[45 - 3], 2025.0, 1e-6);
        assert_approx_eq!(spectrum[45 + 3], 2025.0, 1e-6);
        assert!(spectrum[45].abs() < 1e-6);

        // Parseval: sum |X|^2 = L * sum x^2
        let signal = cosine(91, 7, 2.5);
        let spectrum = power_spectrum(&signal).unwrap();
        let time_energy = signal.iter().map(|x| x * x).sum::<f64>() * signal.len() as f64;
        assert_approx_eq!(spectrum.iter().sum::<f64>(), time_energy, 1e-6);
    }

    #[test]
    fn sinusoid_inside_window_is_occupied() {
        let discriminator = SpatialDiscriminator::default();

        // L = 90 integrates bins 40..52, zero frequency at 45.
        let inside = discriminator.evaluate(&cosine(90, 3, 1.0)).unwrap();
        assert_eq!(inside.window, (40, 52));
        assert_approx_eq!(inside.energy, 4050.0, 1e-6);
        assert!(inside.occupied);

        let outside = discriminator.evaluate(&cosine(90, 20, 1.0)).unwrap();
        assert!(outside.energy < 1e-6);
        assert!(!outside.occupied);
    }

    #[test]
    fn energy_above_maximum_is_unoccupied() {
        let discriminator = SpatialDiscriminator::new(LaneConfig {
            max_energy: Some(1000.0),
            ..Default::default()
        });

        // Window energy scales with the squared amplitude: 4050, 1012.5 and 648.
        assert!(!discriminator.evaluate(&cosine(90, 3, 1.0)).unwrap().occupied);
        assert!(!discriminator.evaluate(&cosine(90, 3, 0.5)).unwrap().occupied);
        assert!(discriminator.evaluate(&cosine(90, 3, 0.4)).unwrap().occupied);
    }

    #[test]
    fn energy_equal_to_maximum_is_occupied() {
        let signal = cosine(90, 3, 0.5);
        let energy = SpatialDiscriminator::default()
            .evaluate(&signal)
            .unwrap()
            .energy;

        let discriminator = SpatialDiscriminator::new(LaneConfig {
            min_energy: 0.0,
            max_energy: Some(energy),
            ..Default::default()
        });

        assert!(discriminator.evaluate(&signal).unwrap().occupied);
    }

    #[test]
    fn colliding_window_bounds_sum_to_zero() {
        let discriminator = SpatialDiscriminator::default();
        let eval = discriminator.evaluate(&[100.0]).unwrap();

        assert_eq!(eval.window, (0, 0));
        assert_eq!(eval.energy, 0.0);
        assert!(!eval.occupied);
    }

    #[test]
    fn empty_projection_fails() {
        let discriminator = SpatialDiscriminator::default();
        let mask = Mask::new(48, 0);

        assert!(matches!(
            discriminator.detect(&Frame::new(48, 0), &mask),
            Err(Error::Detection(_))
        ));
    }

    #[test]
    fn counts_occupied_lanes() {
        let discriminator = SpatialDiscriminator::default();
        let mut frame = Frame::new(48, 64);

        // Fill the first default lane (rows 25..27) completely.
        for r in 25..27 {
            for c in 0..64 {
                frame.set(r, c, 40);
            }
        }

        let mask = MotionMasker::new(15.0).mask(&frame);
        let detection = discriminator.detect(&frame, &mask).unwrap();

        assert_eq!(detection.count(), 1);
        match detection {
            Detection::Lanes(lanes) => {
                assert_eq!(lanes.len(), 2);
                assert_eq!(lanes[0].projection, vec![2; 64]);
                assert_approx_eq!(lanes[0].energy, (2.0 * 64.0f64).powi(2), 1e-6);
                assert!(lanes[0].occupied);
                assert_eq!(lanes[1].energy, 0.0);
                assert!(!lanes[1].occupied);
            }
            d => panic!("unexpected detection {d:?}"),
        }
    }

    #[test]
    fn blank_run_checkpoints_zeros() {
        let mut config = RunConfig::default();
        config.checkpoint.window = 50;

        let sink = MemorySink::new();
        let discriminator = SpatialDiscriminator::new(config.lanes.clone());
        let mut source = VecSource::new((0..100).map(|_| Frame::new(48, 64)));

        let summary = Pipeline::new(config, discriminator, sink.clone())
            .run(&mut source)
            .unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.count == vec![0; 50]));
        assert_eq!(records[0].index, 49);
        assert_eq!(records[1].index, 99);
        assert_eq!(summary.frames, 100);
        assert_eq!(summary.suppressed_failures, 0);
    }
}
