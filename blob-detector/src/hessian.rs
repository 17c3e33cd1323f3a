//! Determinant of Hessian scale-space blob detection.
//!
//! The mask is smoothed with Gaussian derivative kernels at a set of linearly spaced scales. At
//! each scale the Hessian determinant is multiplied by `sigma^4` so that responses are comparable
//! across scales. Blobs are the points that are maximal within their 3x3x3 neighbourhood in
//! (row, col, scale) space and exceed the response threshold.

use lanecount::prelude::v1::*;
use log::*;
use nalgebra as na;
use rayon::prelude::*;
use std::f64::consts::{PI, SQRT_2};

type Image = na::DMatrix<f32>;

#[derive(Clone, Debug, Default)]
pub struct HessianBlobs {
    config: HessianConfig,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    row: usize,
    col: usize,
    sigma: f64,
    response: f32,
}

impl Candidate {
    fn radius(&self) -> f64 {
        self.sigma * SQRT_2
    }
}

impl HessianBlobs {
    pub fn new(config: HessianConfig) -> Self {
        Self { config }
    }

    /// Scales the detector evaluates.
    pub fn sigmas(&self) -> Vec<f64> {
        let HessianConfig {
            min_sigma,
            max_sigma,
            num_sigma,
            ..
        } = self.config;

        match num_sigma {
            0 => vec![],
            1 => vec![min_sigma],
            n => (0..n)
                .map(|i| min_sigma + (max_sigma - min_sigma) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    }

    /// Compute the scale-normalised Hessian determinant of an image at the given scale.
    pub fn response(image: &Image, sigma: f64) -> Image {
        let (g, d1, d2) = gaussian_kernels(sigma);

        let lxx = convolve(image, &g, &d2);
        let lyy = convolve(image, &d2, &g);
        let lxy = convolve(image, &d1, &d1);

        let norm = sigma.powi(4) as f32;

        lxx.zip_zip_map(&lyy, &lxy, |xx, yy, xy| norm * (xx * yy - xy * xy))
    }

    fn candidates(&self, responses: &[Image], sigmas: &[f64]) -> Vec<Candidate> {
        let threshold = self.config.threshold as f32;
        let mut out = vec![];

        for (s, layer) in responses.iter().enumerate() {
            let (height, width) = layer.shape();

            for row in 0..height {
                for col in 0..width {
                    let response = layer[(row, col)];

                    if response <= threshold {
                        continue;
                    }

                    let rows = row.saturating_sub(1)..(row + 2).min(height);
                    let cols = col.saturating_sub(1)..(col + 2).min(width);

                    let is_max = (s.saturating_sub(1)..(s + 2).min(responses.len())).all(|s| {
                        rows.clone().all(|r| {
                            cols.clone().all(|c| responses[s][(r, c)] <= response)
                        })
                    });

                    if is_max {
                        out.push(Candidate {
                            row,
                            col,
                            sigma: sigmas[s],
                            response,
                        });
                    }
                }
            }
        }

        out
    }

    /// Drop candidates that overlap a stronger one by more than the configured fraction.
    fn prune(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_by(|a, b| b.response.total_cmp(&a.response));

        let mut kept: Vec<Candidate> = vec![];

        for c in candidates {
            if kept.iter().all(|k| overlap(k, &c) <= self.config.overlap) {
                kept.push(c);
            }
        }

        kept
    }
}

impl BlobDetector for HessianBlobs {
    fn detect(&self, mask: &Mask) -> Result<Vec<Blob>> {
        let image = mask.to_image();
        let sigmas = self.sigmas();

        let responses = sigmas
            .par_iter()
            .map(|&sigma| Self::response(&image, sigma))
            .collect::<Vec<_>>();

        let candidates = self.candidates(&responses, &sigmas);
        let total = candidates.len();
        let blobs = self.prune(candidates);

        trace!("{} of {} Hessian maxima survived pruning", blobs.len(), total);

        Ok(blobs
            .into_iter()
            .map(|c| Blob::new(c.row as f64, c.col as f64, c.sigma))
            .collect())
    }
}

/// Sampled Gaussian together with its first and second derivatives.
fn gaussian_kernels(sigma: f64) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let s2 = sigma * sigma;

    let g = (-radius..=radius)
        .map(|k| {
            let k = k as f64;
            (k, (-k * k / (2.0 * s2)).exp() / ((2.0 * PI).sqrt() * sigma))
        })
        .collect::<Vec<_>>();

    let d1 = g.iter().map(|&(k, v)| (-k / s2 * v) as f32).collect();
    let d2 = g
        .iter()
        .map(|&(k, v)| ((k * k / (s2 * s2) - 1.0 / s2) * v) as f32)
        .collect();

    (g.into_iter().map(|(_, v)| v as f32).collect(), d1, d2)
}

/// Separably convolve an image with `ky` along rows and `kx` along columns.
///
/// Pixels outside the image take the value of the nearest edge pixel.
fn convolve(image: &Image, ky: &[f32], kx: &[f32]) -> Image {
    let (height, width) = image.shape();

    let tap = |len: usize, pos: usize, i: usize, radius: usize| {
        (pos as isize + i as isize - radius as isize).clamp(0, len as isize - 1) as usize
    };

    let rx = kx.len() / 2;
    let tmp = Image::from_fn(height, width, |r, c| {
        kx.iter()
            .enumerate()
            .map(|(i, k)| k * image[(r, tap(width, c, i, rx))])
            .sum()
    });

    let ry = ky.len() / 2;
    Image::from_fn(height, width, |r, c| {
        ky.iter()
            .enumerate()
            .map(|(i, k)| k * tmp[(tap(height, r, i, ry), c)])
            .sum()
    })
}

/// Fraction of the smaller blob's area covered by the other one.
fn overlap(a: &Candidate, b: &Candidate) -> f64 {
    let (r1, r2) = (a.radius(), b.radius());
    let (dr, dc) = (
        a.row as f64 - b.row as f64,
        a.col as f64 - b.col as f64,
    );
    let d = (dr * dr + dc * dc).sqrt();
    let small = r1.min(r2);

    if d >= r1 + r2 {
        return 0.0;
    }

    if d <= (r1 - r2).abs() {
        return 1.0;
    }

    let acos = |v: f64| v.clamp(-1.0, 1.0).acos();

    let area = r1 * r1 * acos((d * d + r1 * r1 - r2 * r2) / (2.0 * d * r1))
        + r2 * r2 * acos((d * d + r2 * r2 - r1 * r1) / (2.0 * d * r2))
        - 0.5 * ((-d + r1 + r2) * (d + r1 - r2) * (d - r1 + r2) * (d + r1 + r2)).sqrt();

    area / (PI * small * small)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::draw_disc;
    use assert_approx_eq::assert_approx_eq;

    fn candidate(row: usize, col: usize, sigma: f64, response: f32) -> Candidate {
        Candidate {
            row,
            col,
            sigma,
            response,
        }
    }

    #[test]
    fn sigmas_are_linearly_spaced() {
        let detector = HessianBlobs::default();
        assert_eq!(detector.sigmas(), vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        let single = HessianBlobs::new(HessianConfig {
            num_sigma: 1,
            ..Default::default()
        });
        assert_eq!(single.sigmas(), vec![2.0]);
    }

    #[test]
    fn kernels_are_normalised() {
        let (g, d1, d2) = gaussian_kernels(2.0);

        assert_eq!(g.len(), 13);
        assert_approx_eq!(g.iter().sum::<f32>(), 1.0, 5e-3);
        assert_approx_eq!(d1.iter().sum::<f32>(), 0.0, 1e-6);
        assert_approx_eq!(d2.iter().sum::<f32>(), 0.0, 1e-2);
    }

    #[test]
    fn disc_response_peaks_at_center() {
        let mut mask = Mask::new(40, 40);
        draw_disc(&mut mask, 20, 20, 4);

        let response = HessianBlobs::response(&mask.to_image(), 3.0);
        let (max_at, max) = response
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();

        // Column major storage.
        assert_eq!((max_at % 40, max_at / 40), (20, 20));
        assert!(*max > 0.1 && *max < 0.2, "{max}");
    }

    #[test]
    fn single_pixel_is_below_threshold() {
        let mut mask = Mask::new(40, 40);
        mask.set(10, 10, true);

        assert!(HessianBlobs::default().detect(&mask).unwrap().is_empty());
    }

    #[test]
    fn overlap_fractions() {
        let a = candidate(10, 10, 2.0, 1.0);

        assert_approx_eq!(overlap(&a, &candidate(10, 10, 2.0, 0.5)), 1.0);
        assert_approx_eq!(overlap(&a, &candidate(10, 30, 2.0, 0.5)), 0.0);

        let partial = overlap(&a, &candidate(10, 12, 2.0, 0.5));
        assert!(partial > 0.0 && partial < 1.0, "{partial}");
    }

    #[test]
    fn pruning_keeps_stronger_response() {
        let detector = HessianBlobs::default();
        let kept = detector.prune(vec![
            candidate(10, 10, 3.0, 0.2),
            candidate(10, 11, 3.0, 0.4),
            candidate(30, 30, 3.0, 0.1),
        ]);

        assert_eq!(kept.len(), 2);
        assert_eq!((kept[0].row, kept[0].col), (10, 11));
        assert_eq!((kept[1].row, kept[1].col), (30, 30));
    }

    #[test]
    fn size_is_best_scale() {
        let mut mask = Mask::new(40, 40);
        draw_disc(&mut mask, 20, 20, 4);

        let blobs = HessianBlobs::default().detect(&mask).unwrap();

        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0], Blob::new(20.0, 20.0, 3.0));
    }
}
