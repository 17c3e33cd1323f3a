//! Connected component blob detection.

use lanecount::prelude::v1::*;
use std::f64::consts::PI;

/// Geometry based blob detector.
///
/// Every 8-connected region of occupied mask pixels is a blob candidate centered on the region
/// centroid, with the diameter of a circle of equal area as its size.
#[derive(Clone, Debug, Default)]
pub struct ConnectedComponents {
    config: ComponentsConfig,
}

/// Raw connected region statistics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    pub area: usize,
    pub row: f64,
    pub col: f64,
}

impl Region {
    pub fn diameter(&self) -> f64 {
        2.0 * (self.area as f64 / PI).sqrt()
    }
}

impl ConnectedComponents {
    pub fn new(config: ComponentsConfig) -> Self {
        Self { config }
    }

    /// Label all 8-connected regions of a mask.
    ///
    /// Regions are returned in the order of their first pixel in row-major order.
    pub fn regions(mask: &Mask) -> Vec<Region> {
        let (height, width) = mask.shape();
        let mut visited = vec![vec![false; width]; height];
        let mut regions = vec![];

        for y in 0..height {
            for x in 0..width {
                if visited[y][x] || !mask.get(y, x) {
                    continue;
                }

                let (mut area, mut rows, mut cols) = (0usize, 0usize, 0usize);

                visited[y][x] = true;
                let mut to_fill = vec![(x, y); 1];

                while let Some((x, y)) = to_fill.pop() {
                    area += 1;
                    rows += y;
                    cols += x;

                    let neighbor_offs = (-1..=1).flat_map(|x| (-1..=1).map(move |y| (x, y)));

                    for (x, y) in neighbor_offs
                        .map(|(ox, oy)| (x as isize + ox, y as isize + oy))
                        .filter(|&(ox, oy)| {
                            (0..width as isize).contains(&ox) && (0..height as isize).contains(&oy)
                        })
                        .map(|(x, y)| (x as usize, y as usize))
                    {
                        if !visited[y][x] && mask.get(y, x) {
                            visited[y][x] = true;
                            to_fill.push((x, y));
                        }
                    }
                }

                regions.push(Region {
                    area,
                    row: rows as f64 / area as f64,
                    col: cols as f64 / area as f64,
                });
            }
        }

        regions
    }
}

impl BlobDetector for ConnectedComponents {
    fn detect(&self, mask: &Mask) -> Result<Vec<Blob>> {
        let ComponentsConfig {
            min_distance,
            min_area,
            max_area,
        } = self.config;

        let mut regions = Self::regions(mask)
            .into_iter()
            .filter(|r| r.area >= min_area && max_area.map(|max| r.area <= max).unwrap_or(true))
            .collect::<Vec<_>>();

        // Largest first, so that close neighbours are suppressed in favour of bigger regions.
        regions.sort_by(|a, b| b.area.cmp(&a.area));

        let mut kept: Vec<Region> = vec![];

        for region in regions {
            let far = kept.iter().all(|k| {
                let (dr, dc) = (k.row - region.row, k.col - region.col);
                (dr * dr + dc * dc).sqrt() >= min_distance
            });

            if far {
                kept.push(region);
            }
        }

        Ok(kept
            .into_iter()
            .map(|r| Blob::new(r.row, r.col, r.diameter()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::draw_disc;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn diagonal_pixels_are_connected() {
        let mut mask = Mask::new(10, 10);
        mask.set(2, 2, true);
        mask.set(3, 3, true);
        mask.set(4, 4, true);
        mask.set(2, 7, true);

        let regions = ConnectedComponents::regions(&mask);

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].area, 3);
        assert_approx_eq!(regions[0].row, 3.0);
        assert_approx_eq!(regions[0].col, 3.0);
        assert_eq!(regions[1].area, 1);
        assert_approx_eq!(regions[1].col, 7.0);
    }

    #[test]
    fn area_limits_drop_regions() {
        let mut mask = Mask::new(40, 40);
        draw_disc(&mut mask, 10, 10, 1);
        draw_disc(&mut mask, 20, 20, 4);
        draw_disc(&mut mask, 30, 30, 8);

        let detector = ConnectedComponents::new(ComponentsConfig {
            min_area: 6,
            max_area: Some(100),
            ..Default::default()
        });

        let blobs = detector.detect(&mask).unwrap();

        assert_eq!(blobs.len(), 1);
        assert_approx_eq!(blobs[0].row, 20.0);
        assert_approx_eq!(blobs[0].col, 20.0);
    }

    #[test]
    fn close_regions_keep_the_largest() {
        let mut mask = Mask::new(40, 40);
        draw_disc(&mut mask, 20, 14, 2);
        draw_disc(&mut mask, 20, 22, 4);

        let blobs = ConnectedComponents::default().detect(&mask).unwrap();

        assert_eq!(blobs.len(), 1);
        assert_approx_eq!(blobs[0].col, 22.0);

        let spread = ConnectedComponents::new(ComponentsConfig {
            min_distance: 5.0,
            ..Default::default()
        });

        assert_eq!(spread.detect(&mask).unwrap().len(), 2);
    }

    #[test]
    fn size_is_equivalent_diameter() {
        let mut mask = Mask::new(20, 20);
        for r in 5..9 {
            for c in 5..9 {
                mask.set(r, c, true);
            }
        }

        let blobs = ConnectedComponents::default().detect(&mask).unwrap();

        assert_eq!(blobs.len(), 1);
        assert_approx_eq!(blobs[0].row, 6.5);
        assert_approx_eq!(blobs[0].size, 2.0 * (16.0 / PI).sqrt());
    }
}
