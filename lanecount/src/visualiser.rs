//! # Pipeline visualisation
//!
//! Visualisers observe every processed frame. They get read-only views of the pipeline state and
//! can not influence the counts.

use crate::prelude::v1::*;
use log::*;
use std::io::Write;

/// Read-only view of a processed frame.
pub struct FrameView<'a> {
    pub index: usize,
    pub frame: &'a Frame,
    pub mask: &'a Mask,
    pub detection: &'a Detection,
}

impl FrameView<'_> {
    pub fn count(&self) -> usize {
        self.detection.count()
    }
}

/// Observer of the counting pipeline.
pub trait Visualiser {
    /// Called once per processed frame, in frame order.
    fn on_frame(&mut self, view: &FrameView);

    /// Called once when the run stops, for any reason.
    ///
    /// Any display resources should be released here.
    fn finish(&mut self) {}
}

const CHAR_MAP: &str = "$@B%8&WM#*oahkbdpqwmZO0QLCJUYXzcvunxrjft/\\|()1{}[]?-_+~<>i!lI;:,\"^`'. ";

fn intensity_to_char(intensity: u8) -> char {
    let range = intensity as f32 / 255.0;
    let idx = (1f32 - range) * (CHAR_MAP.len() - 1) as f32;
    CHAR_MAP.chars().nth(idx.round() as usize).unwrap_or(' ')
}

/// Prints frames as text.
///
/// Lane detections print the mask with lane band rows marked at the side, followed by the energy of
/// each band. Blob detections print the annotated mask followed by the blob positions.
pub struct AsciiVisualiser<W> {
    out: W,
}

impl<W: Write> AsciiVisualiser<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, view: &FrameView) -> std::io::Result<()> {
        let out = &mut self.out;

        writeln!(out, "frame {}  count {}", view.index, view.count())?;

        let (image, lanes) = match view.detection {
            Detection::Blobs(report) => (report.annotate(view.mask), &[][..]),
            Detection::Lanes(lanes) => (BlobReport::default().annotate(view.mask), &lanes[..]),
            Detection::Count(_) => (view.frame.clone(), &[][..]),
        };

        for r in 0..image.height() {
            let marker = if lanes.iter().any(|l| l.band.rows().contains(&r)) {
                '>'
            } else {
                ' '
            };
            let line = (0..image.width())
                .map(|c| intensity_to_char(image.get(r, c)))
                .collect::<String>();
            writeln!(out, "{marker}{line}")?;
        }

        match view.detection {
            Detection::Lanes(lanes) => {
                for lane in lanes {
                    writeln!(
                        out,
                        "lane {}..{}: energy {:.1} in {}..{} of {} -> {}",
                        lane.band.start,
                        lane.band.end,
                        lane.energy,
                        lane.window.0,
                        lane.window.1,
                        lane.spectrum.len(),
                        if lane.occupied { "occupied" } else { "free" }
                    )?;
                }
            }
            Detection::Blobs(report) => {
                for blob in &report.accepted {
                    writeln!(
                        out,
                        "blob ({:.1}, {:.1}) size {:.1}",
                        blob.row, blob.col, blob.size
                    )?;
                }
            }
            Detection::Count(_) => {}
        }

        Ok(())
    }
}

impl<W: Write> Visualiser for AsciiVisualiser<W> {
    fn on_frame(&mut self, view: &FrameView) {
        if let Err(e) = self.render(view) {
            warn!("Failed to render frame {}: {}", view.index, e);
        }
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}
