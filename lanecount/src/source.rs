//! # Frame sources

use crate::prelude::v1::*;
use std::collections::VecDeque;

/// Ordered stream of motion magnitude frames.
pub trait FrameSource {
    /// Read the next frame in the stream.
    ///
    /// This function will attempt to read the next frame into `frame`. If a frame was read,
    /// `Ok(true)` is returned. If the stream is exhausted, `Ok(false)` is returned, and if the
    /// stream is broken, `Err` is returned.
    fn read_frame(&mut self, frame: &mut Frame) -> Result<bool>;

    /// Get dimensions of the stream.
    ///
    /// This will return `Some((height, width))` if the frame shape is known before the first frame
    /// is read. Otherwise `None` is returned.
    fn dims(&self) -> Option<(usize, usize)> {
        None
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        (**self).read_frame(frame)
    }

    fn dims(&self) -> Option<(usize, usize)> {
        (**self).dims()
    }
}

/// In-memory frame source.
#[derive(Default)]
pub struct VecSource {
    frames: VecDeque<Frame>,
    dims: Option<(usize, usize)>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        let frames = frames.into_iter().collect::<VecDeque<_>>();
        let dims = frames.front().map(Frame::shape);
        Self { frames, dims }
    }
}

impl FromIterator<Frame> for VecSource {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl FrameSource for VecSource {
    fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        match self.frames.pop_front() {
            Some(f) => {
                *frame = f;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dims(&self) -> Option<(usize, usize)> {
        self.dims
    }
}
