//! Common `FrameSource` and `Counter` instance loader.
//!
//! Frame streams (`.mfr`) are a sequence of frames, each encoded as a 32-bit LE height, a 32-bit
//! LE width and then `height * width` magnitude bytes in row-major order.

use lanecount::prelude::v1::*;
use lanecount::utils::open_file;
use log::*;
use spatial_discriminator::SpatialDiscriminator;
use std::io::{self, BufReader, BufWriter, Read, Write};

/// Stream preprocessing options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Number of leading frames to drop. Frame indices start at 0 after the skipped frames.
    pub skip: usize,
    /// Rotate every frame 90 degrees counter-clockwise.
    pub rotate: bool,
}

/// Create a frame source depending on the input.
///
/// `tcp://` inputs are interpreted as network streams, anything else is opened as a file. Both
/// must carry `.mfr` encoded frames.
pub fn create_source(input: &str, options: LoaderOptions) -> Result<Box<dyn FrameSource + Send>> {
    if !input.starts_with("tcp://") && !input.ends_with(".mfr") {
        warn!("{input} does not have the .mfr extension, reading it as a frame stream anyway");
    }

    let reader = BufReader::new(open_file(input)?);

    Ok(Box::new(MfrFile::new(reader, options)))
}

/// Create the counter selected by the run configuration.
pub fn create_counter(config: &RunConfig) -> Box<dyn Counter + Send + Sync> {
    match config.mode {
        DetectorMode::Lanes => Box::new(SpatialDiscriminator::new(config.lanes.clone())),
        DetectorMode::Blobs => Box::new(blob_detector::create_counter(&config.blobs)),
    }
}

/// `.mfr` stream reader.
pub struct MfrFile<T> {
    reader: T,
    options: LoaderOptions,
    skipped: bool,
    buf: Vec<u8>,
}

impl<T: Read> MfrFile<T> {
    pub fn new(reader: T, options: LoaderOptions) -> Self {
        Self {
            reader,
            options,
            skipped: false,
            buf: vec![],
        }
    }

    /// Read as many bytes as possible into `buf`, stopping only at the end of the stream.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(filled)
    }

    /// Read the next raw frame, without skipping or rotation.
    fn read_raw(&mut self, frame: &mut Frame) -> Result<bool> {
        let mut header = [0u8; 2 * std::mem::size_of::<u32>()];

        match self.read_full(&mut header)? {
            0 => return Ok(false),
            n if n < header.len() => {
                return Err(Error::Source(format!(
                    "stream ended inside a frame header ({n} of {} bytes)",
                    header.len()
                )))
            }
            _ => {}
        }

        let [h0, h1, h2, h3, w0, w1, w2, w3] = header;
        let height = u32::from_le_bytes([h0, h1, h2, h3]) as usize;
        let width = u32::from_le_bytes([w0, w1, w2, w3]) as usize;

        let len = height
            .checked_mul(width)
            .ok_or_else(|| Error::Source(format!("frame of {height}x{width} is too large")))?;

        // The buffer only grows with the bytes actually received, whatever the header claims.
        self.buf.clear();
        let read = (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut self.buf)?;

        if read < len {
            return Err(Error::Source(format!(
                "stream ended inside a {height}x{width} frame ({read} of {len} bytes)"
            )));
        }

        *frame = Frame::from_row_slice(height, width, &self.buf);

        Ok(true)
    }
}

impl<T: Read> FrameSource for MfrFile<T> {
    fn read_frame(&mut self, frame: &mut Frame) -> Result<bool> {
        if !self.skipped {
            self.skipped = true;

            for i in 0..self.options.skip {
                if !self.read_raw(frame)? {
                    warn!("Stream ended after skipping {i} frames");
                    return Ok(false);
                }
            }

            if self.options.skip > 0 {
                debug!("Skipped {} frames", self.options.skip);
            }
        }

        if !self.read_raw(frame)? {
            return Ok(false);
        }

        if self.options.rotate {
            *frame = frame.rotate_ccw();
        }

        Ok(true)
    }
}

/// `.mfr` stream writer.
pub struct FrameWriter<W: Write> {
    out: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let (height, width) = frame.shape();

        let dim = |v: usize| {
            u32::try_from(v)
                .map_err(|_| Error::Source(format!("dimension {v} does not fit the header")))
        };

        // First encode the shape in two 32-bit LE integers.
        self.out.write_all(&dim(height)?.to_le_bytes())?;
        self.out.write_all(&dim(width)?.to_le_bytes())?;

        // Then the samples row by row.
        for row in 0..height {
            let samples = (0..width).map(|col| frame.get(row, col)).collect::<Vec<_>>();
            self.out.write_all(&samples)?;
        }

        Ok(())
    }

    /// Flush all buffered frames and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.out.into_inner().map_err(|e| e.into_error().into())
    }
}
