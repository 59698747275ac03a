//! Sample sources feeding a pipeline producer.
//!
//! A source owns any decoding or scaling of raw readings; samples reach the
//! ring buffer exactly as the source yields them.

use crate::error::{PipelineError, Result};
use std::io::{BufRead, ErrorKind, Read};
use tracing::warn;

/// Something that yields samples one at a time
pub trait SampleSource {
    /// Next sample, or `None` once the stream has ended
    fn next_sample(&mut self) -> Result<Option<f32>>;

    /// End the stream after at most `limit` samples
    fn take(self, limit: u64) -> Take<Self>
    where
        Self: Sized,
    {
        Take {
            inner: self,
            remaining: limit,
        }
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        (**self).next_sample()
    }
}

/// Source adapter returned by [`SampleSource::take`]
#[derive(Debug, Clone)]
pub struct Take<S> {
    inner: S,
    remaining: u64,
}

impl<S: SampleSource> SampleSource for Take<S> {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let sample = self.inner.next_sample()?;
        if sample.is_some() {
            self.remaining -= 1;
        }
        Ok(sample)
    }
}

/// Replays a fixed sequence of samples
#[derive(Debug, Clone)]
pub struct VecSource {
    samples: std::vec::IntoIter<f32>,
}

impl VecSource {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }
}

impl SampleSource for VecSource {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        Ok(self.samples.next())
    }
}

/// Endless synthetic sine stream, `0.5 * sin(6 * phase)` with the phase
/// stepping by -0.02 per sample
#[derive(Debug, Clone, Default)]
pub struct SineSource {
    phase: f32,
}

impl SineSource {
    const AMPLITUDE: f32 = 0.5;
    const FREQUENCY: f32 = 6.0;
    const PHASE_STEP: f32 = -0.02;

    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSource for SineSource {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        let sample = Self::AMPLITUDE * (Self::FREQUENCY * self.phase).sin();
        self.phase += Self::PHASE_STEP;
        Ok(Some(sample))
    }
}

/// Reads the second comma-separated column of each line and scales it from
/// the raw recording range `[8000, 10000]` to `[-1, 1]`.
///
/// Readings outside the raw range are still emitted after a warning.
#[derive(Debug)]
pub struct CsvSource<R> {
    reader: R,
    line: String,
    line_no: u64,
}

impl<R: BufRead> CsvSource<R> {
    const RAW_MIN: f32 = 8000.0;
    const RAW_MAX: f32 = 10000.0;

    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_no: 0,
        }
    }

    /// Map a raw reading into the normalized range
    pub fn scale(raw: f32) -> f32 {
        (raw - Self::RAW_MIN) / 1000.0 - 1.0
    }
}

impl<R: BufRead> SampleSource for CsvSource<R> {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let Some(field) = self.line.split(',').nth(1) else {
                continue;
            };
            let field = field.trim();
            if field.is_empty() {
                continue;
            }

            let raw: f32 = field.parse().map_err(|_| {
                PipelineError::Source(format!(
                    "line {}: cannot parse '{}' as a sample",
                    self.line_no, field
                ))
            })?;
            let scaled = Self::scale(raw);
            if !(Self::RAW_MIN..=Self::RAW_MAX).contains(&raw) {
                warn!(line = self.line_no, raw, scaled, "reading outside expected range");
            }
            return Ok(Some(scaled));
        }
    }
}

/// Decodes little-endian 4-byte `f32` frames from a byte stream, as
/// delivered by a serial transport
#[derive(Debug)]
pub struct RawF32Source<R> {
    reader: R,
}

impl<R: Read> RawF32Source<R> {
    const FRAME: usize = std::mem::size_of::<f32>();

    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> SampleSource for RawF32Source<R> {
    fn next_sample(&mut self) -> Result<Option<f32>> {
        let mut frame = [0u8; Self::FRAME];
        let mut filled = 0;

        // Transports hand over partial frames; keep reading until one is whole
        while filled < Self::FRAME {
            match self.reader.read(&mut frame[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(PipelineError::Source(format!(
                        "stream ended inside a frame ({filled} of {} bytes)",
                        Self::FRAME
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Some(f32::from_le_bytes(frame)))
    }
}
