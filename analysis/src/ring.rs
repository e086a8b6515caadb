//! Session input ring.
//!
//! Accepts variable-size chunks of mono float samples and hands out
//! fixed-size overlapping windows to registered readers. The writer never
//! overtakes the slowest live reader; what happens when it would is decided
//! by the [`DropPolicy`].

use log::debug;

use crate::errors::{AnalysisError, AnalysisResult};
use crate::utils::has_non_finite;

/// What to do when an incoming chunk does not fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Reject the chunk; the caller retries after draining.
    Strict,
    /// Discard the oldest unread samples and keep a drop count.
    #[default]
    DropOldest,
}

/// Handle for a registered window consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderId(usize);

pub struct InputRing {
    buffer: Vec<f32>,
    capacity: usize,
    /// Absolute sample index one past the newest written sample.
    write_pos: u64,
    /// Absolute read cursors; `None` marks a detached reader.
    readers: Vec<Option<u64>>,
    policy: DropPolicy,
    dropped_samples: u64,
}

impl InputRing {
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn new(capacity: usize, policy: DropPolicy) -> AnalysisResult<Self> {
        if capacity == 0 {
            return Err(AnalysisError::invalid("ring", "capacity must be non-zero"));
        }
        Ok(Self {
            buffer: vec![0.; capacity],
            capacity,
            write_pos: 0,
            readers: Vec::new(),
            policy,
            dropped_samples: 0,
        })
    }

    /// Register a reader starting at the current write position.
    pub fn register_reader(&mut self) -> ReaderId {
        self.readers.push(Some(self.write_pos));
        ReaderId(self.readers.len() - 1)
    }

    /// Detach a reader so it no longer constrains the writer.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown reader id.
    pub fn detach_reader(&mut self, reader: ReaderId) -> AnalysisResult<()> {
        let slot = self
            .readers
            .get_mut(reader.0)
            .ok_or(AnalysisError::UnknownReader(reader.0))?;
        *slot = None;
        Ok(())
    }

    fn slowest_cursor(&self) -> u64 {
        self.readers
            .iter()
            .flatten()
            .copied()
            .min()
            .unwrap_or(self.write_pos)
    }

    /// Samples that can be appended without touching unread data.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity - (self.write_pos - self.slowest_cursor()) as usize
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::NonFiniteSample`] if any sample is NaN or infinite
    ///   (the ring is left unchanged).
    /// - [`AnalysisError::RingFull`] under [`DropPolicy::Strict`] when the
    ///   chunk does not fit, or under any policy when the chunk is larger
    ///   than the whole ring.
    pub fn push(&mut self, samples: &[f32]) -> AnalysisResult<()> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptySamples);
        }
        if has_non_finite(samples) {
            return Err(AnalysisError::NonFiniteSample);
        }
        if samples.len() > self.capacity {
            return Err(AnalysisError::RingFull);
        }
        if samples.len() > self.free() {
            match self.policy {
                DropPolicy::Strict => return Err(AnalysisError::RingFull),
                DropPolicy::DropOldest => {
                    let needed = (samples.len() - self.free()) as u64;
                    let new_floor = self.slowest_cursor() + needed;
                    for slot in self.readers.iter_mut().flatten() {
                        if *slot < new_floor {
                            self.dropped_samples += new_floor - *slot;
                            *slot = new_floor;
                        }
                    }
                    debug!("ring full, discarded {needed} oldest unread samples");
                }
            }
        }
        for &sample in samples {
            let index = (self.write_pos % self.capacity as u64) as usize;
            self.buffer[index] = sample;
            self.write_pos += 1;
        }
        Ok(())
    }

    /// Unread samples available to `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown or detached reader.
    #[allow(clippy::cast_possible_truncation)]
    pub fn available(&self, reader: ReaderId) -> AnalysisResult<usize> {
        let cursor = self
            .readers
            .get(reader.0)
            .copied()
            .flatten()
            .ok_or(AnalysisError::UnknownReader(reader.0))?;
        Ok((self.write_pos - cursor) as usize)
    }

    /// Copy the next `frame_size` window for `reader` into `out` and advance
    /// its cursor by `hop`. Returns `false` (leaving `out` untouched) when
    /// fewer than `frame_size` samples are buffered.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown reader or a zero `hop`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn take_window(
        &mut self,
        reader: ReaderId,
        frame_size: usize,
        hop: usize,
        out: &mut Vec<f32>,
    ) -> AnalysisResult<bool> {
        if hop == 0 || frame_size == 0 || frame_size > self.capacity {
            return Err(AnalysisError::invalid(
                "ring",
                "frame and hop must be non-zero and fit the ring",
            ));
        }
        let cursor = self
            .readers
            .get(reader.0)
            .copied()
            .flatten()
            .ok_or(AnalysisError::UnknownReader(reader.0))?;
        if (self.write_pos - cursor) < frame_size as u64 {
            return Ok(false);
        }
        out.clear();
        out.reserve(frame_size);
        for offset in 0..frame_size as u64 {
            let index = ((cursor + offset) % self.capacity as u64) as usize;
            out.push(self.buffer[index]);
        }
        self.readers[reader.0] = Some(cursor + hop as u64);
        Ok(true)
    }

    /// Time position (in samples) of a reader's cursor since ring creation.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown or detached reader.
    pub fn cursor(&self, reader: ReaderId) -> AnalysisResult<u64> {
        self.readers
            .get(reader.0)
            .copied()
            .flatten()
            .ok_or(AnalysisError::UnknownReader(reader.0))
    }

    #[must_use]
    pub const fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Total samples ever written.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.write_pos
    }

    /// Reset to the freshly constructed state, keeping registered readers.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.dropped_samples = 0;
        for slot in self.readers.iter_mut().flatten() {
            *slot = 0;
        }
        self.buffer.fill(0.);
    }
}
