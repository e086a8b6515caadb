//! Voice activity detection and voiced-segment tracking.
//!
//! A hysteretic detector over per-frame RMS and spectral flatness: a frame
//! turns voiced when the level rises above the on-threshold with tone-like
//! flatness, and turns unvoiced only when the level falls below the
//! off-threshold or the spectrum flattens out. Segments shorter than the
//! minimum sound duration are discarded; gaps shorter than the minimum
//! silence never split a segment.

use crate::errors::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    pub energy_on_dbfs: f32,
    pub energy_off_dbfs: f32,
    pub flatness_on: f32,
    pub flatness_off: f32,
    pub min_sound_ms: f32,
    pub min_silence_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_on_dbfs: -40.,
            energy_off_dbfs: -48.,
            flatness_on: 0.9,
            flatness_off: 0.95,
            min_sound_ms: 100.,
            min_silence_ms: 200.,
        }
    }
}

/// A maximal voiced interval of the user recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoicedSegment {
    pub start_sec: f32,
    pub end_sec: f32,
    /// Mean over-threshold margin of the voiced frames, in [0, 1].
    pub confidence: f32,
}

impl VoicedSegment {
    #[must_use]
    pub fn duration_sec(&self) -> f32 {
        self.end_sec - self.start_sec
    }
}

struct OpenSegment {
    start_sec: f32,
    last_voiced_end_sec: f32,
    confidence_sum: f64,
    voiced_frames: u32,
}

pub struct SegmentTracker {
    config: VadConfig,
    frame_period_sec: f32,
    voiced_state: bool,
    segments: Vec<VoicedSegment>,
    current: Option<OpenSegment>,
    silence_frames: u32,
}

impl SegmentTracker {
    /// # Errors
    ///
    /// Returns an error when the hysteresis thresholds are not ordered
    /// (`off <= on` for energy, `on <= off` for flatness) or the timing
    /// parameters are non-positive.
    pub fn new(config: VadConfig, sample_rate: u32, hop_samples: usize) -> AnalysisResult<Self> {
        if sample_rate == 0 || hop_samples == 0 {
            return Err(AnalysisError::invalid("vad", "hop and sample rate must be non-zero"));
        }
        if config.energy_off_dbfs > config.energy_on_dbfs {
            return Err(AnalysisError::invalid(
                "vad",
                "energy off-threshold must not exceed the on-threshold",
            ));
        }
        if config.flatness_on > config.flatness_off {
            return Err(AnalysisError::invalid(
                "vad",
                "flatness on-threshold must not exceed the off-threshold",
            ));
        }
        if config.min_sound_ms <= 0. || config.min_silence_ms <= 0. {
            return Err(AnalysisError::invalid("vad", "durations must be positive"));
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(Self {
            config,
            frame_period_sec: hop_samples as f32 / sample_rate as f32,
            voiced_state: false,
            segments: Vec::new(),
            current: None,
            silence_frames: 0,
        })
    }

    /// Classify one frame and advance the segment state machine.
    /// Returns the voiced decision for this frame.
    pub fn do_(&mut self, rms_dbfs: f32, flatness: f32, time_sec: f32) -> bool {
        if self.voiced_state {
            if rms_dbfs < self.config.energy_off_dbfs || flatness > self.config.flatness_off {
                self.voiced_state = false;
            }
        } else {
            self.voiced_state =
                rms_dbfs > self.config.energy_on_dbfs && flatness < self.config.flatness_on;
        }

        if self.voiced_state {
            self.silence_frames = 0;
            let margin = ((rms_dbfs - self.config.energy_on_dbfs) / -self.config.energy_on_dbfs)
                .clamp(0., 1.);
            let end = time_sec + self.frame_period_sec;
            match &mut self.current {
                Some(open) => {
                    open.last_voiced_end_sec = end;
                    open.confidence_sum += f64::from(margin);
                    open.voiced_frames += 1;
                }
                None => {
                    self.current = Some(OpenSegment {
                        start_sec: time_sec,
                        last_voiced_end_sec: end,
                        confidence_sum: f64::from(margin),
                        voiced_frames: 1,
                    });
                }
            }
        } else if self.current.is_some() {
            self.silence_frames += 1;
            #[allow(clippy::cast_precision_loss)]
            let silence_sec = self.silence_frames as f32 * self.frame_period_sec;
            if silence_sec >= self.config.min_silence_ms / 1000. {
                self.close_current();
            }
        }
        self.voiced_state
    }

    fn close_current(&mut self) {
        if let Some(open) = self.current.take() {
            let duration = open.last_voiced_end_sec - open.start_sec;
            if duration >= self.config.min_sound_ms / 1000. {
                #[allow(clippy::cast_possible_truncation)]
                self.segments.push(VoicedSegment {
                    start_sec: open.start_sec,
                    end_sec: open.last_voiced_end_sec,
                    confidence: (open.confidence_sum / f64::from(open.voiced_frames.max(1))) as f32,
                });
            }
        }
        self.silence_frames = 0;
    }

    /// Close any open segment; call once the recording is complete.
    pub fn finalize(&mut self) {
        self.close_current();
    }

    /// Closed segments, ordered by start time, pairwise disjoint.
    #[must_use]
    pub fn segments(&self) -> &[VoicedSegment] {
        &self.segments
    }

    #[must_use]
    pub const fn is_voiced(&self) -> bool {
        self.voiced_state
    }

    pub fn reset(&mut self) {
        self.voiced_state = false;
        self.segments.clear();
        self.current = None;
        self.silence_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: f32 = 512. / 44_100.;

    fn tracker() -> SegmentTracker {
        SegmentTracker::new(VadConfig::default(), 44_100, 512).unwrap()
    }

    /// Feed `frames` of (rms, flatness) pairs starting at frame `offset`.
    fn feed(tracker: &mut SegmentTracker, offset: usize, frames: usize, rms: f32, flatness: f32) {
        #[allow(clippy::cast_precision_loss)]
        for i in 0..frames {
            tracker.do_(rms, flatness, (offset + i) as f32 * PERIOD);
        }
    }

    #[test]
    fn test_two_bursts_two_segments() {
        let mut tracker = tracker();
        feed(&mut tracker, 0, 40, -90., 0.1); // lead-in silence
        feed(&mut tracker, 40, 30, -12., 0.1); // burst one, ~350 ms
        feed(&mut tracker, 70, 40, -90., 0.1); // gap, ~460 ms
        feed(&mut tracker, 110, 30, -12., 0.1); // burst two
        tracker.finalize();

        let segments = tracker.segments();
        assert_eq!(segments.len(), 2);
        assert!((segments[0].start_sec - 40. * PERIOD).abs() < PERIOD);
        assert!((segments[1].start_sec - 110. * PERIOD).abs() < PERIOD);
        // Ordered and disjoint
        assert!(segments[0].end_sec < segments[1].start_sec);
    }

    #[test]
    fn test_short_gap_merges() {
        let mut tracker = tracker();
        feed(&mut tracker, 0, 30, -12., 0.1);
        feed(&mut tracker, 30, 10, -90., 0.1); // ~116 ms, below min silence
        feed(&mut tracker, 40, 30, -12., 0.1);
        tracker.finalize();

        assert_eq!(tracker.segments().len(), 1);
        let segment = tracker.segments()[0];
        assert!(segment.duration_sec() > 60. * PERIOD);
    }

    #[test]
    fn test_short_burst_dropped() {
        let mut tracker = tracker();
        feed(&mut tracker, 0, 5, -12., 0.1); // ~58 ms, below min sound
        feed(&mut tracker, 5, 50, -90., 0.1);
        tracker.finalize();
        assert!(tracker.segments().is_empty());
    }

    #[test]
    fn test_silence_has_no_segments() {
        let mut tracker = tracker();
        feed(&mut tracker, 0, 200, -90., 0.1);
        tracker.finalize();
        assert!(tracker.segments().is_empty());
    }

    #[test]
    fn test_flat_noise_not_voiced() {
        let mut tracker = tracker();
        // Loud but spectrally flat: stays unvoiced
        feed(&mut tracker, 0, 50, -10., 0.97);
        tracker.finalize();
        assert!(tracker.segments().is_empty());
    }

    #[test]
    fn test_hysteresis_keeps_segment_through_dip() {
        let mut tracker = tracker();
        feed(&mut tracker, 0, 20, -12., 0.1);
        // Dip between off (-48) and on (-40): still voiced
        feed(&mut tracker, 20, 10, -44., 0.1);
        feed(&mut tracker, 30, 20, -12., 0.1);
        tracker.finalize();
        assert_eq!(tracker.segments().len(), 1);
        let segment = tracker.segments()[0];
        assert!(segment.duration_sec() >= 50. * PERIOD - 1e-3);
    }

    #[test]
    fn test_confidence_tracks_margin() {
        let mut tracker1 = tracker();
        feed(&mut tracker1, 0, 30, -4., 0.1); // near full scale
        tracker1.finalize();
        let strong = tracker1.segments()[0].confidence;

        let mut tracker2 = tracker();
        feed(&mut tracker2, 0, 30, -36., 0.1); // barely above threshold
        tracker2.finalize();
        let weak = tracker2.segments()[0].confidence;
        assert!(strong > weak);
        assert!((0.0..=1.0).contains(&weak));
    }

    #[test]
    fn test_threshold_ordering_validated() {
        let config = VadConfig {
            energy_on_dbfs: -50.,
            energy_off_dbfs: -40.,
            ..VadConfig::default()
        };
        assert!(SegmentTracker::new(config, 44_100, 512).is_err());
    }
}
