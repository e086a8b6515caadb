//! Rolling similarity for live UI feedback.
//!
//! The scorer keeps a sliding window of the most recent user MFCC frames
//! and, every `updateInterval` hops, runs a cheap banded DTW against a
//! prefix of the master sequence. The MFCC similarity is fused with a
//! pitch-ratio term and a level term at fixed (0.5, 0.3, 0.2) weights.
//! Readers observe a versioned snapshot without touching the session's
//! writer lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use huntmaster_analysis::{
    dtw_distance_frames, normalize_by_reference, reference_stats, DtwParams, LoudnessObservation,
    PitchObservation,
};

use crate::master::MasterCallTemplate;
use crate::score::{similarity_from_distance, ALPHA_MFCC, ALPHA_PITCH, ALPHA_VOLUME};

const WEIGHT_MFCC: f32 = 0.5;
const WEIGHT_PITCH: f32 = 0.3;
const WEIGHT_VOLUME: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RealtimeSnapshot {
    pub score: f32,
    pub ready: bool,
    pub confidence: f32,
    /// Monotonic publish counter.
    pub version: u64,
    /// Frames the scorer has observed, including unvoiced ones.
    pub frames_observed: u64,
}

/// Reader side of the realtime score: a versioned atomic snapshot shared
/// between the session writer and any number of pollers.
#[derive(Default)]
pub struct RealtimeShared {
    snapshot: RwLock<RealtimeSnapshot>,
    version: AtomicU64,
}

impl RealtimeShared {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read(&self) -> RealtimeSnapshot {
        *self
            .snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn publish(&self, mut snapshot: RealtimeSnapshot) {
        snapshot.version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        *self
            .snapshot
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = snapshot;
    }
}

pub(crate) struct RealtimeScorer {
    update_interval: usize,
    window_frames: usize,
    min_frames: usize,
    min_score: f32,
    dtw: DtwParams,
    mfcc_window: VecDeque<Vec<f32>>,
    f0_window: VecDeque<f32>,
    level_window: VecDeque<f32>,
    voiced_frames: u64,
    total_frames: u64,
    frames_since_update: usize,
    best_seen: f32,
    shared: Arc<RealtimeShared>,
}

impl RealtimeScorer {
    pub(crate) fn new(
        update_interval: usize,
        window_frames: usize,
        min_frames: usize,
        min_score: f32,
        dtw: DtwParams,
        shared: Arc<RealtimeShared>,
    ) -> Self {
        Self {
            update_interval: update_interval.max(1),
            window_frames: window_frames.max(4),
            min_frames: min_frames.max(1),
            min_score,
            dtw,
            mfcc_window: VecDeque::new(),
            f0_window: VecDeque::new(),
            level_window: VecDeque::new(),
            voiced_frames: 0,
            total_frames: 0,
            frames_since_update: 0,
            best_seen: 0.,
            shared,
        }
    }

    /// Feed one hop of features; recomputes and publishes the snapshot on
    /// every `update_interval`-th call.
    pub(crate) fn observe(
        &mut self,
        mfcc_frame: &[f32],
        pitch: Option<PitchObservation>,
        level: &LoudnessObservation,
        voiced: bool,
        master: &MasterCallTemplate,
    ) {
        self.total_frames += 1;
        self.mfcc_window.push_back(mfcc_frame.to_vec());
        if self.mfcc_window.len() > self.window_frames {
            self.mfcc_window.pop_front();
        }
        if voiced {
            self.voiced_frames += 1;
            self.level_window.push_back(level.rms_dbfs);
            if self.level_window.len() > self.window_frames {
                self.level_window.pop_front();
            }
            if let Some(observation) = pitch {
                if observation.voiced {
                    self.f0_window.push_back(observation.f0_hz);
                    if self.f0_window.len() > self.window_frames {
                        self.f0_window.pop_front();
                    }
                }
            }
        }

        self.frames_since_update += 1;
        if self.frames_since_update < self.update_interval || self.mfcc_window.len() < 4 {
            return;
        }
        self.frames_since_update = 0;
        self.update(master);
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn update(&mut self, master: &MasterCallTemplate) {
        // Partial DTW against a master prefix; the 3/2 length cap keeps
        // the alignment inside the step pattern's reach.
        let mut user: Vec<Vec<f32>> = self.mfcc_window.iter().cloned().collect();
        let prefix_len = (user.len() * 3 / 2).clamp(4, master.mfcc.len().max(4));
        let similarity_mfcc = if master.mfcc.is_empty() {
            0.
        } else {
            let mut prefix: Vec<Vec<f32>> =
                master.mfcc[..prefix_len.min(master.mfcc.len())].to_vec();
            let stats = reference_stats(&prefix);
            normalize_by_reference(&mut prefix, &stats);
            normalize_by_reference(&mut user, &stats);
            dtw_distance_frames(&user, &prefix, &self.dtw)
                .map_or(0., |distance| similarity_from_distance(distance, ALPHA_MFCC))
        };

        let similarity_pitch = master.mean_f0_hz().and_then(|master_f0| {
            if self.f0_window.is_empty() {
                None
            } else {
                let mean_f0 = self.f0_window.iter().sum::<f32>() / self.f0_window.len() as f32;
                let delta = f64::from((mean_f0 / master_f0 - 1.).abs());
                Some(similarity_from_distance(delta, ALPHA_PITCH))
            }
        });

        let similarity_volume = if self.level_window.is_empty() {
            None
        } else {
            let mean_level = self.level_window.iter().sum::<f32>() / self.level_window.len() as f32;
            let delta = f64::from((mean_level - master.long_term_rms_dbfs()).abs());
            Some(similarity_from_distance(delta, ALPHA_VOLUME))
        };

        let mut score = WEIGHT_MFCC * similarity_mfcc;
        let mut weight = WEIGHT_MFCC;
        if let Some(s) = similarity_pitch {
            score += WEIGHT_PITCH * s;
            weight += WEIGHT_PITCH;
        }
        if let Some(s) = similarity_volume {
            score += WEIGHT_VOLUME * s;
            weight += WEIGHT_VOLUME;
        }
        let score = (score / weight).clamp(0., 1.);

        self.best_seen = self.best_seen.max(score);
        let ready = self.voiced_frames >= self.min_frames as u64 && self.best_seen >= self.min_score;
        let confidence = ((self.voiced_frames as f32) / (2. * self.min_frames as f32)).min(1.);

        self.shared.publish(RealtimeSnapshot {
            score,
            ready,
            confidence,
            version: 0, // assigned by publish
            frames_observed: self.total_frames,
        });
    }

    pub(crate) fn reset(&mut self) {
        self.mfcc_window.clear();
        self.f0_window.clear();
        self.level_window.clear();
        self.voiced_frames = 0;
        self.total_frames = 0;
        self.frames_since_update = 0;
        self.best_seen = 0.;
        self.shared.publish(RealtimeSnapshot::default());
    }
}
