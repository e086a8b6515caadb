//! Rule-based coaching seeds.
//!
//! Pure functions over the finalized component scores and the master
//! template: each rule compares one user/master delta against fixed
//! thresholds and emits a strength, improvement or tip tag.

use crate::master::MasterCallTemplate;
use crate::summary::{ComponentScores, FeedbackSeeds};

const PITCH_IMPROVE_RATIO: f32 = 0.05;
const PITCH_STRENGTH_RATIO: f32 = 0.02;
const GAIN_TIP_DB: f32 = 6.;
const TEMPO_IMPROVE_RATIO: f32 = 0.10;
const CENTROID_IMPROVE_RATIO: f32 = 0.20;

#[must_use]
pub fn coaching_seeds(components: &ComponentScores, master: &MasterCallTemplate) -> FeedbackSeeds {
    let mut seeds = FeedbackSeeds::default();

    if let Some(master_f0) = master.mean_f0_hz() {
        if components.pitch.f0_mean_hz > 0. && master_f0 > 0. {
            let delta = (components.pitch.f0_mean_hz - master_f0).abs() / master_f0;
            if delta > PITCH_IMPROVE_RATIO {
                seeds
                    .improvements
                    .push(format!("pitch off by {:.0}%", delta * 100.));
            } else if delta < PITCH_STRENGTH_RATIO {
                seeds.strengths.push("pitch tightly matched".into());
            }
        }
    }

    let gain = components.loudness.normalization_gain_db;
    if gain.abs() > GAIN_TIP_DB {
        seeds
            .tips
            .push(format!("adjust distance or input gain by {gain:+.0} dB"));
    }

    if master.tempo_bpm > 0. && components.cadence.tempo_bpm > 0. {
        let delta = (components.cadence.tempo_bpm - master.tempo_bpm).abs() / master.tempo_bpm;
        if delta > TEMPO_IMPROVE_RATIO {
            seeds
                .improvements
                .push(format!("cadence tempo off by {:.0}%", delta * 100.));
        }
    }

    let master_centroid = master.mean_centroid_hz();
    if master_centroid > 0. && components.harmonic.spectral_centroid_hz > 0. {
        let delta =
            (components.harmonic.spectral_centroid_hz - master_centroid).abs() / master_centroid;
        if delta > CENTROID_IMPROVE_RATIO {
            seeds.improvements.push("tone brightness off".into());
        }
    }

    seeds
}
