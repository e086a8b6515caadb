//! Per-session analysis pipeline and state machine.
//!
//! A session owns everything reachable from it: the input ring, the window
//! and FFT front end, one instance of every enabled extractor, the segment
//! tracker and the realtime scorer. Chunks are windowed off the ring; per
//! window the pitch tracker (time domain) runs alongside the spectrum
//! consumers, with the harmonic analyzer fed the voiced f0 as its hint.
//!
//! ```text
//! Created ──setMasterCall──▶ Created
//! Created ──processAudioChunk──▶ Recording
//! Recording ──finalize──▶ Finalized
//! {any} ──destroy──▶ gone        {any} ──fatal error──▶ Errored
//! ```

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use log::warn;
use serde::Serialize;
use strum::Display;

use huntmaster_analysis::{
    dtw_distance_scalar, normalization_gain_db, spectral_flatness, utils, AnalysisError,
    CadenceDesc, CalibrationAdvisor, ComponentKind, DropPolicy, HarmonicDesc, InputRing,
    LoudnessDesc, MfccDesc, PitchDesc, PitchObservation, ReaderId, SegmentTracker,
    SpectrumAnalyzer, VoicedSegment, Window,
};

use crate::config::{SessionConfig, MAX_CHUNK_SAMPLES};
use crate::engine::SessionId;
use crate::error::{EngineError, EngineResult};
use crate::feedback::coaching_seeds;
use crate::master::MasterCallTemplate;
use crate::realtime::{RealtimeScorer, RealtimeShared};
use crate::score::{
    fuse, outcomes_from, similarity_from_distance, ALPHA_CADENCE, ALPHA_HARMONIC, ALPHA_MFCC,
    ALPHA_PITCH,
};
use crate::segment::{score_segments, select_best};
use crate::summary::{
    CadenceScores, CalibrationAdvice, ComponentScores, EnhancedSummary, Grade, HarmonicScores,
    LoudnessScores, PitchScores, SegmentReport, SummaryDiagnostics,
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Created,
    Recording,
    Finalized,
    Errored,
}

/// Segments below this duration score with halved confidence.
const SHORT_SEGMENT_SEC: f32 = 0.3;

/// Consecutive failures after which a component is disabled.
const FAILURE_DISABLE_STREAK: u32 = 2;

pub(crate) struct Session {
    id: SessionId,
    config: SessionConfig,
    state: SessionState,
    master: Option<Arc<MasterCallTemplate>>,

    ring: InputRing,
    reader: ReaderId,
    window: Window,
    spectrum: SpectrumAnalyzer,
    mfcc: MfccDesc,
    pitch: Option<PitchDesc>,
    harmonic: Option<HarmonicDesc>,
    cadence: Option<CadenceDesc>,
    loudness: LoudnessDesc,
    tracker: SegmentTracker,
    advisor: CalibrationAdvisor,
    realtime: Option<RealtimeScorer>,

    frame_index: u64,
    created_at: SystemTime,
    first_audio_at: Option<SystemTime>,
    finalized_at: Option<SystemTime>,

    over_budget_streak: u32,
    downgrade_events: u32,
    quality_tier: u8,
    disabled: Vec<ComponentKind>,
    mfcc_failures: u32,
    pitch_failures: u32,
    harmonic_failures: u32,
    cadence_failures: u32,

    raw: Vec<f32>,
    windowed: Vec<f32>,
    magnitudes: Vec<f32>,

    summary: Option<EnhancedSummary>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        config: SessionConfig,
        shared: Arc<RealtimeShared>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let policy = if config.strict_backpressure {
            DropPolicy::Strict
        } else {
            DropPolicy::DropOldest
        };
        let mut ring = InputRing::new(config.buffer_size, policy)?;
        let reader = ring.register_reader();
        let window = Window::new(config.window_function, config.frame_samples)?;
        let spectrum = SpectrumAnalyzer::new(config.fft_size, config.sample_rate)?;
        let mfcc = MfccDesc::new(&config.mfcc_config(), config.fft_size, config.sample_rate)?;
        let pitch = if config.enable_pitch {
            Some(PitchDesc::new(
                config.sample_rate,
                config.frame_samples,
                config.pitch_config(),
            )?)
        } else {
            None
        };
        let harmonic = if config.enable_harmonic {
            Some(HarmonicDesc::new(
                config.harmonic_config(),
                config.fft_size,
                config.sample_rate,
            )?)
        } else {
            None
        };
        let cadence = if config.enable_cadence {
            Some(CadenceDesc::new(
                config.cadence_config(),
                config.sample_rate,
                config.hop_samples,
            )?)
        } else {
            None
        };
        let tracker =
            SegmentTracker::new(config.vad_config(), config.sample_rate, config.hop_samples)?;
        let realtime = config.enable_realtime.then(|| {
            RealtimeScorer::new(
                config.scorer_update_interval_frames,
                config.scorer_window_frames,
                config.scorer_min_frames,
                config.scorer_min_score,
                config.dtw_params(),
                shared,
            )
        });

        Ok(Self {
            id,
            state: SessionState::Created,
            master: None,
            ring,
            reader,
            window,
            spectrum,
            mfcc,
            pitch,
            harmonic,
            cadence,
            loudness: LoudnessDesc::new(),
            tracker,
            advisor: CalibrationAdvisor::new(),
            realtime,
            frame_index: 0,
            created_at: SystemTime::now(),
            first_audio_at: None,
            finalized_at: None,
            over_budget_streak: 0,
            downgrade_events: 0,
            quality_tier: 0,
            disabled: Vec::new(),
            mfcc_failures: 0,
            pitch_failures: 0,
            harmonic_failures: 0,
            cadence_failures: 0,
            raw: Vec::with_capacity(config.frame_samples),
            windowed: Vec::with_capacity(config.frame_samples),
            magnitudes: Vec::new(),
            summary: None,
            config,
        })
    }

    pub(crate) const fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub(crate) const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) const fn first_audio_at(&self) -> Option<SystemTime> {
        self.first_audio_at
    }

    pub(crate) const fn finalized_at(&self) -> Option<SystemTime> {
        self.finalized_at
    }

    pub(crate) const fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub(crate) fn dropped_samples(&self) -> u64 {
        self.ring.dropped_samples()
    }

    /// Bind a master template; the template is re-timed onto this
    /// session's frame grid if it was built on a different one.
    pub(crate) fn set_master(&mut self, template: &Arc<MasterCallTemplate>) -> EngineResult<()> {
        if self.state != SessionState::Created {
            return Err(EngineError::WrongState(self.state));
        }
        let aligned = if template.sample_rate == self.config.sample_rate
            && template.frame_samples as usize == self.config.frame_samples
            && template.hop_samples as usize == self.config.hop_samples
        {
            Arc::clone(template)
        } else {
            Arc::new(template.retimed(
                self.config.sample_rate,
                self.config.frame_samples,
                self.config.hop_samples,
            ))
        };
        self.master = Some(aligned);
        Ok(())
    }

    fn component_active(&self, kind: ComponentKind) -> bool {
        if self.disabled.contains(&kind) {
            return false;
        }
        match kind {
            ComponentKind::Harmonic => self.harmonic.is_some() && self.quality_tier < 1,
            ComponentKind::Cadence => self.cadence.is_some() && self.quality_tier < 2,
            ComponentKind::Pitch => self.pitch.is_some() && self.quality_tier < 3,
            _ => true,
        }
    }

    /// Ingest one chunk of mono PCM at the session rate.
    pub(crate) fn process_chunk(&mut self, samples: &[f32]) -> EngineResult<()> {
        match self.state {
            SessionState::Created | SessionState::Recording => {}
            state => return Err(EngineError::WrongState(state)),
        }
        if samples.is_empty() {
            return Err(EngineError::InvalidAudioData("chunk is empty".into()));
        }
        if samples.len() > MAX_CHUNK_SAMPLES {
            return Err(EngineError::InvalidAudioData(format!(
                "chunk of {} samples exceeds the {MAX_CHUNK_SAMPLES} limit",
                samples.len()
            )));
        }
        if utils::has_non_finite(samples) {
            return Err(EngineError::InvalidAudioData(
                "chunk contains a NaN or infinite sample".into(),
            ));
        }

        let started = Instant::now();
        self.ring.push(samples).map_err(EngineError::from)?;
        if self.state == SessionState::Created {
            self.state = SessionState::Recording;
            self.first_audio_at = Some(SystemTime::now());
        }

        loop {
            let produced = self.ring.take_window(
                self.reader,
                self.config.frame_samples,
                self.config.hop_samples,
                &mut self.raw,
            )?;
            if !produced {
                break;
            }
            if let Err(error) = self.process_window() {
                self.state = SessionState::Errored;
                return Err(error);
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f32() * 1000.;
        if elapsed_ms > self.config.chunk_budget_ms {
            self.over_budget_streak += 1;
            if self.over_budget_streak >= 2 {
                self.downgrade();
                self.over_budget_streak = 0;
            }
        } else {
            self.over_budget_streak = 0;
        }
        Ok(())
    }

    /// Disable the next component on the quality ladder:
    /// harmonic, then cadence, then pitch.
    fn downgrade(&mut self) {
        if self.quality_tier >= 3 {
            return;
        }
        self.quality_tier += 1;
        self.downgrade_events += 1;
        let victim = match self.quality_tier {
            1 => ComponentKind::Harmonic,
            2 => ComponentKind::Cadence,
            _ => ComponentKind::Pitch,
        };
        if !self.disabled.contains(&victim) {
            self.disabled.push(victim);
        }
        warn!(
            "session {}: chunk budget exceeded twice, disabling {victim} (tier {})",
            self.id, self.quality_tier
        );
    }

    fn process_window(&mut self) -> EngineResult<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let time_sec = (self.frame_index as f64 * f64::from(self.config.hop_samples as u32)
            / f64::from(self.config.sample_rate)) as f32;

        let level = self.loudness.do_(&self.raw, time_sec);
        self.window.apply_into(&self.raw, &mut self.windowed);
        self.spectrum
            .magnitudes(&self.windowed, &mut self.magnitudes)
            .map_err(|error| EngineError::Internal(format!("spectrum failed: {error}")))?;
        let flatness = spectral_flatness(&self.magnitudes);
        let voiced = self.tracker.do_(level.rms_dbfs, flatness, time_sec);
        self.advisor.observe(&level, voiced);

        // Pitch reads the time domain while MFCC and cadence consume the
        // magnitude spectrum; disjoint state, so the two groups run on the
        // worker pool side by side. The harmonic analyzer follows so it
        // can take the voiced f0 as its hint.
        let run_pitch = self.component_active(ComponentKind::Pitch);
        let run_cadence = self.component_active(ComponentKind::Cadence);
        let run_mfcc = self.component_active(ComponentKind::Mfcc);
        let (pitch_desc, mfcc_desc, cadence_desc) =
            (&mut self.pitch, &mut self.mfcc, &mut self.cadence);
        let (raw, magnitudes) = (&self.raw, &self.magnitudes);
        let (pitch_result, (mfcc_result, cadence_result)) = rayon::join(
            move || {
                pitch_desc
                    .as_mut()
                    .filter(|_| run_pitch)
                    .map(|desc| desc.do_(raw, time_sec))
            },
            move || {
                let mfcc_result = run_mfcc.then(|| mfcc_desc.do_(magnitudes).map(|_| ()));
                let cadence_result = cadence_desc
                    .as_mut()
                    .filter(|_| run_cadence)
                    .map(|desc| desc.do_(magnitudes, time_sec));
                (mfcc_result, cadence_result)
            },
        );

        let pitch_observation = match pitch_result {
            Some(Ok(observation)) => {
                self.pitch_failures = 0;
                Some(observation)
            }
            Some(Err(error)) => {
                self.component_failure(ComponentKind::Pitch, &error);
                None
            }
            None => None,
        };
        match mfcc_result {
            Some(Ok(())) => self.mfcc_failures = 0,
            Some(Err(error)) => self.component_failure(ComponentKind::Mfcc, &error),
            None => {}
        }
        match cadence_result {
            Some(Ok(())) => self.cadence_failures = 0,
            Some(Err(error)) => self.component_failure(ComponentKind::Cadence, &error),
            None => {}
        }

        if self.component_active(ComponentKind::Harmonic) {
            let hint = pitch_observation
                .filter(|observation| observation.voiced)
                .map(|observation| observation.f0_hz);
            let result = self
                .harmonic
                .as_mut()
                .map(|desc| desc.do_(&self.magnitudes, hint, time_sec).map(|_| ()));
            match result {
                Some(Ok(())) => self.harmonic_failures = 0,
                Some(Err(error)) => self.component_failure(ComponentKind::Harmonic, &error),
                None => {}
            }
        }

        if let (Some(scorer), Some(master)) = (&mut self.realtime, &self.master) {
            if let Some(frame) = self.mfcc.frames().last() {
                scorer.observe(frame, pitch_observation, &level, voiced, master.as_ref());
            }
        }

        self.frame_index += 1;
        Ok(())
    }

    /// Frame-local extractor errors are recovered by skipping the frame;
    /// two consecutive failures disable the component for the rest of the
    /// session (diagnosed in the summary, never fatal).
    fn component_failure(&mut self, kind: ComponentKind, error: &AnalysisError) {
        let counter = match kind {
            ComponentKind::Mfcc => &mut self.mfcc_failures,
            ComponentKind::Pitch => &mut self.pitch_failures,
            ComponentKind::Harmonic => &mut self.harmonic_failures,
            ComponentKind::Cadence => &mut self.cadence_failures,
            _ => return,
        };
        *counter += 1;
        let streak = *counter;
        warn!("session {}: {kind} failed ({streak} in a row): {error}", self.id);
        if streak >= FAILURE_DISABLE_STREAK && !self.disabled.contains(&kind) {
            self.disabled.push(kind);
            warn!("session {}: disabling {kind} after repeated failures", self.id);
        }
    }

    /// Finalize the attempt into an [`EnhancedSummary`]. Idempotent: a
    /// finalized session returns its stored summary unchanged.
    #[allow(clippy::too_many_lines, clippy::cast_possible_truncation)]
    pub(crate) fn finalize(&mut self) -> EngineResult<EnhancedSummary> {
        match self.state {
            SessionState::Finalized => {
                return self
                    .summary
                    .clone()
                    .ok_or_else(|| EngineError::Internal("finalized without summary".into()));
            }
            SessionState::Errored => return Err(EngineError::WrongState(self.state)),
            SessionState::Created | SessionState::Recording => {}
        }
        let master = self.master.clone().ok_or(EngineError::NoMasterCall)?;
        let started = Instant::now();

        self.tracker.finalize();
        let segments = self.tracker.segments().to_vec();

        let mut diagnostics = SummaryDiagnostics {
            dropped_samples: self.ring.dropped_samples(),
            disabled_components: self.disabled.iter().map(ToString::to_string).collect(),
            downgrade_events: self.downgrade_events,
            calibration: {
                let report = self.advisor.report();
                CalibrationAdvice {
                    headroom_db: report.headroom_db,
                    overload: report.overload,
                    low_level: report.low_level,
                }
            },
            ..SummaryDiagnostics::default()
        };

        if segments.is_empty() {
            diagnostics.no_voiced_audio = true;
            let mut summary = EnhancedSummary::empty(diagnostics);
            summary.components.loudness = LoudnessScores {
                rms_dbfs: self.loudness.long_term_rms_dbfs(),
                peak_dbfs: self.loudness.max_peak_dbfs(),
                normalization_gain_db: 0.,
            };
            summary.processing_time_ms = started.elapsed().as_secs_f32() * 1000.;
            self.state = SessionState::Finalized;
            self.finalized_at = Some(SystemTime::now());
            self.summary = Some(summary.clone());
            return Ok(summary);
        }

        let longest = segments
            .iter()
            .map(VoicedSegment::duration_sec)
            .fold(0., f32::max);
        if longest < SHORT_SEGMENT_SEC {
            diagnostics.short_voiced_audio = true;
        }

        let frame_period = self.config.frame_period_sec();
        let dtw_params = self.config.dtw_params();
        let scored = score_segments(
            &segments,
            self.mfcc.frames(),
            frame_period,
            &master.mfcc,
            &dtw_params,
        );
        let best_index = select_best(&scored)
            .ok_or_else(|| EngineError::Internal("segment selection on empty list".into()))?;
        let best = scored[best_index].segment;

        // Deadline-first behavior: when segment selection has already
        // consumed the finalize budget, skip trajectory re-scoring and
        // fall back to the streaming aggregates.
        let degraded = started.elapsed().as_secs_f32() * 1000. > self.config.finalize_budget_ms;
        diagnostics.degraded_finalize = degraded;

        let similarity = similarity_from_distance(scored[best_index].mfcc_distance, ALPHA_MFCC);
        let mfcc_outcome = self
            .component_active(ComponentKind::Mfcc)
            .then_some((similarity, best.confidence));

        let (pitch_outcome, pitch_scores) = self.pitch_block(&best, &master, degraded, &dtw_params);
        let (harmonic_outcome, harmonic_scores) =
            self.harmonic_block(&best, &master, degraded, &dtw_params);
        let (cadence_outcome, cadence_scores) = self.cadence_block(&best, &master, &dtw_params);

        let user_rms = self.loudness.long_term_rms_dbfs();
        let loudness_scores = LoudnessScores {
            rms_dbfs: user_rms,
            peak_dbfs: self.loudness.max_peak_dbfs(),
            normalization_gain_db: normalization_gain_db(master.long_term_rms_dbfs(), user_rms),
        };

        let outcomes = outcomes_from(
            &self.config.fusion_weights,
            mfcc_outcome,
            pitch_outcome,
            harmonic_outcome,
            cadence_outcome,
        );
        let (overall, mut confidence) = fuse(&outcomes);
        if diagnostics.short_voiced_audio {
            confidence *= 0.5;
        }

        let components = ComponentScores {
            mfcc: similarity,
            pitch: pitch_scores,
            harmonic: harmonic_scores,
            cadence: cadence_scores,
            loudness: loudness_scores,
        };
        let feedback = coaching_seeds(&components, &master);

        let segments_report: Vec<SegmentReport> = scored
            .iter()
            .enumerate()
            .map(|(index, entry)| SegmentReport {
                start_sec: entry.segment.start_sec,
                end_sec: entry.segment.end_sec,
                vad_confidence: entry.segment.confidence,
                mfcc_distance: entry.mfcc_distance,
                is_best: index == best_index,
            })
            .collect();

        let summary = EnhancedSummary {
            overall,
            similarity,
            confidence,
            grade: Grade::from_overall(overall),
            components,
            segments: segments_report,
            best_segment: Some(best_index),
            feedback,
            diagnostics,
            processing_time_ms: started.elapsed().as_secs_f32() * 1000.,
        };

        self.state = SessionState::Finalized;
        self.finalized_at = Some(SystemTime::now());
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    fn pitch_block(
        &self,
        best: &VoicedSegment,
        master: &MasterCallTemplate,
        degraded: bool,
        dtw_params: &huntmaster_analysis::DtwParams,
    ) -> (Option<(f32, f32)>, PitchScores) {
        if !self.component_active(ComponentKind::Pitch) {
            return (None, PitchScores::default());
        }
        let Some(desc) = &self.pitch else {
            return (None, PitchScores::default());
        };
        let Some(master_mean) = master.mean_f0_hz() else {
            // Toneless master: pitch cannot be judged at all
            return (None, PitchScores::default());
        };

        let contour = desc.smoothed_contour();
        let user: Vec<&PitchObservation> = contour
            .iter()
            .filter(|o| o.voiced && o.time_sec >= best.start_sec && o.time_sec < best.end_sec)
            .collect();
        if user.is_empty() {
            return (Some((0., 0.)), PitchScores::default());
        }
        let user_f0: Vec<f32> = user.iter().map(|o| o.f0_hz).collect();
        let user_mean = utils::mean(&user_f0);
        let user_confidence =
            utils::mean(&user.iter().map(|o| o.confidence).collect::<Vec<f32>>());

        let distance = if degraded {
            f64::from((user_mean / master_mean - 1.).abs())
        } else {
            let user_ratio: Vec<f32> = user_f0.iter().map(|f0| f0 / master_mean).collect();
            let master_ratio: Vec<f32> = master
                .pitch
                .iter()
                .filter(|p| p.f0_hz > 0.)
                .map(|p| p.f0_hz / master_mean)
                .collect();
            dtw_distance_scalar(&user_ratio, &master_ratio, dtw_params)
                .unwrap_or(dtw_params.early_stop)
        };
        let score = similarity_from_distance(distance, ALPHA_PITCH);
        (
            Some((score, user_confidence)),
            PitchScores {
                score,
                f0_mean_hz: user_mean,
                confidence: user_confidence,
            },
        )
    }

    fn harmonic_block(
        &self,
        best: &VoicedSegment,
        master: &MasterCallTemplate,
        degraded: bool,
        dtw_params: &huntmaster_analysis::DtwParams,
    ) -> (Option<(f32, f32)>, HarmonicScores) {
        if !self.component_active(ComponentKind::Harmonic) {
            return (None, HarmonicScores::default());
        }
        let Some(desc) = &self.harmonic else {
            return (None, HarmonicScores::default());
        };
        let master_mean = master.mean_centroid_hz();
        if master_mean <= 0. {
            return (None, HarmonicScores::default());
        }

        let user: Vec<(f32, f32)> = desc
            .observations()
            .iter()
            .filter(|o| {
                o.confidence > 0. && o.time_sec >= best.start_sec && o.time_sec < best.end_sec
            })
            .map(|o| (o.centroid_hz, o.confidence))
            .collect();
        if user.is_empty() {
            return (Some((0., 0.)), HarmonicScores::default());
        }
        let centroids: Vec<f32> = user.iter().map(|&(centroid, _)| centroid).collect();
        let confidences: Vec<f32> = user.iter().map(|&(_, confidence)| confidence).collect();
        let user_mean = utils::mean(&centroids);
        let user_confidence = utils::mean(&confidences);

        let distance = if degraded {
            f64::from((user_mean / master_mean - 1.).abs())
        } else {
            let user_ratio: Vec<f32> = centroids.iter().map(|c| c / master_mean).collect();
            let master_ratio: Vec<f32> = master
                .harmonics
                .iter()
                .filter(|p| p.confidence > 0.)
                .map(|p| p.centroid_hz / master_mean)
                .collect();
            if master_ratio.is_empty() {
                dtw_params.early_stop
            } else {
                dtw_distance_scalar(&user_ratio, &master_ratio, dtw_params)
                    .unwrap_or(dtw_params.early_stop)
            }
        };
        let score = similarity_from_distance(distance, ALPHA_HARMONIC);
        (
            Some((score, user_confidence)),
            HarmonicScores {
                score,
                spectral_centroid_hz: user_mean,
                formants_hz: desc.mean_formants_hz(),
                confidence: user_confidence,
            },
        )
    }

    fn cadence_block(
        &self,
        best: &VoicedSegment,
        master: &MasterCallTemplate,
        dtw_params: &huntmaster_analysis::DtwParams,
    ) -> (Option<(f32, f32)>, CadenceScores) {
        if !self.component_active(ComponentKind::Cadence) {
            return (None, CadenceScores::default());
        }
        let Some(desc) = &self.cadence else {
            return (None, CadenceScores::default());
        };

        // Onsets near the segment, with half a refractory of slack at the
        // front so an attack straddling the boundary still counts.
        let user_onsets: Vec<f32> = desc
            .onsets_sec()
            .iter()
            .copied()
            .filter(|&t| t >= best.start_sec - 0.05 && t <= best.end_sec)
            .collect();

        let duration = best.duration_sec().max(1e-3);
        let score = match (user_onsets.is_empty(), master.onsets_sec.is_empty()) {
            (true, true) => 1.,
            (true, false) | (false, true) => 0.3,
            (false, false) => {
                let user_scaled: Vec<f32> = user_onsets
                    .iter()
                    .map(|&t| ((t - best.start_sec) / duration).clamp(0., 1.))
                    .collect();
                let master_scaled: Vec<f32> = master
                    .onsets_sec
                    .iter()
                    .map(|&t| (t / master.duration_sec.max(1e-3)).clamp(0., 1.))
                    .collect();
                let distance = dtw_distance_scalar(&user_scaled, &master_scaled, dtw_params)
                    .unwrap_or(dtw_params.early_stop);
                similarity_from_distance(distance, ALPHA_CADENCE)
            }
        };

        let tempo = desc.tempo();
        let alignment_offset_sec = match (user_onsets.first(), master.onsets_sec.first()) {
            (Some(&user_first), Some(&master_first)) => Some(user_first - master_first),
            _ => None,
        };
        let rhythm_strength = tempo.map_or(0., |t| t.rhythm_strength);
        let confidence = if user_onsets.is_empty() {
            0.3
        } else {
            rhythm_strength.max(0.3)
        };
        (
            Some((score, confidence)),
            CadenceScores {
                score,
                tempo_bpm: tempo.map_or(0., |t| t.bpm),
                rhythm_strength,
                alignment_offset_sec,
            },
        )
    }

    /// The stored summary of a finalized session.
    pub(crate) fn summary(&self) -> EngineResult<EnhancedSummary> {
        if self.state != SessionState::Finalized {
            return Err(EngineError::WrongState(self.state));
        }
        self.summary
            .clone()
            .ok_or_else(|| EngineError::Internal("finalized without summary".into()))
    }

    /// Return to `Created`, keeping the configuration and master binding.
    pub(crate) fn reset(&mut self) {
        self.state = SessionState::Created;
        self.ring.clear();
        self.mfcc.reset();
        if let Some(desc) = &mut self.pitch {
            desc.reset();
        }
        if let Some(desc) = &mut self.harmonic {
            desc.reset();
        }
        if let Some(desc) = &mut self.cadence {
            desc.reset();
        }
        self.loudness.reset();
        self.tracker.reset();
        self.advisor.reset();
        if let Some(scorer) = &mut self.realtime {
            scorer.reset();
        }
        self.frame_index = 0;
        self.first_audio_at = None;
        self.finalized_at = None;
        self.over_budget_streak = 0;
        self.downgrade_events = 0;
        self.quality_tier = 0;
        self.disabled.clear();
        self.mfcc_failures = 0;
        self.pitch_failures = 0;
        self.harmonic_failures = 0;
        self.cadence_failures = 0;
        self.summary = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntmaster_analysis::utils::sine_wave;

    fn test_config() -> SessionConfig {
        SessionConfig {
            // Keep budget pressure out of unit tests
            chunk_budget_ms: 10_000.,
            finalize_budget_ms: 10_000.,
            ..SessionConfig::default()
        }
    }

    fn session_with_master(config: &SessionConfig) -> Session {
        let master = Arc::new(
            MasterCallTemplate::from_samples(
                "m",
                &sine_wave(440., 2.0, 44_100, 0.5),
                44_100,
                config,
            )
            .unwrap(),
        );
        let mut session =
            Session::new(SessionId::new(1), config.clone(), Arc::new(RealtimeShared::new()))
                .unwrap();
        session.set_master(&master).unwrap();
        session
    }

    #[test]
    fn test_state_machine_happy_path() {
        let config = test_config();
        let mut session = session_with_master(&config);
        assert_eq!(session.state(), SessionState::Created);

        session
            .process_chunk(&sine_wave(440., 0.1, 44_100, 0.5))
            .unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert!(session.first_audio_at().is_some());

        session.finalize().unwrap();
        assert_eq!(session.state(), SessionState::Finalized);

        // Mutations now rejected
        assert!(matches!(
            session.process_chunk(&[0.1, 0.2]),
            Err(EngineError::WrongState(SessionState::Finalized))
        ));
    }

    #[test]
    fn test_set_master_only_in_created() {
        let config = test_config();
        let mut session = session_with_master(&config);
        session
            .process_chunk(&sine_wave(440., 0.1, 44_100, 0.5))
            .unwrap();
        let other = Arc::new(
            MasterCallTemplate::from_samples(
                "other",
                &sine_wave(660., 0.5, 44_100, 0.5),
                44_100,
                &config,
            )
            .unwrap(),
        );
        assert!(matches!(
            session.set_master(&other),
            Err(EngineError::WrongState(SessionState::Recording))
        ));
    }

    #[test]
    fn test_finalize_without_master() {
        let config = test_config();
        let mut session =
            Session::new(SessionId::new(7), config, Arc::new(RealtimeShared::new())).unwrap();
        assert_eq!(session.finalize().unwrap_err(), EngineError::NoMasterCall);
    }

    #[test]
    fn test_bad_chunks_rejected_without_state_change() {
        let config = test_config();
        let mut session = session_with_master(&config);
        assert!(matches!(
            session.process_chunk(&[]),
            Err(EngineError::InvalidAudioData(_))
        ));
        assert!(matches!(
            session.process_chunk(&[0.0, f32::NAN]),
            Err(EngineError::InvalidAudioData(_))
        ));
        assert!(matches!(
            session.process_chunk(&vec![0.0; MAX_CHUNK_SAMPLES + 1]),
            Err(EngineError::InvalidAudioData(_))
        ));
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_empty_session_finalizes_to_zero_summary() {
        let config = test_config();
        let mut session = session_with_master(&config);
        let summary = session.finalize().unwrap();
        assert!(summary.diagnostics.no_voiced_audio);
        assert_eq!(summary.overall, 0.);
        assert_eq!(summary.grade, Grade::F);
        assert!(summary.segments.is_empty());
        assert_eq!(summary.best_segment, None);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let config = test_config();
        let mut session = session_with_master(&config);
        session
            .process_chunk(&sine_wave(440., 0.5, 44_100, 0.5)[..16_000])
            .unwrap();
        let first = session.finalize().unwrap();
        let second = session.finalize().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_returns_to_created_and_keeps_master() {
        let config = test_config();
        let mut session = session_with_master(&config);
        session
            .process_chunk(&sine_wave(440., 0.2, 44_100, 0.5)[..8_000])
            .unwrap();
        session.finalize().unwrap();

        session.reset();
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.frames_processed(), 0);
        assert!(session.master.is_some());
        assert!(session.summary().is_err());

        // Fully usable again
        session
            .process_chunk(&sine_wave(440., 0.2, 44_100, 0.5)[..8_000])
            .unwrap();
        session.finalize().unwrap();
    }

    #[test]
    fn test_downgrade_ladder_order() {
        let config = test_config();
        let mut session = session_with_master(&config);
        session.downgrade();
        assert!(!session.component_active(ComponentKind::Harmonic));
        assert!(session.component_active(ComponentKind::Cadence));
        session.downgrade();
        assert!(!session.component_active(ComponentKind::Cadence));
        assert!(session.component_active(ComponentKind::Pitch));
        session.downgrade();
        assert!(!session.component_active(ComponentKind::Pitch));
        assert_eq!(session.downgrade_events, 3);
        // The ladder bottoms out
        session.downgrade();
        assert_eq!(session.downgrade_events, 3);
    }

    #[test]
    fn test_component_failure_disables_after_streak() {
        let config = test_config();
        let mut session = session_with_master(&config);
        let error = AnalysisError::EmptySamples;
        session.component_failure(ComponentKind::Pitch, &error);
        assert!(session.component_active(ComponentKind::Pitch));
        session.component_failure(ComponentKind::Pitch, &error);
        assert!(!session.component_active(ComponentKind::Pitch));
    }
}
