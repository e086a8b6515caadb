//! End-to-end scoring scenarios over synthesized fixtures.
//!
//! All scenarios run at 44.1 kHz with 1024-sample frames and a 512-sample
//! hop. Fixtures are generated in-code: pure tones, chirps, deterministic
//! white noise and burst patterns.

use std::f32::consts::PI;

use huntmaster_engine::{
    Engine, EngineError, Grade, MasterCallTemplate, SessionConfig, SessionId,
};

const SAMPLE_RATE: u32 = 44_100;

fn config() -> SessionConfig {
    SessionConfig {
        // Generous budgets so debug builds never trip the quality ladder
        chunk_budget_ms: 10_000.,
        finalize_budget_ms: 10_000.,
        ..SessionConfig::default()
    }
}

fn sine(frequency_hz: f32, duration_sec: f32, amplitude: f32) -> Vec<f32> {
    let count = (duration_sec * SAMPLE_RATE as f32) as usize;
    (0..count)
        .map(|i| amplitude * (2. * PI * frequency_hz * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

/// Linear chirp with a phase-continuous sweep.
fn chirp(start_hz: f32, end_hz: f32, duration_sec: f32, amplitude: f32) -> Vec<f32> {
    let count = (duration_sec * SAMPLE_RATE as f32) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let phase = 2. * PI * (start_hz * t + (end_hz - start_hz) * t * t / (2. * duration_sec));
            amplitude * phase.sin()
        })
        .collect()
}

fn white_noise(duration_sec: f32, amplitude: f32) -> Vec<f32> {
    let count = (duration_sec * SAMPLE_RATE as f32) as usize;
    let mut state = 0x1234_5678u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amplitude * ((state as f64 / u32::MAX as f64) as f32 * 2. - 1.)
        })
        .collect()
}

/// Silence with `burst` pasted in at each given start time.
fn bursts(duration_sec: f32, burst: &[f32], starts_sec: &[f32]) -> Vec<f32> {
    let mut samples = vec![0.0f32; (duration_sec * SAMPLE_RATE as f32) as usize];
    for &start in starts_sec {
        let offset = (start * SAMPLE_RATE as f32) as usize;
        for (i, &value) in burst.iter().enumerate() {
            if offset + i < samples.len() {
                samples[offset + i] = value;
            }
        }
    }
    samples
}

fn engine_with(master_pcm: &[f32]) -> Engine {
    let engine = Engine::with_threads(2).unwrap();
    let template =
        MasterCallTemplate::from_samples("master", master_pcm, SAMPLE_RATE, &config()).unwrap();
    engine.load_master_call(template);
    engine
}

fn run_session(engine: &Engine, user_pcm: &[f32], chunk: usize) -> SessionId {
    let session = engine.create_session(config()).unwrap();
    engine.set_master_call(session, "master").unwrap();
    for piece in user_pcm.chunks(chunk) {
        engine.process_audio_chunk(session, piece).unwrap();
    }
    session
}

fn score(engine: &Engine, user_pcm: &[f32]) -> huntmaster_engine::EnhancedSummary {
    let session = run_session(engine, user_pcm, 4096);
    engine.finalize_session_analysis(session).unwrap()
}

#[test]
fn scenario_1_sine_against_itself() {
    let master = sine(440., 2.0, 0.5);
    let engine = engine_with(&master);
    let summary = score(&engine, &master);

    assert!(summary.overall >= 0.95, "overall {}", summary.overall);
    assert_eq!(summary.grade, Grade::A);
    let f0 = summary.components.pitch.f0_mean_hz;
    assert!((439.5..=440.5).contains(&f0), "f0 {f0}");
    assert!(
        summary.components.harmonic.confidence >= 0.8,
        "harmonic confidence {}",
        summary.components.harmonic.confidence
    );
    assert_eq!(summary.segments.len(), 1);
    let segment = &summary.segments[0];
    assert!(
        segment.end_sec - segment.start_sec >= 1.8,
        "segment {:.2}..{:.2}",
        segment.start_sec,
        segment.end_sec
    );
    assert!(segment.is_best);
}

#[test]
fn scenario_2_octave_error() {
    let engine = engine_with(&sine(440., 2.0, 0.5));
    let summary = score(&engine, &sine(880., 2.0, 0.5));

    assert!(
        summary.components.pitch.score <= 0.5,
        "pitch score {}",
        summary.components.pitch.score
    );
    assert!(summary.overall <= 0.7, "overall {}", summary.overall);
    assert!(summary.grade <= Grade::C, "grade {}", summary.grade);

    let template = MasterCallTemplate::from_samples(
        "probe",
        &sine(440., 2.0, 0.5),
        SAMPLE_RATE,
        &config(),
    )
    .unwrap();
    let master_f0 = template.mean_f0_hz().unwrap();
    let ratio = summary.components.pitch.f0_mean_hz / master_f0;
    assert!((1.99..=2.01).contains(&ratio), "ratio {ratio}");
}

#[test]
fn scenario_3_noise_against_tone() {
    let engine = engine_with(&sine(440., 2.0, 0.5));
    let summary = score(&engine, &white_noise(2.0, 0.5));

    assert!(summary.overall <= 0.3, "overall {}", summary.overall);
    assert_eq!(summary.grade, Grade::F);
    assert!(
        summary.components.harmonic.confidence < 0.2,
        "harmonic confidence {}",
        summary.components.harmonic.confidence
    );
}

#[test]
fn scenario_4_offset_chirp_warps() {
    let master = chirp(200., 1000., 3.0, 0.5);
    let engine = engine_with(&master);

    // The same chirp arriving 100 ms late
    let mut user = vec![0.0f32; (0.1 * SAMPLE_RATE as f32) as usize];
    user.extend_from_slice(&master);
    let summary = score(&engine, &user);

    assert!(summary.overall >= 0.85, "overall {}", summary.overall);
    assert!(summary.grade >= Grade::B, "grade {}", summary.grade);
    let offset = summary
        .components
        .cadence
        .alignment_offset_sec
        .expect("offset should be reported");
    assert!(
        (offset - 0.1).abs() <= 0.01,
        "offset {offset} not within 10% of 100 ms"
    );
}

#[test]
fn scenario_5_silence() {
    let engine = engine_with(&sine(440., 2.0, 0.5));
    let summary = score(&engine, &vec![0.0f32; 2 * SAMPLE_RATE as usize]);

    assert!(summary.diagnostics.no_voiced_audio);
    assert_eq!(summary.overall, 0.);
    assert_eq!(summary.grade, Grade::F);
    assert!(summary.segments.is_empty());
    assert_eq!(summary.best_segment, None);
    assert_eq!(summary.confidence, 0.);
}

#[test]
fn scenario_6_segment_selector_picks_matching_burst() {
    let master_burst = sine(440., 0.3, 0.5);
    let engine = engine_with(&master_burst);

    // Burst one (880 Hz, the decoy) at 500 ms; burst two (440 Hz, the
    // match) at 1400 ms
    let decoy = sine(880., 0.3, 0.5);
    let mut user = bursts(2.2, &decoy, &[0.5]);
    let matching = bursts(2.2, &sine(440., 0.3, 0.5), &[1.4]);
    for (slot, &value) in user.iter_mut().zip(&matching) {
        if value != 0. {
            *slot = value;
        }
    }
    let summary = score(&engine, &user);

    assert_eq!(summary.segments.len(), 2, "{:?}", summary.segments);
    let best = summary.best_segment.expect("one best segment");
    let winner = &summary.segments[best];
    let loser = &summary.segments[1 - best];
    assert!(!loser.is_best);
    assert!(winner.mfcc_distance <= loser.mfcc_distance);
    assert!(
        (winner.start_sec - 1.4).abs() <= 0.010,
        "winner starts at {}",
        winner.start_sec
    );
}

#[test]
fn concatenation_invariance() {
    let engine = engine_with(&sine(440., 1.0, 0.5));
    let user = sine(440., 1.0, 0.45);

    let bulk = score(&engine, &user);
    let session = run_session(&engine, &user, 441);
    let small = engine.finalize_session_analysis(session).unwrap();

    assert!((bulk.overall - small.overall).abs() < 1e-4);
    assert!((bulk.similarity - small.similarity).abs() < 1e-4);
    assert!(
        (bulk.components.pitch.f0_mean_hz - small.components.pitch.f0_mean_hz).abs() < 1e-2
    );
    assert_eq!(bulk.segments.len(), small.segments.len());
}

#[test]
fn single_sample_chunks_match_bulk() {
    let engine = engine_with(&sine(440., 0.5, 0.5));
    let user = sine(440., 0.3, 0.45);

    let bulk = score(&engine, &user);
    let session = run_session(&engine, &user, 1);
    let tiny = engine.finalize_session_analysis(session).unwrap();

    assert!((bulk.overall - tiny.overall).abs() < 1e-4);
    assert!((bulk.similarity - tiny.similarity).abs() < 1e-4);
}

#[test]
fn finalize_is_idempotent_through_engine() {
    let engine = engine_with(&sine(440., 1.0, 0.5));
    let session = run_session(&engine, &sine(440., 1.0, 0.5), 4096);
    let first = engine.finalize_session_analysis(session).unwrap();
    let second = engine.finalize_session_analysis(session).unwrap();
    assert_eq!(first, second);
}

#[test]
fn determinism_across_engines() {
    let user = sine(523.25, 1.5, 0.4);
    let master = sine(523.25, 1.5, 0.5);

    let first = score(&engine_with(&master), &user);
    let second = score(&engine_with(&master), &user);

    // Identical bytes, config and master: identical feature outputs
    assert_eq!(first.overall.to_bits(), second.overall.to_bits());
    assert_eq!(first.similarity.to_bits(), second.similarity.to_bits());
    assert_eq!(first.components, second.components);
    assert_eq!(first.segments, second.segments);
}

#[test]
fn master_rate_mismatch_is_retimed() {
    // Master recorded at 48 kHz, session runs at 44.1 kHz. The contours
    // carry absolute timestamps and survive re-timing exactly; the MFCC
    // grid is interpolated deterministically (the mel bank itself is
    // rate-dependent, so the timbre component is the loosest here).
    let count = (2.0 * 48_000.) as usize;
    let master_48k: Vec<f32> = (0..count)
        .map(|i| 0.5 * (2. * PI * 440. * i as f32 / 48_000.).sin())
        .collect();
    let template =
        MasterCallTemplate::from_samples("master", &master_48k, 48_000, &config()).unwrap();

    let engine = Engine::with_threads(2).unwrap();
    engine.load_master_call(template.clone());
    let summary = score(&engine, &sine(440., 2.0, 0.5));

    assert!(summary.overall >= 0.55, "overall {}", summary.overall);
    let f0 = summary.components.pitch.f0_mean_hz;
    assert!((f0 - 440.).abs() < 1., "f0 {f0}");
    assert!(
        summary.components.pitch.score >= 0.9,
        "pitch score {}",
        summary.components.pitch.score
    );

    // Re-timing is deterministic: a second run is bit-identical
    let engine2 = Engine::with_threads(2).unwrap();
    engine2.load_master_call(template);
    let again = score(&engine2, &sine(440., 2.0, 0.5));
    assert_eq!(summary.overall.to_bits(), again.overall.to_bits());
    assert_eq!(summary.components, again.components);
}

#[test]
fn bundle_round_trip_through_engine() {
    let template =
        MasterCallTemplate::from_samples("master", &sine(440., 1.0, 0.5), SAMPLE_RATE, &config())
            .unwrap();
    let bytes = huntmaster_engine::bundle::write(&template);

    let engine = Engine::with_threads(1).unwrap();
    engine.load_master_bundle("master", &bytes).unwrap();
    let summary = score(&engine, &sine(440., 1.0, 0.5));
    assert!(summary.overall >= 0.95, "overall {}", summary.overall);

    assert!(matches!(
        engine.load_master_bundle("broken", &bytes[..40]),
        Err(EngineError::InvalidBundle(_))
    ));
}

#[test]
fn grade_monotonicity_over_scenarios() {
    let master = sine(440., 2.0, 0.5);
    let engine = engine_with(&master);
    let perfect = score(&engine, &master);
    let octave = score(&engine, &sine(880., 2.0, 0.5));
    let noise = score(&engine, &white_noise(2.0, 0.5));

    assert!(perfect.overall >= octave.overall);
    assert!(octave.overall >= noise.overall);
    assert!(perfect.grade >= octave.grade);
    assert!(octave.grade >= noise.grade);
}
