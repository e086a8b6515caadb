//! Grade a synthesized practice attempt against a synthesized master call.
//!
//! Run with `cargo run --example practice_demo -p huntmaster-engine`.

use std::f32::consts::PI;

use huntmaster_engine::{Engine, EngineResult, MasterCallTemplate, SessionConfig};

const SAMPLE_RATE: u32 = 44_100;

/// A two-note "grunt" pattern: a low burst, a pause, a higher burst.
fn grunt_pattern(f1: f32, f2: f32) -> Vec<f32> {
    let mut samples = Vec::new();
    samples.extend(tone(f1, 0.4));
    samples.extend(std::iter::repeat_n(0.0f32, (0.3 * SAMPLE_RATE as f32) as usize));
    samples.extend(tone(f2, 0.5));
    samples
}

fn tone(frequency_hz: f32, duration_sec: f32) -> Vec<f32> {
    let count = (duration_sec * SAMPLE_RATE as f32) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            // Soft attack and release so the bursts read as calls, not clicks
            let envelope = (t * 40.).min(1.).min((duration_sec - t) * 40.).max(0.);
            0.5 * envelope * (2. * PI * frequency_hz * t).sin()
        })
        .collect()
}

fn main() -> EngineResult<()> {
    let engine = Engine::new()?;
    let config = SessionConfig::default();

    let master_pcm = grunt_pattern(220., 330.);
    engine.load_master_call(MasterCallTemplate::from_samples(
        "doe-grunt",
        &master_pcm,
        SAMPLE_RATE,
        &config,
    )?);

    // The "user" is a touch sharp on the second note
    let attempt = grunt_pattern(220., 345.);

    let session = engine.create_session(config)?;
    engine.set_master_call(session, "doe-grunt")?;
    for chunk in attempt.chunks(4096) {
        engine.process_audio_chunk(session, chunk)?;
        if let Ok(live) = engine.get_realtime_similarity(session) {
            if live.ready {
                println!("live similarity: {:.2}", live.score);
            }
        }
    }

    let summary = engine.finalize_session_analysis(session)?;
    println!();
    println!("grade:      {} ({:.0}%)", summary.grade, summary.overall * 100.);
    println!("confidence: {:.2}", summary.confidence);
    println!("pitch:      {:.2} (f0 {:.1} Hz)", summary.components.pitch.score, summary.components.pitch.f0_mean_hz);
    println!("harmonic:   {:.2}", summary.components.harmonic.score);
    println!("cadence:    {:.2} ({:.0} BPM)", summary.components.cadence.score, summary.components.cadence.tempo_bpm);
    println!("loudness:   {:.1} dBFS (gain {:+.1} dB)", summary.components.loudness.rms_dbfs, summary.components.loudness.normalization_gain_db);
    for strength in &summary.feedback.strengths {
        println!("strength:    {strength}");
    }
    for improvement in &summary.feedback.improvements {
        println!("improvement: {improvement}");
    }
    for tip in &summary.feedback.tips {
        println!("tip:         {tip}");
    }

    engine.destroy_session(session)?;
    Ok(())
}
