//! Persisted master-call feature bundles.
//!
//! Little-endian `HMMC` v1 layout: a fixed header (magic, version, sample
//! rate, MFCC dimensions, frame grid, duration), the MFCC matrix, the
//! pitch contour, the harmonic trajectory, the cadence profile, the
//! loudness envelope, and a trailing CRC32 over every preceding byte.
//! Readers reject unknown magic and any version above their maximum;
//! versions below it get field-default migrations.

use crate::error::{EngineError, EngineResult};
use crate::master::{LoudnessPoint, MasterCallTemplate, PitchPoint, TrajectoryPoint};

pub const MAGIC: &[u8; 4] = b"HMMC";
/// Highest bundle version this reader understands.
pub const MAX_VERSION: u32 = 1;

/// Serialize a template to its binary bundle form.
#[must_use]
pub fn write(template: &MasterCallTemplate) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(
        36 + template.mfcc.len() * template.mfcc.first().map_or(0, Vec::len) * 4,
    );
    bytes.extend_from_slice(MAGIC);
    put_u32(&mut bytes, MAX_VERSION);
    put_u32(&mut bytes, template.sample_rate);
    put_u32(&mut bytes, u32::try_from(template.mfcc.len()).unwrap_or(u32::MAX));
    let coefficients = template.mfcc.first().map_or(0, Vec::len);
    put_u32(&mut bytes, u32::try_from(coefficients).unwrap_or(u32::MAX));
    put_u32(&mut bytes, template.hop_samples);
    put_u32(&mut bytes, template.frame_samples);
    put_f32(&mut bytes, template.duration_sec);

    for frame in &template.mfcc {
        for &coefficient in frame {
            put_f32(&mut bytes, coefficient);
        }
    }

    put_u32(&mut bytes, u32::try_from(template.pitch.len()).unwrap_or(u32::MAX));
    for point in &template.pitch {
        put_f32(&mut bytes, point.time_sec);
        put_f32(&mut bytes, point.f0_hz);
        put_f32(&mut bytes, point.confidence);
    }

    put_u32(&mut bytes, u32::try_from(template.harmonics.len()).unwrap_or(u32::MAX));
    for point in &template.harmonics {
        put_f32(&mut bytes, point.time_sec);
        put_f32(&mut bytes, point.centroid_hz);
        put_f32(&mut bytes, point.confidence);
    }

    put_u32(&mut bytes, u32::try_from(template.onsets_sec.len()).unwrap_or(u32::MAX));
    for &onset in &template.onsets_sec {
        put_f32(&mut bytes, onset);
    }
    put_f32(&mut bytes, template.tempo_bpm);
    put_f32(&mut bytes, template.rhythm_strength);

    put_u32(&mut bytes, u32::try_from(template.loudness.len()).unwrap_or(u32::MAX));
    for point in &template.loudness {
        put_f32(&mut bytes, point.time_sec);
        put_f32(&mut bytes, point.rms_dbfs);
        put_f32(&mut bytes, point.peak_dbfs);
    }

    let checksum = crc32fast::hash(&bytes);
    put_u32(&mut bytes, checksum);
    bytes
}

/// Parse a bundle. The template id is supplied by the caller since the
/// registry key, not the blob, names the master.
///
/// # Errors
///
/// Returns `InvalidBundle` for bad magic, an unsupported version, a CRC
/// mismatch, or truncation.
pub fn read(bytes: &[u8], id: impl Into<String>) -> EngineResult<MasterCallTemplate> {
    if bytes.len() < 36 {
        return Err(EngineError::InvalidBundle(format!(
            "{} bytes is shorter than the fixed header",
            bytes.len()
        )));
    }
    let (payload, tail) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes(tail.try_into().expect("4-byte tail"));
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(EngineError::InvalidBundle(format!(
            "CRC mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }

    let mut reader = Reader { bytes: payload, position: 0 };
    let magic = reader.take(4)?;
    if magic != MAGIC {
        return Err(EngineError::InvalidBundle("unknown magic".into()));
    }
    let version = reader.u32()?;
    if version == 0 || version > MAX_VERSION {
        return Err(EngineError::InvalidBundle(format!(
            "unsupported version {version}, max {MAX_VERSION}"
        )));
    }

    let sample_rate = reader.u32()?;
    let frame_count = reader.u32()? as usize;
    let coefficients = reader.u32()? as usize;
    let hop_samples = reader.u32()?;
    let frame_samples = reader.u32()?;
    let duration_sec = reader.f32()?;
    if sample_rate == 0 {
        return Err(EngineError::InvalidBundle("zero sample rate".into()));
    }

    let matrix_bytes = frame_count
        .checked_mul(coefficients)
        .and_then(|cells| cells.checked_mul(4))
        .ok_or_else(|| EngineError::InvalidBundle("MFCC matrix size overflows".into()))?;
    reader.ensure(matrix_bytes)?;
    let mut mfcc = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let mut frame = Vec::with_capacity(coefficients);
        for _ in 0..coefficients {
            frame.push(reader.f32()?);
        }
        mfcc.push(frame);
    }

    let pitch_count = reader.u32()? as usize;
    reader.ensure(pitch_count * 12)?;
    let mut pitch = Vec::with_capacity(pitch_count);
    for _ in 0..pitch_count {
        pitch.push(PitchPoint {
            time_sec: reader.f32()?,
            f0_hz: reader.f32()?,
            confidence: reader.f32()?,
        });
    }

    let harmonic_count = reader.u32()? as usize;
    reader.ensure(harmonic_count * 12)?;
    let mut harmonics = Vec::with_capacity(harmonic_count);
    for _ in 0..harmonic_count {
        harmonics.push(TrajectoryPoint {
            time_sec: reader.f32()?,
            centroid_hz: reader.f32()?,
            confidence: reader.f32()?,
        });
    }

    let onset_count = reader.u32()? as usize;
    reader.ensure(onset_count * 4 + 8)?;
    let mut onsets_sec = Vec::with_capacity(onset_count);
    for _ in 0..onset_count {
        onsets_sec.push(reader.f32()?);
    }
    let tempo_bpm = reader.f32()?;
    let rhythm_strength = reader.f32()?;

    let loudness_count = reader.u32()? as usize;
    reader.ensure(loudness_count * 12)?;
    let mut loudness = Vec::with_capacity(loudness_count);
    for _ in 0..loudness_count {
        loudness.push(LoudnessPoint {
            time_sec: reader.f32()?,
            rms_dbfs: reader.f32()?,
            peak_dbfs: reader.f32()?,
        });
    }

    if reader.position != payload.len() {
        return Err(EngineError::InvalidBundle(format!(
            "{} trailing bytes after the loudness envelope",
            payload.len() - reader.position
        )));
    }

    Ok(MasterCallTemplate {
        id: id.into(),
        sample_rate,
        frame_samples,
        hop_samples,
        duration_sec,
        mfcc,
        pitch,
        harmonics,
        // The v1 layout does not carry formants; they exist only on
        // templates built from PCM.
        formants_hz: Vec::new(),
        onsets_sec,
        tempo_bpm,
        rhythm_strength,
        loudness,
    })
}

fn put_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn put_f32(bytes: &mut Vec<u8>, value: f32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn ensure(&self, len: usize) -> EngineResult<()> {
        if self.bytes.len().saturating_sub(self.position) < len {
            return Err(EngineError::InvalidBundle(format!(
                "truncated at byte {}: need {len} more",
                self.position
            )));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> EngineResult<&'a [u8]> {
        self.ensure(len)?;
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn u32(&mut self) -> EngineResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn f32(&mut self) -> EngineResult<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }
}
