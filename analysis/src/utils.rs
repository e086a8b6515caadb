use std::f32::consts::PI;

/// Any level at or below this is treated as digital silence.
pub const DBFS_FLOOR: f32 = -100.0;

/// Values below this magnitude are flushed to zero before entering the FFT,
/// so subnormal arithmetic never reaches the transform.
pub const DENORMAL_THRESHOLD: f32 = 1e-30;

#[allow(clippy::cast_precision_loss)]
#[must_use]
#[inline]
pub fn mean(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    input.iter().sum::<f32>() / input.len() as f32
}

/// Root-mean-square of a window, accumulated in f64 to avoid drift on
/// long windows.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
#[inline]
pub fn rms(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    let sum_squares: f64 = input.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    ((sum_squares / input.len() as f64).sqrt()) as f32
}

/// Convert a linear amplitude in [0, 1] to dBFS, floored at [`DBFS_FLOOR`].
#[must_use]
#[inline]
pub fn amplitude_to_dbfs(amplitude: f32) -> f32 {
    if amplitude <= 0. {
        return DBFS_FLOOR;
    }
    (20.0 * amplitude.log10()).max(DBFS_FLOOR)
}

#[must_use]
#[inline]
pub fn has_non_finite(samples: &[f32]) -> bool {
    samples.iter().any(|s| !s.is_finite())
}

/// Spectral flatness of a magnitude spectrum: geometric mean over arithmetic
/// mean, accumulated in the log domain. Tone-like spectra approach 0, white
/// noise approaches 1.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
pub fn spectral_flatness(magnitudes: &[f32]) -> f32 {
    if magnitudes.is_empty() {
        return 0.;
    }
    let mut log_sum = 0.0f64;
    let mut sum = 0.0f64;
    for &m in magnitudes {
        let m = f64::from(m).max(1e-12);
        log_sum += m.ln();
        sum += m;
    }
    let n = magnitudes.len() as f64;
    let geometric = (log_sum / n).exp();
    let arithmetic = sum / n;
    if arithmetic <= 0. {
        return 0.;
    }
    ((geometric / arithmetic) as f32).clamp(0., 1.)
}

/// Median filter of odd length `k` with clamped edges. `k <= 1` returns the
/// input unchanged.
#[must_use]
pub fn median_filter(values: &[f32], k: usize) -> Vec<f32> {
    if k <= 1 || values.len() < 2 {
        return values.to_vec();
    }
    debug_assert!(k % 2 == 1, "median filter length must be odd");
    let half = k / 2;
    let mut out = Vec::with_capacity(values.len());
    let mut window = Vec::with_capacity(k);
    for i in 0..values.len() {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(values.len());
        window.clear();
        window.extend_from_slice(&values[lo..hi]);
        window.sort_unstable_by(f32::total_cmp);
        out.push(window[window.len() / 2]);
    }
    out
}

/// Parabolic interpolation over three equally spaced samples around a local
/// extremum. Returns the sub-sample offset from the center, clamped to
/// [-0.5, 0.5]; a flat neighborhood yields 0.
#[must_use]
#[inline]
pub fn parabolic_interpolation(left: f32, center: f32, right: f32) -> f32 {
    let denominator = 2.0f32.mul_add(center, -left) - right;
    if denominator.abs() < f32::EPSILON {
        return 0.;
    }
    (0.5 * (right - left) / denominator).clamp(-0.5, 0.5)
}

/// A test tone. Used by fixture-generating tests across the workspace.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn sine_wave(frequency_hz: f32, duration_sec: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let count = (duration_sec * sample_rate as f32) as usize;
    (0..count)
        .map(|i| amplitude * (2. * PI * frequency_hz * i as f32 / sample_rate as f32).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_mean() {
        let numbers = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let mean = mean(&numbers);
        assert!(f32::EPSILON > (2.0 - mean).abs(), "{mean} !~= 2.0");
        assert!(super::mean(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rms_of_sine() {
        let tone = sine_wave(440., 1.0, 44_100, 1.0);
        let value = rms(&tone);
        // RMS of a unit sine is 1/sqrt(2)
        assert!(0.001 > (value - 0.707_106_77).abs(), "{value} !~= 0.7071");
    }

    #[rstest]
    #[case(1.0, 0.0)]
    #[case(0.5, -6.020_6)]
    #[case(0.0, DBFS_FLOOR)]
    fn test_amplitude_to_dbfs(#[case] amplitude: f32, #[case] expected: f32) {
        let value = amplitude_to_dbfs(amplitude);
        assert!(0.001 > (value - expected).abs(), "{value} !~= {expected}");
    }

    #[test]
    fn test_spectral_flatness_boundaries() {
        // A lone spike is maximally tonal
        let mut spike = vec![0.0001f32; 256];
        spike[32] = 100.;
        assert!(spectral_flatness(&spike) < 0.05);

        // A flat spectrum is maximally noisy
        let flat = vec![0.5f32; 256];
        let value = spectral_flatness(&flat);
        assert!(0.0001 > (1.0 - value).abs(), "{value} !~= 1.0");
    }

    #[test]
    fn test_median_filter() {
        let values = vec![1.0, 9.0, 1.0, 1.0, 8.0, 1.0];
        let filtered = median_filter(&values, 3);
        assert_eq!(filtered, vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);

        // k = 1 is the identity
        assert_eq!(median_filter(&values, 1), values);
    }

    #[test]
    fn test_parabolic_interpolation() {
        // Symmetric neighborhood: extremum is dead center
        assert!(parabolic_interpolation(1.0, 0.0, 1.0).abs() < f32::EPSILON);
        // Tilted left: extremum shifts negative
        assert!(parabolic_interpolation(0.5, 0.0, 1.0) < 0.);
        // Degenerate flat input
        assert!(parabolic_interpolation(1.0, 1.0, 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_has_non_finite() {
        assert!(!has_non_finite(&[0.0, 1.0, -1.0]));
        assert!(has_non_finite(&[0.0, f32::NAN]));
        assert!(has_non_finite(&[f32::INFINITY]));
    }
}
