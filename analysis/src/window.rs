//! Analysis window functions.
//!
//! Coefficients are precomputed once per session and applied per frame, so
//! the per-hop cost is a single multiply pass.

use std::f32::consts::PI;

use strum::{Display, EnumIter, EnumString};

use crate::errors::{AnalysisError, AnalysisResult};

/// The shape applied to each analysis frame before the FFT.
#[derive(Debug, Display, EnumString, EnumIter, Clone, Copy, PartialEq, Eq, Default)]
#[strum(ascii_case_insensitive)]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

/// A window function with its coefficients precomputed for a fixed length.
#[derive(Debug, Clone)]
pub struct Window {
    function: WindowFunction,
    coefficients: Vec<f32>,
}

impl Window {
    /// # Errors
    ///
    /// Returns an error if `length` is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(function: WindowFunction, length: usize) -> AnalysisResult<Self> {
        if length == 0 {
            return Err(AnalysisError::invalid("window", "length must be non-zero"));
        }
        let n = (length - 1).max(1) as f32;
        let coefficients = (0..length)
            .map(|i| {
                let x = i as f32 / n;
                match function {
                    WindowFunction::Hann => 0.5f32.mul_add(-(2. * PI * x).cos(), 0.5),
                    WindowFunction::Hamming => 0.46f32.mul_add(-(2. * PI * x).cos(), 0.54),
                    WindowFunction::Blackman => {
                        0.08f32.mul_add((4. * PI * x).cos(), 0.5f32.mul_add(-(2. * PI * x).cos(), 0.42))
                    }
                    WindowFunction::Rectangular => 1.,
                }
            })
            .collect();
        Ok(Self {
            function,
            coefficients,
        })
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    #[must_use]
    #[inline]
    pub const fn function(&self) -> WindowFunction {
        self.function
    }

    /// Multiply `frame` by the window into `out`, resizing `out` as needed.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `frame` is shorter than the window.
    #[inline]
    pub fn apply_into(&self, frame: &[f32], out: &mut Vec<f32>) {
        debug_assert!(frame.len() >= self.coefficients.len(), "frame too short");
        out.clear();
        out.extend(
            frame
                .iter()
                .zip(&self.coefficients)
                .map(|(&sample, &coefficient)| sample * coefficient),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    #[test]
    fn test_rectangular_is_identity() {
        let window = Window::new(WindowFunction::Rectangular, 8).unwrap();
        let frame = vec![0.25; 8];
        let mut out = Vec::new();
        window.apply_into(&frame, &mut out);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_hann_endpoints_and_peak() {
        let window = Window::new(WindowFunction::Hann, 9).unwrap();
        let frame = vec![1.0; 9];
        let mut out = Vec::new();
        window.apply_into(&frame, &mut out);
        assert!(out[0].abs() < 1e-6);
        assert!(out[8].abs() < 1e-6);
        assert!(0.0001 > (1.0 - out[4]).abs(), "{} !~= 1.0", out[4]);
    }

    #[rstest]
    #[case(WindowFunction::Hamming, 0.08)]
    #[case(WindowFunction::Blackman, 0.0)]
    fn test_endpoint_values(#[case] function: WindowFunction, #[case] expected: f32) {
        let window = Window::new(function, 17).unwrap();
        let frame = vec![1.0; 17];
        let mut out = Vec::new();
        window.apply_into(&frame, &mut out);
        assert!(
            0.001 > (expected - out[0]).abs(),
            "{function}: {} !~= {expected}",
            out[0]
        );
    }

    #[test]
    fn test_all_functions_bounded() {
        for function in WindowFunction::iter() {
            let window = Window::new(function, 64).unwrap();
            let frame = vec![1.0; 64];
            let mut out = Vec::new();
            window.apply_into(&frame, &mut out);
            assert!(out.iter().all(|&v| (-0.01..=1.01).contains(&v)), "{function}");
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(Window::new(WindowFunction::Hann, 0).is_err());
    }

    #[test]
    fn test_parse_from_str() {
        use std::str::FromStr;
        assert_eq!(
            WindowFunction::from_str("hann").unwrap(),
            WindowFunction::Hann
        );
        assert!(WindowFunction::from_str("kaiser").is_err());
    }
}
