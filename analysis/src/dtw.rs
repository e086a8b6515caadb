//! Constrained dynamic time warping.
//!
//! Sakoe-Chiba banded DTW with the step set {(1,1), (1,2), (2,1)} at equal
//! weight, f64 cost accumulation, and normalization by path length. An
//! early-termination threshold caps the work spent on hopeless alignments:
//! once every in-band cell of a row exceeds it, the threshold itself is
//! returned as a poor-match sentinel.

use crate::errors::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtwParams {
    /// Sakoe-Chiba band half-width as a fraction of the longer sequence.
    pub band_ratio: f32,
    /// Accumulated-cost ceiling; also the sentinel distance for aborted or
    /// infeasible alignments.
    pub early_stop: f64,
}

impl Default for DtwParams {
    fn default() -> Self {
        Self {
            band_ratio: 0.1,
            early_stop: 1e5,
        }
    }
}

#[derive(Clone, Copy)]
struct Cell {
    cost: f64,
    steps: u32,
}

const UNREACHABLE: Cell = Cell {
    cost: f64::INFINITY,
    steps: 0,
};

/// DTW distance between two multi-dimensional frame sequences using
/// squared Euclidean frame cost.
///
/// # Errors
///
/// Returns an error if either sequence is empty or the band ratio is not
/// in (0, 1].
pub fn dtw_distance_frames(
    user: &[Vec<f32>],
    master: &[Vec<f32>],
    params: &DtwParams,
) -> AnalysisResult<f64> {
    dtw(user.len(), master.len(), params, |i, j| {
        user[i]
            .iter()
            .zip(&master[j])
            .map(|(&a, &b)| {
                let delta = f64::from(a) - f64::from(b);
                delta * delta
            })
            .sum()
    })
}

/// DTW distance between two scalar sequences using absolute-delta cost.
///
/// # Errors
///
/// Returns an error if either sequence is empty or the band ratio is not
/// in (0, 1].
pub fn dtw_distance_scalar(user: &[f32], master: &[f32], params: &DtwParams) -> AnalysisResult<f64> {
    dtw(user.len(), master.len(), params, |i, j| {
        (f64::from(user[i]) - f64::from(master[j])).abs()
    })
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dtw(
    n: usize,
    m: usize,
    params: &DtwParams,
    cost: impl Fn(usize, usize) -> f64,
) -> AnalysisResult<f64> {
    if n == 0 || m == 0 {
        return Err(AnalysisError::EmptySamples);
    }
    if !(0.0..=1.0).contains(&params.band_ratio) || params.band_ratio == 0. {
        return Err(AnalysisError::invalid("dtw", "band ratio must be in (0, 1]"));
    }
    // The band must span at least the diagonal slope plus the step reach,
    // otherwise no path exists at all.
    let band = ((params.band_ratio as f64) * n.max(m) as f64).ceil().max(2.);
    let slope = m as f64 / n as f64;
    let in_band = |i: usize, j: usize| (j as f64 - i as f64 * slope).abs() <= band;

    let mut rows: [Vec<Cell>; 3] = [
        vec![UNREACHABLE; m],
        vec![UNREACHABLE; m],
        vec![UNREACHABLE; m],
    ];

    for i in 0..n {
        let (before, tail) = rows.split_at_mut(2);
        let current = &mut tail[0];
        current.fill(UNREACHABLE);
        let mut row_min = f64::INFINITY;

        for j in 0..m {
            if !in_band(i, j) {
                continue;
            }
            let local = cost(i, j);
            let cell = if i == 0 && j == 0 {
                Cell {
                    cost: local,
                    steps: 1,
                }
            } else {
                // Predecessors per the {(1,1), (1,2), (2,1)} step set
                let mut best = UNREACHABLE;
                let candidates = [
                    (1usize, 1usize),
                    (1, 2),
                    (2, 1),
                ];
                for (di, dj) in candidates {
                    if i < di || j < dj {
                        continue;
                    }
                    let prev = match di {
                        1 => before[1][j - dj],
                        _ => before[0][j - dj],
                    };
                    if prev.cost < best.cost {
                        best = prev;
                    }
                }
                if best.cost.is_infinite() {
                    continue;
                }
                Cell {
                    cost: best.cost + local,
                    steps: best.steps + 1,
                }
            };
            row_min = row_min.min(cell.cost);
            current[j] = cell;
        }

        if row_min > params.early_stop {
            return Ok(params.early_stop);
        }
        rows.rotate_left(1);
    }

    // After the final rotate the last computed row sits at index 1
    let terminal = rows[1][m - 1];
    if terminal.cost.is_finite() && terminal.steps > 0 {
        Ok(terminal.cost / f64::from(terminal.steps))
    } else {
        Ok(params.early_stop)
    }
}

/// Per-dimension mean and floored standard deviation of a reference
/// sequence. Both sides of an alignment are normalized by the
/// *reference's* statistics so that real offsets between the sequences
/// survive; a per-sequence z-score would erase them.
///
/// The floor keeps dimensions that are numerically flat in the reference
/// (a steady tone has near-constant cepstra) from amplifying rounding
/// noise into unit-scale garbage.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
pub fn reference_stats(frames: &[Vec<f32>]) -> Vec<(f32, f32)> {
    const STD_FLOOR: f32 = 1.0;
    let Some(dims) = frames.first().map(Vec::len) else {
        return Vec::new();
    };
    let count = frames.len() as f64;
    let mut stats = Vec::with_capacity(dims);
    for dim in 0..dims {
        let mut sum = 0.0f64;
        for frame in frames {
            sum += f64::from(frame[dim]);
        }
        let mean = sum / count;
        let mut variance = 0.0f64;
        for frame in frames {
            let delta = f64::from(frame[dim]) - mean;
            variance += delta * delta;
        }
        let std = ((variance / count).sqrt() as f32).max(STD_FLOOR);
        stats.push((mean as f32, std));
    }
    stats
}

/// In-place affine normalization of a frame sequence by reference
/// statistics from [`reference_stats`].
pub fn normalize_by_reference(frames: &mut [Vec<f32>], stats: &[(f32, f32)]) {
    for frame in frames {
        for (value, &(mean, std)) in frame.iter_mut().zip(stats) {
            *value = (*value - mean) / std;
        }
    }
}
