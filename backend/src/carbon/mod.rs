//! Carbon intensity series
//!
//! An immutable, zero-indexed sequence of carbon-intensity samples at tick
//! granularity. Every derivation (`window`, `shifted`, `repeat`) returns a new
//! series re-indexed from 0; nothing is mutated in place.
//!
//! The series also remembers where it was cut from the source trace
//! (`start_index`) and which error model produced the samples, so results can
//! be labelled without carrying the trace loader around.

use serde::{Deserialize, Serialize};

/// Error model used to produce intensity samples. Only perfect knowledge of
/// the future trace is modelled.
pub const ORACLE_ERROR_MODEL: &str = "ORACLE";

/// Time-indexed carbon intensity samples.
///
/// # Example
/// ```
/// use carbon_scheduler_core_rs::CarbonSeries;
///
/// let series = CarbonSeries::new("AU-SA", vec![3.0, 1.0, 2.0]);
/// let tail = series.shifted(1);
/// assert_eq!(tail.samples(), &[1.0, 2.0]);
/// assert_eq!(series.argmin(0, 3), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSeries {
    name: String,
    start_index: usize,
    error_model: String,
    samples: Vec<f64>,
}

impl CarbonSeries {
    /// Create a series from raw per-tick samples.
    pub fn new(name: impl Into<String>, samples: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            start_index: 0,
            error_model: ORACLE_ERROR_MODEL.to_string(),
            samples,
        }
    }

    /// Record the offset into the source trace this series was cut from.
    pub fn with_start_index(mut self, start_index: usize) -> Self {
        self.start_index = start_index;
        self
    }

    /// Trace name (e.g. grid region).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset into the source trace.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Error model tag carried through derivations.
    pub fn error_model(&self) -> &str {
        &self.error_model
    }

    /// All samples, zero-indexed.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Intensity at `index`, if inside the series.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.samples.get(index).copied()
    }

    fn derive(&self, samples: Vec<f64>) -> Self {
        Self {
            name: self.name.clone(),
            start_index: self.start_index,
            error_model: self.error_model.clone(),
            samples,
        }
    }

    /// Clamp `[start, start + length)` to the series bounds.
    fn bounds(&self, start: usize, length: usize) -> (usize, usize) {
        let lo = start.min(self.samples.len());
        let hi = start.saturating_add(length).min(self.samples.len());
        (lo, hi)
    }

    /// Contiguous slice `[start, start + length)` re-indexed from 0.
    ///
    /// A window reaching past the end of the series is truncated; callers
    /// that need a minimum length must check `len()` (the search functions
    /// report `InsufficientWindow` for this).
    pub fn window(&self, start: usize, length: usize) -> Self {
        let (lo, hi) = self.bounds(start, length);
        self.derive(self.samples[lo..hi].to_vec())
    }

    /// Drop the first `start` samples.
    pub fn shifted(&self, start: usize) -> Self {
        let lo = start.min(self.samples.len());
        self.derive(self.samples[lo..].to_vec())
    }

    /// Replicate every sample `factor` times, dividing its intensity by
    /// `factor`, so an hourly trace becomes a per-tick trace with the same
    /// total.
    ///
    /// ```
    /// use carbon_scheduler_core_rs::CarbonSeries;
    ///
    /// let hourly = CarbonSeries::new("SE-SE1", vec![4.0, 8.0]);
    /// assert_eq!(hourly.repeat(2).samples(), &[2.0, 2.0, 4.0, 4.0]);
    /// ```
    pub fn repeat(&self, factor: usize) -> Self {
        assert!(factor > 0, "repeat factor must be positive");
        let divisor = factor as f64;
        let samples = self
            .samples
            .iter()
            .flat_map(|&value| std::iter::repeat(value / divisor).take(factor))
            .collect();
        self.derive(samples)
    }

    /// Same as [`CarbonSeries::repeat`]; the name used by trace preparation.
    pub fn extend(&self, factor: usize) -> Self {
        self.repeat(factor)
    }

    /// Sum of intensity over `[start, start + length)`, clamped to the series.
    pub fn sum(&self, start: usize, length: usize) -> f64 {
        let (lo, hi) = self.bounds(start, length);
        self.samples[lo..hi].iter().sum()
    }

    /// Index of the minimum sample in `[start, start + length)`. Ties go to
    /// the earliest index.
    pub fn argmin(&self, start: usize, length: usize) -> Option<usize> {
        let (lo, hi) = self.bounds(start, length);
        let mut best: Option<(usize, f64)> = None;
        for (index, &value) in self.samples[lo..hi].iter().enumerate() {
            match best {
                Some((_, current)) if value >= current => {}
                _ => best = Some((lo + index, value)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Quantile `q` (0..=1) of `[start, start + length)` using linear
    /// interpolation between closest ranks.
    ///
    /// ```
    /// use carbon_scheduler_core_rs::CarbonSeries;
    ///
    /// let series = CarbonSeries::new("x", vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    /// let q = series.quantile(0, 5, 0.3).unwrap();
    /// assert!((q - 2.2).abs() < 1e-9);
    /// ```
    pub fn quantile(&self, start: usize, length: usize, q: f64) -> Option<f64> {
        let (lo, hi) = self.bounds(start, length);
        if lo == hi {
            return None;
        }
        let mut sorted = self.samples[lo..hi].to_vec();
        sorted.sort_by(f64::total_cmp);
        let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let below = position.floor() as usize;
        let above = position.ceil() as usize;
        let fraction = position - below as f64;
        Some(sorted[below] + (sorted[above] - sorted[below]) * fraction)
    }

    /// Mean intensity of the whole series.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Sample standard deviation (n - 1 denominator) of the whole series.
    pub fn std(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / (self.samples.len() - 1) as f64;
        Some(variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(samples: &[f64]) -> CarbonSeries {
        CarbonSeries::new("test", samples.to_vec()).with_start_index(42)
    }

    #[test]
    fn test_window_reindexes_from_zero() {
        let s = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let w = s.window(2, 2);
        assert_eq!(w.samples(), &[3.0, 4.0]);
        assert_eq!(w.get(0), Some(3.0));
        assert_eq!(w.start_index(), 42);
        assert_eq!(w.name(), "test");
    }

    #[test]
    fn test_window_past_end_is_truncated() {
        let s = series(&[1.0, 2.0, 3.0]);
        assert_eq!(s.window(1, 10).samples(), &[2.0, 3.0]);
        assert!(s.window(5, 2).is_empty());
    }

    #[test]
    fn test_full_window_is_identity() {
        let s = series(&[5.0, 1.0, 7.0]);
        assert_eq!(s.window(0, s.len()), s);
    }

    #[test]
    fn test_argmin_prefers_first_of_ties() {
        let s = series(&[5.0, 1.0, 7.0, 1.0]);
        assert_eq!(s.argmin(0, 4), Some(1));
        assert_eq!(s.argmin(2, 2), Some(3));
        assert_eq!(s.argmin(9, 2), None);
    }

    #[test]
    fn test_repeat_preserves_total() {
        let s = series(&[3.0, 6.0]);
        let r = s.repeat(3);
        assert_eq!(r.len(), 6);
        assert!((r.sum(0, r.len()) - s.sum(0, s.len())).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_single_sample() {
        let s = series(&[9.0]);
        assert_eq!(s.quantile(0, 1, 0.3), Some(9.0));
        assert_eq!(s.quantile(3, 1, 0.3), None);
    }

    #[test]
    fn test_mean_and_std() {
        let s = series(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.mean(), Some(5.0));
        let std = s.std().unwrap();
        assert!((std - 2.138_089_935).abs() < 1e-6);
    }
}
