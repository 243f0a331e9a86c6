//! STL (Seasonal-Trend decomposition using LOESS).
//!
//! Follows Cleveland et al. (1990):
//! - inner loop: detrend, smooth each cycle-subseries (extended one period on
//!   both ends), low-pass filter the result, remove it, then smooth the
//!   deseasonalized series into the trend
//! - outer loop: bisquare robustness weights from the remainder
//!
//! All three smoothers are local-linear LOESS with a tricube kernel.

/// Result of STL decomposition.
#[derive(Debug, Clone)]
pub struct StlResult {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub remainder: Vec<f64>,
}

/// STL decomposition configuration and algorithm.
#[derive(Debug, Clone)]
pub struct Stl {
    period: usize,
    /// Seasonal LOESS span (ns).
    seasonal_smoothness: usize,
    /// Trend LOESS span (nt).
    trend_smoothness: usize,
    /// Low-pass LOESS span (nl).
    low_pass_smoothness: usize,
    inner_iterations: usize,
    outer_iterations: usize,
}

impl Stl {
    /// Decomposer for the given period with the classic default spans
    /// (ns = 7, nt and nl derived from the period).
    pub fn new(period: usize) -> Self {
        let period = period.max(2);
        Self {
            period,
            seasonal_smoothness: 7,
            trend_smoothness: default_trend_span(period, 7),
            low_pass_smoothness: next_odd(period + 1),
            inner_iterations: 2,
            outer_iterations: 0,
        }
    }

    /// Set the seasonal span; the trend span is re-derived from it.
    pub fn with_seasonal_smoothness(mut self, ns: usize) -> Self {
        self.seasonal_smoothness = next_odd(ns.max(3));
        self.trend_smoothness = default_trend_span(self.period, self.seasonal_smoothness);
        self
    }

    pub fn with_trend_smoothness(mut self, nt: usize) -> Self {
        self.trend_smoothness = next_odd(nt.max(3));
        self
    }

    /// Robust fitting: 15 outer iterations.
    pub fn robust(mut self) -> Self {
        self.outer_iterations = 15;
        self
    }

    pub fn with_outer_iterations(mut self, n: usize) -> Self {
        self.outer_iterations = n;
        self
    }

    pub fn with_inner_iterations(mut self, n: usize) -> Self {
        self.inner_iterations = n.max(1);
        self
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn trend_smoothness(&self) -> usize {
        self.trend_smoothness
    }

    pub fn low_pass_smoothness(&self) -> usize {
        self.low_pass_smoothness
    }

    /// Decompose the series.
    ///
    /// Returns `None` when the series is shorter than two periods or the fit
    /// produces non-finite components.
    pub fn decompose(&self, series: &[f64]) -> Option<StlResult> {
        let n = series.len();
        if n < 2 * self.period || series.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let mut seasonal = vec![0.0; n];
        let mut trend = vec![0.0; n];
        let mut weights = vec![1.0; n];
        let scale = series.iter().fold(1.0f64, |m, v| m.max(v.abs()));

        for pass in 0..=self.outer_iterations {
            for _ in 0..self.inner_iterations {
                let detrended: Vec<f64> = series.iter().zip(&trend).map(|(y, t)| y - t).collect();

                // Length n + 2 * period.
                let cycle = self.smooth_cycle_subseries(&detrended, &weights);
                let low_pass = self.low_pass_filter(&cycle);

                for i in 0..n {
                    seasonal[i] = cycle[self.period + i] - low_pass[i];
                }

                let deseasonalized: Vec<f64> =
                    series.iter().zip(&seasonal).map(|(y, s)| y - s).collect();
                trend = loess(&deseasonalized, &weights, self.trend_smoothness);
            }

            if pass < self.outer_iterations {
                let remainder: Vec<f64> =
                    (0..n).map(|i| series[i] - seasonal[i] - trend[i]).collect();
                weights = robustness_weights(&remainder, scale);
            }
        }

        let remainder: Vec<f64> = (0..n).map(|i| series[i] - seasonal[i] - trend[i]).collect();

        let finite = |v: &[f64]| v.iter().all(|x| x.is_finite());
        if !(finite(&trend) && finite(&seasonal) && finite(&remainder)) {
            return None;
        }

        Some(StlResult {
            trend,
            seasonal,
            remainder,
        })
    }

    /// Smooth each cycle-subseries and extend it by one value on each side.
    ///
    /// The output has `n + 2 * period` entries: position `period + i` holds the
    /// smoothed value for input index `i`.
    fn smooth_cycle_subseries(&self, detrended: &[f64], weights: &[f64]) -> Vec<f64> {
        let n = detrended.len();
        let period = self.period;
        let mut out = vec![0.0; n + 2 * period];

        for pos in 0..period {
            let values: Vec<f64> = detrended.iter().skip(pos).step_by(period).copied().collect();
            let w: Vec<f64> = weights.iter().skip(pos).step_by(period).copied().collect();
            let m = values.len();
            if m == 0 {
                continue;
            }

            let q = self.seasonal_smoothness;
            // Evaluate at x = -1, 0..m-1, m.
            let before = loess_at(&values, &w, -1.0, 0, q.min(m) - 1, q).unwrap_or(values[0]);
            let after = loess_at(&values, &w, m as f64, m.saturating_sub(q), m - 1, q)
                .unwrap_or(values[m - 1]);
            let smoothed = loess(&values, &w, q);

            out[pos] = before;
            for (k, v) in smoothed.into_iter().enumerate() {
                out[period + pos + k * period] = v;
            }
            let last = period + pos + m * period;
            if last < out.len() {
                out[last] = after;
            }
        }

        out
    }

    /// MA(p) -> MA(p) -> MA(3) -> LOESS(nl). Input has `n + 2p` values, output `n`.
    fn low_pass_filter(&self, cycle: &[f64]) -> Vec<f64> {
        let ma1 = moving_average(cycle, self.period);
        let ma2 = moving_average(&ma1, self.period);
        let ma3 = moving_average(&ma2, 3);
        let ones = vec![1.0; ma3.len()];
        loess(&ma3, &ones, self.low_pass_smoothness)
    }
}

impl Default for Stl {
    fn default() -> Self {
        Self::new(7)
    }
}

fn next_odd(x: usize) -> usize {
    if x % 2 == 0 { x + 1 } else { x }
}

fn default_trend_span(period: usize, ns: usize) -> usize {
    let nt = (1.5 * period as f64 / (1.0 - 1.5 / ns as f64)).ceil() as usize;
    next_odd(nt.max(3))
}

/// Trailing-window moving average without padding (`len - window + 1` values).
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }
    out
}

/// LOESS fit evaluated at every index of `values`.
fn loess(values: &[f64], weights: &[f64], span: usize) -> Vec<f64> {
    let n = values.len();
    let q = span.max(1);
    (0..n)
        .map(|i| {
            let (left, right) = if q >= n {
                (0, n - 1)
            } else {
                let left = i.saturating_sub(q / 2).min(n - q);
                (left, left + q - 1)
            };
            loess_at(values, weights, i as f64, left, right, q).unwrap_or(values[i])
        })
        .collect()
}

/// Local-linear tricube fit at `xs` using the points `left..=right`.
///
/// Returns `None` if every neighbour has zero weight.
fn loess_at(
    values: &[f64],
    weights: &[f64],
    xs: f64,
    left: usize,
    right: usize,
    q: usize,
) -> Option<f64> {
    let n = values.len();
    if n == 0 || right >= n || left > right {
        return None;
    }

    let mut h = (xs - left as f64).max(right as f64 - xs);
    if q > n {
        h += ((q - n) / 2) as f64;
    }
    let h_hi = 0.999 * h;
    let h_lo = 0.001 * h;

    let mut w = vec![0.0; right - left + 1];
    let mut total = 0.0;
    for (k, j) in (left..=right).enumerate() {
        let r = (j as f64 - xs).abs();
        if r <= h_hi {
            let kernel = if r <= h_lo { 1.0 } else { (1.0 - (r / h).powi(3)).powi(3) };
            w[k] = kernel * weights[j];
            total += w[k];
        }
    }
    if total <= 0.0 {
        return None;
    }
    for wk in &mut w {
        *wk /= total;
    }

    // Degree-1 correction.
    if h > 0.0 {
        let a: f64 = w.iter().enumerate().map(|(k, wk)| wk * (left + k) as f64).sum();
        let c: f64 = w
            .iter()
            .enumerate()
            .map(|(k, wk)| wk * ((left + k) as f64 - a).powi(2))
            .sum();
        let range = (n - 1) as f64;
        if c.sqrt() > 0.001 * range {
            let b = (xs - a) / c;
            for (k, wk) in w.iter_mut().enumerate() {
                *wk *= b * ((left + k) as f64 - a) + 1.0;
            }
        }
    }

    Some(w.iter().zip(&values[left..=right]).map(|(wk, v)| wk * v).sum())
}

/// Bisquare weights at 6 * median |remainder|.
///
/// The cutoff is floored relative to the series scale so that an exact fit
/// (remainder at rounding level) keeps unit weights instead of zeroing them.
fn robustness_weights(remainder: &[f64], scale: f64) -> Vec<f64> {
    let abs: Vec<f64> = remainder.iter().map(|r| r.abs()).collect();
    let h = (6.0 * crate::math::median(&abs)).max(1e-9 * scale);
    let (lo, hi) = (0.001 * h, 0.999 * h);
    abs.iter()
        .map(|&r| {
            if r <= lo {
                1.0
            } else if r <= hi {
                (1.0 - (r / h).powi(2)).powi(2)
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly(n: usize, spike: Option<usize>) -> Vec<f64> {
        let pattern = [0.0, 2.0, 4.0, 3.0, 1.0, -5.0, -5.0];
        (0..n)
            .map(|i| {
                let base = 100.0 + 0.5 * i as f64 + pattern[i % 7];
                if Some(i) == spike { base + 60.0 } else { base }
            })
            .collect()
    }

    #[test]
    fn default_spans_for_weekly_data() {
        let stl = Stl::new(7).with_seasonal_smoothness(15).robust();
        assert_eq!(stl.trend_smoothness(), 13);
        assert_eq!(stl.low_pass_smoothness(), 9);
    }

    #[test]
    fn components_add_back_to_the_series() {
        let y = weekly(84, None);
        let res = Stl::new(7).with_seasonal_smoothness(15).robust().decompose(&y).unwrap();
        for i in 0..y.len() {
            let sum = res.trend[i] + res.seasonal[i] + res.remainder[i];
            assert!((sum - y[i]).abs() < 1e-9);
        }
        // Clean seasonal signal: remainder stays small away from the edges.
        let max_mid = res.remainder[14..70].iter().fold(0.0f64, |m, r| m.max(r.abs()));
        assert!(max_mid < 1.5, "remainder too large: {max_mid}");
    }

    #[test]
    fn robust_fit_isolates_a_spike_in_the_remainder() {
        let y = weekly(70, Some(40));
        let res = Stl::new(7).with_seasonal_smoothness(15).robust().decompose(&y).unwrap();
        let spike = res.remainder[40];
        let others = res
            .remainder
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 40)
            .fold(0.0f64, |m, (_, r)| m.max(r.abs()));
        assert!(spike > 40.0, "spike residual {spike}");
        assert!(spike > 3.0 * others);
    }

    #[test]
    fn too_short_series_is_not_decomposed() {
        assert!(Stl::new(7).decompose(&[1.0; 13]).is_none());
        assert!(Stl::new(7).decompose(&[1.0; 14]).is_some());
    }

    #[test]
    fn moving_average_has_no_padding() {
        let ma = moving_average(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(ma, vec![1.5, 2.5, 3.5]);
    }
}
