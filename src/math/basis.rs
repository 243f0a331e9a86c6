//! Basis functions for the additive forecast model.
//!
//! - Fourier pairs for a periodic component:
//!   `sin(2π k t / P), cos(2π k t / P)` for `k = 1..=order`
//! - piecewise-linear hinges for trend changepoints: `(t - s)+`
//!
//! Time for Fourier terms is measured in days since 1970-01-01 so that the
//! same calendar date always lands on the same phase, no matter where the
//! training window starts.

use std::f64::consts::PI;

use chrono::NaiveDate;

/// Days since the Unix epoch (can be negative).
pub fn epoch_days(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (date - epoch).num_days() as f64
}

/// Fourier features for one time value, ordered `[sin_1, cos_1, sin_2, cos_2, ...]`.
pub fn fourier_row(t_days: f64, period: f64, order: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(2 * order);
    for k in 1..=order {
        let x = 2.0 * PI * k as f64 * t_days / period;
        row.push(x.sin());
        row.push(x.cos());
    }
    row
}

/// Hinge `(t - s)+`.
#[inline]
pub fn hinge(t: f64, s: f64) -> f64 {
    (t - s).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourier_row_is_periodic() {
        let a = fourier_row(3.0, 7.0, 3);
        let b = fourier_row(10.0, 7.0, 3);
        assert_eq!(a.len(), 6);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn epoch_days_counts_from_1970() {
        assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1970, 1, 11).unwrap()), 10.0);
        assert_eq!(epoch_days(NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()), -1.0);
    }

    #[test]
    fn hinge_is_zero_before_the_knot() {
        assert_eq!(hinge(0.2, 0.5), 0.0);
        assert!((hinge(0.75, 0.5) - 0.25).abs() < 1e-12);
    }
}
