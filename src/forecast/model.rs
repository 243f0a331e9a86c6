//! Additive model structure: trend with changepoints, Fourier seasonalities and
//! holiday indicators.
//!
//! Design-matrix columns, in order:
//!
//! ```text
//! [ k | m | δ_1 .. δ_C | seasonality blocks (sin/cos pairs) | holiday indicators ]
//! ```
//!
//! so the trend at scaled time `t` is `k·t + m + Σ δ_j (t - s_j)+`.

use std::ops::Range;

use chrono::NaiveDate;

use crate::forecast::calendar::HolidayFeature;
use crate::math::{epoch_days, fourier_row, hinge};

/// A periodic component modelled with `order` Fourier pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Seasonality {
    pub name: &'static str,
    /// Period in days.
    pub period: f64,
    pub order: usize,
    pub prior_scale: f64,
}

impl Seasonality {
    pub const fn new(name: &'static str, period: f64, order: usize, prior_scale: f64) -> Self {
        Self {
            name,
            period,
            order,
            prior_scale,
        }
    }

    /// Yearly, weekly, monthly, quarterly and semi-annual components for daily
    /// merchant counts.
    pub fn merchant_defaults() -> Vec<Seasonality> {
        vec![
            Seasonality::new("yearly", 365.25, 10, 15.0),
            Seasonality::new("weekly", 7.0, 3, 15.0),
            Seasonality::new("monthly", 30.5, 8, 12.0),
            Seasonality::new("quarterly", 91.25, 6, 10.0),
            Seasonality::new("semi_annual", 182.5, 4, 8.0),
        ]
    }

    /// A component is only estimable once the history covers two full cycles.
    /// Shorter histories let its Fourier terms trade off against the trend.
    pub fn fits_span(&self, span_days: f64) -> bool {
        2.0 * self.period <= span_days
    }
}

/// Maps calendar dates onto the scaled time axis (`0` = first training date,
/// `1` = last training date).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeScale {
    pub start: NaiveDate,
    pub span_days: f64,
}

impl TimeScale {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let span = (end - start).num_days() as f64;
        Self {
            start,
            span_days: if span > 0.0 { span } else { 1.0 },
        }
    }

    pub fn t(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }
}

/// Changepoint locations on the scaled axis.
///
/// `C = min(n_changepoints, ⌊range·n⌋ - 1)` changepoints at evenly spaced
/// (rounded) indices of the first `range` share of the history, skipping the
/// first index.
pub fn place_changepoints(t_history: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let hist_size = (t_history.len() as f64 * range).floor() as usize;
    let count = n_changepoints.min(hist_size.saturating_sub(1));
    if count == 0 {
        return Vec::new();
    }
    let last = (hist_size - 1) as f64;
    (1..=count)
        .map(|i| {
            let idx = (last * i as f64 / count as f64).round() as usize;
            t_history[idx.min(t_history.len() - 1)]
        })
        .collect()
}

/// Column layout of the design matrix.
#[derive(Debug, Clone)]
pub struct DesignLayout {
    pub changepoints: Vec<f64>,
    pub seasonalities: Vec<Seasonality>,
    pub holidays: Vec<HolidayFeature>,
}

impl DesignLayout {
    pub const TREND_COLUMNS: usize = 2;

    pub fn n_columns(&self) -> usize {
        Self::TREND_COLUMNS + self.changepoints.len() + self.seasonal_width() + self.holidays.len()
    }

    pub fn delta_range(&self) -> Range<usize> {
        Self::TREND_COLUMNS..Self::TREND_COLUMNS + self.changepoints.len()
    }

    /// Columns of seasonality `idx`.
    pub fn seasonal_range(&self, idx: usize) -> Range<usize> {
        let start = self.delta_range().end
            + self.seasonalities[..idx].iter().map(|s| 2 * s.order).sum::<usize>();
        start..start + 2 * self.seasonalities[idx].order
    }

    pub fn holiday_range(&self) -> Range<usize> {
        let start = self.delta_range().end + self.seasonal_width();
        start..start + self.holidays.len()
    }

    fn seasonal_width(&self) -> usize {
        self.seasonalities.iter().map(|s| 2 * s.order).sum()
    }

    /// One design-matrix row.
    pub fn row(&self, date: NaiveDate, t: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.n_columns());
        row.push(t);
        row.push(1.0);
        row.extend(self.changepoints.iter().map(|&s| hinge(t, s)));
        let days = epoch_days(date);
        for s in &self.seasonalities {
            row.extend(fourier_row(days, s.period, s.order));
        }
        row.extend(
            self.holidays
                .iter()
                .map(|h| if h.is_active(date) { 1.0 } else { 0.0 }),
        );
        row
    }

    /// Prior scale of every column, in column order.
    pub fn prior_scales(&self, trend_scale: f64, delta_scale: f64, holiday_scale: f64) -> Vec<f64> {
        let mut scales = vec![trend_scale; Self::TREND_COLUMNS];
        scales.extend(std::iter::repeat_n(delta_scale, self.changepoints.len()));
        for s in &self.seasonalities {
            scales.extend(std::iter::repeat_n(s.prior_scale, 2 * s.order));
        }
        scales.extend(std::iter::repeat_n(holiday_scale, self.holidays.len()));
        scales
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::calendar::HolidayCalendar;

    #[test]
    fn changepoints_cover_the_first_ninety_percent() {
        let t: Vec<f64> = (0..100).map(|i| i as f64 / 99.0).collect();
        let cps = place_changepoints(&t, 35, 0.9);
        assert_eq!(cps.len(), 35);
        // Last changepoint sits on index 89 = ⌊0.9·100⌋ - 1.
        assert!((cps[34] - 89.0 / 99.0).abs() < 1e-12);
        assert!(cps.windows(2).all(|w| w[0] < w[1]));

        // Short history: ⌊0.9·30⌋ - 1 = 26 changepoints.
        let t: Vec<f64> = (0..30).map(|i| i as f64 / 29.0).collect();
        assert_eq!(place_changepoints(&t, 35, 0.9).len(), 26);
    }

    #[test]
    fn seasonalities_need_two_full_cycles() {
        let kept = |span: f64| -> Vec<&str> {
            Seasonality::merchant_defaults()
                .into_iter()
                .filter(|s| s.fits_span(span))
                .map(|s| s.name)
                .collect()
        };
        assert!(kept(13.0).is_empty());
        assert_eq!(kept(29.0), vec!["weekly"]);
        assert_eq!(kept(119.0), vec!["weekly", "monthly"]);
        assert_eq!(kept(730.5).len(), 5);
    }

    #[test]
    fn layout_ranges_partition_the_columns() {
        let layout = DesignLayout {
            changepoints: vec![0.25, 0.5],
            seasonalities: Seasonality::merchant_defaults(),
            holidays: HolidayCalendar::vietnam().features(),
        };
        // 2 + 2 + 2·(10 + 3 + 8 + 6 + 4) + 16
        assert_eq!(layout.n_columns(), 82);
        assert_eq!(layout.seasonal_range(0), 4..24);
        assert_eq!(layout.seasonal_range(1), 24..30);
        assert_eq!(layout.holiday_range(), 66..82);

        let date = NaiveDate::from_ymd_opt(2025, 12, 12).unwrap();
        let row = layout.row(date, 0.75);
        assert_eq!(row.len(), 82);
        assert_eq!(&row[..4], &[0.75, 1.0, 0.5, 0.25]);
        assert_eq!(row[layout.holiday_range()].iter().sum::<f64>(), 1.0);

        assert_eq!(layout.prior_scales(5.0, 0.1, 15.0).len(), 82);
    }

    #[test]
    fn time_scale_maps_training_window_to_unit_interval() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 11).unwrap();
        let scale = TimeScale::new(start, end);
        assert_eq!(scale.t(start), 0.0);
        assert_eq!(scale.t(end), 1.0);
        assert_eq!(scale.t(NaiveDate::from_ymd_opt(2025, 1, 21).unwrap()), 2.0);
    }
}
