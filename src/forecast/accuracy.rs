//! Historical accuracy of a forecast table.

use crate::domain::{AccuracySummary, ForecastPoint};

/// Fill `residual`, `abs_error` and `pct_error` where an observed value exists.
///
/// `pct_error` is `0` when the observed value is `0`.
pub fn annotate_errors(point: &mut ForecastPoint) {
    match point.observed {
        Some(obs) => {
            let residual = obs - point.yhat;
            point.residual = Some(residual);
            point.abs_error = Some(residual.abs());
            point.pct_error = Some(if obs == 0.0 { 0.0 } else { residual / obs * 100.0 });
        }
        None => {
            point.residual = None;
            point.abs_error = None;
            point.pct_error = None;
        }
    }
}

/// MAE, RMSE and MAPE over rows with an observed value.
pub fn summarize(points: &[ForecastPoint]) -> AccuracySummary {
    let mut n = 0usize;
    let (mut abs_sum, mut sq_sum, mut pct_sum) = (0.0, 0.0, 0.0);
    for p in points {
        if let (Some(res), Some(pct)) = (p.residual, p.pct_error) {
            n += 1;
            abs_sum += res.abs();
            sq_sum += res * res;
            pct_sum += pct.abs();
        }
    }
    let forecast_point_count = points.iter().filter(|p| p.is_forecast).count();

    if n == 0 {
        return AccuracySummary {
            mae: 0.0,
            rmse: 0.0,
            mape: 0.0,
            observed_point_count: 0,
            forecast_point_count,
        };
    }

    let nf = n as f64;
    AccuracySummary {
        mae: abs_sum / nf,
        rmse: (sq_sum / nf).sqrt(),
        mape: pct_sum / nf,
        observed_point_count: n,
        forecast_point_count,
    }
}
