//! Error metrics for a model's predictions

use super::{AnnualAggregate, RecordPrediction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMetrics {
    pub total_actual: f64,
    pub total_fitted: f64,
    /// (total fitted - total actual) / total actual × 100
    pub total_bias_pct: f64,

    /// Errors of annual totals
    pub annual_mae: f64,
    pub annual_rmse: f64,
    /// Mean absolute annual percentage error
    pub annual_mape: f64,
    pub max_abs_annual_pct_error: f64,

    /// Errors of individual company-year predictions
    pub record_mae: f64,
    pub record_rmse: f64,
    pub record_mape: f64,
}

impl ComparisonMetrics {
    pub fn compute(predictions: &[RecordPrediction], annual: &[AnnualAggregate]) -> Self {
        let total_actual: f64 = predictions.iter().map(|p| p.actual).sum();
        let total_fitted: f64 = predictions.iter().map(|p| p.fitted).sum();

        let annual_errors: Vec<(f64, f64)> = annual
            .iter()
            .map(|a| (a.fitted_total - a.actual_total, a.actual_total))
            .collect();
        let record_errors: Vec<(f64, f64)> = predictions.iter().map(|p| (p.fitted - p.actual, p.actual)).collect();

        let (annual_mae, annual_rmse, annual_mape) = error_summary(&annual_errors);
        let (record_mae, record_rmse, record_mape) = error_summary(&record_errors);

        Self {
            total_actual,
            total_fitted,
            total_bias_pct: (total_fitted - total_actual) / total_actual * 100.0,
            annual_mae,
            annual_rmse,
            annual_mape,
            max_abs_annual_pct_error: annual.iter().map(|a| a.pct_error.abs()).fold(0.0, f64::max),
            record_mae,
            record_rmse,
            record_mape,
        }
    }
}

/// (MAE, RMSE, MAPE%) over (error, actual) pairs
fn error_summary(errors: &[(f64, f64)]) -> (f64, f64, f64) {
    if errors.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = errors.len() as f64;
    let mae = errors.iter().map(|(e, _)| e.abs()).sum::<f64>() / n;
    let rmse = (errors.iter().map(|(e, _)| e * e).sum::<f64>() / n).sqrt();
    let mape = errors.iter().map(|(e, a)| (e / a).abs()).sum::<f64>() / n * 100.0;
    (mae, rmse, mape)
}
