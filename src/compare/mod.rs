//! Annual aggregation of model predictions against actual losses
//!
//! Both competing models implement [`LossPredictor`]; the comparator sums
//! actual and fitted loss by accident year and reports the error per year
//! and overall. Years are never filtered or weighted here: `n_companies`
//! travels with every row so consumers can do that themselves.

mod metrics;

pub use metrics::ComparisonMetrics;

use crate::data::{LossDataset, Observation};
use crate::error::FitWarning;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything that predicts the total loss of a company-year
pub trait LossPredictor {
    /// Label used in tables and warnings
    fn name(&self) -> &str;

    /// Fitted total loss for one observation
    fn predict_loss(&self, observation: &Observation) -> f64;
}

/// Actual and fitted loss for one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordPrediction {
    pub accident_year: i32,
    pub actual: f64,
    pub fitted: f64,
}

/// Per-year totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualAggregate {
    pub accident_year: i32,
    pub n_companies: usize,
    pub actual_total: f64,
    pub fitted_total: f64,
    /// (fitted - actual) / actual × 100
    pub pct_error: f64,
}

/// One model's annual table and summary metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub model: String,
    pub annual: Vec<AnnualAggregate>,
    pub metrics: ComparisonMetrics,
}

/// Predict every observation with a model
pub fn predict_records<M: LossPredictor + ?Sized>(model: &M, dataset: &LossDataset) -> Vec<RecordPrediction> {
    dataset
        .iter()
        .map(|obs| RecordPrediction {
            accident_year: obs.accident_year,
            actual: obs.loss,
            fitted: model.predict_loss(obs),
        })
        .collect()
}

/// Sum actual and fitted loss within each accident year, ordered by year
pub fn aggregate_by_year(predictions: &[RecordPrediction]) -> Vec<AnnualAggregate> {
    let mut totals: BTreeMap<i32, (usize, f64, f64)> = BTreeMap::new();
    for p in predictions {
        let entry = totals.entry(p.accident_year).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += p.actual;
        entry.2 += p.fitted;
    }

    totals
        .into_iter()
        .map(|(accident_year, (n_companies, actual_total, fitted_total))| AnnualAggregate {
            accident_year,
            n_companies,
            actual_total,
            fitted_total,
            pct_error: (fitted_total - actual_total) / actual_total * 100.0,
        })
        .collect()
}

/// Aggregate one model's predictions and compute its metrics
pub fn compare_model<M: LossPredictor + ?Sized>(model: &M, dataset: &LossDataset) -> ModelComparison {
    let predictions = predict_records(model, dataset);
    let annual = aggregate_by_year(&predictions);
    let metrics = ComparisonMetrics::compute(&predictions, &annual);
    ModelComparison {
        model: model.name().to_string(),
        annual,
        metrics,
    }
}

impl ModelComparison {
    /// Bias warning when the overall total misses by more than `max_bias_pct`
    pub fn bias_warning(&self, max_bias_pct: f64) -> Option<FitWarning> {
        if self.metrics.total_bias_pct.abs() > max_bias_pct {
            Some(FitWarning::PredictionBias {
                model: self.model.clone(),
                bias_pct: self.metrics.total_bias_pct,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    struct Scaled(f64);

    impl LossPredictor for Scaled {
        fn name(&self) -> &str {
            "scaled"
        }

        fn predict_loss(&self, observation: &Observation) -> f64 {
            observation.premium * self.0
        }
    }

    fn record(year: i32, actual: f64, fitted: f64) -> RecordPrediction {
        RecordPrediction {
            accident_year: year,
            actual,
            fitted,
        }
    }

    #[test]
    fn test_aggregate_by_year() {
        let preds = vec![
            record(1991, 100.0, 110.0),
            record(1990, 50.0, 40.0),
            record(1991, 100.0, 100.0),
        ];
        let annual = aggregate_by_year(&preds);
        assert_eq!(annual.len(), 2);
        assert_eq!(annual[0].accident_year, 1990);
        assert_eq!(annual[0].n_companies, 1);
        assert_relative_eq!(annual[0].pct_error, -20.0);
        assert_eq!(annual[1].n_companies, 2);
        assert_relative_eq!(annual[1].fitted_total, 210.0);
        assert_relative_eq!(annual[1].pct_error, 5.0);
    }

    #[test]
    fn test_compare_model_with_predictor() {
        let ds = LossDataset::new(vec![
            Observation::new(1, 2000, 200.0, 100.0),
            Observation::new(2, 2000, 400.0, 200.0),
            Observation::new(1, 2001, 300.0, 100.0),
        ])
        .unwrap();
        let comparison = compare_model(&Scaled(2.0), &ds);
        assert_eq!(comparison.model, "scaled");
        assert_relative_eq!(comparison.annual[0].pct_error, 0.0);
        assert_relative_eq!(comparison.annual[1].pct_error, -100.0 / 3.0, epsilon = 1e-12);
        assert!(comparison.bias_warning(5.0).is_some());
        assert!(comparison.bias_warning(50.0).is_none());
    }

    proptest! {
        #[test]
        fn prop_aggregation_ignores_record_order(
            rows in prop::collection::vec((1990i32..1995, 1.0f64..1e6, 1.0f64..1e6), 1..40),
            rotate in 0usize..40,
        ) {
            let preds: Vec<RecordPrediction> = rows.iter().map(|&(y, a, f)| record(y, a, f)).collect();
            let mut shuffled = preds.clone();
            shuffled.reverse();
            let k = rotate % shuffled.len();
            shuffled.rotate_left(k);

            let a = aggregate_by_year(&preds);
            let b = aggregate_by_year(&shuffled);
            prop_assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(&b) {
                prop_assert_eq!(x.accident_year, y.accident_year);
                prop_assert_eq!(x.n_companies, y.n_companies);
                prop_assert!((x.fitted_total - y.fitted_total).abs() <= 1e-9 * x.fitted_total);
                prop_assert!((x.actual_total - y.actual_total).abs() <= 1e-9 * x.actual_total);
            }

            for agg in &a {
                let direct: f64 = preds.iter().filter(|p| p.accident_year == agg.accident_year).map(|p| p.fitted).sum();
                prop_assert!((direct - agg.fitted_total).abs() <= 1e-9 * direct);
            }
        }
    }
}
