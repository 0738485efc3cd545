//! K-fold cross-validation of the Tweedie model at a fixed power

use super::TweedieModel;
use crate::compare::{predict_records, LossPredictor};
use crate::data::LossDataset;
use crate::error::{ModelError, Result};
use crate::glm::GlmEngine;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub folds: usize,
    pub seed: u64,
    /// Run as part of a study
    pub enabled: bool,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            folds: 10,
            seed: 42,
            enabled: false,
        }
    }
}

impl CvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.folds < 2 {
            return Err(ModelError::InvalidConfig(format!(
                "cross_validation.folds must be at least 2, got {}",
                self.folds
            )));
        }
        Ok(())
    }
}

/// Held-out error of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub rmse: f64,
    pub mae: f64,
    /// (Σ fitted - Σ actual) / Σ actual × 100 over the held-out rows
    pub bias_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub power: f64,
    pub seed: u64,
    pub folds: Vec<FoldResult>,
    pub mean_rmse: f64,
    pub mean_mae: f64,
    pub mean_abs_bias_pct: f64,
}

/// Assign every record to a fold, stratified by accident year
///
/// Each year's records are shuffled and dealt round-robin; the dealer keeps
/// its position across years so fold sizes differ by at most one.
pub fn assign_folds(dataset: &LossDataset, folds: usize, seed: u64) -> Vec<usize> {
    let mut by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, obs) in dataset.iter().enumerate() {
        by_year.entry(obs.accident_year).or_default().push(i);
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut assignment = vec![0; dataset.len()];
    let mut dealer = 0;
    for indices in by_year.values_mut() {
        indices.shuffle(&mut rng);
        for &i in indices.iter() {
            assignment[i] = dealer % folds;
            dealer += 1;
        }
    }
    assignment
}

/// Train on k-1 folds and score the held-out fold, for each fold
pub fn cross_validate<E: GlmEngine>(
    dataset: &LossDataset,
    power: f64,
    config: &CvConfig,
    engine: &E,
) -> Result<CrossValidation> {
    config.validate()?;
    if dataset.len() < config.folds {
        return Err(ModelError::InsufficientData {
            model: "cross_validation".to_string(),
            needed: config.folds,
            have: dataset.len(),
        });
    }

    let assignment = assign_folds(dataset, config.folds, config.seed);
    let mut results = Vec::with_capacity(config.folds);

    for fold in 0..config.folds {
        let (test_idx, train_idx): (Vec<usize>, Vec<usize>) =
            (0..dataset.len()).partition(|&i| assignment[i] == fold);
        let train = dataset.subset(&train_idx)?;
        let test = dataset.subset(&test_idx)?;

        let model = TweedieModel::fit(&train, power, engine)?;
        let result = score_fold(fold, &model, train.len(), &test);
        log::debug!(
            "fold {}: n_test {}, RMSE {:.2}, MAE {:.2}, bias {:+.2}%",
            fold,
            result.n_test,
            result.rmse,
            result.mae,
            result.bias_pct
        );
        results.push(result);
    }

    let k = results.len() as f64;
    let cv = CrossValidation {
        power,
        seed: config.seed,
        mean_rmse: results.iter().map(|r| r.rmse).sum::<f64>() / k,
        mean_mae: results.iter().map(|r| r.mae).sum::<f64>() / k,
        mean_abs_bias_pct: results.iter().map(|r| r.bias_pct.abs()).sum::<f64>() / k,
        folds: results,
    };
    log::info!(
        "{}-fold CV at p = {:.3}: mean RMSE {:.2}, mean MAE {:.2}, mean |bias| {:.2}%",
        config.folds,
        power,
        cv.mean_rmse,
        cv.mean_mae,
        cv.mean_abs_bias_pct
    );
    Ok(cv)
}

fn score_fold<M: LossPredictor>(fold: usize, model: &M, n_train: usize, test: &LossDataset) -> FoldResult {
    let predictions = predict_records(model, test);
    let n = predictions.len() as f64;
    let sq: f64 = predictions.iter().map(|p| (p.fitted - p.actual).powi(2)).sum();
    let abs: f64 = predictions.iter().map(|p| (p.fitted - p.actual).abs()).sum();
    let actual: f64 = predictions.iter().map(|p| p.actual).sum();
    let fitted: f64 = predictions.iter().map(|p| p.fitted).sum();

    FoldResult {
        fold,
        n_train,
        n_test: predictions.len(),
        rmse: (sq / n).sqrt(),
        mae: abs / n,
        bias_pct: (fitted - actual) / actual * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;
    use crate::glm::{GlmConfig, Irls};

    fn dataset() -> LossDataset {
        let mut obs = Vec::new();
        for c in 1..=6u32 {
            for (k, year) in (1990..1998).enumerate() {
                let premium = 1_000.0 * c as f64 * (1.0 + 0.05 * k as f64);
                let factor = [0.6, 0.9, 0.75, 1.1, 0.8][(c as usize + 2 * k) % 5];
                obs.push(Observation::new(c, year, premium * factor, premium));
            }
        }
        LossDataset::new(obs).unwrap()
    }

    #[test]
    fn test_folds_are_stratified_and_balanced() {
        let ds = dataset();
        let assignment = assign_folds(&ds, 4, 7);
        let mut sizes = [0usize; 4];
        for &f in &assignment {
            sizes[f] += 1;
        }
        assert!(sizes.iter().all(|&s| s == 12));

        // 6 companies per year over 4 folds: every fold sees 1 or 2 of each year
        for year in ds.years() {
            let mut per_fold = [0usize; 4];
            for (i, obs) in ds.iter().enumerate() {
                if obs.accident_year == year {
                    per_fold[assignment[i]] += 1;
                }
            }
            assert!(per_fold.iter().all(|&n| n == 1 || n == 2), "{:?}", per_fold);
        }
    }

    #[test]
    fn test_assignment_depends_only_on_seed() {
        let ds = dataset();
        assert_eq!(assign_folds(&ds, 5, 42), assign_folds(&ds, 5, 42));
        assert_ne!(assign_folds(&ds, 5, 42), assign_folds(&ds, 5, 43));
    }

    #[test]
    fn test_cross_validate() {
        let ds = dataset();
        let engine = Irls::new(GlmConfig::default());
        let config = CvConfig {
            folds: 4,
            seed: 11,
            enabled: true,
        };
        let cv = cross_validate(&ds, 1.5, &config, &engine).unwrap();
        assert_eq!(cv.folds.len(), 4);
        assert_eq!(cv.folds.iter().map(|f| f.n_test).sum::<usize>(), ds.len());
        assert!(cv.folds.iter().all(|f| f.n_train + f.n_test == ds.len()));
        assert!(cv.mean_rmse >= cv.mean_mae);
        assert!(cv.mean_abs_bias_pct < 50.0);

        let again = cross_validate(&ds, 1.5, &config, &engine).unwrap();
        assert_eq!(cv, again);
    }

    #[test]
    fn test_rejects_too_few_folds_or_rows() {
        let ds = dataset();
        let engine = Irls::new(GlmConfig::default());
        let one_fold = CvConfig {
            folds: 1,
            ..Default::default()
        };
        assert!(matches!(
            cross_validate(&ds, 1.5, &one_fold, &engine),
            Err(ModelError::InvalidConfig(_))
        ));
        let too_many = CvConfig {
            folds: 100,
            ..Default::default()
        };
        assert!(matches!(
            cross_validate(&ds, 1.5, &too_many, &engine),
            Err(ModelError::InsufficientData { .. })
        ));
    }
}
