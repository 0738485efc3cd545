//! End-to-end comparative study
//!
//! Runs both loss models, compares them by accident year, fits the two
//! tail models, and gathers every warning. Failures follow one policy:
//!
//! - synthetic frequency/severity failure is recorded as [`ModelOutcome::Failed`]
//! - power search or Tweedie failure aborts the study (nothing to compare against)
//! - GEV, GPD and cross-validation failures are recorded, the study continues

use crate::compare::{compare_model, ModelComparison};
use crate::config::StudyConfig;
use crate::data::{LoadSummary, LossDataset};
use crate::error::{log_warnings, FitWarning, Result};
use crate::evt::{fit_gev, fit_gpd, GevFit, GpdFit, ReturnLevel};
use crate::glm::Irls;
use crate::synthetic::FrequencySeverityModel;
use crate::tweedie::{cross_validate, search_power, CrossValidation, PowerProfile, TweedieModel};
use serde::Serialize;

/// A model that either fitted or failed with a recorded reason
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelOutcome<T> {
    Fitted(T),
    Failed { error: String },
}

impl<T> ModelOutcome<T> {
    fn from_result(model: &str, result: Result<T>) -> Self {
        match result {
            Ok(value) => ModelOutcome::Fitted(value),
            Err(e) => {
                log::warn!("{} failed: {}", model, e);
                ModelOutcome::Failed { error: e.to_string() }
            }
        }
    }

    pub fn fitted(&self) -> Option<&T> {
        match self {
            ModelOutcome::Fitted(value) => Some(value),
            ModelOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ModelOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GevReport {
    /// (accident year, largest company loss) pairs the fit used
    pub annual_maxima: Vec<(i32, f64)>,
    pub fit: GevFit,
    pub return_levels: Vec<ReturnLevel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpdReport {
    pub fit: GpdFit,
    pub return_levels: Vec<ReturnLevel>,
}

/// Everything a study run produces
#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub n_observations: usize,
    pub years: Vec<i32>,
    /// Filled in by callers that loaded the data from CSV
    pub load_summary: Option<LoadSummary>,

    pub synthetic: ModelOutcome<FrequencySeverityModel>,
    pub power_profile: PowerProfile,
    pub tweedie: TweedieModel,

    /// Annual comparison per fitted model (Tweedie first)
    pub comparisons: Vec<ModelComparison>,

    pub gev: ModelOutcome<GevReport>,
    pub gpd: ModelOutcome<GpdReport>,
    pub cross_validation: Option<ModelOutcome<CrossValidation>>,

    pub warnings: Vec<FitWarning>,
}

/// Study runner bound to a validated configuration
#[derive(Debug, Clone)]
pub struct LossStudy {
    config: StudyConfig,
    engine: Irls,
}

impl LossStudy {
    pub fn new(config: StudyConfig) -> Result<Self> {
        config.validate()?;
        let engine = Irls::new(config.glm.clone());
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn run(&self, dataset: &LossDataset) -> Result<StudyReport> {
        let config = &self.config;
        log::info!(
            "study on {} observations, {} accident years",
            dataset.len(),
            dataset.years().len()
        );

        let synthetic = ModelOutcome::from_result(
            "synthetic frequency/severity model",
            FrequencySeverityModel::fit(dataset, &config.synthetic, &self.engine),
        );

        let power_profile = search_power(dataset, &config.power_search, &self.engine)?;
        let tweedie = TweedieModel::fit(dataset, power_profile.best_power, &self.engine)?;

        let mut comparisons = vec![compare_model(&tweedie, dataset)];
        if let Some(model) = synthetic.fitted() {
            comparisons.push(compare_model(model, dataset));
        }

        let gev = ModelOutcome::from_result("gev", self.gev_report(dataset));
        let gpd = ModelOutcome::from_result("gpd", self.gpd_report(dataset));

        let cross_validation = if config.cross_validation.enabled {
            Some(ModelOutcome::from_result(
                "cross-validation",
                cross_validate(dataset, tweedie.power, &config.cross_validation, &self.engine),
            ))
        } else {
            None
        };

        let mut warnings = Vec::new();
        if let Some(model) = synthetic.fitted() {
            warnings.extend(model.warnings.iter().cloned());
        }
        warnings.extend(power_profile.warnings());
        warnings.extend(tweedie.warnings.iter().cloned());
        warnings.extend(comparisons.iter().filter_map(|c| c.bias_warning(config.bias_warning_pct)));
        if let Some(report) = gev.fitted() {
            warnings.extend(report.fit.warnings());
        }
        if let Some(report) = gpd.fitted() {
            warnings.extend(report.fit.warnings());
        }
        log_warnings(&warnings);

        Ok(StudyReport {
            n_observations: dataset.len(),
            years: dataset.years(),
            load_summary: None,
            synthetic,
            power_profile,
            tweedie,
            comparisons,
            gev,
            gpd,
            cross_validation,
            warnings,
        })
    }

    fn gev_report(&self, dataset: &LossDataset) -> Result<GevReport> {
        let annual_maxima = dataset.annual_maxima();
        let maxima: Vec<f64> = annual_maxima.iter().map(|&(_, m)| m).collect();
        let fit = fit_gev(&maxima, &self.config.gev)?;
        let return_levels = fit.return_levels(&self.config.return_periods)?;
        Ok(GevReport {
            annual_maxima,
            fit,
            return_levels,
        })
    }

    fn gpd_report(&self, dataset: &LossDataset) -> Result<GpdReport> {
        let fit = fit_gpd(&dataset.losses(), &self.config.gpd)?;
        let return_levels = fit.return_levels(&self.config.return_periods)?;
        Ok(GpdReport { fit, return_levels })
    }
}
