//! Study configuration
//!
//! All knobs for a study run live in [`StudyConfig`]. Every section has a
//! default so a JSON file only needs to name the values it changes.

use crate::error::{ModelError, Result};
use crate::evt::{GevConfig, GpdConfig};
use crate::glm::GlmConfig;
use crate::synthetic::SyntheticConfig;
use crate::tweedie::{CvConfig, PowerGrid};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default return periods (years) for EVT return-level tables
pub const DEFAULT_RETURN_PERIODS: [f64; 5] = [10.0, 25.0, 50.0, 100.0, 200.0];

/// Container for every setting used by a study run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Development lag considered fully developed when loading Schedule P data
    pub fully_developed_lag: u32,

    /// Assumed constants of the synthetic exposure model
    pub synthetic: SyntheticConfig,

    /// IRLS settings shared by all three regressions
    pub glm: GlmConfig,

    /// Power parameter grid and interval level
    pub power_search: PowerGrid,

    pub gev: GevConfig,

    pub gpd: GpdConfig,

    /// Return periods for GEV and GPD return-level tables
    pub return_periods: Vec<f64>,

    /// Absolute total bias (percent) above which a prediction-bias warning is raised
    pub bias_warning_pct: f64,

    pub cross_validation: CvConfig,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            fully_developed_lag: crate::data::loader::DEFAULT_FULLY_DEVELOPED_LAG,
            synthetic: SyntheticConfig::default(),
            glm: GlmConfig::default(),
            power_search: PowerGrid::default(),
            gev: GevConfig::default(),
            gpd: GpdConfig::default(),
            return_periods: DEFAULT_RETURN_PERIODS.to_vec(),
            bias_warning_pct: 5.0,
            cross_validation: CvConfig::default(),
        }
    }
}

impl StudyConfig {
    /// Load a configuration from a JSON file
    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: StudyConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the estimators cannot use
    pub fn validate(&self) -> Result<()> {
        self.synthetic.validate()?;
        self.glm.validate()?;
        self.power_search.points()?;
        self.gev.validate()?;
        self.gpd.validate()?;
        self.cross_validation.validate()?;

        if self.return_periods.is_empty() {
            return Err(ModelError::InvalidConfig("return_periods must not be empty".to_string()));
        }
        if let Some(t) = self.return_periods.iter().find(|&&t| !(t > 1.0) || !t.is_finite()) {
            return Err(ModelError::InvalidConfig(format!("return period must be > 1, got {}", t)));
        }
        if !(self.bias_warning_pct >= 0.0) {
            return Err(ModelError::InvalidConfig("bias_warning_pct must be non-negative".to_string()));
        }
        Ok(())
    }
}
