//! Loss Models - comparative actuarial loss modeling on aggregate company-year data
//!
//! This library provides:
//! - Schedule P style CSV loading and validation
//! - A synthetic-exposure frequency/severity model (Poisson and Gamma GLMs)
//! - A compound Poisson-Gamma (Tweedie) GLM with a profile-likelihood power search
//! - Annual aggregation and error metrics for comparing the two
//! - GEV block-maxima and GPD peaks-over-threshold tail fits
//! - k-fold cross-validation of the Tweedie model

pub mod compare;
pub mod config;
pub mod data;
pub mod error;
pub mod evt;
pub mod glm;
pub(crate) mod linalg;
pub mod study;
pub mod synthetic;
pub mod tweedie;

// Re-export commonly used types
pub use compare::{compare_model, LossPredictor, ModelComparison};
pub use config::StudyConfig;
pub use data::{load_observations, LoadOptions, LossDataset, Observation};
pub use error::{FitWarning, ModelError, Result};
pub use evt::{fit_gev, fit_gpd, GevFit, GpdFit};
pub use glm::{GlmConfig, GlmEngine, Irls};
pub use study::{LossStudy, ModelOutcome, StudyReport};
pub use synthetic::{FrequencySeverityModel, SyntheticConfig};
pub use tweedie::{search_power, PowerGrid, PowerProfile, TweedieModel};
