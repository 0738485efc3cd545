//! Company-year loss observations

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One fully developed company-year record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Company identifier (GRCODE in Schedule P data)
    pub company_id: u32,

    /// Accident year
    pub accident_year: i32,

    /// Incurred loss, strictly positive
    pub loss: f64,

    /// Earned premium, strictly positive
    pub premium: f64,
}

impl Observation {
    pub fn new(company_id: u32, accident_year: i32, loss: f64, premium: f64) -> Self {
        Self {
            company_id,
            accident_year,
            loss,
            premium,
        }
    }

    /// Loss ratio (loss / premium)
    pub fn loss_ratio(&self) -> f64 {
        self.loss / self.premium
    }
}

/// Validated, immutable set of observations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossDataset {
    observations: Vec<Observation>,
}

impl LossDataset {
    /// Validate and wrap observations
    ///
    /// Rejects empty input, non-finite or non-positive loss/premium, and
    /// duplicate (company, year) pairs. Nothing is dropped here; the loader
    /// is responsible for filtering and counting.
    pub fn new(observations: Vec<Observation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(ModelError::DataQuality("dataset has no observations".to_string()));
        }

        let mut seen = HashSet::with_capacity(observations.len());
        for (idx, obs) in observations.iter().enumerate() {
            if !obs.loss.is_finite() || obs.loss <= 0.0 {
                return Err(ModelError::DataQuality(format!(
                    "observation {} (company {}, year {}): loss must be positive and finite, got {}",
                    idx, obs.company_id, obs.accident_year, obs.loss
                )));
            }
            if !obs.premium.is_finite() || obs.premium <= 0.0 {
                return Err(ModelError::DataQuality(format!(
                    "observation {} (company {}, year {}): premium must be positive and finite, got {}",
                    idx, obs.company_id, obs.accident_year, obs.premium
                )));
            }
            if !seen.insert((obs.company_id, obs.accident_year)) {
                return Err(ModelError::DataQuality(format!(
                    "duplicate record for company {} year {}",
                    obs.company_id, obs.accident_year
                )));
            }
        }

        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Distinct accident years, ascending
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.observations.iter().map(|o| o.accident_year).collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    /// Full loss series in record order
    pub fn losses(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.loss).collect()
    }

    pub fn total_loss(&self) -> f64 {
        self.observations.iter().map(|o| o.loss).sum()
    }

    /// Number of companies reporting in each year
    pub fn companies_by_year(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for obs in &self.observations {
            *counts.entry(obs.accident_year).or_insert(0) += 1;
        }
        counts
    }

    /// Largest single company loss in each accident year, ordered by year
    pub fn annual_maxima(&self) -> Vec<(i32, f64)> {
        let mut maxima: BTreeMap<i32, f64> = BTreeMap::new();
        for obs in &self.observations {
            maxima
                .entry(obs.accident_year)
                .and_modify(|m| *m = m.max(obs.loss))
                .or_insert(obs.loss);
        }
        maxima.into_iter().collect()
    }

    /// Build a new dataset from the records at the given indices
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        let observations = indices.iter().map(|&i| self.observations[i]).collect();
        Self::new(observations)
    }
}
