//! Loss observations and dataset loading

mod observation;
pub mod loader;

pub use observation::{LossDataset, Observation};
pub use loader::{load_observations, load_observations_from_reader, LoadOptions, LoadSummary};
