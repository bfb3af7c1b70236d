//! Domain models shared across the store, API client, and sync engine

mod model_entry;
mod prediction;
mod remedy;

pub use model_entry::ModelEntry;
pub use prediction::{DeviceInfo, GeoPoint, PredictionId, PredictionRecord, PredictionScores};
pub use remedy::{RemedyRecord, Severity};
