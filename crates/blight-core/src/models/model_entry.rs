//! Classifier catalog model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one classifier version in the model catalog.
///
/// Catalog invariants, enforced by the catalog repository: at most one
/// `is_active` row per `name`, at most one `is_default` row overall.
/// The artifact itself is fetched separately; only metadata lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the artifact lives once downloaded (empty until fetched)
    #[serde(rename = "modelPath", default)]
    pub storage_path: String,
    #[serde(default)]
    pub input_shape: Vec<u32>,
    #[serde(default)]
    pub output_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub updated_at: DateTime<Utc>,
}
