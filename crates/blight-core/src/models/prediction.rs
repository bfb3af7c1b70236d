//! Prediction capture model

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a captured prediction, using UUID v7 (time-sortable)
///
/// Assigned on the device at capture time and reused on every upload
/// attempt, so the server can treat re-submissions of the same capture
/// as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionId(Uuid);

impl PredictionId {
    /// Create a new unique prediction ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PredictionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Per-class scores produced by the classifier, keyed by class label.
///
/// Stored as one JSON value at the storage boundary; everywhere else it
/// stays a typed map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionScores(BTreeMap<String, f64>);

impl PredictionScores {
    /// The class with the highest score, if any.
    #[must_use]
    pub fn top(&self) -> Option<(&str, f64)> {
        self.0
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, score)| (class.as_str(), *score))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, f64)> for PredictionScores {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Device metadata attached to a capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Geolocation of a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

/// A disease-classification result captured on the device.
///
/// Immutable once captured, except for the `synced`/`synced_at` pair
/// which only the sync flow sets after the server confirmed acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    /// Client-generated identifier, doubles as the idempotency key
    pub id: PredictionId,
    pub user_id: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy_id: Option<String>,
    /// Reference to the captured image (local path or upload URL)
    pub image_ref: String,
    /// Full class→score mapping from the classifier
    #[serde(rename = "predictionResults")]
    pub scores: PredictionScores,
    pub top_prediction: String,
    /// Score of the top class, in `[0, 1]`
    pub confidence: f64,
    pub is_offline_capture: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Capture a new prediction for `user_id` with the given scores.
    ///
    /// The top class and confidence are derived from `scores`; the
    /// confidence is clamped into `[0, 1]`. Fails when `scores` is
    /// empty, since a capture without a classification is meaningless.
    pub fn capture(
        user_id: impl Into<String>,
        model_id: impl Into<String>,
        image_ref: impl Into<String>,
        scores: PredictionScores,
    ) -> crate::Result<Self> {
        let (top_prediction, confidence) = scores
            .top()
            .map(|(class, score)| (class.to_string(), score.clamp(0.0, 1.0)))
            .ok_or_else(|| {
                crate::Error::InvalidInput("prediction scores must not be empty".to_string())
            })?;

        Ok(Self {
            id: PredictionId::new(),
            user_id: user_id.into(),
            model_id: model_id.into(),
            remedy_id: None,
            image_ref: image_ref.into(),
            scores,
            top_prediction,
            confidence,
            is_offline_capture: true,
            device_info: None,
            location: None,
            notes: None,
            synced: false,
            synced_at: None,
            created_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn with_remedy(mut self, remedy_id: impl Into<String>) -> Self {
        self.remedy_id = Some(remedy_id.into());
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}
