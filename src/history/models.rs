use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A detection persisted by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub plate_number: String,
    pub confidence: f64,
    /// Naive ISO-8601 time recorded by the store
    pub timestamp: NaiveDateTime,
    /// "image", "video" or "live"
    pub source: String,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub deleted: u64,
}
