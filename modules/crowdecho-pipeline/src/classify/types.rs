use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The classifier's verdict for one item, as it comes off the wire.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ItemVerdict {
    /// External id of the item this verdict applies to.
    pub external_id: String,
    /// Feedback category name, or "Noise" when not classifiable.
    pub category: String,
    /// Product category name, or "Noise".
    pub product: String,
    /// Sentiment on a 0-5 scale (0 = very negative, 5 = very positive).
    pub sentiment_score: f64,
    /// Number of distinct issues mentioned.
    pub issue_count: i32,
    /// Number of distinct feature requests mentioned.
    pub feature_request_count: i32,
    /// Bucket membership suggestions, each with a confidence in [0, 1].
    #[serde(default)]
    pub buckets: Vec<BucketVerdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BucketVerdict {
    pub name: String,
    pub confidence: f64,
}

/// Top-level response shape the classifier is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationResponse {
    pub items: Vec<ItemVerdict>,
}
