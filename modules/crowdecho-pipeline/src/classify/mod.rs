pub mod claude;
pub mod runner;
pub mod types;

pub use claude::ClaudeClassifier;
pub use runner::{ClassifyRunner, ClassifyStats};
pub use types::{BucketVerdict, ClassificationResponse, ItemVerdict};
