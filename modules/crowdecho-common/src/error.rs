use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrowdechoError>;

#[derive(Error, Debug)]
pub enum CrowdechoError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Content source error: {0}")]
    Source(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Orphan reply {external_id}: parent {parent} is not persisted for this item")]
    OrphanReply { external_id: String, parent: String },

    #[error("Classification lease held: another run is in progress for this tenant")]
    LeaseHeld,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
