use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{collection} `{id}` not found")]
    NotFound { collection: &'static str, id: u64 },
    #[error("invalid {collection} record: {message}")]
    Validation {
        collection: &'static str,
        message: String,
    },
}

impl RepoError {
    pub fn not_found(collection: &'static str, id: u64) -> Self {
        Self::NotFound { collection, id }
    }

    pub fn validation(collection: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            collection,
            message: message.into(),
        }
    }
}
