use crate::{id::ProfileId, kv::StoreError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Zero results from a scan or lookup. Kept apart from an empty success so
    // callers can branch on it.
    #[error("not found: {0}")]
    NotFound(String),

    // A lookup that must resolve to exactly one record found several.
    #[error("found {count} profiles for id {id}")]
    Ambiguous { id: ProfileId, count: usize },

    #[error("could not encode {context}: {source}")]
    Encoding {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("store failure while {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("could not merge {count} profiles: {source}")]
    Merge {
        count: usize,
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn store(context: impl Into<String>, source: StoreError) -> Self {
        Error::Store {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn encoding(context: impl Into<String>, source: BoxError) -> Self {
        Error::Encoding {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
