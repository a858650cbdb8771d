use pa_core::EntityIdError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("invalid entity id for {name}: {source}")]
    InvalidEntityId {
        name: String,
        #[source]
        source: EntityIdError,
    },

    #[error("source entity id must not be empty")]
    EmptySource,
}

pub type SensorResult<T> = Result<T, SensorError>;
