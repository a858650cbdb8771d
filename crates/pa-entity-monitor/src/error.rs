use pa_core::HostError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to repoint {entity_id}: {reason}")]
    Update { entity_id: String, reason: String },
}

impl MonitorError {
    pub fn update(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Update {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
