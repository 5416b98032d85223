use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid store code `{0}`")]
    InvalidStoreCode(String),
    #[error("invalid shift date `{0}` (expected YYYY-MM-DD)")]
    InvalidShiftDate(String),
    #[error("invalid preference status `{0}` (expected ok|maybe|no)")]
    InvalidPreferenceStatus(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("authentication failure: {0}")]
    Authentication(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ApplicationError {
    /// Failures the end user should hear about. Everything else is logged only.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Persistence(_))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Invalid signature",
            Self::BadRequest { .. } => "Invalid request",
            Self::ServiceUnavailable { .. } => "Service temporarily unavailable",
            Self::Internal { .. } => "Internal error",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Authentication(message) => Self::Unauthorized { message, correlation_id },
            ApplicationError::MalformedEvent(message) | ApplicationError::NotFound(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Persistence(message)
            | ApplicationError::UpstreamUnavailable(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
