use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::SerializationError(_) => "serializationerror".to_string(),
            StdError::KubeError(kube::Error::Api(response)) => format!("kubeerror_{}", response.code),
            StdError::KubeError(_) => "kubeerror".to_string(),
            StdError::FinalizerError(_) => "finalizererror".to_string(),
            StdError::MetadataMissing(_) => "metadatamissing".to_string(),
            StdError::InvalidArgument(_) => "invalidargument".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    /// HTTP status code of the underlying API error, if there is one.
    pub fn api_code(&self) -> Option<u16> {
        let inner = match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        };
        match inner {
            StdError::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Retry after `duration` instead of going through the error policy.
    pub fn requeue_after(self, duration: Duration) -> Error {
        match self {
            Error::StdError(e) => Error::ErrorWithRequeue(ErrorWithRequeue::new(e, duration)),
            Error::ErrorWithRequeue(e) => Error::ErrorWithRequeue(ErrorWithRequeue { duration, ..e }),
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::StdError(StdError::KubeError(e))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
