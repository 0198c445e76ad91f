use thiserror::Error;

/// Failure of a single protocol round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend reported failure: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no mock response for {0}")]
    NoMock(String),
    #[error("backend did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors surfaced by a page instance to its caller.
///
/// `Clone` so that every caller coalesced onto one reload observes the
/// same result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("another operation is in flight on this page")]
    ConcurrentOperation,
    #[error("protocol request failed: {0}")]
    ProtocolRequestFailure(String),
    #[error("response carried no protocol")]
    MissingProtocol,
    #[error("page has not been loaded")]
    NotLoaded,
    #[error("unknown component '{0}'")]
    UnknownComponent(String),
    #[error("component '{component}' has no operation '{operation}'")]
    UnknownOperation { component: String, operation: String },
    #[error("operation '{operation}' on '{component}' is disabled")]
    OperationDisabled { component: String, operation: String },
    #[error("page navigated away")]
    Terminated,
    #[error("page is unmounted")]
    Unmounted,
    #[error("no async runtime to run the request on")]
    NoRuntime,
}

impl From<TransportError> for PageError {
    fn from(err: TransportError) -> Self {
        PageError::ProtocolRequestFailure(err.to_string())
    }
}
