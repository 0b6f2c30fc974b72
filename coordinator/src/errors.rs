use thiserror::Error;

/// Errors that can occur in the federated execution layer.
#[derive(Error, Debug)]
pub enum FederatedError {
    /// The federation map cannot support the requested operation
    /// (overlapping ranges, wrong partition shape, misaligned partials)
    #[error("Routing error: {0}")]
    Routing(String),

    /// An aggregation named an operator outside the supported set
    #[error("Unsupported aggregation operator: {0}")]
    UnsupportedOperator(String),

    /// A worker failed while serving a request (remote error, dropped reply)
    #[error("Worker failure: {0}")]
    Worker(String),

    /// Bind was asked to concatenate partitions that do not tile the axis
    #[error("Non-contiguous bind: {0}")]
    NonContiguousBind(String),

    /// Malformed instruction text or an instruction this layer cannot handle
    #[error("Instruction error: {0}")]
    Instruction(String),

    /// Local kernel failure (shape mismatch, empty input, etc.)
    #[error("Execution error: {0}")]
    Execution(String),

    /// Outer wrap applied once at the combinator boundary
    #[error("Federated aggregation failed: {0}")]
    Aggregation(#[source] Box<FederatedError>),

    /// IO error occurred (config files, input files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FederatedError {
    /// Wrap an error at the combinator boundary.
    ///
    /// Errors that are already wrapped pass through unchanged so a failure is
    /// wrapped exactly once no matter how many combinators it crosses.
    pub fn aggregation(self) -> Self {
        match self {
            FederatedError::Aggregation(_) => self,
            other => FederatedError::Aggregation(Box::new(other)),
        }
    }

    /// Innermost error behind any aggregation wrapping
    pub fn root_cause(&self) -> &FederatedError {
        match self {
            FederatedError::Aggregation(inner) => inner.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for federated operations.
pub type Result<T> = std::result::Result<T, FederatedError>;

impl From<toml::ser::Error> for FederatedError {
    fn from(e: toml::ser::Error) -> Self {
        FederatedError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for FederatedError {
    fn from(e: toml::de::Error) -> Self {
        FederatedError::Serialization(e.to_string())
    }
}
