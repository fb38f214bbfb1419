use thiserror::Error;

/// An invariant violation raised by a validation gate.
///
/// Always names the offending field, the constraint it had to satisfy, and the
/// value that was observed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid state: field `{field}` expected {expected}, got {actual}")]
pub struct InvalidStateError {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl InvalidStateError {
    pub fn new(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self { field: field.into(), expected: expected.into(), actual: actual.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no handler registered under `{0}`")]
    UnknownHandler(String),
    #[error("handler `{0}` was already visited in this run")]
    CycleDetected(String),
}

impl RoutingError {
    pub fn handler(&self) -> &str {
        match self {
            Self::UnknownHandler(name) | Self::CycleDetected(name) => name,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownHandler(_) => "unknown_handler",
            Self::CycleDetected(_) => "routing_cycle",
        }
    }
}
