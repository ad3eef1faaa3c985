use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse-time failures. Only strict parser configurations surface these;
/// the default configuration degrades unknown grammar to inert AST nodes.
/// Evaluation itself never fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Bad segment input: {0}")]
    BadInput(String),

    #[error("Unknown criterion: {0}")]
    UnknownCriterion(String),

    #[error("Unknown value: {0}")]
    UnknownValue(String),
}

impl From<pushpulse_core::PulseError> for ParseError {
    fn from(err: pushpulse_core::PulseError) -> Self {
        ParseError::BadInput(err.to_string())
    }
}
