use thiserror::Error;

pub type PulseResult<T> = Result<T, PulseError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PulseError {
    #[error("Invalid ISO 8601 duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),
}
