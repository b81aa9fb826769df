use m2v_core::FetchError;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] m2v_core::ValidationError),

    #[error(transparent)]
    Fetch(FetchError),

    #[error("command error: {0}")]
    Command(String),

    #[error("strict mode failed: {failed_batches} of {total_batches} batches missing")]
    StrictModeViolation {
        failed_batches: usize,
        total_batches: usize,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for CliError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Validation(error) => Self::Validation(error),
            other => Self::Fetch(other),
        }
    }
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::StrictModeViolation { .. } => 5,
            Self::Fetch(_) | Self::Command(_) | Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
