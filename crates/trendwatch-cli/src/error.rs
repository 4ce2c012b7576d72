use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] trendwatch_core::ValidationError),

    #[error(transparent)]
    Core(#[from] trendwatch_core::CoreError),

    #[error(transparent)]
    Warehouse(#[from] trendwatch_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Core(trendwatch_core::CoreError::Validation(_)) => 2,
            Self::Core(trendwatch_core::CoreError::Timeout { .. }) => 7,
            Self::Serialization(_) => 4,
            Self::Core(_) | Self::Warehouse(_) => 6,
            Self::Io(_) => 10,
        }
    }
}
