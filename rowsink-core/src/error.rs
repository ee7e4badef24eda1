use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Mapping Error - {0}")]
    Mapping(String),

    #[error("Mutation Error - {0}")]
    Mutation(String),

    #[error("Commit Error - {0}")]
    Commit(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Ack Error - {0}")]
    Ack(String),

    #[error("Store Error - {0}")]
    Store(String),
}

impl Error {
    /// Errors raised while building or committing a batch. They abort the current flush cycle
    /// and fail every pending record, everything else is a setup or plumbing problem.
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            Error::Mapping(_) | Error::Mutation(_) | Error::Commit(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Config(value.to_string())
    }
}
