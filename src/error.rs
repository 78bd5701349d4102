use std::io;
use std::result;

use serenity::prelude::SerenityError;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Eq, PartialEq, ThisError)]
pub enum Error {
    #[error("{0}")]
    SerenityError(String),
    #[error("{0}")]
    Giveaway(String),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Storage(String),
    #[error("The requested giveaway was not found.")]
    NotFound,
    #[error("This giveaway is no longer running.")]
    NotActive,
    #[error("This giveaway has not ended yet.")]
    NotEnded,
    #[error("The giveaway {0} is already running.")]
    AlreadyRunning(u64),
    #[error("The giveaway message is no longer available.")]
    ResourceGone,
    #[error("{0}")]
    Unavailable(String),
}

impl Error {
    // Transient failures of an external service, safe to retry on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::SerenityError(_) | Error::Unavailable(_))
    }
}

impl From<SerenityError> for Error {
    fn from(err: SerenityError) -> Error {
        if let SerenityError::Http(http_err) = &err {
            if http_err.status_code().map(|code| code.as_u16()) == Some(404) {
                return Error::ResourceGone;
            }
        }

        let description = err.to_string();
        Error::SerenityError(description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Storage(format!("Can't access the giveaway storage: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Storage(format!("The giveaway storage is malformed: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error::Unavailable(err.to_string())
    }
}
