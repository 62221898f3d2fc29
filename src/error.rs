use std::error::Error;
use std::fmt;
use tokio_cron_scheduler::JobSchedulerError;

/// Custom Error and Result types to unify errors from all sources.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    Http(String),
    Source(String),
    Scheduler(String),
    ChannelSend(String),
    Validation(String),
    Parse,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::Http(s) => write!(f, "HTTP Error: {}", s),
            EngineError::Source(s) => write!(f, "Source Error: {}", s),
            EngineError::Scheduler(s) => write!(f, "Scheduler Error: {}", s),
            EngineError::ChannelSend(s) => write!(f, "Channel Send Error: {}", s),
            EngineError::Validation(s) => write!(f, "Validation Error: {}", s),
            EngineError::Parse => write!(f, "Parse Error"),
        }
    }
}

impl Error for EngineError {}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        EngineError::Http(error.to_string())
    }
}

impl From<JobSchedulerError> for EngineError {
    fn from(error: JobSchedulerError) -> Self {
        EngineError::Scheduler(error.to_string())
    }
}
