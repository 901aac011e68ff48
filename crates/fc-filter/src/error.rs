use thiserror::Error;

/// Error taxonomy per §7. Config-time errors are forwarded from
/// `fc_filter_config::ConfigError`; the rest are raised by the supervisor
/// or worker and are never fatal to either (only programmer-error
/// invariant violations inside a worker are, and those restart the worker
/// rather than propagate here).
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("failed to load extractor config: {0}")]
    ConfigLoad(String),

    #[error("failed to parse extractor config: {0}")]
    ConfigParse(String),

    #[error("invalid extractor config: {0}")]
    ConfigInvalid(String),

    #[error("failed to start filter worker for event type {0:?}")]
    WorkerStart(String),

    #[error("filter worker for event type {0:?} is down")]
    WorkerDown(String),

    #[error("reload timed out waiting on worker for event type {0:?}")]
    ReloadTimeout(String),
}

impl From<fc_filter_config::ConfigError> for FilterError {
    fn from(e: fc_filter_config::ConfigError) -> Self {
        match e {
            fc_filter_config::ConfigError::ConfigLoad(m) => FilterError::ConfigLoad(m),
            fc_filter_config::ConfigError::ConfigParse(m) => FilterError::ConfigParse(m),
            fc_filter_config::ConfigError::ConfigInvalid(m) => FilterError::ConfigInvalid(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
