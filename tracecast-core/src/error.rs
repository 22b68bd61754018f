use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracecastError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Trace file unreadable: {0}")]
    TraceRead(#[from] std::io::Error),
}
