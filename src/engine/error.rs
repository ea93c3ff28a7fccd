use crate::model::{Interval, SpotId};

#[derive(Debug)]
pub enum EngineError {
    LotNotFound(String),
    LotExists(String),
    SpotOutOfRange { lot: String, spot: SpotId, spots: usize },
    InvalidInterval(Interval),
    Conflict { lot: String, spot: SpotId },
    LimitExceeded(&'static str),
    StoreError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::LotNotFound(name) => write!(f, "parking lot not found: {name}"),
            EngineError::LotExists(name) => write!(f, "parking lot already exists: {name}"),
            EngineError::SpotOutOfRange { lot, spot, spots } => {
                write!(f, "spot {spot} out of range for {lot} ({spots} spots)")
            }
            EngineError::InvalidInterval(interval) => write!(
                f,
                "interval ends before it starts: {} .. {}",
                interval.start, interval.end
            ),
            EngineError::Conflict { lot, spot } => {
                write!(f, "spot {spot} at {lot} is already reserved for that time")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreError(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
