use crate::types::ChunkPos;
use std::error::Error;
use std::fmt;

pub type Result<T> = std::result::Result<T, RegolithError>;

/// Errors surfaced by the persistence core.
///
/// `IoError`, `CorruptData`, `TooDeep` and `BudgetExceeded` abort the decode
/// that produced them. `UnknownReference` and `PositionMismatch` are normally
/// recovered close to where they occur; they appear here so callers that want
/// stricter handling can still distinguish them.
#[derive(Debug)]
pub enum RegolithError {
    IoError(std::io::Error),
    CorruptData(String),
    TooDeep,
    BudgetExceeded { used: u64, limit: u64 },
    UnknownReference(String),
    PositionMismatch { expected: ChunkPos, actual: ChunkPos },
}

impl fmt::Display for RegolithError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegolithError::IoError(err) => write!(f, "IO error: {}", err),
            RegolithError::CorruptData(msg) => write!(f, "Corrupt data: {}", msg),
            RegolithError::TooDeep => write!(f, "Tag structure nested too deeply"),
            RegolithError::BudgetExceeded { used, limit } => {
                write!(f, "Decode budget exceeded: {} of {} bytes", used, limit)
            }
            RegolithError::UnknownReference(name) => {
                write!(f, "Unknown reference: {}", name)
            }
            RegolithError::PositionMismatch { expected, actual } => {
                write!(
                    f,
                    "Chunk position mismatch: expected {}, stored {}",
                    expected, actual
                )
            }
        }
    }
}

impl Error for RegolithError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegolithError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RegolithError {
    fn from(err: std::io::Error) -> Self {
        RegolithError::IoError(err)
    }
}
