pub mod error;
pub mod types;

pub use error::{RegolithError, Result};
pub use types::{BlockPos, ChunkPos, SectionPos};
