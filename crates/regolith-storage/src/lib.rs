pub mod chunk_serializer;
pub mod record;
pub mod saved_data;

pub use chunk_serializer::{deserialize_chunk, serialize_chunk, DATA_VERSION};
pub use record::{read_chunk_record, write_chunk_record, DEFAULT_DECODE_BUDGET};
pub use saved_data::{PersistentState, SavedState};
