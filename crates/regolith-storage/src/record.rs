//! File-backed chunk records: a gzip-compressed tag tree per chunk,
//! written atomically and decoded under an allocation budget.

use crate::chunk_serializer::{deserialize_chunk, serialize_chunk, DATA_VERSION};
use regolith_common::{ChunkPos, Result};
use regolith_logger::{log, LogSeverity};
use regolith_nbt::{NbtFile, SizeTracker};
use regolith_world::chunk::Chunk;
use regolith_world::WorldContext;
use std::fs;
use std::path::{Path, PathBuf};

/// Default allocation ceiling for decoding one chunk record. Callers with
/// unusual content can pass their own budget.
pub const DEFAULT_DECODE_BUDGET: u64 = 16 * 1024 * 1024;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes a tag tree to `path` via a temp file and rename, so a crash never
/// leaves a half-written record behind.
pub(crate) fn atomic_write_gzip(path: &Path, file: &NbtFile) -> Result<()> {
    let tmp = temp_path(path);
    let mut out = fs::File::create(&tmp)?;
    file.write_gzip(&mut out)?;
    drop(out);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Serializes a chunk and writes its record to `path`.
pub fn write_chunk_record(path: &Path, chunk: &mut Chunk, ctx: &mut WorldContext) -> Result<()> {
    let root = serialize_chunk(chunk, ctx);
    atomic_write_gzip(path, &NbtFile::new(String::new(), root))
}

/// Reads a chunk record under the default decode budget.
pub fn read_chunk_record(path: &Path, expected: ChunkPos, ctx: &mut WorldContext) -> Result<Chunk> {
    read_chunk_record_with_budget(path, expected, ctx, DEFAULT_DECODE_BUDGET)
}

pub fn read_chunk_record_with_budget(
    path: &Path,
    expected: ChunkPos,
    ctx: &mut WorldContext,
    budget: u64,
) -> Result<Chunk> {
    let mut file = fs::File::open(path)?;
    let mut tracker = SizeTracker::new(budget);
    let nbt = NbtFile::read_gzip(&mut file, &mut tracker)?;

    let stored_version = nbt.root.get_int("DataVersion").unwrap_or(0);
    if stored_version > DATA_VERSION {
        log(
            format!(
                "chunk {} was saved by schema version {}, newer than {}",
                expected, stored_version, DATA_VERSION
            ),
            LogSeverity::Warning,
        );
    }

    deserialize_chunk(expected, &nbt.root, ctx)
}
