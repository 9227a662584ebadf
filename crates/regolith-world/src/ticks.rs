use crate::bits::{pack_section_rel, unpack_section_rel};
use crate::SECTIONS_PER_CHUNK;
use regolith_common::{BlockPos, ChunkPos};
use regolith_logger::{log, LogSeverity};
use regolith_nbt::Tag;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum TickPriority {
    ExtremelyHigh = -3,
    VeryHigh = -2,
    High = -1,
    Normal = 0,
    Low = 1,
    VeryLow = 2,
    ExtremelyLow = 3,
}

impl TickPriority {
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Out-of-range values fall back to `Normal`.
    pub fn by_value(value: i32) -> Self {
        match value {
            -3 => TickPriority::ExtremelyHigh,
            -2 => TickPriority::VeryHigh,
            -1 => TickPriority::High,
            1 => TickPriority::Low,
            2 => TickPriority::VeryLow,
            3 => TickPriority::ExtremelyLow,
            _ => TickPriority::Normal,
        }
    }
}

/// One deferred action in world-absolute form: where, on what, when, and in
/// which order within its tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledTick<T> {
    pub pos: BlockPos,
    pub target: T,
    pub delay: i32,
    pub priority: TickPriority,
}

/// Chunk-relative deferred ticks: packed 16-bit offsets grouped by section,
/// no delay or priority. This is the on-disk shape for chunks that are not
/// yet fully active.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtoTickList {
    sections: [Vec<u16>; SECTIONS_PER_CHUNK],
}

impl ProtoTickList {
    pub fn new() -> Self {
        ProtoTickList::default()
    }

    pub fn schedule(&mut self, pos: BlockPos) {
        let section = pos.y >> 4;
        if (0..SECTIONS_PER_CHUNK as i32).contains(&section) {
            self.sections[section as usize].push(pack_section_rel(pos));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(Vec::is_empty)
    }

    /// Every scheduled position, resolved to world-absolute form.
    pub fn positions(&self, chunk: ChunkPos) -> Vec<BlockPos> {
        let mut out = Vec::new();
        for (section_y, packed) in self.sections.iter().enumerate() {
            for &entry in packed {
                out.push(unpack_section_rel(entry, chunk, section_y as i32));
            }
        }
        out
    }

    pub fn to_tag(&self) -> Tag {
        packed_sections_to_tag(&self.sections)
    }

    pub fn from_tag(tag: &Tag) -> Self {
        ProtoTickList {
            sections: packed_sections_from_tag(tag),
        }
    }
}

/// Per-section lists of packed positions as a list of short lists. Shared
/// by tick lists, post-processing queues and deferred light positions.
pub fn packed_sections_to_tag(sections: &[Vec<u16>; SECTIONS_PER_CHUNK]) -> Tag {
    Tag::List(
        sections
            .iter()
            .map(|section| {
                Tag::List(
                    section
                        .iter()
                        .map(|&packed| Tag::Short(packed as i16))
                        .collect(),
                )
            })
            .collect(),
    )
}

/// Lenient inverse of [`packed_sections_to_tag`]: malformed entries are
/// dropped, missing sections read as empty.
pub fn packed_sections_from_tag(tag: &Tag) -> [Vec<u16>; SECTIONS_PER_CHUNK] {
    let mut sections: [Vec<u16>; SECTIONS_PER_CHUNK] = Default::default();
    if let Some(outer) = tag.as_list() {
        for (section_y, inner) in outer.iter().take(SECTIONS_PER_CHUNK).enumerate() {
            if let Some(entries) = inner.as_list() {
                for entry in entries {
                    if let Some(packed) = entry.as_i16() {
                        sections[section_y].push(packed as u16);
                    }
                }
            }
        }
    }
    sections
}

/// A full chunk's tick schedule for one payload kind. `ChunkRelative` and
/// `Retained` hold data loaded from storage until the chunk is promoted
/// into the live world; after promotion the entries live in the world
/// scheduler and the store is `Active`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickStore<T> {
    ChunkRelative(ProtoTickList),
    Retained(Vec<ScheduledTick<T>>),
    Active,
}

impl<T> TickStore<T> {
    pub fn is_chunk_relative(&self) -> bool {
        matches!(self, TickStore::ChunkRelative(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Block,
    Fluid,
}

/// The world-level scheduler, as seen from chunk (de)serialization: save
/// extracts a chunk's pending entries, promotion hands entries in. Payloads
/// cross this boundary by name.
pub trait WorldScheduler {
    fn pending_in(&self, kind: TickKind, chunk: ChunkPos) -> Vec<ScheduledTick<String>>;
    fn schedule_all(&mut self, kind: TickKind, ticks: Vec<ScheduledTick<String>>);
}

/// Vec-backed scheduler for tests and standalone tools.
#[derive(Debug, Default)]
pub struct CollectingScheduler {
    block: Vec<ScheduledTick<String>>,
    fluid: Vec<ScheduledTick<String>>,
}

impl CollectingScheduler {
    pub fn new() -> Self {
        CollectingScheduler::default()
    }

    fn list(&self, kind: TickKind) -> &Vec<ScheduledTick<String>> {
        match kind {
            TickKind::Block => &self.block,
            TickKind::Fluid => &self.fluid,
        }
    }
}

impl WorldScheduler for CollectingScheduler {
    fn pending_in(&self, kind: TickKind, chunk: ChunkPos) -> Vec<ScheduledTick<String>> {
        self.list(kind)
            .iter()
            .filter(|tick| ChunkPos::from_block(tick.pos) == chunk)
            .cloned()
            .collect()
    }

    fn schedule_all(&mut self, kind: TickKind, ticks: Vec<ScheduledTick<String>>) {
        match kind {
            TickKind::Block => self.block.extend(ticks),
            TickKind::Fluid => self.fluid.extend(ticks),
        }
    }
}

/// World-absolute tick entries as a tag list. Entries whose target has no
/// name are logged and skipped.
pub fn saved_ticks_to_tag<T>(
    ticks: &[ScheduledTick<T>],
    name_of: impl Fn(&T) -> Option<String>,
) -> Tag {
    let mut entries = Vec::with_capacity(ticks.len());
    for tick in ticks {
        let name = match name_of(&tick.target) {
            Some(name) => name,
            None => {
                log(
                    format!("dropping scheduled tick at {} with unnamed target", tick.pos),
                    LogSeverity::Warning,
                );
                continue;
            }
        };
        let mut entry = Tag::Compound(HashMap::new());
        entry.insert("i", Tag::String(name));
        entry.insert("x", Tag::Int(tick.pos.x));
        entry.insert("y", Tag::Int(tick.pos.y));
        entry.insert("z", Tag::Int(tick.pos.z));
        entry.insert("t", Tag::Int(tick.delay));
        entry.insert("p", Tag::Int(tick.priority.value()));
        entries.push(entry);
    }
    Tag::List(entries)
}

/// Inverse of [`saved_ticks_to_tag`]. Unknown target names are logged and
/// dropped; the rest of the list still loads.
pub fn saved_ticks_from_tag<T>(
    tag: &Tag,
    parse: impl Fn(&str) -> Option<T>,
) -> Vec<ScheduledTick<T>> {
    let mut ticks = Vec::new();
    let Some(entries) = tag.as_list() else {
        return ticks;
    };
    for entry in entries {
        let Some(name) = entry.get_string("i") else {
            continue;
        };
        let Some(target) = parse(name) else {
            log(
                format!("dropping scheduled tick with unknown target {}", name),
                LogSeverity::Warning,
            );
            continue;
        };
        ticks.push(ScheduledTick {
            pos: BlockPos::new(
                entry.get_int("x").unwrap_or(0),
                entry.get_int("y").unwrap_or(0),
                entry.get_int("z").unwrap_or(0),
            ),
            target,
            delay: entry.get_int("t").unwrap_or(0),
            priority: TickPriority::by_value(entry.get_int("p").unwrap_or(0)),
        });
    }
    ticks
}
