use crate::bits::NibbleArray;
use regolith_common::SectionPos;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightLayer {
    Block,
    Sky,
}

/// The lighting subsystem as the serialization pipeline sees it: stored
/// arrays are handed over on load, read back on save. Computing light is
/// someone else's job.
pub trait LightingProvider {
    /// Accepts a section's light data. `trusted` marks arrays restored from
    /// storage that do not need recomputation; `None` clears the section.
    fn enqueue_section_data(
        &mut self,
        layer: LightLayer,
        pos: SectionPos,
        data: Option<NibbleArray>,
        trusted: bool,
    );

    /// Current light array for a section, if one exists.
    fn section_data(&self, layer: LightLayer, pos: SectionPos) -> Option<&NibbleArray>;
}

/// Map-backed provider that simply retains whatever it is handed.
#[derive(Debug, Default)]
pub struct StoredLighting {
    block: HashMap<SectionPos, NibbleArray>,
    sky: HashMap<SectionPos, NibbleArray>,
}

impl StoredLighting {
    pub fn new() -> Self {
        StoredLighting::default()
    }

    fn layer_mut(&mut self, layer: LightLayer) -> &mut HashMap<SectionPos, NibbleArray> {
        match layer {
            LightLayer::Block => &mut self.block,
            LightLayer::Sky => &mut self.sky,
        }
    }
}

impl LightingProvider for StoredLighting {
    fn enqueue_section_data(
        &mut self,
        layer: LightLayer,
        pos: SectionPos,
        data: Option<NibbleArray>,
        _trusted: bool,
    ) {
        match data {
            Some(array) => {
                self.layer_mut(layer).insert(pos, array);
            }
            None => {
                self.layer_mut(layer).remove(&pos);
            }
        }
    }

    fn section_data(&self, layer: LightLayer, pos: SectionPos) -> Option<&NibbleArray> {
        match layer {
            LightLayer::Block => self.block.get(&pos),
            LightLayer::Sky => self.sky.get(&pos),
        }
    }
}
