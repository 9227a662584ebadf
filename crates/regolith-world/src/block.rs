use regolith_common::{RegolithError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Index into a [`BlockRegistry`]. Id 0 is always air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockState(pub u16);

impl BlockState {
    pub const AIR: BlockState = BlockState(0);

    pub fn is_air(self) -> bool {
        self.0 == 0
    }
}

/// Fluid id within the fluid registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FluidId(pub u16);

/// One registered block state: its palette name, state properties, and the
/// attributes the heightmap predicates and light recovery scan care about.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDef {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub light_emission: u8,
    #[serde(default)]
    pub blocks_motion: bool,
    #[serde(default)]
    pub is_leaves: bool,
    #[serde(default)]
    pub is_fluid: bool,
}

impl BlockDef {
    pub fn new(name: &str) -> Self {
        BlockDef {
            name: name.to_string(),
            properties: BTreeMap::new(),
            light_emission: 0,
            blocks_motion: false,
            is_leaves: false,
            is_fluid: false,
        }
    }

    pub fn solid(mut self) -> Self {
        self.blocks_motion = true;
        self
    }

    pub fn fluid(mut self) -> Self {
        self.is_fluid = true;
        self
    }

    pub fn leaves(mut self) -> Self {
        self.is_leaves = true;
        self
    }

    pub fn light(mut self, level: u8) -> Self {
        self.light_emission = level;
        self
    }

    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }
}

/// Explicit block-state table. Id 0 ("air") is registered on construction
/// so `BlockState::AIR` is always valid.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    defs: Vec<BlockDef>,
    by_name: HashMap<String, Vec<u16>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        let mut registry = BlockRegistry {
            defs: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.register(BlockDef::new("air"));
        registry
    }

    /// Loads block definitions from a JSON array of [`BlockDef`] records.
    /// "air" is prepended if the data does not start with it.
    pub fn from_json(json: &str) -> Result<Self> {
        let defs: Vec<BlockDef> = serde_json::from_str(json)
            .map_err(|e| RegolithError::CorruptData(format!("invalid block data: {}", e)))?;
        let mut registry = BlockRegistry::new();
        for def in defs {
            if def.name == "air" && def.properties.is_empty() {
                continue;
            }
            registry.register(def);
        }
        Ok(registry)
    }

    pub fn register(&mut self, def: BlockDef) -> BlockState {
        let id = self.defs.len() as u16;
        self.by_name.entry(def.name.clone()).or_default().push(id);
        self.defs.push(def);
        BlockState(id)
    }

    pub fn def(&self, state: BlockState) -> Option<&BlockDef> {
        self.defs.get(state.0 as usize)
    }

    pub fn name(&self, state: BlockState) -> Option<&str> {
        self.def(state).map(|def| def.name.as_str())
    }

    /// Exact (name, properties) lookup, the palette decode path.
    pub fn state_for(&self, name: &str, properties: &BTreeMap<String, String>) -> Option<BlockState> {
        let candidates = self.by_name.get(name)?;
        candidates
            .iter()
            .copied()
            .find(|&id| self.defs[id as usize].properties == *properties)
            .map(BlockState)
    }

    /// First registered state with the given name.
    pub fn default_state(&self, name: &str) -> Option<BlockState> {
        self.by_name
            .get(name)
            .and_then(|candidates| candidates.first())
            .map(|&id| BlockState(id))
    }

    pub fn light_emission(&self, state: BlockState) -> u8 {
        self.def(state).map(|def| def.light_emission).unwrap_or(0)
    }

    pub fn blocks_motion(&self, state: BlockState) -> bool {
        self.def(state).map(|def| def.blocks_motion).unwrap_or(false)
    }

    pub fn is_leaves(&self, state: BlockState) -> bool {
        self.def(state).map(|def| def.is_leaves).unwrap_or(false)
    }

    pub fn is_fluid(&self, state: BlockState) -> bool {
        self.def(state).map(|def| def.is_fluid).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
