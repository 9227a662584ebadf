use crate::biome::BiomeSource;
use crate::block::BlockRegistry;
use crate::entity::{BlockEntityFactories, EntityFactories};
use crate::light::LightingProvider;
use crate::registry::Registry;
use crate::ticks::WorldScheduler;

/// Everything the serialization pipeline needs from the surrounding world,
/// bundled as explicit references. Registries and factories are lookup
/// tables the caller constructed; the traits are the external collaborators.
pub struct WorldContext<'a> {
    pub blocks: &'a BlockRegistry,
    pub fluids: &'a Registry,
    pub structures: &'a Registry,
    pub entities: &'a EntityFactories,
    pub block_entities: &'a BlockEntityFactories,
    pub biome_source: &'a dyn BiomeSource,
    pub lighting: &'a mut dyn LightingProvider,
    pub scheduler: &'a mut dyn WorldScheduler,
    /// Whether the dimension carries sky light at all. When false, stored
    /// sky-light arrays are neither written nor read.
    pub has_sky_light: bool,
}
