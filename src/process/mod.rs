//! Live-process inspection: memory-map parsing and whole-process snapshots.

pub mod maps;
pub mod snapshot;

pub use maps::{coalesce, parse_maps, read_self_maps, retain_regions, MapRegion};
pub use snapshot::ProcessSnapshot;
