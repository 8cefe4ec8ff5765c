//! Coordinate model: segments, contexts and the displayed region.

pub mod context;
pub mod expander;
pub mod genome;
pub mod interval;
pub mod region;
pub mod segment;

pub use context::{NavigationContext, SegmentCoordinate};
pub use expander::{ExpansionData, RegionExpander, ViewWindow};
pub use genome::{FlankType, FlankingStrategy, Genome, RegionSet};
pub use interval::{ChromosomeInterval, OpenInterval};
pub use region::{DEFAULT_MIN_REGION_WIDTH, DisplayedRegionModel};
pub use segment::{Locus, Segment, SegmentInterval, Strand};
