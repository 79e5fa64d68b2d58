//! Core library for computing triangulated urban noise maps.
//!
//! Given building footprints and point or line sound sources, the crate
//! builds an adaptive constrained Delaunay mesh over the free space outside
//! the buildings, evaluates an acoustic propagation model (free-field
//! decay, bounded-order wall reflection with absorption, bounded-order edge
//! diffraction) at every mesh vertex, and emits triangle records carrying
//! the levels at their three corners. [`bicubic`] provides the surface
//! interpolation used downstream to reconstruct dense fields from the
//! vertex samples.

pub mod bicubic;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod index;
pub mod mesh;
pub mod propagation;

pub use bicubic::{cubic_value, BicubicSurface};
pub use engine::{
    compute_noise_grid, compute_noise_grid_cancellable, CancelToken, NoiseGrid, TriGridConfig,
    TriGridEngine, TriRecord,
};
pub use error::{NoiseGridError, Result};
pub use geometry::{Footprint, Point, Segment};
pub use index::GeometryIndex;
pub use mesh::{Mesh, MeshBuilder, DEFAULT_EXTENT, MAX_REFINEMENT_PASSES};
pub use propagation::{
    densify_sources, NoiseSource, PropagationEvaluator, SourceSample, EDGE_DIFFRACTION_LOSS_DB,
    SILENCE_LEVEL_DB,
};
