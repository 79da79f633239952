//! # Morpho-Spheres: Neuronal Morphology Geometry Generation
//!
//! Morpho-Spheres converts neuronal morphology descriptions (3D skeletal
//! traces of soma, axon and dendrites) into renderable geometric primitives
//! or triangulated metaball isosurfaces, and aggregates this across an
//! entire circuit of cells in parallel, optionally binding per-primitive
//! values to a time-varying compartment report.
//!
//! ## Architecture Overview
//!
//! The crate is organized into five main subsystems:
//!
//! ### 1. Morphology Model ([`morphology`])
//!
//! The transient per-cell data model:
//! - [`morphology::Morphology`] - soma plus a section arena with
//!   index-based parent links
//! - [`morphology::MorphologyStore`] - the read-only source that turns a
//!   locator and a placement transform into a placed morphology
//!
//! **Key Design**: sections back-reference their parents by arena index,
//! never by owning pointers; a morphology lives for exactly one loader task.
//!
//! ### 2. Geometry ([`geometry`])
//!
//! - [`geometry::Sphere`] / [`geometry::Cylinder`] / [`geometry::Cone`] -
//!   tagged primitive structs grouped into material-keyed maps
//! - [`geometry::PrimitiveBuffers`] - the worker-local accumulator with a
//!   commutative merge
//! - [`geometry::MetaballMesher`] - surface-nets polygonization of a
//!   metaball field for the soma and near-soma region
//!
//! ### 3. Loaders ([`loader`])
//!
//! - [`loader::MorphologyLoader`] - walks one section tree with a
//!   quality-dependent stride and emits primitives with material and
//!   simulation-offset bookkeeping
//! - [`loader::CircuitLoader`] - fans the morphology loader out across all
//!   cells of a circuit with rayon, merges worker geometry into the scene
//!   and lays simulated cells end-to-end on a shared time axis
//!
//! **Key Design**: workers own private buffers during the parallel phase;
//! the scene is touched only in the serialized merge after the barrier.
//!
//! ### 4. Simulation ([`simulation`])
//!
//! - [`simulation::CompartmentReportSource`] - the read-only report surface
//! - [`simulation::SimulationHandler`] - playback handler over the compact
//!   binary frame cache written by
//!   [`loader::CircuitLoader::import_simulation_data`]
//!
//! ### 5. Scene Sink ([`scene`])
//!
//! - [`scene::Scene`] - append-only primitive and mesh maps, the shared
//!   world bounds and the playback-handler slot
//!
//! ## Data Flow
//!
//! ```text
//! Circuit metadata -> MorphologyLoader (per cell, parallel)
//!                  -> worker-local PrimitiveBuffers
//!                  -> Scene merge + world bounds
//! Compartment report -> cache file -> SimulationHandler
//! ```
//!
//! ## Dependencies
//!
//! - **Math**: `glam` (SIMD math types)
//! - **Concurrency**: `rayon` (parallel cell processing)
//! - **Serialization**: `serde` + `serde_yaml` (config files), `bytemuck`
//!   (raw frame records)
//! - **Mesh import**: `tobj` (OBJ pass-through)
//! - **Diagnostics**: `log` facade, `thiserror` error enums

pub mod config;
pub mod geometry;
pub mod loader;
pub mod mesh;
pub mod morphology;
pub mod scene;
pub mod simulation;

pub use config::{ColorScheme, GeometryConfig, GeometryQuality, SectionFilter};
pub use geometry::{Bounds, Cone, Cylinder, MetaballMesher, PrimitiveBuffers, Sphere};
pub use loader::{CircuitLoader, CircuitSource, MorphologyLoader, MorphologyOffsets};
pub use mesh::{MeshImporter, ObjMeshImporter};
pub use morphology::{Morphology, MorphologyStore, Sample, Section, SectionType, Soma};
pub use scene::{Scene, TriangleMesh};
pub use simulation::{CompartmentReportSource, SimulationHandler, SimulationInformation};
