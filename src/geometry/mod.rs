//! Geometric primitives, bounds and the metaball mesher.

pub mod bounds;
pub mod metaballs;
pub mod primitives;

pub use bounds::Bounds;
pub use metaballs::MetaballMesher;
pub use primitives::{
    Cone, ConesMap, Cylinder, CylindersMap, PrimitiveBuffers, Sphere, SpheresMap,
};
