//! Renderable primitives and the thread-local accumulation buffers.
//!
//! The three primitive kinds are plain tagged structs grouped into
//! material-keyed maps rather than trait objects; the circuit loader moves
//! whole maps around and appends them in bulk, so value semantics keep the
//! merge step trivial and commutative.

use std::collections::HashMap;

use glam::Vec3;

use crate::geometry::Bounds;

/// Sphere primitive. Used for the soma and for every kept section sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub material: usize,
    pub center: Vec3,
    pub radius: f32,
    /// Arc length from the soma along the section tree.
    pub distance_to_soma: f32,
    /// Index into the bound simulation frame, or a position on the shared
    /// simulation-time axis when no report is bound.
    pub simulation_offset: f32,
}

/// Cylinder primitive connecting two equal-radius samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cylinder {
    pub material: usize,
    pub center: Vec3,
    pub target: Vec3,
    pub radius: f32,
    pub distance_to_soma: f32,
    pub simulation_offset: f32,
}

/// Cone primitive connecting two samples of differing radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cone {
    pub material: usize,
    pub center: Vec3,
    pub target: Vec3,
    pub center_radius: f32,
    pub target_radius: f32,
    pub distance_to_soma: f32,
    pub simulation_offset: f32,
}

/// Primitive maps are keyed by material id. Insertion order within one key
/// carries no meaning; the key set grows as materials are discovered.
pub type SpheresMap = HashMap<usize, Vec<Sphere>>;
pub type CylindersMap = HashMap<usize, Vec<Cylinder>>;
pub type ConesMap = HashMap<usize, Vec<Cone>>;

/// Per-worker geometry accumulator.
///
/// During the parallel phase of a circuit import each worker owns one of
/// these exclusively; after the barrier they are merged one by one into the
/// shared scene. Merges append per material key and union the bounds, so any
/// merge order produces the same final maps and box.
#[derive(Debug, Default)]
pub struct PrimitiveBuffers {
    pub spheres: SpheresMap,
    pub cylinders: CylindersMap,
    pub cones: ConesMap,
    pub bounds: Bounds,
}

impl PrimitiveBuffers {
    pub fn push_sphere(&mut self, sphere: Sphere) {
        self.spheres.entry(sphere.material).or_default().push(sphere);
    }

    pub fn push_cylinder(&mut self, cylinder: Cylinder) {
        self.cylinders
            .entry(cylinder.material)
            .or_default()
            .push(cylinder);
    }

    pub fn push_cone(&mut self, cone: Cone) {
        self.cones.entry(cone.material).or_default().push(cone);
    }

    /// Append every primitive of `other` and union its bounds.
    pub fn merge(&mut self, other: PrimitiveBuffers) {
        for (material, mut spheres) in other.spheres {
            self.spheres.entry(material).or_default().append(&mut spheres);
        }
        for (material, mut cylinders) in other.cylinders {
            self.cylinders
                .entry(material)
                .or_default()
                .append(&mut cylinders);
        }
        for (material, mut cones) in other.cones {
            self.cones.entry(material).or_default().append(&mut cones);
        }
        self.bounds.merge(&other.bounds);
    }

    /// Shift every simulation offset by `delta`.
    ///
    /// The circuit loader samples each cell against a zero base and applies
    /// the cell's claimed position on the shared time axis afterwards.
    pub fn shift_simulation_offsets(&mut self, delta: f32) {
        for spheres in self.spheres.values_mut() {
            for sphere in spheres {
                sphere.simulation_offset += delta;
            }
        }
        for cylinders in self.cylinders.values_mut() {
            for cylinder in cylinders {
                cylinder.simulation_offset += delta;
            }
        }
        for cones in self.cones.values_mut() {
            for cone in cones {
                cone.simulation_offset += delta;
            }
        }
    }

    pub fn sphere_count(&self) -> usize {
        self.spheres.values().map(Vec::len).sum()
    }

    pub fn cylinder_count(&self) -> usize {
        self.cylinders.values().map(Vec::len).sum()
    }

    pub fn cone_count(&self) -> usize {
        self.cones.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spheres.is_empty() && self.cylinders.is_empty() && self.cones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(material: usize, x: f32) -> Sphere {
        Sphere {
            material,
            center: Vec3::new(x, 0.0, 0.0),
            radius: 1.0,
            distance_to_soma: 0.0,
            simulation_offset: 0.0,
        }
    }

    fn buffers_with(materials: &[usize]) -> PrimitiveBuffers {
        let mut buffers = PrimitiveBuffers::default();
        for (i, &material) in materials.iter().enumerate() {
            let s = sphere(material, i as f32);
            buffers.push_sphere(s);
            buffers.bounds.merge_point(s.center);
        }
        buffers
    }

    #[test]
    fn test_push_groups_by_material() {
        let buffers = buffers_with(&[2, 2, 5]);
        assert_eq!(buffers.spheres[&2].len(), 2);
        assert_eq!(buffers.spheres[&5].len(), 1);
        assert_eq!(buffers.sphere_count(), 3);
    }

    #[test]
    fn test_merge_order_is_irrelevant() {
        // Same buffers merged in both orders must give identical counts and
        // bounds (the circuit merge relies on this commutativity).
        let mut forward = PrimitiveBuffers::default();
        forward.merge(buffers_with(&[1, 2]));
        forward.merge(buffers_with(&[2, 3, 3]));

        let mut backward = PrimitiveBuffers::default();
        backward.merge(buffers_with(&[2, 3, 3]));
        backward.merge(buffers_with(&[1, 2]));

        assert_eq!(forward.sphere_count(), backward.sphere_count());
        for material in [1, 2, 3] {
            assert_eq!(
                forward.spheres[&material].len(),
                backward.spheres[&material].len()
            );
        }
        assert_eq!(forward.bounds, backward.bounds);
    }

    #[test]
    fn test_shift_simulation_offsets() {
        let mut buffers = PrimitiveBuffers::default();
        let mut s = sphere(0, 0.0);
        s.simulation_offset = 2.5;
        buffers.push_sphere(s);
        buffers.push_cylinder(Cylinder {
            material: 0,
            center: Vec3::ZERO,
            target: Vec3::X,
            radius: 1.0,
            distance_to_soma: 1.0,
            simulation_offset: 4.0,
        });

        buffers.shift_simulation_offsets(10.0);
        assert_eq!(buffers.spheres[&0][0].simulation_offset, 12.5);
        assert_eq!(buffers.cylinders[&0][0].simulation_offset, 14.0);
    }
}
