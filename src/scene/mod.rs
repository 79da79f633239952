//! Scene sink for generated geometry.
//!
//! The scene owns the session-lifetime primitive and mesh maps, the world
//! bounds, and the slot for a simulation playback handler. Loaders only ever
//! append: primitives arrive in bulk through [`Scene::merge_buffers`], the
//! single point where worker-local geometry enters shared state.

use std::collections::HashMap;

use glam::Vec3;

use crate::geometry::{Bounds, ConesMap, CylindersMap, PrimitiveBuffers, SpheresMap};
use crate::simulation::cache::SimulationHandler;

/// Indexed triangle mesh with per-vertex normals.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    /// Append `other`, rebasing its indices onto this mesh's vertex range.
    pub fn append(&mut self, other: TriangleMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.normals.extend(other.normals);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Triangle meshes keyed by material id.
pub type TriangleMeshMap = HashMap<usize, TriangleMesh>;

/// Shared geometry destination for morphology and circuit imports.
#[derive(Default)]
pub struct Scene {
    pub spheres: SpheresMap,
    pub cylinders: CylindersMap,
    pub cones: ConesMap,
    pub triangle_meshes: TriangleMeshMap,
    pub world_bounds: Bounds,
    simulation_handler: Option<SimulationHandler>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a worker's accumulated primitives and union its bounds.
    pub fn merge_buffers(&mut self, buffers: PrimitiveBuffers) {
        self.world_bounds.merge(&buffers.bounds);
        let mut scene_buffers = PrimitiveBuffers {
            spheres: std::mem::take(&mut self.spheres),
            cylinders: std::mem::take(&mut self.cylinders),
            cones: std::mem::take(&mut self.cones),
            bounds: Bounds::default(),
        };
        scene_buffers.merge(buffers);
        self.spheres = scene_buffers.spheres;
        self.cylinders = scene_buffers.cylinders;
        self.cones = scene_buffers.cones;
    }

    /// Append a triangle mesh under `material`.
    pub fn add_triangle_mesh(&mut self, material: usize, mesh: TriangleMesh) {
        self.triangle_meshes
            .entry(material)
            .or_default()
            .append(mesh);
    }

    /// Attach the playback handler that will serve cached simulation frames.
    pub fn set_simulation_handler(&mut self, handler: SimulationHandler) {
        self.simulation_handler = Some(handler);
    }

    pub fn simulation_handler(&self) -> Option<&SimulationHandler> {
        self.simulation_handler.as_ref()
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Sphere;

    #[test]
    fn test_merge_buffers_appends_and_grows_bounds() {
        let mut scene = Scene::new();
        let mut buffers = PrimitiveBuffers::default();
        let sphere = Sphere {
            material: 3,
            center: Vec3::new(5.0, 0.0, 0.0),
            radius: 1.0,
            distance_to_soma: 0.0,
            simulation_offset: 0.0,
        };
        buffers.push_sphere(sphere);
        buffers.bounds.merge_point(sphere.center);

        scene.merge_buffers(buffers);
        assert_eq!(scene.sphere_count(), 1);
        assert_eq!(scene.world_bounds.max.x, 5.0);

        // Second merge appends under the same key.
        let mut more = PrimitiveBuffers::default();
        more.push_sphere(sphere);
        scene.merge_buffers(more);
        assert_eq!(scene.spheres[&3].len(), 2);
    }

    #[test]
    fn test_triangle_mesh_append_rebases_indices() {
        let mut mesh = TriangleMesh {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            normals: vec![Vec3::Z; 3],
            indices: vec![0, 1, 2],
        };
        mesh.append(TriangleMesh {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            normals: vec![Vec3::Y; 3],
            indices: vec![0, 1, 2],
        });
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(mesh.triangle_count(), 2);
    }
}
