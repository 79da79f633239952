//! Metaball isosurface meshing.
//!
//! Converts a set of weighted spheres into a watertight triangle mesh by
//! sampling an implicit field on a cubic lattice and polygonizing the
//! threshold isosurface with a surface-nets extraction: one vertex per
//! straddling cell at the mean of its edge crossings, quads across every
//! sign-change edge.

use std::collections::HashMap;

use glam::Vec3;

use crate::geometry::Sphere;
use crate::scene::TriangleMesh;

/// Guard against singular field values directly on a ball center.
const MIN_DISTANCE_SQ: f32 = 1e-6;

/// Surface-nets mesher over a metaball field.
///
/// The field value at a point is the falloff-weighted sum of every ball's
/// contribution, `radius^2 / distance^2`, so closer and larger balls
/// contribute more. An isolated ball's surface sits at its radius for a
/// threshold of 1.
pub struct MetaballMesher {
    grid_size: usize,
    threshold: f32,
    cell_size: f32,
    grid_origin: Vec3,
}

impl MetaballMesher {
    /// Create a mesher with a lattice of `grid_size` points per axis.
    pub fn new(grid_size: usize, threshold: f32) -> Self {
        Self {
            grid_size: grid_size.max(2),
            threshold,
            cell_size: 0.0,
            grid_origin: Vec3::ZERO,
        }
    }

    /// Polygonize `metaballs` into a mesh tagged with `material`.
    ///
    /// Returns `None` when no balls are given or the field never crosses
    /// the threshold inside the lattice.
    pub fn generate(&mut self, metaballs: &[Sphere], material: usize) -> Option<TriangleMesh> {
        if metaballs.is_empty() {
            return None;
        }

        self.fit_grid(metaballs);
        let field = self.sample_field(metaballs);
        let mesh = self.extract_mesh(&field);

        if mesh.indices.is_empty() {
            None
        } else {
            log::debug!(
                "Metaball mesh: {} balls -> {} triangles (material {})",
                metaballs.len(),
                mesh.triangle_count(),
                material
            );
            Some(mesh)
        }
    }

    /// Size a cubic lattice around the balls with margin for the falloff.
    fn fit_grid(&mut self, metaballs: &[Sphere]) {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        let mut max_radius = 0.0f32;
        for ball in metaballs {
            min = min.min(ball.center - Vec3::splat(ball.radius));
            max = max.max(ball.center + Vec3::splat(ball.radius));
            max_radius = max_radius.max(ball.radius);
        }

        let margin = max_radius.max(1e-3);
        let center = (min + max) * 0.5;
        let side = (max - min).max_element() + 2.0 * margin;
        self.cell_size = side / (self.grid_size - 1) as f32;
        self.grid_origin = center - Vec3::splat(side * 0.5);
    }

    #[inline]
    fn grid_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.grid_size + z * self.grid_size * self.grid_size
    }

    #[inline]
    fn grid_to_world(&self, x: usize, y: usize, z: usize) -> Vec3 {
        self.grid_origin
            + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size
    }

    /// Field value at a world position.
    fn field_at(point: Vec3, metaballs: &[Sphere]) -> f32 {
        metaballs
            .iter()
            .map(|ball| {
                let distance_sq = (point - ball.center).length_squared().max(MIN_DISTANCE_SQ);
                ball.radius * ball.radius / distance_sq
            })
            .sum()
    }

    /// Evaluate the field on every lattice point.
    fn sample_field(&self, metaballs: &[Sphere]) -> Vec<f32> {
        let n = self.grid_size;
        let mut field = vec![0.0f32; n * n * n];
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    field[self.grid_index(x, y, z)] =
                        Self::field_at(self.grid_to_world(x, y, z), metaballs);
                }
            }
        }
        field
    }

    /// Two-phase surface-nets extraction over the sampled field.
    fn extract_mesh(&self, field: &[f32]) -> TriangleMesh {
        let mut mesh = TriangleMesh::default();
        let mut vertex_map: HashMap<usize, u32> = HashMap::new();

        let iso = self.threshold;
        let n = self.grid_size;

        // Phase 1: one vertex per cell straddling the isosurface.
        for z in 0..n - 1 {
            for y in 0..n - 1 {
                for x in 0..n - 1 {
                    let corners = self.cell_corners(x, y, z, field);
                    if let Some(position) = self.surface_vertex(&corners, x, y, z, iso) {
                        let idx = self.grid_index(x, y, z);
                        vertex_map.insert(idx, mesh.vertices.len() as u32);
                        mesh.vertices.push(position);
                        mesh.normals.push(self.surface_normal(x, y, z, field));
                    }
                }
            }
        }

        // Phase 2: quads across every edge that crosses the isosurface.
        for z in 0..n - 1 {
            for y in 0..n - 1 {
                for x in 0..n - 1 {
                    let idx = self.grid_index(x, y, z);
                    if !vertex_map.contains_key(&idx) {
                        continue;
                    }

                    let corners = self.cell_corners(x, y, z, field);
                    // Winding depends on which side corner 0 sits on so the
                    // triangles face away from the field interior.
                    let flip = corners[0] < iso;

                    if (corners[0] < iso) != (corners[1] < iso) {
                        self.quad_x(x, y, z, flip, &vertex_map, &mut mesh.indices);
                    }
                    if (corners[0] < iso) != (corners[2] < iso) {
                        self.quad_y(x, y, z, flip, &vertex_map, &mut mesh.indices);
                    }
                    if (corners[0] < iso) != (corners[4] < iso) {
                        self.quad_z(x, y, z, flip, &vertex_map, &mut mesh.indices);
                    }
                }
            }
        }

        mesh
    }

    /// Field values at the 8 corners of cell (x, y, z).
    ///
    /// Corner ordering: bit 0 = +x, bit 1 = +y, bit 2 = +z.
    fn cell_corners(&self, x: usize, y: usize, z: usize, field: &[f32]) -> [f32; 8] {
        let mut corners = [0.0f32; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            *corner = field[self.grid_index(x + (i & 1), y + ((i >> 1) & 1), z + ((i >> 2) & 1))];
        }
        corners
    }

    /// Vertex position for a straddling cell: mean of its edge crossings.
    fn surface_vertex(
        &self,
        corners: &[f32; 8],
        x: usize,
        y: usize,
        z: usize,
        iso: f32,
    ) -> Option<Vec3> {
        let inside = corners.iter().filter(|&&c| c >= iso).count();
        if inside == 0 || inside == 8 {
            return None;
        }

        // The 12 cell edges as corner index pairs.
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (2, 3), (4, 5), (6, 7), // x edges
            (0, 2), (1, 3), (4, 6), (5, 7), // y edges
            (0, 4), (1, 5), (2, 6), (3, 7), // z edges
        ];

        let corner_offset = |i: usize| {
            Vec3::new((i & 1) as f32, ((i >> 1) & 1) as f32, ((i >> 2) & 1) as f32)
        };

        let mut sum = Vec3::ZERO;
        let mut crossings = 0;
        for &(a, b) in EDGES.iter() {
            let va = corners[a];
            let vb = corners[b];
            if (va >= iso) != (vb >= iso) {
                let t = if (vb - va).abs() > 1e-6 {
                    ((iso - va) / (vb - va)).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                sum += corner_offset(a) + (corner_offset(b) - corner_offset(a)) * t;
                crossings += 1;
            }
        }

        if crossings == 0 {
            return None;
        }

        let local = sum / crossings as f32;
        Some(self.grid_to_world(x, y, z) + local * self.cell_size)
    }

    /// Outward normal from the field gradient by central differences.
    fn surface_normal(&self, x: usize, y: usize, z: usize, field: &[f32]) -> Vec3 {
        let n = self.grid_size as i32;
        let sample = |dx: i32, dy: i32, dz: i32| -> f32 {
            let sx = (x as i32 + dx).clamp(0, n - 1) as usize;
            let sy = (y as i32 + dy).clamp(0, n - 1) as usize;
            let sz = (z as i32 + dz).clamp(0, n - 1) as usize;
            field[self.grid_index(sx, sy, sz)]
        };

        // The field decreases away from the balls, so the outward normal is
        // the negated gradient.
        let gradient = Vec3::new(
            sample(1, 0, 0) - sample(-1, 0, 0),
            sample(0, 1, 0) - sample(0, -1, 0),
            sample(0, 0, 1) - sample(0, 0, -1),
        );
        if gradient.length_squared() > 1e-10 {
            -gradient.normalize()
        } else {
            Vec3::Y
        }
    }

    fn quad_x(
        &self,
        x: usize,
        y: usize,
        z: usize,
        flip: bool,
        vertex_map: &HashMap<usize, u32>,
        indices: &mut Vec<u32>,
    ) {
        if y == 0 || z == 0 {
            return;
        }
        self.emit_quad(
            [
                self.grid_index(x, y, z),
                self.grid_index(x, y - 1, z),
                self.grid_index(x, y - 1, z - 1),
                self.grid_index(x, y, z - 1),
            ],
            flip,
            vertex_map,
            indices,
        );
    }

    fn quad_y(
        &self,
        x: usize,
        y: usize,
        z: usize,
        flip: bool,
        vertex_map: &HashMap<usize, u32>,
        indices: &mut Vec<u32>,
    ) {
        if x == 0 || z == 0 {
            return;
        }
        self.emit_quad(
            [
                self.grid_index(x, y, z),
                self.grid_index(x, y, z - 1),
                self.grid_index(x - 1, y, z - 1),
                self.grid_index(x - 1, y, z),
            ],
            flip,
            vertex_map,
            indices,
        );
    }

    fn quad_z(
        &self,
        x: usize,
        y: usize,
        z: usize,
        flip: bool,
        vertex_map: &HashMap<usize, u32>,
        indices: &mut Vec<u32>,
    ) {
        if x == 0 || y == 0 {
            return;
        }
        self.emit_quad(
            [
                self.grid_index(x, y, z),
                self.grid_index(x - 1, y, z),
                self.grid_index(x - 1, y - 1, z),
                self.grid_index(x, y - 1, z),
            ],
            flip,
            vertex_map,
            indices,
        );
    }

    /// Two triangles across the four cells sharing a crossed edge.
    fn emit_quad(
        &self,
        cells: [usize; 4],
        flip: bool,
        vertex_map: &HashMap<usize, u32>,
        indices: &mut Vec<u32>,
    ) {
        let vertices: Option<Vec<u32>> = cells
            .iter()
            .map(|cell| vertex_map.get(cell).copied())
            .collect();
        if let Some(v) = vertices {
            if flip {
                indices.extend_from_slice(&[v[0], v[2], v[1], v[0], v[3], v[2]]);
            } else {
                indices.extend_from_slice(&[v[0], v[1], v[2], v[0], v[2], v[3]]);
            }
        }
    }
}
