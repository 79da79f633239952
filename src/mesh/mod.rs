//! Polygon-mesh import pass-through.
//!
//! The core treats mesh files as a black box keyed by a (material,
//! transform) contract: a [`MeshImporter`] places whatever geometry the file
//! holds into the scene under the given material. [`ObjMeshImporter`] is the
//! thin `tobj`-backed implementation; anything smarter (decimation levels,
//! other formats) lives behind the same trait.

use std::path::Path;

use glam::{Mat4, Vec3};
use thiserror::Error;

use crate::config::GeometryQuality;
use crate::scene::{Scene, TriangleMesh};

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("failed to load mesh: {0}")]
    Load(#[from] tobj::LoadError),
    #[error("mesh {0} contains no geometry")]
    Empty(String),
}

/// Imports one mesh file into the scene at a placement transform.
pub trait MeshImporter {
    fn import_mesh(
        &self,
        path: &Path,
        quality: GeometryQuality,
        transform: Mat4,
        material: usize,
        scene: &mut Scene,
    ) -> Result<(), MeshError>;
}

/// Wavefront OBJ importer.
///
/// Provided normals are kept; missing normals are generated by area-weighted
/// averaging of adjacent face normals. The quality setting is accepted for
/// the trait contract but OBJ files carry a single detail level.
pub struct ObjMeshImporter;

impl MeshImporter for ObjMeshImporter {
    fn import_mesh(
        &self,
        path: &Path,
        _quality: GeometryQuality,
        transform: Mat4,
        material: usize,
        scene: &mut Scene,
    ) -> Result<(), MeshError> {
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )?;

        let mut mesh = TriangleMesh::default();
        for model in models {
            let data = model.mesh;
            let base = mesh.vertices.len() as u32;
            for position in data.positions.chunks_exact(3) {
                mesh.vertices.push(
                    transform.transform_point3(Vec3::new(position[0], position[1], position[2])),
                );
            }
            if data.normals.len() == data.positions.len() {
                for normal in data.normals.chunks_exact(3) {
                    mesh.normals.push(
                        transform
                            .transform_vector3(Vec3::new(normal[0], normal[1], normal[2]))
                            .normalize_or_zero(),
                    );
                }
            }
            mesh.indices.extend(data.indices.iter().map(|&i| i + base));
        }

        if mesh.vertices.is_empty() {
            return Err(MeshError::Empty(path.display().to_string()));
        }
        if mesh.normals.len() != mesh.vertices.len() {
            generate_normals(&mut mesh);
        }

        for vertex in &mesh.vertices {
            scene.world_bounds.merge_point(*vertex);
        }
        log::debug!(
            "Imported mesh {:?}: {} triangles (material {})",
            path,
            mesh.triangle_count(),
            material
        );
        scene.add_triangle_mesh(material, mesh);
        Ok(())
    }
}

/// Area-weighted vertex normals: each face's unnormalized cross product is
/// accumulated onto its vertices, so larger faces weigh more.
fn generate_normals(mesh: &mut TriangleMesh) {
    let mut normals = vec![Vec3::ZERO; mesh.vertices.len()];
    for triangle in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [
            triangle[0] as usize,
            triangle[1] as usize,
            triangle[2] as usize,
        ];
        let face_normal =
            (mesh.vertices[b] - mesh.vertices[a]).cross(mesh.vertices[c] - mesh.vertices[a]);
        normals[a] += face_normal;
        normals[b] += face_normal;
        normals[c] += face_normal;
    }
    mesh.normals = normals
        .into_iter()
        .map(|n| n.normalize_or_zero())
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_obj(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_import_triangle_with_generated_normals() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_obj(
            dir.path(),
            "tri.obj",
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        );

        let mut scene = Scene::new();
        ObjMeshImporter
            .import_mesh(
                &path,
                GeometryQuality::High,
                Mat4::IDENTITY,
                5,
                &mut scene,
            )
            .unwrap();

        let mesh = &scene.triangle_meshes[&5];
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.normals.len(), 3);
        // CCW triangle in the XY plane faces +Z.
        assert!(mesh.normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-5));
        assert_eq!(scene.world_bounds.max, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_transform_places_mesh() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_obj(
            dir.path(),
            "tri.obj",
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        );

        let mut scene = Scene::new();
        ObjMeshImporter
            .import_mesh(
                &path,
                GeometryQuality::Low,
                Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
                0,
                &mut scene,
            )
            .unwrap();
        assert_eq!(scene.world_bounds.min.x, 10.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut scene = Scene::new();
        let result = ObjMeshImporter.import_mesh(
            Path::new("/nonexistent/mesh.obj"),
            GeometryQuality::High,
            Mat4::IDENTITY,
            0,
            &mut scene,
        );
        assert!(result.is_err());
    }
}
