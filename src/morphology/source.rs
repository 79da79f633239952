//! Read-only morphology data source.
//!
//! The loader never parses morphology files itself; it asks a store for a
//! placed [`Morphology`] and treats any failure as a per-cell parse error to
//! be logged and skipped.

use std::collections::HashMap;

use glam::Mat4;
use thiserror::Error;

use super::Morphology;

#[derive(Error, Debug)]
pub enum MorphologyError {
    #[error("morphology not found: {0}")]
    NotFound(String),
    #[error("failed to parse morphology {locator}: {reason}")]
    Parse { locator: String, reason: String },
    #[error("failed to read morphology: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-cell morphology source.
///
/// Given a locator and the cell's placement transform, returns the morphology
/// already transformed into world space. Implementations must be shareable
/// across the circuit loader's worker threads.
pub trait MorphologyStore: Sync {
    fn load(&self, locator: &str, transform: Mat4) -> Result<Morphology, MorphologyError>;
}

/// In-memory store keyed by locator. Placement is applied on load.
///
/// Backs the tests and any caller that builds morphologies procedurally
/// instead of reading a file format.
#[derive(Default)]
pub struct InMemoryStore {
    morphologies: HashMap<String, Morphology>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, morphology: Morphology) {
        self.morphologies.insert(locator.into(), morphology);
    }
}

impl MorphologyStore for InMemoryStore {
    fn load(&self, locator: &str, transform: Mat4) -> Result<Morphology, MorphologyError> {
        let mut morphology = self
            .morphologies
            .get(locator)
            .cloned()
            .ok_or_else(|| MorphologyError::NotFound(locator.to_string()))?;

        morphology.soma.centroid = transform.transform_point3(morphology.soma.centroid);
        for section in &mut morphology.sections {
            for sample in &mut section.samples {
                sample.position = transform.transform_point3(sample.position);
            }
        }
        Ok(morphology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::{Sample, Section, SectionType, Soma};
    use glam::Vec3;

    #[test]
    fn test_in_memory_store_applies_transform() {
        let mut store = InMemoryStore::new();
        store.insert(
            "cell.h5",
            Morphology {
                soma: Soma {
                    centroid: Vec3::ZERO,
                    mean_radius: 4.0,
                    children: vec![],
                },
                sections: vec![Section::new(
                    SectionType::Axon,
                    None,
                    vec![Sample::new(Vec3::X, 1.0)],
                    0.0,
                )],
            },
        );

        let placed = store
            .load("cell.h5", Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0)))
            .unwrap();
        assert_eq!(placed.soma.centroid, Vec3::new(0.0, 10.0, 0.0));
        assert_eq!(placed.sections[0].samples[0].position, Vec3::new(1.0, 10.0, 0.0));
    }

    #[test]
    fn test_missing_locator_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.load("absent", Mat4::IDENTITY),
            Err(MorphologyError::NotFound(_))
        ));
    }
}
