//! Neuronal morphology data model.
//!
//! A morphology is the skeletal description of one neuron: a soma plus an
//! ordered arena of sections, each section an ordered run of samples with a
//! position and a diameter. Parent links are arena indices, never owning
//! pointers; a morphology is built transiently per cell by a
//! [`MorphologyStore`](source::MorphologyStore), consumed by one loader task
//! and dropped.

pub mod source;

use glam::Vec3;

pub use source::{InMemoryStore, MorphologyError, MorphologyStore};

/// One measured point of a section: position plus the local diameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Vec3,
    /// Local process diameter; the renderable radius is
    /// `diameter * 0.5 * radius_multiplier`.
    pub diameter: f32,
}

impl Sample {
    pub fn new(position: Vec3, diameter: f32) -> Self {
        Self { position, diameter }
    }
}

/// Anatomical type of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    Soma,
    Axon,
    Dendrite,
    ApicalDendrite,
    Undefined,
}

/// A branch segment of the morphology.
#[derive(Debug, Clone)]
pub struct Section {
    pub section_type: SectionType,
    /// Index of the parent section in [`Morphology::sections`], if any.
    pub parent: Option<usize>,
    pub samples: Vec<Sample>,
    /// Arc length from the soma to the first sample of this section.
    pub distance_to_soma: f32,
    /// Arc length from the section start to each sample. Same length as
    /// `samples`.
    pub sample_distances: Vec<f32>,
}

impl Section {
    /// Build a section, deriving per-sample arc lengths from the positions.
    pub fn new(
        section_type: SectionType,
        parent: Option<usize>,
        samples: Vec<Sample>,
        distance_to_soma: f32,
    ) -> Self {
        let mut sample_distances = Vec::with_capacity(samples.len());
        let mut cumulative = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            if i > 0 {
                cumulative += (sample.position - samples[i - 1].position).length();
            }
            sample_distances.push(cumulative);
        }
        Self {
            section_type,
            parent,
            samples,
            distance_to_soma,
            sample_distances,
        }
    }
}

/// The cell body: centroid, mean radius and the indices of the first-order
/// sections branching off it.
#[derive(Debug, Clone)]
pub struct Soma {
    pub centroid: Vec3,
    pub mean_radius: f32,
    pub children: Vec<usize>,
}

/// One neuron: a soma and its section arena, already placed in world space.
#[derive(Debug, Clone)]
pub struct Morphology {
    pub soma: Soma,
    pub sections: Vec<Section>,
}

impl Morphology {
    /// Type of a section's parent, if the parent link resolves.
    pub fn parent_type(&self, section: &Section) -> Option<SectionType> {
        section
            .parent
            .and_then(|index| self.sections.get(index))
            .map(|parent| parent.section_type)
    }

    /// True when `section` is attached directly to the soma, or has no
    /// parent at all.
    pub fn is_soma_rooted(&self, section: &Section) -> bool {
        match self.parent_type(section) {
            Some(parent_type) => parent_type == SectionType::Soma,
            None => true,
        }
    }

    /// All sample positions, soma centroid included.
    pub fn points(&self) -> impl Iterator<Item = Vec3> + '_ {
        std::iter::once(self.soma.centroid).chain(
            self.sections
                .iter()
                .flat_map(|section| section.samples.iter().map(|sample| sample.position)),
        )
    }
}
