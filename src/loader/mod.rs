//! Morphology loading: the section-walking sampler.
//!
//! Walks one morphology's section tree and emits spheres, cylinders and
//! cones with the configured material policy, level of detail and
//! simulation-offset bookkeeping, or collects near-soma metaballs for the
//! mesh path. The circuit loader in [`circuit`] fans this out across cells.

pub mod circuit;

use glam::{Mat4, Vec3};

use crate::config::{ColorScheme, GeometryConfig, GeometryQuality, MAX_MATERIALS, RESERVED_MATERIALS};
use crate::geometry::{Bounds, Cone, Cylinder, MetaballMesher, PrimitiveBuffers, Sphere};
use crate::morphology::{Morphology, MorphologyError, MorphologyStore, SectionType};
use crate::scene::{Scene, TriangleMeshMap};
use crate::simulation::SimulationInformation;

pub use circuit::{CellAttribute, CircuitError, CircuitLoader, CircuitSource, MorphologyOffsets};

/// Material id for a piece of geometry.
///
/// A forced material wins verbatim; otherwise the color scheme decides, and
/// derived ids stay below the material table's reserved band.
pub fn material_for_section(
    cell_index: usize,
    forced_material: Option<usize>,
    section_type: SectionType,
    scheme: ColorScheme,
) -> usize {
    if let Some(material) = forced_material {
        return material;
    }
    let capacity = MAX_MATERIALS - RESERVED_MATERIALS;
    match scheme {
        ColorScheme::ById => cell_index % capacity,
        ColorScheme::BySegmentType => {
            let class = match section_type {
                SectionType::Soma => 1,
                SectionType::Axon => 2,
                SectionType::Dendrite => 3,
                SectionType::ApicalDendrite => 4,
                SectionType::Undefined => 0,
            };
            class % capacity
        }
        _ => 0,
    }
}

/// Sampler for one morphology at a time.
pub struct MorphologyLoader<'a> {
    config: &'a GeometryConfig,
}

impl<'a> MorphologyLoader<'a> {
    pub fn new(config: &'a GeometryConfig) -> Self {
        Self { config }
    }

    /// Import a single morphology into a scene at the origin.
    ///
    /// Runs the metaball path first when enabled, then the parametric walk.
    /// Returns the cell's maximum distance-to-soma.
    pub fn import_morphology(
        &self,
        store: &dyn MorphologyStore,
        locator: &str,
        cell_index: usize,
        scene: &mut Scene,
    ) -> Result<f32, MorphologyError> {
        if self.config.use_metaballs {
            let mut bounds = Bounds::default();
            self.import_morphology_as_mesh(
                store,
                locator,
                cell_index,
                Mat4::IDENTITY,
                None,
                &mut scene.triangle_meshes,
                &mut bounds,
            )?;
            scene.world_bounds.merge(&bounds);
        }

        let mut buffers = PrimitiveBuffers::default();
        let max_distance = self.import_morphology_into(
            store,
            locator,
            cell_index,
            Mat4::IDENTITY,
            None,
            None,
            None,
            &mut buffers,
        )?;
        scene.merge_buffers(buffers);
        Ok(max_distance)
    }

    /// Load a morphology and sample it into caller-owned buffers.
    ///
    /// This is the per-cell unit of work the circuit loader runs in
    /// parallel; `out` is a worker-local accumulator, never shared state.
    #[allow(clippy::too_many_arguments)]
    pub fn import_morphology_into(
        &self,
        store: &dyn MorphologyStore,
        locator: &str,
        cell_index: usize,
        transform: Mat4,
        simulation: Option<&SimulationInformation<'_>>,
        simulation_offset: Option<f32>,
        forced_material: Option<usize>,
        out: &mut PrimitiveBuffers,
    ) -> Result<f32, MorphologyError> {
        let morphology = store.load(locator, transform)?;
        Ok(self.sample_morphology(
            &morphology,
            cell_index,
            simulation,
            simulation_offset,
            forced_material,
            out,
        ))
    }

    /// Walk a placed morphology and emit primitives.
    ///
    /// Returns the maximum distance-to-soma seen across the walk, the
    /// cell's share of a circuit-wide simulation-time axis.
    pub fn sample_morphology(
        &self,
        morphology: &Morphology,
        cell_index: usize,
        simulation: Option<&SimulationInformation<'_>>,
        simulation_offset: Option<f32>,
        forced_material: Option<usize>,
        out: &mut PrimitiveBuffers,
    ) -> f32 {
        let config = self.config;
        let translation = self.layout_translation(cell_index, morphology);
        let mut max_distance_to_soma = 0.0f32;

        // Offset for the soma and the fallback for sections the report does
        // not cover.
        let mut offset = match (simulation, simulation_offset) {
            (Some(sim), _) => sim.compartment_offsets.first().copied().unwrap_or(0) as f32,
            (None, Some(base)) => base,
            (None, None) => 0.0,
        };

        // Soma sphere and, under a simulation model, transition cones to
        // each first-order branch. The metaball path replaces all of this.
        if config.section_filter.soma && !config.use_metaballs {
            let material = material_for_section(
                cell_index,
                forced_material,
                SectionType::Soma,
                config.color_scheme,
            );
            let soma_position = morphology.soma.centroid + translation;
            let radius = config
                .radius_override
                .unwrap_or(morphology.soma.mean_radius * config.radius_multiplier);

            out.push_sphere(Sphere {
                material,
                center: soma_position,
                radius,
                distance_to_soma: 0.0,
                simulation_offset: offset,
            });
            out.bounds.merge_point(soma_position);

            if config.use_simulation_model {
                // Parametric geometry must fill the soma-to-branch gap when
                // compartment values are mapped onto it.
                for &child_index in &morphology.soma.children {
                    let Some(child) = morphology.sections.get(child_index) else {
                        continue;
                    };
                    let Some(first) = child.samples.first() else {
                        continue;
                    };
                    let target = first.position + translation;
                    out.push_cone(Cone {
                        material,
                        center: soma_position,
                        target,
                        center_radius: radius,
                        target_radius: first.diameter * 0.5 * config.radius_multiplier,
                        distance_to_soma: 0.0,
                        simulation_offset: offset,
                    });
                    out.bounds.merge_point(target);
                }
            }
        }

        // Dendrites and axon. Every filtered section is walked regardless of
        // its depth in the tree.
        let mut section_id = 0usize;
        for section in &morphology.sections {
            if section.section_type == SectionType::Soma
                || !config.section_filter.includes(section.section_type)
            {
                continue;
            }
            let samples = &section.samples;
            if samples.is_empty() {
                continue;
            }

            let material = material_for_section(
                cell_index,
                forced_material,
                section.section_type,
                config.color_scheme,
            );

            let stride = match config.quality {
                GeometryQuality::Low => (samples.len() - 1).max(1),
                GeometryQuality::Medium => (samples.len() / 2).max(1),
                GeometryQuality::High => 1,
            };

            // Compartments usually outnumber samples; spread them evenly.
            let segment_step = match simulation {
                Some(sim) => {
                    let count = sim
                        .compartment_counts
                        .get(section_id)
                        .copied()
                        .unwrap_or(0);
                    count as f32 / samples.len() as f32
                }
                None => 0.0,
            };

            let mut emit = |index: usize,
                            previous_index: usize,
                            out: &mut PrimitiveBuffers,
                            offset: &mut f32| {
                let distance = section.distance_to_soma + section.sample_distances[index];
                max_distance_to_soma = max_distance_to_soma.max(distance);

                if let Some(sim) = simulation {
                    let base = sim
                        .compartment_offsets
                        .get(section_id)
                        .copied()
                        .unwrap_or(0) as f32;
                    *offset = base + index as f32 * segment_step;
                } else if let Some(base) = simulation_offset {
                    *offset = base + distance;
                }

                let sample = samples[index];
                let previous = samples[previous_index];
                let position = sample.position + translation;
                let target = previous.position + translation;
                let radius = config
                    .radius_override
                    .unwrap_or(sample.diameter * 0.5 * config.radius_multiplier);
                let previous_radius = config
                    .radius_override
                    .unwrap_or(previous.diameter * 0.5 * config.radius_multiplier);

                if radius > 0.0 {
                    out.push_sphere(Sphere {
                        material,
                        center: position,
                        radius,
                        distance_to_soma: distance,
                        simulation_offset: *offset,
                    });
                }
                out.bounds.merge_point(position);

                if position != target && radius > 0.0 && previous_radius > 0.0 {
                    if radius == previous_radius {
                        out.push_cylinder(Cylinder {
                            material,
                            center: position,
                            target,
                            radius,
                            distance_to_soma: distance,
                            simulation_offset: *offset,
                        });
                    } else {
                        out.push_cone(Cone {
                            material,
                            center: position,
                            target,
                            center_radius: radius,
                            target_radius: previous_radius,
                            distance_to_soma: distance,
                            simulation_offset: *offset,
                        });
                    }
                    out.bounds.merge_point(target);
                }
            };

            // The section's first sample is always kept, then the strided
            // walk runs forward. An index past the end clamps to the last
            // sample so the terminal sample is emitted exactly once even
            // when the stride pattern skips over it.
            emit(0, 0, &mut *out, &mut offset);
            let mut previous_index = 0;
            let mut i = stride;
            loop {
                let index = i.min(samples.len() - 1);
                if index == previous_index {
                    break;
                }
                emit(index, previous_index, &mut *out, &mut offset);
                if index == samples.len() - 1 {
                    break;
                }
                previous_index = index;
                i += stride;
            }

            section_id += 1;
        }

        max_distance_to_soma
    }

    /// Collect near-soma metaballs and polygonize them into the mesh map.
    ///
    /// Alternative to the parametric soma geometry: the soma plus the first
    /// few samples of every soma-rooted section each contribute one ball.
    #[allow(clippy::too_many_arguments)]
    pub fn import_morphology_as_mesh(
        &self,
        store: &dyn MorphologyStore,
        locator: &str,
        cell_index: usize,
        transform: Mat4,
        forced_material: Option<usize>,
        meshes: &mut TriangleMeshMap,
        bounds: &mut Bounds,
    ) -> Result<(), MorphologyError> {
        let config = self.config;
        let morphology = store.load(locator, transform)?;

        let mut metaballs: Vec<Sphere> = Vec::new();

        if config.section_filter.soma {
            let material = material_for_section(
                cell_index,
                forced_material,
                SectionType::Soma,
                config.color_scheme,
            );
            let center = morphology.soma.centroid;
            let radius = config
                .radius_override
                .unwrap_or(morphology.soma.mean_radius * config.radius_multiplier);
            metaballs.push(Sphere {
                material,
                center,
                radius,
                distance_to_soma: 0.0,
                simulation_offset: 0.0,
            });
            bounds.merge_point(center);
        }

        for section in &morphology.sections {
            if section.section_type == SectionType::Soma
                || !config.section_filter.includes(section.section_type)
            {
                continue;
            }
            // Only branches rooted at the soma feed the near-soma surface.
            if !morphology.is_soma_rooted(section) {
                continue;
            }

            let material = material_for_section(
                cell_index,
                forced_material,
                section.section_type,
                config.color_scheme,
            );
            let samples_to_process = config
                .metaballs_samples_from_soma
                .min(section.samples.len());
            for sample in &section.samples[..samples_to_process] {
                let radius = config
                    .radius_override
                    .unwrap_or(sample.diameter * 0.5 * config.radius_multiplier);
                if radius > 0.0 {
                    metaballs.push(Sphere {
                        material,
                        center: sample.position,
                        radius,
                        distance_to_soma: 0.0,
                        simulation_offset: 0.0,
                    });
                }
                bounds.merge_point(sample.position);
            }
        }

        let material = material_for_section(
            cell_index,
            forced_material,
            SectionType::Soma,
            config.color_scheme,
        );
        let mut mesher = MetaballMesher::new(config.metaballs_grid_size, config.metaballs_threshold);
        if let Some(mesh) = mesher.generate(&metaballs, material) {
            meshes.entry(material).or_default().append(mesh);
        }
        Ok(())
    }

    /// Translation placing cell `cell_index` on the configured display grid.
    fn layout_translation(&self, cell_index: usize, morphology: &Morphology) -> Vec3 {
        let layout = &self.config.layout;
        if layout.columns == 0 {
            return Vec3::ZERO;
        }

        let mut aabb = Bounds::default();
        for point in morphology.points() {
            aabb.merge_point(point);
        }
        let position_in_grid = Vec3::new(
            -layout.horizontal_spacing * (cell_index % layout.columns) as f32,
            -layout.vertical_spacing * (cell_index / layout.columns) as f32,
            0.0,
        );
        position_in_grid - aabb.center()
    }
}
