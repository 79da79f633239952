//! Circuit-level aggregation.
//!
//! Fans the morphology loader out across every selected cell of a circuit,
//! skipping cells per the density-derived stride, accumulating geometry in
//! worker-local buffers and merging them into the shared scene after the
//! parallel phase. When a report is bound, per-primitive offsets come from
//! the report's compartment layout; otherwise cells are laid end-to-end on
//! one shared simulation-time axis through a mutex-guarded offset ledger.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use glam::Mat4;
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{ColorScheme, GeometryConfig};
use crate::geometry::{Bounds, PrimitiveBuffers};
use crate::loader::{material_for_section, MorphologyLoader};
use crate::mesh::MeshImporter;
use crate::morphology::{MorphologyStore, SectionType};
use crate::scene::{Scene, TriangleMeshMap};
use crate::simulation::{
    CacheError, CompartmentReportSource, ReportError, SimulationHandler, SimulationInformation,
};

/// Maximum distance-to-soma per simulated cell, keyed by the order in which
/// cells claimed their share of the shared simulation-time axis.
pub type MorphologyOffsets = HashMap<usize, f32>;

/// Per-cell categorical attribute used for coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellAttribute {
    Layer,
    Mtype,
    Etype,
}

#[derive(Error, Debug)]
pub enum CircuitError {
    #[error("circuit does not contain any cells")]
    NoCells,
    #[error("failed to query circuit: {0}")]
    Source(String),
    #[error("unsupported cell attributes: {0}")]
    UnsupportedAttributes(String),
    #[error("{failed} of {attempted} cells failed to load")]
    CellFailures { failed: usize, attempted: usize },
    #[error("failed to create cache file {path:?}: {source}")]
    CacheCreate {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Read-only circuit metadata source.
///
/// All vector-returning methods answer in the order of the `gids` argument.
pub trait CircuitSource: Sync {
    /// Cell ids, optionally restricted to a named target.
    fn cell_ids(&self, target: Option<&str>) -> Result<Vec<u32>, CircuitError>;
    fn transforms(&self, gids: &[u32]) -> Vec<Mat4>;
    fn morphology_locators(&self, gids: &[u32]) -> Vec<String>;
    /// Per-cell categorical attribute values, parallel to `gids`.
    fn cell_attributes(
        &self,
        gids: &[u32],
        attribute: CellAttribute,
    ) -> Result<Vec<String>, CircuitError>;
}

/// Attribute backing a color scheme, if the scheme needs one.
fn attribute_for_scheme(scheme: ColorScheme) -> Option<CellAttribute> {
    match scheme {
        ColorScheme::ByLayer => Some(CellAttribute::Layer),
        ColorScheme::ByMtype => Some(CellAttribute::Mtype),
        ColorScheme::ByEtype => Some(CellAttribute::Etype),
        _ => None,
    }
}

/// Stride over cell indices derived from the configured circuit density.
///
/// 0 disables skipping entirely; otherwise only indices divisible by the
/// stride are processed.
fn skip_stride(cell_count: usize, density: u32) -> usize {
    let selected = cell_count * density as usize / 100;
    if selected == 0 {
        0
    } else {
        cell_count / selected
    }
}

/// One cell's unit of work in a loading pass.
struct CellWork {
    /// Position in the circuit's resolved gid order; drives materials and
    /// the layout grid.
    index: usize,
    locator: String,
    transform: Mat4,
    /// Position in the report's own cell order, when simulated.
    report_index: Option<usize>,
}

/// Worker-local accumulation state for the parallel phase.
#[derive(Default)]
struct WorkerState {
    buffers: PrimitiveBuffers,
    meshes: TriangleMeshMap,
    mesh_bounds: Bounds,
    failed: usize,
}

/// Shared simulation-time axis. Locked only for the claim itself, right
/// after a cell's maximum distance-to-soma becomes known.
struct OffsetLedger {
    next_offset: f32,
    simulated_cells: usize,
    offsets: MorphologyOffsets,
}

impl Default for OffsetLedger {
    fn default() -> Self {
        Self {
            next_offset: 1.0,
            simulated_cells: 0,
            offsets: MorphologyOffsets::new(),
        }
    }
}

/// Aggregates a whole circuit into the scene.
pub struct CircuitLoader<'a> {
    config: &'a GeometryConfig,
}

impl<'a> CircuitLoader<'a> {
    pub fn new(config: &'a GeometryConfig) -> Self {
        Self { config }
    }

    /// Import every selected cell of the circuit as geometry.
    ///
    /// Returns the per-cell shares of the shared simulation-time axis.
    /// Per-cell failures are logged and counted; the batch always runs to
    /// completion and the call fails only if any sub-step failed.
    pub fn import_circuit(
        &self,
        circuit: &dyn CircuitSource,
        store: &dyn MorphologyStore,
        mesh_importer: &dyn MeshImporter,
        target: Option<&str>,
        scene: &mut Scene,
    ) -> Result<MorphologyOffsets, CircuitError> {
        let gids = circuit.cell_ids(target)?;
        if gids.is_empty() {
            log::error!("Circuit does not contain any cells");
            return Err(CircuitError::NoCells);
        }
        let work = self.resolve_work(circuit, &gids);
        log::info!("Loading {} cells", work.len());

        let attribute_materials = self.fetch_attribute_materials(circuit, &gids);
        let stride = skip_stride(gids.len(), self.config.circuit_density);

        let mut failed = 0;
        let mut attempted = 0;

        let mut load_parametric = true;
        if self.config.meshed_morphologies_folder.is_some() {
            let (mesh_failed, mesh_attempted) = self.mesh_phase(
                &work,
                mesh_importer,
                attribute_materials.as_deref(),
                stride,
                scene,
            );
            failed += mesh_failed;
            attempted += mesh_attempted;
            load_parametric = self.config.use_simulation_model;
        }

        let mut offsets = MorphologyOffsets::new();
        if load_parametric {
            let outcome = self.parametric_phase(
                &work,
                store,
                None,
                attribute_materials.as_deref(),
                stride,
                true,
                scene,
            );
            offsets = outcome.offsets;
            failed += outcome.failed;
            attempted += outcome.attempted;
        }

        if failed > 0 {
            Err(CircuitError::CellFailures { failed, attempted })
        } else {
            Ok(offsets)
        }
    }

    /// Import the circuit bound to a compartment report.
    ///
    /// Only cells present in the report are geometry-processed; primitive
    /// offsets index into the report's frames. A configured number of
    /// non-simulated cells is loaded afterwards without offsets.
    pub fn import_circuit_with_report(
        &self,
        circuit: &dyn CircuitSource,
        store: &dyn MorphologyStore,
        mesh_importer: &dyn MeshImporter,
        report: &dyn CompartmentReportSource,
        target: Option<&str>,
        scene: &mut Scene,
    ) -> Result<(), CircuitError> {
        let gids = circuit.cell_ids(target)?;
        if gids.is_empty() {
            log::error!("Circuit does not contain any cells");
            return Err(CircuitError::NoCells);
        }
        let work = self.resolve_work(circuit, &gids);
        let attribute_materials = self.fetch_attribute_materials(circuit, &gids);
        let stride = skip_stride(gids.len(), self.config.circuit_density);

        // Restrict the geometry pass to cells the report covers.
        let position_by_gid: HashMap<u32, usize> =
            gids.iter().enumerate().map(|(i, &gid)| (gid, i)).collect();
        let mut simulated_work = Vec::new();
        for (report_index, gid) in report.gids().iter().enumerate() {
            match position_by_gid.get(gid) {
                Some(&position) => {
                    let cell = &work[position];
                    simulated_work.push(CellWork {
                        index: cell.index,
                        locator: cell.locator.clone(),
                        transform: cell.transform,
                        report_index: Some(report_index),
                    });
                }
                None => log::warn!("Report cell {} is not part of the circuit", gid),
            }
        }
        log::info!("Loading {} simulated cells", simulated_work.len());

        let mut failed = 0;
        let mut attempted = 0;

        let mut load_parametric = true;
        if self.config.meshed_morphologies_folder.is_some() {
            let (mesh_failed, mesh_attempted) = self.mesh_phase(
                &work,
                mesh_importer,
                attribute_materials.as_deref(),
                stride,
                scene,
            );
            failed += mesh_failed;
            attempted += mesh_attempted;
            load_parametric = self.config.use_simulation_model;
        }

        if load_parametric {
            let outcome = self.parametric_phase(
                &simulated_work,
                store,
                Some(report),
                attribute_materials.as_deref(),
                stride,
                false,
                scene,
            );
            failed += outcome.failed;
            attempted += outcome.attempted;
        }

        // Second pass: cells absent from the report, without offsets.
        if self.config.non_simulated_cells != 0 {
            let (extra_failed, extra_attempted) = self.non_simulated_pass(
                circuit,
                store,
                mesh_importer,
                report,
                attribute_materials.as_deref(),
                stride,
                scene,
            )?;
            failed += extra_failed;
            attempted += extra_attempted;
        }

        if failed > 0 {
            Err(CircuitError::CellFailures { failed, attempted })
        } else {
            Ok(())
        }
    }

    /// Materialize the report into the binary cache and attach a playback
    /// handler to the scene.
    ///
    /// An existing cache file is reused unmodified. Failing to create the
    /// destination is fatal for the call.
    pub fn import_simulation_data(
        &self,
        circuit: &dyn CircuitSource,
        report: &dyn CompartmentReportSource,
        cache_file: &Path,
        target: Option<&str>,
        scene: &mut Scene,
    ) -> Result<(), CircuitError> {
        let gids = circuit.cell_ids(target)?;
        if gids.is_empty() {
            log::error!("Circuit does not contain any cells");
            return Err(CircuitError::NoCells);
        }

        if let Some(handler) = SimulationHandler::attach_to_cache_file(cache_file)? {
            // Cache already exists, no need to create it.
            scene.set_simulation_handler(handler);
            return Ok(());
        }
        log::info!("Cache file does not exist, creating it");

        let step = report.timestep();
        let first_frame = report.start_time().max(self.config.start_simulation_time);
        let last_frame = report.end_time().min(self.config.end_simulation_time);
        let frame_size = report.frame_size();
        let frame_count = ((last_frame - first_frame) / step) as u64;

        let file = File::create(cache_file).map_err(|source| CircuitError::CacheCreate {
            path: cache_file.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        let handler = SimulationHandler::new(cache_file, frame_count, frame_size);
        handler.write_header(&mut writer)?;

        log::info!(
            "Saving {} frames of {} values to {:?}",
            frame_count,
            frame_size,
            cache_file
        );
        for frame in 0..frame_count {
            let frame_time = first_frame + step * frame as f32;
            let values = report.load_frame(frame_time)?;
            handler.write_frame(&mut writer, &values)?;
        }
        writer.flush().map_err(CacheError::Io)?;

        scene.set_simulation_handler(handler);
        log::info!("Cache file successfully created ({} frames)", frame_count);
        Ok(())
    }

    /// Resolve transforms and locators for a gid set, in gid order.
    fn resolve_work(&self, circuit: &dyn CircuitSource, gids: &[u32]) -> Vec<CellWork> {
        let transforms = circuit.transforms(gids);
        let locators = circuit.morphology_locators(gids);
        locators
            .into_iter()
            .zip(transforms)
            .enumerate()
            .map(|(index, (locator, transform))| CellWork {
                index,
                locator,
                transform,
                report_index: None,
            })
            .collect()
    }

    /// Fetch per-cell attribute materials if the color scheme needs them.
    /// Unsupported formats fall back to scheme-derived materials.
    fn fetch_attribute_materials(
        &self,
        circuit: &dyn CircuitSource,
        gids: &[u32],
    ) -> Option<Vec<usize>> {
        let attribute = attribute_for_scheme(self.config.color_scheme)?;
        match circuit.cell_attributes(gids, attribute) {
            Ok(values) => {
                let parsed: Option<Vec<usize>> =
                    values.iter().map(|value| value.trim().parse().ok()).collect();
                match parsed {
                    Some(materials) if materials.len() == gids.len() => Some(materials),
                    _ => {
                        log::warn!(
                            "Cell attributes are not numeric; falling back to index-derived materials"
                        );
                        None
                    }
                }
            }
            Err(error) => {
                log::warn!(
                    "Cell attributes unavailable ({}); falling back to index-derived materials",
                    error
                );
                None
            }
        }
    }

    /// Sequential import of one precomputed mesh per selected cell.
    fn mesh_phase(
        &self,
        work: &[CellWork],
        mesh_importer: &dyn MeshImporter,
        attribute_materials: Option<&[usize]>,
        stride: usize,
        scene: &mut Scene,
    ) -> (usize, usize) {
        let folder = self
            .config
            .meshed_morphologies_folder
            .as_deref()
            .expect("mesh phase requires a mesh folder");

        let mut failed = 0;
        let mut attempted = 0;
        for (i, cell) in work.iter().enumerate() {
            if stride != 0 && i % stride != 0 {
                continue;
            }
            attempted += 1;

            let material = attribute_materials
                .and_then(|materials| materials.get(cell.index).copied())
                .unwrap_or_else(|| {
                    material_for_section(
                        cell.index,
                        None,
                        SectionType::Undefined,
                        self.config.color_scheme,
                    )
                });

            let stem = Path::new(&cell.locator)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| cell.locator.clone());
            let path = folder
                .join(stem)
                .with_extension(&self.config.mesh_file_extension);

            if let Err(error) = mesh_importer.import_mesh(
                &path,
                self.config.quality,
                cell.transform,
                material,
                scene,
            ) {
                log::warn!("Mesh import for cell {} failed: {}", cell.index, error);
                failed += 1;
            }
        }
        (failed, attempted)
    }

    /// Parallel parametric-geometry phase.
    ///
    /// Workers own private accumulators; the merge into the scene happens
    /// after the barrier, one worker state at a time. With
    /// `accumulate_offsets` each successful cell claims the next span of
    /// the shared time axis from the ledger and its primitives are shifted
    /// onto it before entering the worker buffer.
    fn parametric_phase(
        &self,
        work: &[CellWork],
        store: &dyn MorphologyStore,
        report: Option<&dyn CompartmentReportSource>,
        attribute_materials: Option<&[usize]>,
        stride: usize,
        accumulate_offsets: bool,
        scene: &mut Scene,
    ) -> PhaseOutcome {
        let loader = MorphologyLoader::new(self.config);
        let ledger = Mutex::new(OffsetLedger::default());

        let attempted = work
            .iter()
            .enumerate()
            .filter(|(i, _)| stride == 0 || i % stride == 0)
            .count();

        let states: Vec<WorkerState> = work
            .par_iter()
            .enumerate()
            .fold(WorkerState::default, |mut state, (i, cell)| {
                if stride != 0 && i % stride != 0 {
                    return state;
                }

                let forced_material = attribute_materials
                    .and_then(|materials| materials.get(cell.index).copied());
                let simulation = match (report, cell.report_index) {
                    (Some(report), Some(report_index)) => {
                        Some(SimulationInformation::for_cell(report, report_index))
                    }
                    _ => None,
                };
                let offset_base = accumulate_offsets.then_some(0.0);

                if self.config.use_metaballs {
                    if let Err(error) = loader.import_morphology_as_mesh(
                        store,
                        &cell.locator,
                        cell.index,
                        cell.transform,
                        forced_material,
                        &mut state.meshes,
                        &mut state.mesh_bounds,
                    ) {
                        log::warn!(
                            "Metaball mesh for cell {} failed: {}",
                            cell.index,
                            error
                        );
                        state.failed += 1;
                    }
                }

                let mut cell_buffers = PrimitiveBuffers::default();
                match loader.import_morphology_into(
                    store,
                    &cell.locator,
                    cell.index,
                    cell.transform,
                    simulation.as_ref(),
                    offset_base,
                    forced_material,
                    &mut cell_buffers,
                ) {
                    Ok(max_distance_to_soma) => {
                        if accumulate_offsets {
                            let base = {
                                let mut ledger = ledger.lock().unwrap();
                                let base = ledger.next_offset;
                                let counter = ledger.simulated_cells;
                                ledger.offsets.insert(counter, max_distance_to_soma);
                                ledger.simulated_cells += 1;
                                ledger.next_offset += max_distance_to_soma;
                                base
                            };
                            cell_buffers.shift_simulation_offsets(base);
                        }
                        state.buffers.merge(cell_buffers);
                    }
                    Err(error) => {
                        log::warn!("Skipping cell {}: {}", cell.index, error);
                        state.failed += 1;
                    }
                }
                state
            })
            .collect();

        // Single exclusive merge region: append every worker's private
        // geometry into the shared scene and union the bounds.
        let mut failed = 0;
        for state in states {
            failed += state.failed;
            scene.merge_buffers(state.buffers);
            for (material, mesh) in state.meshes {
                scene.add_triangle_mesh(material, mesh);
            }
            scene.world_bounds.merge(&state.mesh_bounds);
        }

        let ledger = ledger.into_inner().unwrap();
        PhaseOutcome {
            offsets: ledger.offsets,
            failed,
            attempted,
        }
    }

    /// Load cells absent from the report, mesh-substituted when a mesh
    /// folder is configured, parametric otherwise.
    #[allow(clippy::too_many_arguments)]
    fn non_simulated_pass(
        &self,
        circuit: &dyn CircuitSource,
        store: &dyn MorphologyStore,
        mesh_importer: &dyn MeshImporter,
        report: &dyn CompartmentReportSource,
        attribute_materials: Option<&[usize]>,
        stride: usize,
        scene: &mut Scene,
    ) -> Result<(usize, usize), CircuitError> {
        let all_gids = circuit.cell_ids(None)?;
        let all_work = self.resolve_work(circuit, &all_gids);

        let simulated: HashSet<u32> = report.gids().iter().copied().collect();
        let mut remaining: Vec<CellWork> = all_gids
            .iter()
            .zip(all_work)
            .filter(|(gid, _)| !simulated.contains(*gid))
            .map(|(_, cell)| cell)
            .collect();

        let requested = self.config.non_simulated_cells.min(remaining.len());
        remaining.truncate(requested);
        log::info!("Loading {} non-simulated cells", remaining.len());

        if self.config.meshed_morphologies_folder.is_some() {
            Ok(self.mesh_phase(
                &remaining,
                mesh_importer,
                attribute_materials,
                stride,
                scene,
            ))
        } else {
            let outcome = self.parametric_phase(
                &remaining,
                store,
                None,
                attribute_materials,
                stride,
                false,
                scene,
            );
            Ok((outcome.failed, outcome.attempted))
        }
    }
}

struct PhaseOutcome {
    offsets: MorphologyOffsets,
    failed: usize,
    attempted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeometryQuality;
    use crate::morphology::{InMemoryStore, Morphology, Sample, Section, Soma};
    use crate::simulation::ReportError;
    use glam::Vec3;
    use std::sync::Mutex as StdMutex;

    /// Circuit over `n` cells, all sharing one morphology locator pattern.
    struct MockCircuit {
        gids: Vec<u32>,
        attributes: Option<Vec<String>>,
    }

    impl MockCircuit {
        fn with_cells(n: u32) -> Self {
            Self {
                gids: (1..=n).collect(),
                attributes: None,
            }
        }
    }

    impl CircuitSource for MockCircuit {
        fn cell_ids(&self, _target: Option<&str>) -> Result<Vec<u32>, CircuitError> {
            Ok(self.gids.clone())
        }

        fn transforms(&self, gids: &[u32]) -> Vec<Mat4> {
            gids.iter()
                .map(|&gid| Mat4::from_translation(Vec3::new(gid as f32 * 100.0, 0.0, 0.0)))
                .collect()
        }

        fn morphology_locators(&self, gids: &[u32]) -> Vec<String> {
            gids.iter().map(|gid| format!("cell-{}.h5", gid)).collect()
        }

        fn cell_attributes(
            &self,
            gids: &[u32],
            _attribute: CellAttribute,
        ) -> Result<Vec<String>, CircuitError> {
            match &self.attributes {
                Some(values) => Ok(values.iter().take(gids.len()).cloned().collect()),
                None => Err(CircuitError::UnsupportedAttributes(
                    "attributes not available in this format".to_string(),
                )),
            }
        }
    }

    /// One dendrite of the given length along X, soma r=2.
    fn simple_morphology(length: f32) -> Morphology {
        Morphology {
            soma: Soma {
                centroid: Vec3::ZERO,
                mean_radius: 2.0,
                children: vec![0],
            },
            sections: vec![Section::new(
                SectionType::Dendrite,
                None,
                vec![
                    Sample::new(Vec3::new(2.0, 0.0, 0.0), 2.0),
                    Sample::new(Vec3::new(2.0 + length, 0.0, 0.0), 2.0),
                ],
                0.0,
            )],
        }
    }

    fn store_for(circuit: &MockCircuit, length: impl Fn(u32) -> f32) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        for &gid in &circuit.gids {
            store.insert(format!("cell-{}.h5", gid), simple_morphology(length(gid)));
        }
        store
    }

    /// Records import calls instead of reading files.
    #[derive(Default)]
    struct RecordingImporter {
        calls: StdMutex<Vec<(PathBuf, usize)>>,
    }

    impl MeshImporter for RecordingImporter {
        fn import_mesh(
            &self,
            path: &Path,
            _quality: GeometryQuality,
            _transform: Mat4,
            material: usize,
            _scene: &mut Scene,
        ) -> Result<(), crate::mesh::MeshError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), material));
            Ok(())
        }
    }

    struct MockReport {
        gids: Vec<u32>,
        counts: Vec<Vec<u16>>,
        offsets: Vec<Vec<u64>>,
        start: f32,
        end: f32,
        step: f32,
        frame_size: u64,
    }

    impl CompartmentReportSource for MockReport {
        fn start_time(&self) -> f32 {
            self.start
        }
        fn end_time(&self) -> f32 {
            self.end
        }
        fn timestep(&self) -> f32 {
            self.step
        }
        fn frame_size(&self) -> u64 {
            self.frame_size
        }
        fn gids(&self) -> &[u32] {
            &self.gids
        }
        fn compartment_counts(&self, cell_index: usize) -> &[u16] {
            &self.counts[cell_index]
        }
        fn compartment_offsets(&self, cell_index: usize) -> &[u64] {
            &self.offsets[cell_index]
        }
        fn load_frame(&self, timestamp: f32) -> Result<Vec<f32>, ReportError> {
            if timestamp < self.start || timestamp > self.end {
                return Err(ReportError::OutOfRange(timestamp));
            }
            Ok(vec![timestamp; self.frame_size as usize])
        }
    }

    #[test]
    fn test_skip_stride_examples() {
        // 100 cells at density 50: stride 2, even indices processed.
        assert_eq!(skip_stride(100, 50), 2);
        assert_eq!(skip_stride(100, 100), 1);
        assert_eq!(skip_stride(100, 10), 10);
        // Degenerate selections disable skipping instead of dividing by 0.
        assert_eq!(skip_stride(100, 0), 0);
        assert_eq!(skip_stride(3, 10), 0);
    }

    #[test]
    fn test_empty_circuit_is_a_hard_failure() {
        let circuit = MockCircuit::with_cells(0);
        let store = InMemoryStore::new();
        let config = GeometryConfig::default();
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        let result = loader.import_circuit(
            &circuit,
            &store,
            &RecordingImporter::default(),
            None,
            &mut scene,
        );
        assert!(matches!(result, Err(CircuitError::NoCells)));
    }

    #[test]
    fn test_density_skips_odd_indices() {
        let circuit = MockCircuit::with_cells(100);
        let store = store_for(&circuit, |_| 10.0);
        let mut config = GeometryConfig::default();
        config.circuit_density = 50;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(
                &circuit,
                &store,
                &RecordingImporter::default(),
                None,
                &mut scene,
            )
            .unwrap();

        // 50 cells processed, 3 spheres each (soma + 2 dendrite samples).
        assert_eq!(scene.sphere_count(), 50 * 3);
        // Even gid indices correspond to odd gids (index 0 = gid 1).
        let soma_xs: HashSet<i64> = scene.spheres[&0]
            .iter()
            .filter(|s| s.distance_to_soma == 0.0 && s.radius == 2.0)
            .map(|s| s.center.x as i64)
            .collect();
        assert!(soma_xs.contains(&100));
        assert!(!soma_xs.contains(&200));
        assert!(soma_xs.contains(&300));
    }

    #[test]
    fn test_failed_cells_are_counted_not_fatal() {
        let circuit = MockCircuit::with_cells(4);
        let mut store = InMemoryStore::new();
        // Only cells 1 and 3 resolve.
        store.insert("cell-1.h5", simple_morphology(5.0));
        store.insert("cell-3.h5", simple_morphology(5.0));

        let config = GeometryConfig::default();
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        let result = loader.import_circuit(
            &circuit,
            &store,
            &RecordingImporter::default(),
            None,
            &mut scene,
        );
        assert!(matches!(
            result,
            Err(CircuitError::CellFailures {
                failed: 2,
                attempted: 4
            })
        ));
        // Successful cells still reached the scene.
        assert_eq!(scene.sphere_count(), 2 * 3);
    }

    #[test]
    fn test_offset_ledger_is_monotonic_and_non_overlapping() {
        let circuit = MockCircuit::with_cells(8);
        // Cell gid g has a dendrite of length g.
        let store = store_for(&circuit, |gid| gid as f32);
        let config = GeometryConfig::default();
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        let offsets = loader
            .import_circuit(
                &circuit,
                &store,
                &RecordingImporter::default(),
                None,
                &mut scene,
            )
            .unwrap();

        // Every cell's span was recorded under a dense counter.
        assert_eq!(offsets.len(), 8);
        let mut spans: Vec<f32> = offsets.values().copied().collect();
        spans.sort_by(f32::total_cmp);
        assert_eq!(spans, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        // Soma spheres carry the claimed bases: starting at 1, consecutive,
        // non-overlapping, covering the summed spans.
        let mut bases: Vec<f32> = scene.spheres[&0]
            .iter()
            .filter(|s| s.distance_to_soma == 0.0 && s.radius == 2.0)
            .map(|s| s.simulation_offset)
            .collect();
        bases.sort_by(f32::total_cmp);
        assert_eq!(bases[0], 1.0);
        let total: f32 = spans.iter().sum();
        for pair in bases.windows(2) {
            let span = offsets
                .values()
                .find(|&&d| (pair[0] + d - pair[1]).abs() < 1e-4);
            assert!(
                span.is_some(),
                "base {} does not continue from {}",
                pair[1],
                pair[0]
            );
        }
        let last_base = *bases.last().unwrap();
        let last_span = total + 1.0 - last_base;
        assert!(offsets.values().any(|&d| (d - last_span).abs() < 1e-4));
    }

    #[test]
    fn test_attribute_materials_force_cell_colors() {
        let mut circuit = MockCircuit::with_cells(3);
        circuit.attributes = Some(vec!["7".into(), "7".into(), "7".into()]);
        let store = store_for(&circuit, |_| 5.0);

        let mut config = GeometryConfig::default();
        config.color_scheme = ColorScheme::ByLayer;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(
                &circuit,
                &store,
                &RecordingImporter::default(),
                None,
                &mut scene,
            )
            .unwrap();
        assert_eq!(scene.spheres.keys().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_unsupported_attributes_fall_back() {
        // MockCircuit without attribute data errors out; the loader must
        // fall back to scheme-derived materials (0 for attribute schemes).
        let circuit = MockCircuit::with_cells(2);
        let store = store_for(&circuit, |_| 5.0);

        let mut config = GeometryConfig::default();
        config.color_scheme = ColorScheme::ByMtype;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(
                &circuit,
                &store,
                &RecordingImporter::default(),
                None,
                &mut scene,
            )
            .unwrap();
        assert!(scene.spheres.contains_key(&0));
        assert_eq!(scene.spheres.len(), 1);
    }

    #[test]
    fn test_mesh_phase_substitutes_parametric_geometry() {
        let circuit = MockCircuit::with_cells(4);
        let store = store_for(&circuit, |_| 5.0);
        let importer = RecordingImporter::default();

        let mut config = GeometryConfig::default();
        config.meshed_morphologies_folder = Some(PathBuf::from("/meshes"));
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(&circuit, &store, &importer, None, &mut scene)
            .unwrap();

        let calls = importer.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].0, PathBuf::from("/meshes/cell-1.off"));
        // Without a simulation model the parametric phase is skipped.
        assert_eq!(scene.sphere_count(), 0);
    }

    #[test]
    fn test_mesh_phase_keeps_parametric_with_simulation_model() {
        let circuit = MockCircuit::with_cells(2);
        let store = store_for(&circuit, |_| 5.0);
        let importer = RecordingImporter::default();

        let mut config = GeometryConfig::default();
        config.meshed_morphologies_folder = Some(PathBuf::from("/meshes"));
        config.use_simulation_model = true;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(&circuit, &store, &importer, None, &mut scene)
            .unwrap();
        assert_eq!(importer.calls.lock().unwrap().len(), 2);
        assert!(scene.sphere_count() > 0);
    }

    #[test]
    fn test_report_restricts_cells_and_maps_offsets() {
        let circuit = MockCircuit::with_cells(4);
        let store = store_for(&circuit, |_| 6.0);
        let report = MockReport {
            gids: vec![2, 4],
            counts: vec![vec![4], vec![4]],
            offsets: vec![vec![10], vec![20]],
            start: 0.0,
            end: 1.0,
            step: 0.1,
            frame_size: 8,
        };

        let config = GeometryConfig::default();
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit_with_report(
                &circuit,
                &store,
                &RecordingImporter::default(),
                &report,
                None,
                &mut scene,
            )
            .unwrap();

        // Only the two simulated cells produced geometry.
        assert_eq!(scene.sphere_count(), 2 * 3);
        // Dendrite offsets start at the report's per-cell compartment
        // offsets: 4 compartments over 2 samples = step 2.
        let offsets: HashSet<i64> = scene.spheres[&0]
            .iter()
            .map(|s| s.simulation_offset as i64)
            .collect();
        assert!(offsets.contains(&10) && offsets.contains(&12));
        assert!(offsets.contains(&20) && offsets.contains(&22));
    }

    #[test]
    fn test_non_simulated_cells_second_pass() {
        let circuit = MockCircuit::with_cells(4);
        let store = store_for(&circuit, |_| 6.0);
        let report = MockReport {
            gids: vec![1],
            counts: vec![vec![4]],
            offsets: vec![vec![0]],
            start: 0.0,
            end: 1.0,
            step: 0.1,
            frame_size: 4,
        };

        let mut config = GeometryConfig::default();
        config.non_simulated_cells = 2;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit_with_report(
                &circuit,
                &store,
                &RecordingImporter::default(),
                &report,
                None,
                &mut scene,
            )
            .unwrap();

        // 1 simulated + 2 non-simulated cells.
        assert_eq!(scene.sphere_count(), 3 * 3);
    }

    #[test]
    fn test_simulation_cache_written_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("sim.cache");

        let circuit = MockCircuit::with_cells(2);
        let report = MockReport {
            gids: vec![1, 2],
            counts: vec![vec![2], vec![2]],
            offsets: vec![vec![0], vec![2]],
            start: 0.0,
            end: 10.0,
            step: 0.5,
            frame_size: 4,
        };

        let mut config = GeometryConfig::default();
        config.start_simulation_time = 1.0;
        config.end_simulation_time = 6.0;
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_simulation_data(&circuit, &report, &cache, None, &mut scene)
            .unwrap();

        // frame count = floor((min(10, 6) - max(0, 1)) / 0.5) = 10
        let handler = scene.simulation_handler().expect("handler attached");
        assert_eq!(handler.frame_count(), 10);
        assert_eq!(handler.frame_size(), 4);
        // First frame holds values for t = 1.0.
        assert_eq!(handler.load_frame(0).unwrap(), vec![1.0; 4]);

        // Re-running against the existing cache is a no-op that succeeds.
        let written = std::fs::metadata(&cache).unwrap().modified().unwrap();
        let mut scene2 = Scene::new();
        loader
            .import_simulation_data(&circuit, &report, &cache, None, &mut scene2)
            .unwrap();
        assert_eq!(std::fs::metadata(&cache).unwrap().modified().unwrap(), written);
        assert_eq!(scene2.simulation_handler().unwrap().frame_count(), 10);
    }

    #[test]
    fn test_merge_from_parallel_workers_matches_sequential_counts() {
        // Regardless of how rayon schedules workers, the merged scene holds
        // one soma and two dendrite spheres per processed cell.
        let circuit = MockCircuit::with_cells(64);
        let store = store_for(&circuit, |gid| gid as f32);
        let config = GeometryConfig::default();
        let loader = CircuitLoader::new(&config);
        let mut scene = Scene::new();

        loader
            .import_circuit(
                &circuit,
                &store,
                &RecordingImporter::default(),
                None,
                &mut scene,
            )
            .unwrap();
        assert_eq!(scene.sphere_count(), 64 * 3);
        assert_eq!(scene.cylinder_count(), 64 * 2);
        assert!(!scene.world_bounds.is_empty());
        assert_eq!(scene.world_bounds.max.x, 64.0 * 100.0 + 2.0 + 64.0);
    }
}
