//! Geometry generation configuration.
//!
//! One flat config struct drives every loader: material coloring, sampling
//! quality, radius handling, section filtering, metaball meshing, circuit
//! density and the simulation time window. Saved and loaded as YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::morphology::SectionType;

/// Size of the scene's material table.
pub const MAX_MATERIALS: usize = 200;
/// Materials at the top of the table reserved for system use; derived
/// material ids never land on them.
pub const RESERVED_MATERIALS: usize = 10;

/// How materials are assigned to generated geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorScheme {
    /// Everything gets material 0.
    None,
    /// Material derived from the cell index.
    ById,
    /// Material derived from the section type (soma, axon, ...).
    BySegmentType,
    /// Material taken from the circuit's per-cell layer attribute.
    ByLayer,
    /// Material taken from the circuit's per-cell morphological type.
    ByMtype,
    /// Material taken from the circuit's per-cell electrical type.
    ByEtype,
}

/// Level of detail for section sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeometryQuality {
    /// Keep only the first and last sample of each section.
    Low,
    /// Keep roughly every other sample.
    Medium,
    /// Keep every sample.
    High,
}

/// Which section types are sampled. The soma flag also controls soma sphere
/// emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFilter {
    pub soma: bool,
    pub axon: bool,
    pub dendrite: bool,
    pub apical_dendrite: bool,
}

impl Default for SectionFilter {
    fn default() -> Self {
        Self {
            soma: true,
            axon: true,
            dendrite: true,
            apical_dendrite: true,
        }
    }
}

impl SectionFilter {
    pub fn includes(&self, section_type: SectionType) -> bool {
        match section_type {
            SectionType::Soma => self.soma,
            SectionType::Axon => self.axon,
            SectionType::Dendrite => self.dendrite,
            SectionType::ApicalDendrite => self.apical_dendrite,
            SectionType::Undefined => true,
        }
    }
}

/// Optional grid placement of cells, overriding circuit transforms with a
/// column/row layout. Disabled while `columns` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MorphologyLayout {
    pub columns: usize,
    pub horizontal_spacing: f32,
    pub vertical_spacing: f32,
}

impl Default for MorphologyLayout {
    fn default() -> Self {
        Self {
            columns: 0,
            horizontal_spacing: 0.0,
            vertical_spacing: 0.0,
        }
    }
}

/// Configuration for morphology and circuit geometry generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Material assignment policy.
    pub color_scheme: ColorScheme,

    /// Section sampling level of detail.
    pub quality: GeometryQuality,

    /// Scale applied to every derived radius.
    pub radius_multiplier: f32,

    /// Fixed radius replacing every derived radius when set.
    pub radius_override: Option<f32>,

    /// Section types to sample.
    pub section_filter: SectionFilter,

    /// Optional grid layout for side-by-side morphology display.
    pub layout: MorphologyLayout,

    /// Emit transition cones between the soma and each first-order branch so
    /// parametric geometry fills the gap to compartment-level detail.
    pub use_simulation_model: bool,

    /// Replace the soma and near-soma geometry with a metaball mesh.
    pub use_metaballs: bool,

    /// Lattice resolution of the metaball field, points per axis.
    pub metaballs_grid_size: usize,

    /// Isosurface threshold of the metaball field.
    pub metaballs_threshold: f32,

    /// Samples per soma-rooted section contributing metaballs.
    pub metaballs_samples_from_soma: usize,

    /// Percentage of the circuit's cells to load (100 = all).
    pub circuit_density: u32,

    /// Cells outside the bound report to load in the second pass.
    pub non_simulated_cells: usize,

    /// Folder of precomputed per-cell meshes; enables the mesh import phase.
    pub meshed_morphologies_folder: Option<PathBuf>,

    /// File extension of precomputed meshes in the folder above.
    pub mesh_file_extension: String,

    /// Lower clamp of the simulation window, in report time units.
    pub start_simulation_time: f32,

    /// Upper clamp of the simulation window, in report time units.
    pub end_simulation_time: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            color_scheme: ColorScheme::None,
            quality: GeometryQuality::High,
            radius_multiplier: 1.0,
            radius_override: None,
            section_filter: SectionFilter::default(),
            layout: MorphologyLayout::default(),
            use_simulation_model: false,
            use_metaballs: false,
            metaballs_grid_size: 30,
            metaballs_threshold: 1.0,
            metaballs_samples_from_soma: 3,
            circuit_density: 100,
            non_simulated_cells: 0,
            meshed_morphologies_folder: None,
            mesh_file_extension: "off".to_string(),
            start_simulation_time: 0.0,
            end_simulation_time: f32::MAX,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl GeometryConfig {
    /// Save the configuration as YAML.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        log::info!("Saved geometry config to {:?}", path);
        Ok(())
    }

    /// Load a configuration from YAML.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&yaml)?;
        log::info!("Loaded geometry config from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeometryConfig::default();
        assert_eq!(config.color_scheme, ColorScheme::None);
        assert_eq!(config.quality, GeometryQuality::High);
        assert_eq!(config.circuit_density, 100);
        assert!(config.radius_override.is_none());
        assert!(config.section_filter.includes(SectionType::ApicalDendrite));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = GeometryConfig::default();
        config.color_scheme = ColorScheme::BySegmentType;
        config.quality = GeometryQuality::Low;
        config.radius_override = Some(2.0);
        config.circuit_density = 50;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: GeometryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.color_scheme, ColorScheme::BySegmentType);
        assert_eq!(restored.quality, GeometryQuality::Low);
        assert_eq!(restored.radius_override, Some(2.0));
        assert_eq!(restored.circuit_density, 50);
    }
}
