//! Simulation report binding.
//!
//! A compartment report is a time series of scalar values per morphological
//! compartment. During sampling the loader only needs one cell's compartment
//! counts and offsets ([`SimulationInformation`]); the cache writer pulls
//! whole frames through [`CompartmentReportSource`].

pub mod cache;

use thiserror::Error;

pub use cache::{CacheError, SimulationHandler};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to read report: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp {0} outside the report range")]
    OutOfRange(f32),
    #[error("malformed report: {0}")]
    Malformed(String),
}

/// Read-only compartment report.
///
/// `compartment_counts`/`compartment_offsets` are indexed first by the
/// report's own cell order (position in [`gids`](Self::gids)), then by
/// section order within the cell.
pub trait CompartmentReportSource: Sync {
    fn start_time(&self) -> f32;
    fn end_time(&self) -> f32;
    fn timestep(&self) -> f32;
    /// Number of scalar values in one frame.
    fn frame_size(&self) -> u64;
    /// Cells covered by the report, in report order.
    fn gids(&self) -> &[u32];
    fn compartment_counts(&self, cell_index: usize) -> &[u16];
    fn compartment_offsets(&self, cell_index: usize) -> &[u64];
    /// Load the frame nearest `timestamp` as a flat value buffer.
    fn load_frame(&self, timestamp: f32) -> Result<Vec<f32>, ReportError>;
}

/// One cell's share of the bound report, borrowed for the duration of a
/// single morphology walk.
#[derive(Debug, Clone, Copy)]
pub struct SimulationInformation<'a> {
    /// Compartments per section, in section order.
    pub compartment_counts: &'a [u16],
    /// First frame-buffer index of each section, in section order.
    pub compartment_offsets: &'a [u64],
}

impl<'a> SimulationInformation<'a> {
    /// Borrow cell `cell_index`'s counts and offsets from a report.
    pub fn for_cell(report: &'a dyn CompartmentReportSource, cell_index: usize) -> Self {
        Self {
            compartment_counts: report.compartment_counts(cell_index),
            compartment_offsets: report.compartment_offsets(cell_index),
        }
    }
}
