//! Binary simulation cache and its playback handler.
//!
//! The cache materializes a compartment report into a file the playback
//! handler can seek frames out of without touching the report again:
//!
//! ```text
//! [frame_count: u64 LE][frame_size: u64 LE]      header
//! [frame_size * f32] * frame_count               body, one record per
//!                                                timestep, increasing time
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Bytes occupied by the two-field header.
pub const CACHE_HEADER_SIZE: u64 = 16;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open cache file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file {path:?} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("frame {0} outside the cached range")]
    FrameOutOfRange(u64),
    #[error("frame has {got} values, cache records hold {expected}")]
    FrameSizeMismatch { got: usize, expected: u64 },
}

/// Playback handler over a simulation cache file.
///
/// Created either by attaching to an existing cache or by sizing a new one
/// before writing it. Attached to the scene so a renderer can bind frame
/// values to primitive simulation offsets.
#[derive(Debug, Clone)]
pub struct SimulationHandler {
    cache_file: PathBuf,
    frame_count: u64,
    frame_size: u64,
}

impl SimulationHandler {
    /// Handler for a cache that is about to be written.
    pub fn new(cache_file: &Path, frame_count: u64, frame_size: u64) -> Self {
        Self {
            cache_file: cache_file.to_path_buf(),
            frame_count,
            frame_size,
        }
    }

    /// Attach to an existing cache file.
    ///
    /// Reads the header and checks the body length against it. Returns
    /// `Ok(None)` when the file does not exist; a present-but-invalid file
    /// is an error.
    pub fn attach_to_cache_file(path: &Path) -> Result<Option<Self>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(path)?;
        let mut header = [0u8; CACHE_HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|_| CacheError::Malformed {
            path: path.to_path_buf(),
            reason: "truncated header".to_string(),
        })?;
        let frame_count = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let frame_size = u64::from_le_bytes(header[8..16].try_into().unwrap());

        let expected = CACHE_HEADER_SIZE + frame_count * frame_size * 4;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(CacheError::Malformed {
                path: path.to_path_buf(),
                reason: format!("expected {} bytes, found {}", expected, actual),
            });
        }

        log::info!(
            "Attached to simulation cache {:?} ({} frames of {} values)",
            path,
            frame_count,
            frame_size
        );
        Ok(Some(Self {
            cache_file: path.to_path_buf(),
            frame_count,
            frame_size,
        }))
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Write the fixed-layout header.
    pub fn write_header(&self, writer: &mut impl Write) -> Result<(), CacheError> {
        writer.write_all(&self.frame_count.to_le_bytes())?;
        writer.write_all(&self.frame_size.to_le_bytes())?;
        Ok(())
    }

    /// Write one frame record. `values` must match the declared frame size.
    pub fn write_frame(&self, writer: &mut impl Write, values: &[f32]) -> Result<(), CacheError> {
        if values.len() as u64 != self.frame_size {
            return Err(CacheError::FrameSizeMismatch {
                got: values.len(),
                expected: self.frame_size,
            });
        }
        writer.write_all(bytemuck::cast_slice(values))?;
        Ok(())
    }

    /// Read one frame record back from the cache.
    pub fn load_frame(&self, frame: u64) -> Result<Vec<f32>, CacheError> {
        if frame >= self.frame_count {
            return Err(CacheError::FrameOutOfRange(frame));
        }
        let mut file = File::open(&self.cache_file)?;
        file.seek(SeekFrom::Start(CACHE_HEADER_SIZE + frame * self.frame_size * 4))?;
        let mut bytes = vec![0u8; (self.frame_size * 4) as usize];
        file.read_exact(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect())
    }
}
