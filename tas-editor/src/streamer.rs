//! Persists captured memory regions into the project directory.
//!
//! Each region is backed by `applicationMemory/byte_<start>_to_byte_<end>.bin`,
//! pre-sized to the region length, so external viewers can map it. Chunks
//! overwrite the file in place; a chunk identical to the last one written
//! at the same offset is skipped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use tas_core::{MemoryRegionDescriptor, ValidationError};

use crate::error::EditorError;

/// Subdirectory of the project that holds region files.
pub const MEMORY_DIR: &str = "applicationMemory";

/// File name for a region, from its address range.
pub fn region_file_name(region: &MemoryRegionDescriptor) -> String {
    format!("byte_{}_to_byte_{}.bin", region.address, region.end())
}

struct OpenRegion {
    descriptor: MemoryRegionDescriptor,
    path: PathBuf,
    file: File,
    /// Digest of the last chunk written at each offset.
    digests: HashMap<u64, blake3::Hash>,
}

pub struct MemoryRegionStreamer {
    dir: PathBuf,
    regions: HashMap<u16, OpenRegion>,
}

impl MemoryRegionStreamer {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: project_dir.as_ref().join(MEMORY_DIR),
            regions: HashMap::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Create (or reopen) the backing file and size it to the region.
    ///
    /// Returns the file path. Reopening an already open id replaces it.
    pub fn open_region(&mut self, descriptor: &MemoryRegionDescriptor) -> Result<PathBuf, EditorError> {
        descriptor.validate()?;
        fs::create_dir_all(&self.dir)?;

        let path = self.dir.join(region_file_name(descriptor));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(descriptor.size)?;
        info!(id = descriptor.id, path = %path.display(), "region file open");

        self.regions.insert(
            descriptor.id,
            OpenRegion {
                descriptor: descriptor.clone(),
                path: path.clone(),
                file,
                digests: HashMap::new(),
            },
        );
        Ok(path)
    }

    pub fn is_open(&self, region_id: u16) -> bool {
        self.regions.contains_key(&region_id)
    }

    pub fn path(&self, region_id: u16) -> Option<&Path> {
        self.regions.get(&region_id).map(|r| r.path.as_path())
    }

    /// Write `bytes` at `offset` within the region.
    ///
    /// Returns `false` when the chunk matched the previous one and was
    /// skipped.
    pub fn write_chunk(&mut self, region_id: u16, offset: u64, bytes: &[u8]) -> Result<bool, EditorError> {
        let region = self
            .regions
            .get_mut(&region_id)
            .ok_or(EditorError::UnknownRegion(region_id))?;

        let end = offset.checked_add(bytes.len() as u64);
        if end.is_none_or(|end| end > region.descriptor.size) {
            return Err(ValidationError::InvalidRegion(format!(
                "chunk of {} bytes at offset {offset} overruns region {region_id} of {} bytes",
                bytes.len(),
                region.descriptor.size
            ))
            .into());
        }

        let digest = blake3::hash(bytes);
        if region.digests.get(&offset) == Some(&digest) {
            return Ok(false);
        }

        region.file.seek(SeekFrom::Start(offset))?;
        region.file.write_all(bytes)?;
        region.digests.insert(offset, digest);
        debug!(region_id, offset, len = bytes.len(), "region chunk written");
        Ok(true)
    }

    /// Flush and close one region file.
    pub fn close_region(&mut self, region_id: u16) -> Result<(), EditorError> {
        if let Some(mut region) = self.regions.remove(&region_id) {
            region.file.flush()?;
            region.file.sync_data()?;
        }
        Ok(())
    }

    pub fn close_all(&mut self) -> Result<(), EditorError> {
        let ids: Vec<u16> = self.regions.keys().copied().collect();
        for id in ids {
            self.close_region(id)?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
