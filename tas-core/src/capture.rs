//! Memory region descriptors, framebuffer capture and chunking of
//! captured bytes into wire messages.

use serde::{Deserialize, Serialize};

use crate::codec::MAX_PAYLOAD_SIZE;
use crate::debug::{DebugBackend, ProcessDebugController};
use crate::error::{ProcessError, ValidationError};
use crate::message::{FrameBuffer, Message, MemoryRegion};

/// Bytes of bincode framing around a `MemoryRegion` chunk
/// (`region_id` + `frame` + `offset` + vec length prefix).
const REGION_CHUNK_OVERHEAD: usize = 2 + 4 + 8 + 8;

/// Bytes of bincode framing around a `FrameBuffer` chunk.
const FRAMEBUFFER_CHUNK_OVERHEAD: usize = 8;

/// Largest number of region bytes carried by one `MemoryRegion` message.
pub const MAX_REGION_CHUNK: usize = MAX_PAYLOAD_SIZE - REGION_CHUNK_OVERHEAD;

/// Largest number of JPEG bytes carried by one `FrameBuffer` message.
pub const MAX_FRAMEBUFFER_CHUNK: usize = MAX_PAYLOAD_SIZE - FRAMEBUFFER_CHUNK_OVERHEAD;

// ── ElementType ──────────────────────────────────────────────────

/// How the bytes of a region are interpreted by viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes.
    pub fn width(self) -> u64 {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

// ── MemoryRegionDescriptor ───────────────────────────────────────

/// A range of target memory captured after every stepped frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegionDescriptor {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    pub address: u64,
    pub size: u64,
    #[serde(default)]
    pub element: ElementType,
}

impl MemoryRegionDescriptor {
    pub fn new(id: u16, address: u64, size: u64, element: ElementType) -> Self {
        Self {
            id,
            name: String::new(),
            address,
            size,
            element,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Size must be a non-zero multiple of the element width and the
    /// range must not wrap the address space.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.size == 0 {
            return Err(ValidationError::InvalidRegion(format!(
                "region {} has zero size",
                self.id
            )));
        }
        if self.size % self.element.width() != 0 {
            return Err(ValidationError::InvalidRegion(format!(
                "region {} size {} is not a multiple of {:?} width {}",
                self.id,
                self.size,
                self.element,
                self.element.width()
            )));
        }
        if self.address.checked_add(self.size).is_none() {
            return Err(ValidationError::InvalidRegion(format!(
                "region {} wraps the address space",
                self.id
            )));
        }
        Ok(())
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    pub fn element_count(&self) -> u64 {
        self.size / self.element.width()
    }
}

// ── FramebufferSource ────────────────────────────────────────────

/// Produces the current game framebuffer as a JPEG.
pub trait FramebufferSource: Send {
    fn capture_jpeg(&mut self) -> Result<Vec<u8>, ProcessError>;
}

// ── Chunking ─────────────────────────────────────────────────────

/// Split captured region bytes into `MemoryRegion` messages, in offset
/// order, each fitting in one frame.
pub fn region_messages(region_id: u16, frame: u32, bytes: &[u8]) -> Vec<Message> {
    if bytes.is_empty() {
        return Vec::new();
    }
    bytes
        .chunks(MAX_REGION_CHUNK)
        .enumerate()
        .map(|(i, chunk)| {
            Message::MemoryRegion(MemoryRegion {
                region_id,
                frame,
                offset: (i * MAX_REGION_CHUNK) as u64,
                bytes: chunk.to_vec(),
            })
        })
        .collect()
}

/// Split a JPEG into `FrameBuffer` messages.
pub fn framebuffer_messages(jpeg: &[u8]) -> Vec<Message> {
    jpeg.chunks(MAX_FRAMEBUFFER_CHUNK)
        .map(|chunk| {
            Message::FrameBuffer(FrameBuffer {
                chunk: chunk.to_vec(),
            })
        })
        .collect()
}

/// Read every region from the target, all-or-nothing.
pub fn capture_regions<B: DebugBackend>(
    debug: &mut ProcessDebugController<B>,
    regions: &[MemoryRegionDescriptor],
) -> Result<Vec<(u16, Vec<u8>)>, ProcessError> {
    regions
        .iter()
        .map(|r| {
            let bytes = debug.read_memory(r.address, r.size as usize)?;
            Ok((r.id, bytes))
        })
        .collect()
}
