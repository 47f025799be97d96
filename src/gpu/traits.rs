//! GPU backend traits and types
//!
//! This module defines the backend interface the allocators program against
//! WITHOUT pulling in any platform-specific dependencies. A native backend
//! (or the in-memory [`DummyBackend`](super::DummyBackend)) implements the
//! three traits below.

use std::fmt;

use crate::allocators::copy_split::{CopyDirection, CopyInfo};
use crate::core::serial::ExecutionSerial;

/// Errors that can occur during GPU allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuAllocError {
    /// Allocation unsatisfiable even after eviction
    OutOfMemory,
    /// A sub-allocator has no room left for the request
    OutOfSpace,
    /// The device was lost; serial queries are meaningless
    DeviceLost,
    /// Invalid size or alignment
    InvalidSize,
    /// Backend-specific error (opaque)
    Backend(String),
}

impl fmt::Display for GpuAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuAllocError::OutOfMemory => write!(f, "GPU out of memory"),
            GpuAllocError::OutOfSpace => write!(f, "Sub-allocator out of space"),
            GpuAllocError::DeviceLost => write!(f, "GPU device lost"),
            GpuAllocError::InvalidSize => write!(f, "Invalid allocation size or alignment"),
            GpuAllocError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for GpuAllocError {}

/// Opaque identifier of a native GPU object (heap, descriptor heap, buffer,
/// texture or command list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NativeHandle(pub u64);

/// Physical memory pool with its own OS-provided budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySegment {
    /// Dedicated video memory (the only segment on UMA adapters)
    Local,
    /// System memory visible to the GPU
    NonLocal,
}

impl MemorySegment {
    /// Both segments, in index order.
    pub const ALL: [MemorySegment; 2] = [MemorySegment::Local, MemorySegment::NonLocal];

    pub(crate) fn index(self) -> usize {
        match self {
            MemorySegment::Local => 0,
            MemorySegment::NonLocal => 1,
        }
    }

    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            MemorySegment::Local => "local",
            MemorySegment::NonLocal => "non-local",
        }
    }
}

/// Budget information reported by the OS for one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoMemoryInfo {
    /// Bytes the OS allows this process to keep resident
    pub budget: u64,
    /// Bytes the OS currently attributes to this process
    pub current_usage: u64,
}

/// Descriptor heap kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views
    CbvSrvUav,
    /// Samplers
    Sampler,
    /// Render target views (CPU-only)
    Rtv,
    /// Depth stencil views (CPU-only)
    Dsv,
}

impl DescriptorHeapType {
    /// Every heap type, in index order.
    pub const ALL: [DescriptorHeapType; 4] = [
        DescriptorHeapType::CbvSrvUav,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            DescriptorHeapType::CbvSrvUav => 0,
            DescriptorHeapType::Sampler => 1,
            DescriptorHeapType::Rtv => 2,
            DescriptorHeapType::Dsv => 3,
        }
    }

    /// Whether heaps of this type can be bound to the pipeline.
    pub fn can_be_shader_visible(self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }
}

/// A created descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    /// Native heap object
    pub handle: NativeHandle,
    /// CPU handle of descriptor 0
    pub cpu_start: u64,
    /// GPU handle of descriptor 0 (shader-visible heaps only)
    pub gpu_start: u64,
}

/// A persistently mapped upload buffer.
#[derive(Debug)]
pub struct StagingBuffer {
    handle: NativeHandle,
    size: u64,
    mapped: *mut u8,
}

// SAFETY: the mapping is owned by the backend object and only touched by the
// thread that currently owns the allocator surface.
unsafe impl Send for StagingBuffer {}

impl StagingBuffer {
    /// Wrap a mapped native buffer.
    ///
    /// # Safety
    /// `mapped` must point to at least `size` writable bytes that stay valid
    /// until the backend destroys `handle`.
    pub unsafe fn new(handle: NativeHandle, size: u64, mapped: *mut u8) -> Self {
        Self { handle, size, mapped }
    }

    /// Native buffer object.
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Start of the CPU mapping.
    pub fn mapped_ptr(&self) -> *mut u8 {
        self.mapped
    }
}

/// One placed-footprint copy command, as issued to the command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedCopy {
    /// Which way data moves
    pub direction: CopyDirection,
    /// Linear buffer side
    pub buffer: NativeHandle,
    /// Texture side
    pub texture: NativeHandle,
    /// Row pitch of the buffer footprint
    pub bytes_per_row: u32,
    /// Region computed by the copy splitter
    pub region: CopyInfo,
}

/// Fence protocol of the submission queue.
pub trait GpuFence {
    /// Signal `serial` on the queue after all work submitted so far.
    fn signal(&mut self, serial: ExecutionSerial) -> Result<(), GpuAllocError>;

    /// Highest serial the GPU has finished. `Err(DeviceLost)` once the device is gone.
    fn completed_value(&mut self) -> Result<ExecutionSerial, GpuAllocError>;

    /// Block the calling thread until `serial` completes.
    fn wait_for(&mut self, serial: ExecutionSerial) -> Result<(), GpuAllocError>;
}

/// Memory objects and residency control.
pub trait GpuMemory {
    /// Whether the adapter has a single unified memory segment.
    fn is_uma(&self) -> bool;

    /// Query the OS budget for a segment.
    fn query_video_memory(&self, segment: MemorySegment) -> VideoMemoryInfo;

    /// Create a resident heap of `size` bytes.
    fn create_heap(&mut self, size: u64, segment: MemorySegment) -> Result<NativeHandle, GpuAllocError>;

    /// Make every object in `objects` resident in one call.
    fn make_resident(&mut self, objects: &[NativeHandle]) -> Result<(), GpuAllocError>;

    /// Evict every object in `objects` in one call.
    fn evict(&mut self, objects: &[NativeHandle]) -> Result<(), GpuAllocError>;

    /// Destroy a native object.
    fn destroy(&mut self, object: NativeHandle);

    /// Byte stride between descriptors of a heap type.
    fn descriptor_size_increment(&self, heap_type: DescriptorHeapType) -> u32;

    /// Create a descriptor heap holding `count` descriptors.
    fn create_descriptor_heap(
        &mut self,
        heap_type: DescriptorHeapType,
        count: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, GpuAllocError>;

    /// Create a persistently mapped upload buffer.
    fn create_staging_buffer(&mut self, size: u64) -> Result<StagingBuffer, GpuAllocError>;
}

/// Command list recording and submission.
pub trait GpuCommands {
    /// Acquire a command list ready for recording.
    fn open_command_list(&mut self) -> Result<NativeHandle, GpuAllocError>;

    /// Record one placed-footprint copy.
    fn record_copy(&mut self, list: NativeHandle, copy: &PlacedCopy);

    /// Transition a shared texture back to the common state.
    fn record_transition_to_common(&mut self, list: NativeHandle, texture: NativeHandle);

    /// Finish recording.
    fn close_command_list(&mut self, list: NativeHandle) -> Result<(), GpuAllocError>;

    /// Submit a closed command list to the queue.
    fn execute_command_list(&mut self, list: NativeHandle) -> Result<(), GpuAllocError>;

    /// Drop a command list without submitting it.
    fn release_command_list(&mut self, list: NativeHandle);
}

/// Everything the allocators need from a backend.
pub trait GpuBackend: GpuFence + GpuMemory + GpuCommands + Send {}

impl<T: GpuFence + GpuMemory + GpuCommands + Send> GpuBackend for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(GpuAllocError::OutOfMemory.to_string(), "GPU out of memory");
        assert_eq!(
            GpuAllocError::Backend("hr=0x887A0005".into()).to_string(),
            "Backend error: hr=0x887A0005"
        );
    }

    #[test]
    fn test_shader_visible_types() {
        assert!(DescriptorHeapType::CbvSrvUav.can_be_shader_visible());
        assert!(DescriptorHeapType::Sampler.can_be_shader_visible());
        assert!(!DescriptorHeapType::Rtv.can_be_shader_visible());
        assert!(!DescriptorHeapType::Dsv.can_be_shader_visible());
    }
}
