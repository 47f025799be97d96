//! # residalloc
//!
//! Serial-tracked GPU memory residency and sub-allocation for explicit
//! graphics APIs.
//!
//! ## Features
//!
//! - Execution serials: every allocation is tagged with the submission that
//!   last uses it, and reclaimed once the GPU has finished it
//! - Budget-driven residency: LRU eviction under the OS video memory budget
//! - Ring-buffer sub-allocation of staging memory and shader-visible
//!   descriptors
//! - CPU-only descriptor heap pools
//! - Buffer/texture copy splitting for placement and pitch alignment rules
//! - Cross-thread heap releases through a lock-free queue
//! - Backend-agnostic: everything talks to the [`GpuBackend`] traits, with
//!   an in-memory [`DummyBackend`] for tests
//! - Diagnostics with stable codes, optional strict mode and Tracy plots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use residalloc::{Device, DummyBackend, MemorySegment, ResidencyConfig};
//!
//! let mut device = Device::new(Box::new(DummyBackend::new()), ResidencyConfig::default())?;
//!
//! // Per submission
//! let heap = device.create_heap(64 << 20, MemorySegment::Local)?;
//! device.track_heap_usage(heap);
//! device.pending_commands()?.set_needs_submit();
//! device.tick()?;
//!
//! device.release_heap(heap);
//! device.tick()?;
//! # Ok::<(), residalloc::GpuAllocError>(())
//! ```

pub mod api;
pub mod diagnostics;
pub mod gpu;

mod allocators;
mod core;
mod sync;
#[allow(dead_code)]
mod util;

// Re-export public API at crate root for convenience
pub use api::config::ResidencyConfig;
pub use api::device::{Device, SharedDevice};
pub use api::recording_context::CommandRecordingContext;

// Serials
pub use crate::core::queue::Queue;
pub use crate::core::serial::{ExecutionSerial, SerialQueue};

// Residency
pub use allocators::pageable::{Pageable, PageableId, ResidencyState};
pub use allocators::residency::{MemorySegmentInfo, ResidencyManager};
pub use allocators::deferred::{DeferredReleaseQueue, HeapReleaser};

// Sub-allocators
pub use allocators::ring_buffer::RingBufferAllocator;
pub use allocators::descriptor_heap::{DescriptorHeapAllocator, DescriptorHeapHandle};
pub use allocators::shader_visible::{GpuDescriptorHeapAllocation, HeapVersion, ShaderVisibleDescriptorAllocator};
pub use allocators::uploader::{DynamicUploader, UploadHandle};

// Texture copy splitting
pub use allocators::copy_split::{
    compute_2d_texture_copy_splits, compute_2d_texture_copy_subresource, compute_3d_texture_copy_splits,
    compute_copy_regions, BufferTextureCopy, CopyDirection, CopyInfo, Extent3D, Origin3D, TexelBlockInfo,
    TextureCopySplits, TextureCopySubresource, TextureDimension, MAX_TEXTURE_COPY_REGIONS,
    TEXTURE_DATA_PITCH_ALIGNMENT, TEXTURE_DATA_PLACEMENT_ALIGNMENT,
};

// GPU backend seam
pub use gpu::{
    DescriptorHeapInfo, DescriptorHeapType, DummyBackend, GpuAllocError, GpuBackend, GpuCommands, GpuFence,
    GpuMemory, MemorySegment, NativeHandle, PlacedCopy, RecordedCommand, StagingBuffer, VideoMemoryInfo,
};

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{StrictMode, set_strict_mode, StrictModeGuard};
pub use diagnostics::{
    RA101, RA102, RA201, RA202, RA203, RA301, RA302, RA303, RA304, RA305, RA306, RA401, RA402, RA501, RA901,
};

// Size helpers
pub use util::size::{format_bytes, gb, kb, mb};
