//! GPU backend seam
//!
//! The allocators never talk to a graphics API directly. Everything they need
//! (fence queries, heap creation, residency calls, command recording) goes
//! through the traits in [`traits`].
//!
//! ## Backends
//! - [`DummyBackend`]: in-memory backend with manual fence control, used by
//!   the tests and benchmarks
//! - Native backends live outside this crate and implement [`GpuBackend`]

pub mod traits;
pub use traits::{
    DescriptorHeapInfo, DescriptorHeapType, GpuAllocError, GpuBackend, GpuCommands, GpuFence,
    GpuMemory, MemorySegment, NativeHandle, PlacedCopy, StagingBuffer, VideoMemoryInfo,
};

// Dummy backend for testing (always available)
pub mod dummy;
pub use dummy::{DummyBackend, RecordedCommand};
