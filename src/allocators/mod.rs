//! Allocation backends.
//!
//! Every allocator here is driven by execution serials: memory handed out for
//! a serial is only reused once that serial has completed on the GPU.
//! **These are the only modules that should contain `unsafe` code.**

pub mod copy_split;
pub mod deferred;
pub mod descriptor_heap;
pub mod pageable;
pub mod residency;
pub mod ring_buffer;
pub mod shader_visible;
pub mod uploader;
