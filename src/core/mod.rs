//! Serial tracking shared by every allocator.

pub mod queue;
pub mod serial;
