//! Tracy profiler integration.
//!
//! When the `tracy` feature is enabled and a Tracy client is running, memory
//! segment usage and budget are plotted after every residency change. Without
//! the feature these calls compile to nothing.

use crate::gpu::traits::MemorySegment;

#[cfg(feature = "tracy")]
pub use tracy_client;

/// Plot usage and budget of one segment.
#[cfg(feature = "tracy")]
pub fn plot_segment(segment: MemorySegment, usage: u64, budget: u64) {
    let Some(client) = tracy_client::Client::running() else {
        return;
    };
    match segment {
        MemorySegment::Local => {
            client.plot(tracy_client::plot_name!("residalloc local usage"), usage as f64);
            client.plot(tracy_client::plot_name!("residalloc local budget"), budget as f64);
        }
        MemorySegment::NonLocal => {
            client.plot(tracy_client::plot_name!("residalloc non-local usage"), usage as f64);
            client.plot(tracy_client::plot_name!("residalloc non-local budget"), budget as f64);
        }
    }
}

/// Plot usage and budget of one segment.
#[cfg(not(feature = "tracy"))]
#[inline(always)]
pub fn plot_segment(_segment: MemorySegment, _usage: u64, _budget: u64) {}

/// Mark the end of a submission in the Tracy timeline.
#[cfg(feature = "tracy")]
pub fn submission_mark() {
    if let Some(client) = tracy_client::Client::running() {
        client.frame_mark();
    }
}

/// Mark the end of a submission in the Tracy timeline.
#[cfg(not(feature = "tracy"))]
#[inline(always)]
pub fn submission_mark() {}
