//! Deferred release queue for cross-thread heap releases.
//!
//! Any thread holding a [`HeapReleaser`] may ask for a heap to be destroyed.
//! The request is queued and processed by the recording thread on its next
//! tick, which then waits for the GPU to finish with the heap before
//! destroying it.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use super::pageable::PageableId;

/// Lock-free queue of heaps to release.
#[derive(Debug, Default)]
pub struct DeferredReleaseQueue {
    queue: SegQueue<PageableId>,
}

impl DeferredReleaseQueue {
    /// Create a new deferred release queue.
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Queue a heap for release.
    pub fn push(&self, heap: PageableId) {
        self.queue.push(heap);
    }

    /// Take every queued release, oldest first.
    pub fn drain(&self) -> Vec<PageableId> {
        let mut heaps = Vec::with_capacity(self.queue.len());
        while let Some(heap) = self.queue.pop() {
            heaps.push(heap);
        }
        heaps
    }

    /// Check if there are pending releases.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get approximate number of pending releases.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Cloneable, `Send + Sync` handle for releasing heaps from any thread.
#[derive(Debug, Clone)]
pub struct HeapReleaser {
    queue: Arc<DeferredReleaseQueue>,
}

impl HeapReleaser {
    pub(crate) fn new(queue: Arc<DeferredReleaseQueue>) -> Self {
        Self { queue }
    }

    /// Ask the owning device to destroy `heap` once the GPU is done with it.
    pub fn release(&self, heap: PageableId) {
        self.queue.push(heap);
    }
}
