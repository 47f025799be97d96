//! Shader-visible descriptor heap with versioned switching.
//!
//! Descriptors are ring-allocated from one "current" heap that stays
//! residency-locked while bound. When it fills up, the heap is switched:
//! below the per-type maximum the replacement is twice as large and the old
//! heap is retired once its last use completes; at the maximum, old heaps go
//! to a pool and are reused once the GPU is done with them.
//!
//! Every switch bumps a [`HeapVersion`]. Descriptors written into a previous
//! heap are not visible through the new one, so an allocation is only usable
//! while its version is current.

use std::collections::VecDeque;

use log::debug;

use super::pageable::PageableId;
use super::residency::ResidencyManager;
use super::ring_buffer::RingBufferAllocator;
use crate::api::config::ResidencyConfig;
use crate::core::queue::Queue;
use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::gpu::traits::{DescriptorHeapInfo, DescriptorHeapType, GpuAllocError, MemorySegment};

/// Monotonic generation of the current shader-visible heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapVersion(u64);

impl HeapVersion {
    /// Get the raw generation.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Descriptors allocated from the current shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHeapAllocation {
    base_cpu: u64,
    base_gpu: u64,
    last_usage: ExecutionSerial,
    heap_version: HeapVersion,
}

impl GpuDescriptorHeapAllocation {
    /// CPU handle of the first descriptor.
    pub fn base_cpu_handle(&self) -> u64 {
        self.base_cpu
    }

    /// GPU handle of the first descriptor.
    pub fn base_gpu_handle(&self) -> u64 {
        self.base_gpu
    }

    /// Serial of the recording that allocated the descriptors.
    pub fn last_usage_serial(&self) -> ExecutionSerial {
        self.last_usage
    }

    /// Heap version the descriptors were written into.
    pub fn heap_version(&self) -> HeapVersion {
        self.heap_version
    }
}

#[derive(Debug)]
struct ShaderVisibleHeap {
    pageable: PageableId,
    info: DescriptorHeapInfo,
    descriptor_count: u32,
}

/// Shader-visible descriptor allocator for one heap type.
#[derive(Debug)]
pub struct ShaderVisibleDescriptorAllocator {
    heap_type: DescriptorHeapType,
    size_increment: u32,
    heap: Option<ShaderVisibleHeap>,
    allocator: RingBufferAllocator,
    heap_version: HeapVersion,
    descriptor_count: u32,
    max_descriptor_count: u32,
    growth_factor: u32,
    pool: VecDeque<(ExecutionSerial, ShaderVisibleHeap)>,
    retired: SerialQueue<ShaderVisibleHeap>,
}

impl ShaderVisibleDescriptorAllocator {
    /// Create the allocator and its first heap.
    pub fn create(
        queue: &mut Queue,
        residency: &mut ResidencyManager,
        heap_type: DescriptorHeapType,
        config: &ResidencyConfig,
    ) -> Result<Self, GpuAllocError> {
        crate::ra_invariant!(heap_type.can_be_shader_visible(), RA202, "{:?}", heap_type);
        let (min, max) = config.shader_visible_heap_sizes(heap_type);
        let mut allocator = Self {
            heap_type,
            size_increment: queue.backend().descriptor_size_increment(heap_type),
            heap: None,
            allocator: RingBufferAllocator::new(0),
            heap_version: HeapVersion::default(),
            descriptor_count: min.max(1),
            max_descriptor_count: max.max(min).max(1),
            growth_factor: config.shader_visible_growth_factor.max(2),
            pool: VecDeque::new(),
            retired: SerialQueue::new(),
        };
        allocator.allocate_and_switch_shader_visible_heap(queue, residency)?;
        Ok(allocator)
    }

    /// Allocate `count` descriptors for use in `pending_serial`.
    ///
    /// Returns `None` when the current heap is full; the caller switches heaps
    /// and retries.
    pub fn allocate_gpu_descriptors(
        &mut self,
        count: u32,
        pending_serial: ExecutionSerial,
    ) -> Option<GpuDescriptorHeapAllocation> {
        let heap = self.heap.as_ref()?;
        let start = self.allocator.allocate(u64::from(count), pending_serial).ok()?;
        let offset = start * u64::from(self.size_increment);
        Some(GpuDescriptorHeapAllocation {
            base_cpu: heap.info.cpu_start + offset,
            base_gpu: heap.info.gpu_start + offset,
            last_usage: pending_serial,
            heap_version: self.heap_version,
        })
    }

    /// Replace the current heap with a grown, pooled or fresh one.
    pub fn allocate_and_switch_shader_visible_heap(
        &mut self,
        queue: &mut Queue,
        residency: &mut ResidencyManager,
    ) -> Result<(), GpuAllocError> {
        let pending = queue.pending_serial();
        let completed = queue.completed_serial();

        if let Some(old) = self.heap.take() {
            residency.unlock_allocation(old.pageable);
            if self.descriptor_count < self.max_descriptor_count {
                self.retired.enqueue(old, pending);
                self.descriptor_count = self
                    .descriptor_count
                    .saturating_mul(self.growth_factor)
                    .min(self.max_descriptor_count);
            } else {
                self.pool.push_back((pending, old));
            }
        }

        let reusable = self.descriptor_count >= self.max_descriptor_count
            && self.pool.front().map_or(false, |(serial, _)| *serial <= completed);
        let heap = match self.pool.pop_front() {
            Some((_, heap)) if reusable => heap,
            Some(entry) => {
                self.pool.push_front(entry);
                self.create_heap(queue, residency)?
            }
            None => self.create_heap(queue, residency)?,
        };

        if let Err(error) = residency.lock_allocation(queue, heap.pageable) {
            // Only max-size heaps are ever taken back out of the pool.
            if heap.descriptor_count < self.max_descriptor_count {
                self.retired.enqueue(heap, pending);
            } else {
                self.pool.push_front((completed, heap));
            }
            return Err(error);
        }

        self.allocator = RingBufferAllocator::new(u64::from(heap.descriptor_count));
        self.heap = Some(heap);
        self.heap_version.0 += 1;
        debug!(
            "switched {:?} shader-visible heap to version {} ({} descriptors)",
            self.heap_type, self.heap_version.0, self.descriptor_count
        );
        Ok(())
    }

    /// Whether descriptors written for `allocation` are still in place.
    pub fn is_allocation_still_valid(
        &self,
        allocation: &GpuDescriptorHeapAllocation,
        completed: ExecutionSerial,
    ) -> bool {
        allocation.last_usage > completed && allocation.heap_version == self.heap_version
    }

    /// Reclaim ring space and destroy retired heaps whose last use completed.
    pub fn tick(&mut self, queue: &mut Queue, residency: &mut ResidencyManager) {
        let completed = queue.completed_serial();
        self.allocator.deallocate(completed);
        let retired: Vec<_> = self.retired.drain_up_to(completed).collect();
        for heap in retired {
            residency.destroy_pageable(queue, heap.pageable);
        }
    }

    /// Pageable of the current heap, for residency tracking of recordings.
    pub fn current_heap(&self) -> Option<PageableId> {
        self.heap.as_ref().map(|heap| heap.pageable)
    }

    /// Current heap version.
    pub fn heap_version(&self) -> HeapVersion {
        self.heap_version
    }

    /// Descriptors in the heaps currently being created.
    pub fn descriptor_count_for_testing(&self) -> u32 {
        self.descriptor_count
    }

    /// Number of heaps waiting in the reuse pool.
    pub fn pool_size_for_testing(&self) -> usize {
        self.pool.len()
    }

    /// Destroy every heap. Used during teardown.
    pub fn release_all(&mut self, queue: &mut Queue, residency: &mut ResidencyManager) {
        let retired: Vec<_> = self.retired.drain_all().collect();
        let pooled = self.pool.drain(..).map(|(_, heap)| heap);
        for heap in self.heap.take().into_iter().chain(pooled).chain(retired) {
            residency.destroy_pageable(queue, heap.pageable);
        }
    }

    fn create_heap(
        &mut self,
        queue: &mut Queue,
        residency: &mut ResidencyManager,
    ) -> Result<ShaderVisibleHeap, GpuAllocError> {
        let count = self.descriptor_count;
        let size = u64::from(self.size_increment) * u64::from(count);
        residency.ensure_can_allocate(queue, size, MemorySegment::Local)?;
        let info = queue
            .backend_mut()
            .create_descriptor_heap(self.heap_type, count, true)?;
        let pageable = residency.register_pageable(info.handle, MemorySegment::Local, size);
        residency.track_resident_allocation(pageable);
        debug!(
            "created {:?} shader-visible heap with {} descriptors",
            self.heap_type, count
        );
        Ok(ShaderVisibleHeap {
            pageable,
            info,
            descriptor_count: count,
        })
    }
}
