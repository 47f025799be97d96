//! Pooled CPU-only descriptor heaps.
//!
//! One pool per heap type. Each heap keeps a sorted free list of descriptor
//! ranges; allocation takes the first range that fits in the first heap that
//! has one, otherwise a new heap is appended. Heap sizes grow geometrically.
//! Freed ranges only return to the free list once the serial they were last
//! used in has completed.

use std::ops::Range;

use log::debug;

use crate::api::config::ResidencyConfig;
use crate::core::queue::Queue;
use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::gpu::traits::{DescriptorHeapInfo, DescriptorHeapType, GpuAllocError};

/// A contiguous range of descriptors in a CPU-only heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapHandle {
    heap_type: DescriptorHeapType,
    heap_index: u32,
    cpu_base: u64,
    size_increment: u32,
    offset: u32,
    count: u32,
}

impl DescriptorHeapHandle {
    /// CPU handle of the `index`-th descriptor in the range.
    pub fn cpu_handle(&self, index: u32) -> u64 {
        debug_assert!(index < self.count, "descriptor index out of range");
        self.cpu_base + u64::from(self.offset + index) * u64::from(self.size_increment)
    }

    /// Heap type the range was allocated from.
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    /// Index of the heap within its pool.
    pub fn heap_index(&self) -> u32 {
        self.heap_index
    }

    /// First descriptor of the range within its heap.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of descriptors in the range.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Byte stride between descriptors.
    pub fn size_increment(&self) -> u32 {
        self.size_increment
    }
}

#[derive(Debug)]
struct CpuHeap {
    info: DescriptorHeapInfo,
    capacity: u32,
    free: Vec<Range<u32>>,
}

impl CpuHeap {
    fn remaining(&self) -> u32 {
        self.free.iter().map(|range| range.end - range.start).sum()
    }

    fn take(&mut self, count: u32) -> Option<u32> {
        let position = self
            .free
            .iter()
            .position(|range| range.end - range.start >= count)?;
        let range = &mut self.free[position];
        let start = range.start;
        range.start += count;
        if range.start == range.end {
            self.free.remove(position);
        }
        Some(start)
    }

    /// Return a range, coalescing with neighbours. `false` if it overlaps a
    /// range that is already free.
    fn give_back(&mut self, range: Range<u32>) -> bool {
        let position = self.free.partition_point(|free| free.start < range.start);
        if position > 0 && self.free[position - 1].end > range.start {
            return false;
        }
        if position < self.free.len() && range.end > self.free[position].start {
            return false;
        }

        let merges_prev = position > 0 && self.free[position - 1].end == range.start;
        let merges_next = position < self.free.len() && self.free[position].start == range.end;
        match (merges_prev, merges_next) {
            (true, true) => {
                let next_end = self.free.remove(position).end;
                self.free[position - 1].end = next_end;
            }
            (true, false) => self.free[position - 1].end = range.end,
            (false, true) => self.free[position].start = range.start,
            (false, false) => self.free.insert(position, range),
        }
        true
    }
}

#[derive(Debug)]
struct HeapPool {
    heaps: Vec<CpuHeap>,
    size_increment: u32,
    next_heap_size: u32,
}

/// CPU-only descriptor heap pools, one per heap type.
#[derive(Debug)]
pub struct DescriptorHeapAllocator {
    pools: [HeapPool; 4],
    pending_frees: SerialQueue<DescriptorHeapHandle>,
    max_heap_size: u32,
}

impl DescriptorHeapAllocator {
    /// Create empty pools. No heap is created until the first allocation.
    pub fn new(config: &ResidencyConfig, queue: &Queue) -> Self {
        let pool = |heap_type: DescriptorHeapType| HeapPool {
            heaps: Vec::new(),
            size_increment: queue.backend().descriptor_size_increment(heap_type),
            next_heap_size: config.cpu_descriptor_heap_initial_size.max(1),
        };
        Self {
            pools: DescriptorHeapType::ALL.map(pool),
            pending_frees: SerialQueue::new(),
            max_heap_size: config
                .cpu_descriptor_heap_max_size
                .max(config.cpu_descriptor_heap_initial_size),
        }
    }

    /// Allocate `count` contiguous descriptors of `heap_type`.
    pub fn allocate(
        &mut self,
        queue: &mut Queue,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> Result<DescriptorHeapHandle, GpuAllocError> {
        if count == 0 {
            return Err(GpuAllocError::InvalidSize);
        }
        let max_heap_size = self.max_heap_size;
        let pool = &mut self.pools[heap_type.index()];

        for (index, heap) in pool.heaps.iter_mut().enumerate() {
            if heap.remaining() < count {
                continue;
            }
            if let Some(offset) = heap.take(count) {
                return Ok(DescriptorHeapHandle {
                    heap_type,
                    heap_index: index as u32,
                    cpu_base: heap.info.cpu_start,
                    size_increment: pool.size_increment,
                    offset,
                    count,
                });
            }
        }

        let capacity = pool.next_heap_size.max(count);
        let info = queue
            .backend_mut()
            .create_descriptor_heap(heap_type, capacity, false)?;
        pool.next_heap_size = pool.next_heap_size.saturating_mul(2).min(max_heap_size);
        debug!(
            "created {:?} CPU descriptor heap #{} with {} descriptors",
            heap_type,
            pool.heaps.len(),
            capacity
        );

        let mut heap = CpuHeap {
            info,
            capacity,
            free: vec![0..capacity],
        };
        let offset = heap.take(count).ok_or(GpuAllocError::OutOfSpace)?;
        let heap_index = pool.heaps.len() as u32;
        pool.heaps.push(heap);

        Ok(DescriptorHeapHandle {
            heap_type,
            heap_index,
            cpu_base: info.cpu_start,
            size_increment: pool.size_increment,
            offset,
            count,
        })
    }

    /// Free a range once `serial` has completed.
    pub fn deallocate(&mut self, handle: DescriptorHeapHandle, serial: ExecutionSerial) {
        self.pending_frees.enqueue(handle, serial);
    }

    /// Return every range whose serial has completed to its heap.
    pub fn tick(&mut self, completed: ExecutionSerial) {
        let ready: Vec<_> = self.pending_frees.drain_up_to(completed).collect();
        for handle in ready {
            self.release(handle);
        }
    }

    /// Number of heaps in a pool.
    pub fn heap_count(&self, heap_type: DescriptorHeapType) -> usize {
        self.pools[heap_type.index()].heaps.len()
    }

    /// Free descriptors across a pool.
    pub fn remaining_capacity(&self, heap_type: DescriptorHeapType) -> u32 {
        self.pools[heap_type.index()]
            .heaps
            .iter()
            .map(CpuHeap::remaining)
            .sum()
    }

    /// Destroy every heap, regardless of pending frees.
    pub fn release_all(&mut self, queue: &mut Queue) {
        self.pending_frees.clear();
        for pool in &mut self.pools {
            for heap in pool.heaps.drain(..) {
                queue.backend_mut().destroy(heap.info.handle);
            }
        }
    }

    fn release(&mut self, handle: DescriptorHeapHandle) {
        let pool = &mut self.pools[handle.heap_type.index()];
        let heap = match pool.heaps.get_mut(handle.heap_index as usize) {
            Some(heap) => heap,
            None => crate::ra_violation!(RA901, "descriptor heap #{} does not exist", handle.heap_index),
        };
        let range = handle.offset..handle.offset + handle.count;
        crate::ra_invariant!(
            range.end <= heap.capacity && heap.give_back(range.clone()),
            RA201,
            "{:?} heap #{} range {:?}",
            handle.heap_type,
            handle.heap_index,
            range
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::DummyBackend;

    fn setup() -> (Queue, DescriptorHeapAllocator) {
        let queue = Queue::new(Box::new(DummyBackend::new()));
        let config = ResidencyConfig::default();
        let allocator = DescriptorHeapAllocator::new(&config, &queue);
        (queue, allocator)
    }

    #[test]
    fn test_ranges_never_overlap() {
        let (mut queue, mut allocator) = setup();
        let mut taken: Vec<(u32, Range<u32>)> = Vec::new();
        for count in [1, 7, 16, 3, 40, 64, 2] {
            let handle = allocator
                .allocate(&mut queue, DescriptorHeapType::CbvSrvUav, count)
                .unwrap();
            let range = handle.offset()..handle.offset() + handle.count();
            for (heap, other) in &taken {
                if *heap == handle.heap_index() {
                    assert!(range.end <= other.start || other.end <= range.start);
                }
            }
            taken.push((handle.heap_index(), range));
        }
        assert!(allocator.heap_count(DescriptorHeapType::CbvSrvUav) >= 2);
    }

    #[test]
    fn test_new_heap_fits_oversized_request() {
        let (mut queue, mut allocator) = setup();
        let handle = allocator
            .allocate(&mut queue, DescriptorHeapType::Rtv, 1000)
            .unwrap();
        assert_eq!(handle.offset(), 0);
        assert_eq!(allocator.heap_count(DescriptorHeapType::Rtv), 1);
        assert_eq!(allocator.remaining_capacity(DescriptorHeapType::Rtv), 0);
    }

    #[test]
    fn test_cpu_handle_stride() {
        let (mut queue, mut allocator) = setup();
        allocator.allocate(&mut queue, DescriptorHeapType::Sampler, 4).unwrap();
        let handle = allocator.allocate(&mut queue, DescriptorHeapType::Sampler, 2).unwrap();
        let stride = u64::from(handle.size_increment());
        assert_eq!(handle.cpu_handle(1) - handle.cpu_handle(0), stride);
        assert_eq!(handle.cpu_handle(0) - 4 * stride, handle.cpu_base);
    }

    #[test]
    fn test_free_is_deferred_until_serial_completes() {
        let (mut queue, mut allocator) = setup();
        let first = allocator.allocate(&mut queue, DescriptorHeapType::Dsv, 64).unwrap();
        allocator.deallocate(first, ExecutionSerial::new(3));

        allocator.tick(ExecutionSerial::new(2));
        assert_eq!(allocator.remaining_capacity(DescriptorHeapType::Dsv), 0);

        allocator.tick(ExecutionSerial::new(3));
        assert_eq!(allocator.remaining_capacity(DescriptorHeapType::Dsv), 64);
        let again = allocator.allocate(&mut queue, DescriptorHeapType::Dsv, 64).unwrap();
        assert_eq!(again.heap_index(), first.heap_index());
        assert_eq!(again.offset(), 0);
    }

    #[test]
    fn test_freed_ranges_coalesce() {
        let (mut queue, mut allocator) = setup();
        let handles: Vec<_> = (0..4)
            .map(|_| allocator.allocate(&mut queue, DescriptorHeapType::Rtv, 16).unwrap())
            .collect();
        for handle in [handles[1], handles[3], handles[2], handles[0]] {
            allocator.deallocate(handle, ExecutionSerial::new(1));
        }
        allocator.tick(ExecutionSerial::new(1));

        let whole = allocator.allocate(&mut queue, DescriptorHeapType::Rtv, 64).unwrap();
        assert_eq!(whole.offset(), 0);
        assert_eq!(allocator.heap_count(DescriptorHeapType::Rtv), 1);
    }

    #[test]
    #[should_panic(expected = "RA201")]
    fn test_double_free_panics() {
        let (mut queue, mut allocator) = setup();
        let handle = allocator.allocate(&mut queue, DescriptorHeapType::CbvSrvUav, 8).unwrap();
        allocator.deallocate(handle, ExecutionSerial::new(1));
        allocator.deallocate(handle, ExecutionSerial::new(1));
        allocator.tick(ExecutionSerial::new(1));
    }
}
