//! Circular byte-range sub-allocator with serial-tagged reclamation.
//!
//! Allocations are handed out in order from `used_end` and reclaimed in the
//! same order from `used_start` once the serial they were tagged with
//! completes. An allocation never straddles the end of the buffer: when the
//! tail is too short, the tail bytes are counted as used by that request and
//! the allocation restarts at offset 0.

use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::gpu::traits::GpuAllocError;

#[derive(Debug, Clone, Copy)]
struct Request {
    end_offset: u64,
    size: u64,
}

/// Ring allocator over `[0, capacity)`.
#[derive(Debug)]
pub struct RingBufferAllocator {
    capacity: u64,
    used_start: u64,
    used_end: u64,
    used_size: u64,
    in_flight: SerialQueue<Request>,
}

impl RingBufferAllocator {
    /// Create an allocator managing `capacity` units.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used_start: 0,
            used_end: 0,
            used_size: 0,
            in_flight: SerialQueue::new(),
        }
    }

    /// Allocate `size` contiguous units, reclaimable once `serial` completes.
    ///
    /// Returns the start offset, or `OutOfSpace` if no contiguous range is free.
    pub fn allocate(&mut self, size: u64, serial: ExecutionSerial) -> Result<u64, GpuAllocError> {
        if size == 0 {
            return Err(GpuAllocError::InvalidSize);
        }
        if size > self.capacity || self.used_size >= self.capacity {
            return Err(GpuAllocError::OutOfSpace);
        }
        if size > self.capacity - self.used_size {
            return Err(GpuAllocError::OutOfSpace);
        }

        let (start, request_size) = if self.used_start <= self.used_end {
            if self.used_end + size <= self.capacity {
                (self.used_end, size)
            } else if size <= self.used_start {
                // Wrap: the unused tail is charged to this request.
                (0, (self.capacity - self.used_end) + size)
            } else {
                return Err(GpuAllocError::OutOfSpace);
            }
        } else if self.used_end + size <= self.used_start {
            (self.used_end, size)
        } else {
            return Err(GpuAllocError::OutOfSpace);
        };

        self.used_end = start + size;
        self.used_size += request_size;
        self.in_flight.enqueue(
            Request {
                end_offset: self.used_end,
                size: request_size,
            },
            serial,
        );
        Ok(start)
    }

    /// Reclaim every request tagged `<= completed`, oldest first.
    pub fn deallocate(&mut self, completed: ExecutionSerial) {
        for request in self.in_flight.drain_up_to(completed) {
            self.used_start = request.end_offset;
            self.used_size -= request.size;
        }
        if self.used_size == 0 {
            self.used_start = 0;
            self.used_end = 0;
        }
    }

    /// Total units managed.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Units currently in use, including wasted tails.
    pub fn used_size(&self) -> u64 {
        self.used_size
    }

    /// Check if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Check if every unit is in use.
    pub fn is_full(&self) -> bool {
        self.used_size >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(value: u64) -> ExecutionSerial {
        ExecutionSerial::new(value)
    }

    #[test]
    fn test_basic_sequential() {
        let mut ring = RingBufferAllocator::new(64);
        assert_eq!(ring.allocate(16, serial(1)).unwrap(), 0);
        assert_eq!(ring.allocate(16, serial(1)).unwrap(), 16);
        assert_eq!(ring.allocate(32, serial(2)).unwrap(), 32);
        assert!(ring.is_full());
        assert_eq!(ring.allocate(1, serial(3)), Err(GpuAllocError::OutOfSpace));

        ring.deallocate(serial(1));
        assert_eq!(ring.used_size(), 32);
        ring.deallocate(serial(2));
        assert!(ring.is_empty());
        assert_eq!(ring.used_size(), 0);
    }

    #[test]
    fn test_oversized_request_always_fails() {
        let mut ring = RingBufferAllocator::new(64);
        assert_eq!(ring.allocate(65, serial(1)), Err(GpuAllocError::OutOfSpace));
        assert_eq!(ring.allocate(0, serial(1)), Err(GpuAllocError::InvalidSize));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wrap_counts_tail_and_never_straddles() {
        let mut ring = RingBufferAllocator::new(64);
        ring.allocate(24, serial(1)).unwrap();
        ring.allocate(24, serial(2)).unwrap();
        ring.deallocate(serial(1));

        // 16 bytes left at the tail, 24 free at the head.
        assert_eq!(ring.allocate(20, serial(3)).unwrap(), 0);
        assert_eq!(ring.used_size(), 24 + 16 + 20);

        // Head region [20, 24) is too small, tail is charged.
        assert_eq!(ring.allocate(8, serial(3)), Err(GpuAllocError::OutOfSpace));
        assert_eq!(ring.allocate(4, serial(3)).unwrap(), 20);

        ring.deallocate(serial(2));
        assert_eq!(ring.used_size(), 40);
        ring.deallocate(serial(3));
        assert_eq!(ring.used_size(), 0);
        assert_eq!(ring.allocate(64, serial(4)).unwrap(), 0);
    }

    #[test]
    fn test_live_ranges_never_overlap() {
        let capacity = 1000;
        let mut ring = RingBufferAllocator::new(capacity);
        let mut live: Vec<(u64, u64, u64)> = Vec::new();
        let mut rng = 0x2545_f491_4f6c_dd1du64;
        let mut next = || {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            rng
        };

        let mut current = 1u64;
        for _ in 0..2000 {
            match next() % 4 {
                0 => {
                    current += 1;
                }
                1 => {
                    let completed = current.saturating_sub(next() % 3 + 1);
                    ring.deallocate(serial(completed));
                    live.retain(|(_, _, s)| *s > completed);
                }
                _ => {
                    let size = next() % 200 + 1;
                    if let Ok(offset) = ring.allocate(size, serial(current)) {
                        assert!(offset + size <= capacity);
                        for (start, len, _) in &live {
                            assert!(offset + size <= *start || start + len <= offset);
                        }
                        live.push((offset, size, current));
                    }
                }
            }
            let live_bytes: u64 = live.iter().map(|(_, len, _)| len).sum();
            assert!(live_bytes <= ring.used_size());
            assert!(ring.used_size() <= capacity);
        }
    }
}
