//! Staging memory for CPU to GPU uploads.
//!
//! A list of ring-allocated, persistently mapped staging buffers. Requests
//! go to the first ring with room; when none has room, a new ring of the
//! default chunk size (or larger, for oversized requests) is appended.
//! Regions are reclaimed per ring once the serial they were tagged with
//! completes.

use log::debug;

use super::ring_buffer::RingBufferAllocator;
use crate::api::config::ResidencyConfig;
use crate::core::queue::Queue;
use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::gpu::traits::{GpuAllocError, NativeHandle, StagingBuffer};
use crate::util::layout::align_up;
use crate::util::size::format_bytes;

/// A mapped region of a staging buffer, valid for one upload.
#[derive(Debug)]
pub struct UploadHandle {
    mapped: *mut u8,
    start_offset: u64,
    size: u64,
    staging: NativeHandle,
}

impl UploadHandle {
    /// Staging buffer the region lives in.
    pub fn staging_buffer(&self) -> NativeHandle {
        self.staging
    }

    /// Offset of the region in the staging buffer.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// CPU pointer to the start of the region.
    pub fn mapped_ptr(&self) -> *mut u8 {
        self.mapped
    }

    /// Copy `data` to the start of the region.
    ///
    /// # Panics
    /// If `data` is larger than the region.
    pub fn copy_from_slice(&mut self, data: &[u8]) {
        assert!(
            data.len() as u64 <= self.size,
            "upload of {} bytes into a {} byte region",
            data.len(),
            self.size
        );
        // SAFETY: the region lies inside a live mapping of at least `size`
        // bytes and is not handed out again until its serial completes.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped, data.len());
        }
    }
}

#[derive(Debug)]
struct StagingRing {
    buffer: Option<StagingBuffer>,
    allocator: RingBufferAllocator,
}

/// Ring-buffer pool of staging buffers.
#[derive(Debug)]
pub struct DynamicUploader {
    rings: Vec<StagingRing>,
    released: SerialQueue<StagingBuffer>,
    chunk_size: u64,
    flush_threshold: u64,
    tracked_serial: ExecutionSerial,
    pending_bytes: u64,
}

impl DynamicUploader {
    /// Create an uploader. The first staging buffer is created on first use.
    pub fn new(config: &ResidencyConfig) -> Self {
        let chunk_size = config.upload_chunk_size.max(1);
        Self {
            rings: vec![StagingRing {
                buffer: None,
                allocator: RingBufferAllocator::new(chunk_size),
            }],
            released: SerialQueue::new(),
            chunk_size,
            flush_threshold: config.upload_flush_threshold,
            tracked_serial: ExecutionSerial::ZERO,
            pending_bytes: 0,
        }
    }

    /// Allocate `size` bytes aligned to `alignment` for work in `serial`.
    pub fn allocate(
        &mut self,
        queue: &mut Queue,
        size: u64,
        serial: ExecutionSerial,
        alignment: u64,
    ) -> Result<UploadHandle, GpuAllocError> {
        if size == 0 || !alignment.is_power_of_two() {
            return Err(GpuAllocError::InvalidSize);
        }
        // Over-allocate so the start can be aligned inside the range.
        let request = size
            .checked_add(alignment - 1)
            .ok_or(GpuAllocError::InvalidSize)?;

        let mut found = None;
        for (index, ring) in self.rings.iter_mut().enumerate() {
            if request > ring.allocator.capacity() {
                continue;
            }
            if ring.buffer.is_none() {
                ring.buffer = Some(queue.backend_mut().create_staging_buffer(ring.allocator.capacity())?);
            }
            match ring.allocator.allocate(request, serial) {
                Ok(start) => {
                    found = Some((index, start));
                    break;
                }
                Err(GpuAllocError::OutOfSpace) => continue,
                Err(error) => return Err(error),
            }
        }

        let (index, start) = match found {
            Some(found) => found,
            None => {
                let capacity = self.chunk_size.max(request);
                if request > self.chunk_size {
                    crate::ra_emit!(
                        RA101,
                        "{} requested, chunk size {}",
                        format_bytes(size),
                        format_bytes(self.chunk_size)
                    );
                }
                let buffer = queue.backend_mut().create_staging_buffer(capacity)?;
                let mut allocator = RingBufferAllocator::new(capacity);
                let start = allocator.allocate(request, serial)?;
                debug!(
                    "created staging ring #{} ({})",
                    self.rings.len(),
                    format_bytes(capacity)
                );
                self.rings.push(StagingRing {
                    buffer: Some(buffer),
                    allocator,
                });
                (self.rings.len() - 1, start)
            }
        };

        let buffer = match self.rings[index].buffer.as_ref() {
            Some(buffer) => buffer,
            None => crate::ra_violation!(RA901, "staging ring #{} has no buffer", index),
        };
        let offset = align_up(start, alignment);
        debug_assert!(offset + size <= start + request);
        // SAFETY: `offset + size` lies inside the ring's range, which is no
        // larger than the mapping.
        let mapped = unsafe { buffer.mapped_ptr().add(offset as usize) };

        if serial != self.tracked_serial {
            self.tracked_serial = serial;
            self.pending_bytes = 0;
        }
        self.pending_bytes += request;

        Ok(UploadHandle {
            mapped,
            start_offset: offset,
            size,
            staging: buffer.handle(),
        })
    }

    /// Destroy an out-of-band staging buffer once `serial` completes.
    pub fn release_staging_buffer(&mut self, buffer: StagingBuffer, serial: ExecutionSerial) {
        self.released.enqueue(buffer, serial);
    }

    /// Reclaim every region tagged `<= completed`.
    ///
    /// Empty rings are destroyed, except the last one so a steady stream of
    /// uploads does not recreate buffers every tick.
    pub fn deallocate(&mut self, queue: &mut Queue, completed: ExecutionSerial) {
        for ring in &mut self.rings {
            ring.allocator.deallocate(completed);
        }

        let last = self.rings.len().saturating_sub(1);
        let mut index = 0;
        let mut dropped = Vec::new();
        self.rings.retain_mut(|ring| {
            let keep = index == last || !ring.allocator.is_empty();
            index += 1;
            if !keep {
                dropped.extend(ring.buffer.take());
            }
            keep
        });
        dropped.extend(self.released.drain_up_to(completed));

        for buffer in dropped {
            queue.backend_mut().destroy(buffer.handle());
        }
    }

    /// Whether staging memory used by the recording in flight crossed the
    /// flush threshold.
    pub fn should_flush(&self) -> bool {
        self.pending_bytes >= self.flush_threshold
    }

    /// Bytes allocated for the most recent serial.
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    /// Number of staging rings.
    pub fn ring_count(&self) -> usize {
        self.rings.len()
    }

    /// Destroy every staging buffer. Used during teardown.
    pub fn release_all(&mut self, queue: &mut Queue) {
        let released: Vec<_> = self.released.drain_all().collect();
        let rings = self.rings.drain(..).filter_map(|ring| ring.buffer);
        for buffer in rings.chain(released) {
            queue.backend_mut().destroy(buffer.handle());
        }
        self.pending_bytes = 0;
    }
}
