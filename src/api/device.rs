//! The device facade tying the allocators to one submission queue.

use std::sync::Arc;

use log::{debug, warn};

use crate::allocators::copy_split::BufferTextureCopy;
use crate::allocators::deferred::{DeferredReleaseQueue, HeapReleaser};
use crate::allocators::descriptor_heap::{DescriptorHeapAllocator, DescriptorHeapHandle};
use crate::allocators::pageable::PageableId;
use crate::allocators::residency::{MemorySegmentInfo, ResidencyManager};
use crate::allocators::shader_visible::{GpuDescriptorHeapAllocation, ShaderVisibleDescriptorAllocator};
use crate::allocators::uploader::{DynamicUploader, UploadHandle};
use crate::api::config::ResidencyConfig;
use crate::api::recording_context::CommandRecordingContext;
use crate::core::queue::Queue;
use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::diagnostics::{self, tracy};
use crate::gpu::traits::{DescriptorHeapType, GpuAllocError, GpuBackend, MemorySegment};
use crate::sync::mutex::{Mutex, MutexGuard};

/// A GPU device's allocator surface.
///
/// Owns the queue and every allocator, and drives them from [`tick`]. All
/// methods take `&mut self`: the allocator state is mutated by one
/// recording thread at a time. Use [`SharedDevice`] to share it.
///
/// # Example
///
/// ```rust
/// use residalloc::{Device, DummyBackend, ResidencyConfig};
///
/// let gpu = DummyBackend::new().with_auto_complete();
/// let mut device = Device::new(Box::new(gpu.clone()), ResidencyConfig::for_testing()).unwrap();
///
/// let mut upload = device.upload(&[1, 2, 3, 4], 4).unwrap();
/// upload.copy_from_slice(&[5, 6, 7, 8]);
/// device.pending_commands().unwrap().set_needs_submit();
/// device.tick().unwrap();
///
/// device.destroy();
/// assert_eq!(gpu.live_object_count(), 0);
/// ```
///
/// [`tick`]: Device::tick
pub struct Device {
    queue: Queue,
    residency: ResidencyManager,
    cpu_descriptors: DescriptorHeapAllocator,
    view_descriptors: ShaderVisibleDescriptorAllocator,
    sampler_descriptors: ShaderVisibleDescriptorAllocator,
    uploader: DynamicUploader,
    recording: CommandRecordingContext,
    releases: Arc<DeferredReleaseQueue>,
    pending_heap_releases: SerialQueue<PageableId>,
    destroyed: bool,
}

impl Device {
    /// Create the allocators on top of `backend`.
    ///
    /// Strict mode is picked up from `RESIDALLOC_STRICT` here.
    pub fn new(backend: Box<dyn GpuBackend>, config: ResidencyConfig) -> Result<Self, GpuAllocError> {
        diagnostics::init_from_env();

        let mut queue = Queue::new(backend);
        let mut residency = ResidencyManager::new(&config, &queue);
        let view_descriptors = ShaderVisibleDescriptorAllocator::create(
            &mut queue,
            &mut residency,
            DescriptorHeapType::CbvSrvUav,
            &config,
        )?;
        let sampler_descriptors = ShaderVisibleDescriptorAllocator::create(
            &mut queue,
            &mut residency,
            DescriptorHeapType::Sampler,
            &config,
        )?;

        Ok(Self {
            cpu_descriptors: DescriptorHeapAllocator::new(&config, &queue),
            uploader: DynamicUploader::new(&config),
            recording: CommandRecordingContext::new(),
            releases: Arc::new(DeferredReleaseQueue::new()),
            pending_heap_releases: SerialQueue::new(),
            destroyed: false,
            queue,
            residency,
            view_descriptors,
            sampler_descriptors,
        })
    }

    /// Age out completed work and submit the pending recording if dirty.
    pub fn tick(&mut self) -> Result<(), GpuAllocError> {
        let completed = self.queue.check_passed_serials()?;
        self.residency.update_video_memory_info(&self.queue);

        self.uploader.deallocate(&mut self.queue, completed);
        self.cpu_descriptors.tick(completed);
        self.view_descriptors.tick(&mut self.queue, &mut self.residency);
        self.sampler_descriptors.tick(&mut self.queue, &mut self.residency);
        self.recording.tick(&mut self.queue, completed);

        let pending = self.queue.pending_serial();
        for heap in self.releases.drain() {
            self.pending_heap_releases.enqueue(heap, pending);
        }
        let released: Vec<_> = self.pending_heap_releases.drain_up_to(completed).collect();
        for heap in released {
            self.residency.destroy_pageable(&mut self.queue, heap);
        }

        if self.recording.needs_submit() {
            self.submit_pending_commands()?;
        }
        Ok(())
    }

    /// Submit the pending recording and signal its serial.
    pub fn submit_pending_commands(&mut self) -> Result<ExecutionSerial, GpuAllocError> {
        self.recording
            .execute_command_list(&mut self.queue, &mut self.residency)?;
        let serial = self.queue.next_serial()?;
        tracy::submission_mark();
        debug!("submitted {}", serial);
        Ok(serial)
    }

    /// The recording context, with a command list open.
    pub fn pending_commands(&mut self) -> Result<&mut CommandRecordingContext, GpuAllocError> {
        self.recording.open(&mut self.queue)?;
        Ok(&mut self.recording)
    }

    /// Serial that work recorded now will complete with.
    pub fn pending_serial(&self) -> ExecutionSerial {
        self.queue.pending_serial()
    }

    /// Last serial known to have completed.
    pub fn completed_serial(&self) -> ExecutionSerial {
        self.queue.completed_serial()
    }

    /// Create a resident heap, evicting others to make room.
    pub fn create_heap(&mut self, size: u64, segment: MemorySegment) -> Result<PageableId, GpuAllocError> {
        self.residency.create_heap(&mut self.queue, size, segment)
    }

    /// Destroy a heap once the GPU is done with every recording so far.
    pub fn release_heap(&mut self, heap: PageableId) {
        self.pending_heap_releases.enqueue(heap, self.queue.pending_serial());
    }

    /// A handle other threads can use to release heaps.
    pub fn heap_releaser(&self) -> HeapReleaser {
        HeapReleaser::new(Arc::clone(&self.releases))
    }

    /// Mark a heap as used by the pending recording.
    pub fn track_heap_usage(&mut self, heap: PageableId) {
        let serial = self.queue.pending_serial();
        self.recording.track_heap_usage(&mut self.residency, heap, serial);
    }

    /// Pin a heap resident while the CPU maps it.
    pub fn lock_for_mapping(&mut self, heap: PageableId) -> Result<(), GpuAllocError> {
        self.residency.lock_allocation(&mut self.queue, heap)
    }

    /// Release a mapping lock taken with [`lock_for_mapping`](Self::lock_for_mapping).
    pub fn unlock_after_mapping(&mut self, heap: PageableId) {
        self.residency.unlock_allocation(heap);
    }

    /// Stage `data` for upload by the pending recording.
    ///
    /// When the staging memory of the pending recording crossed the flush
    /// threshold, the recording is submitted first.
    pub fn upload(&mut self, data: &[u8], alignment: u64) -> Result<UploadHandle, GpuAllocError> {
        if self.uploader.should_flush() && self.recording.needs_submit() {
            crate::ra_emit!(RA102, "{} bytes staged", self.uploader.pending_bytes());
            self.submit_pending_commands()?;
        }
        let serial = self.queue.pending_serial();
        let mut handle = self
            .uploader
            .allocate(&mut self.queue, data.len() as u64, serial, alignment)?;
        handle.copy_from_slice(data);
        Ok(handle)
    }

    /// Record a buffer/texture copy into the pending recording.
    pub fn copy_buffer_to_texture(&mut self, copy: &BufferTextureCopy) -> Result<(), GpuAllocError> {
        self.recording.record_buffer_texture_copy(&mut self.queue, copy)
    }

    /// Allocate CPU-only descriptors.
    pub fn allocate_cpu_descriptors(
        &mut self,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> Result<DescriptorHeapHandle, GpuAllocError> {
        self.cpu_descriptors.allocate(&mut self.queue, heap_type, count)
    }

    /// Free CPU-only descriptors once the pending recording completes.
    pub fn free_cpu_descriptors(&mut self, handle: DescriptorHeapHandle) {
        let serial = self.queue.pending_serial();
        self.cpu_descriptors.deallocate(handle, serial);
    }

    /// Allocate shader-visible descriptors for the pending recording.
    ///
    /// Switches to a new heap when the current one is full. If no heap can be
    /// created, pending work is submitted so pooled heaps can be recycled, and
    /// the switch is retried once.
    pub fn allocate_gpu_descriptors(
        &mut self,
        heap_type: DescriptorHeapType,
        count: u32,
    ) -> Result<GpuDescriptorHeapAllocation, GpuAllocError> {
        if count == 0 {
            return Err(GpuAllocError::InvalidSize);
        }
        let serial = self.queue.pending_serial();
        if let Some(allocation) = self.shader_visible(heap_type).allocate_gpu_descriptors(count, serial) {
            self.track_current_descriptor_heap(heap_type);
            return Ok(allocation);
        }

        if let Err(error) = self.switch_shader_visible_heap(heap_type) {
            if error != GpuAllocError::OutOfMemory {
                return Err(error);
            }
            crate::ra_emit!(RA203, "{:?} heap, {} descriptors", heap_type, count);
            self.submit_pending_commands()?;
            self.queue.check_passed_serials()?;
            self.switch_shader_visible_heap(heap_type)?;
        }

        let serial = self.queue.pending_serial();
        let allocation = self
            .shader_visible(heap_type)
            .allocate_gpu_descriptors(count, serial)
            .ok_or(GpuAllocError::OutOfSpace)?;
        self.track_current_descriptor_heap(heap_type);
        Ok(allocation)
    }

    /// Whether descriptors written for `allocation` are still in place.
    pub fn is_descriptor_allocation_valid(
        &self,
        heap_type: DescriptorHeapType,
        allocation: &GpuDescriptorHeapAllocation,
    ) -> bool {
        self.shader_visible_allocator(heap_type)
            .is_allocation_still_valid(allocation, self.queue.completed_serial())
    }

    /// Reserve budget for memory the allocators do not track.
    pub fn set_external_memory_reservation(&mut self, segment: MemorySegment, bytes: u64) -> u64 {
        self.residency
            .set_external_memory_reservation(&self.queue, segment, bytes)
    }

    /// Budget and usage of a memory segment.
    pub fn segment_info(&self, segment: MemorySegment) -> MemorySegmentInfo {
        self.residency.segment_info(segment)
    }

    /// The residency manager, for inspection.
    pub fn residency(&self) -> &ResidencyManager {
        &self.residency
    }

    /// The shader-visible allocator of a heap type, for inspection.
    pub fn shader_visible_allocator(&self, heap_type: DescriptorHeapType) -> &ShaderVisibleDescriptorAllocator {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => &self.view_descriptors,
            DescriptorHeapType::Sampler => &self.sampler_descriptors,
            other => crate::ra_violation!(RA202, "{:?}", other),
        }
    }

    /// Pin every segment's budget to its current usage plus `cap`.
    pub fn restrict_budget_for_testing(&mut self, cap: u64) {
        self.residency.restrict_budget_for_testing(&self.queue, cap);
    }

    /// Block until all submitted work has completed.
    pub fn wait_for_idle(&mut self) -> Result<(), GpuAllocError> {
        self.queue.wait_for_idle()
    }

    /// Whether the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.queue.is_lost()
    }

    /// Treat the device as lost: no more waits or submissions.
    pub fn lose(&mut self) {
        self.queue.set_lost();
    }

    /// Release every GPU object.
    ///
    /// Pending work is submitted and waited for unless the device is lost; a
    /// lost device releases everything without waiting. Calling it again is a
    /// no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        if !self.queue.is_lost() {
            let flushed = if self.recording.needs_submit() {
                self.submit_pending_commands().map(|_| ())
            } else {
                Ok(())
            };
            if let Err(error) = flushed.and_then(|()| self.queue.wait_for_idle()) {
                warn!("device teardown could not wait for the GPU: {}", error);
                self.queue.set_lost();
            }
        }
        if self.queue.is_lost() {
            crate::ra_emit!(
                RA501,
                "last submitted {}, completed {}",
                self.queue.last_submitted_serial(),
                self.queue.completed_serial()
            );
        }

        self.recording.release_all(&mut self.queue);
        self.uploader.release_all(&mut self.queue);
        self.cpu_descriptors.release_all(&mut self.queue);
        self.view_descriptors.release_all(&mut self.queue, &mut self.residency);
        self.sampler_descriptors.release_all(&mut self.queue, &mut self.residency);
        self.pending_heap_releases.clear();
        self.releases.drain();
        self.residency.release_all(&mut self.queue);
        debug!("device destroyed");
    }

    fn shader_visible(&mut self, heap_type: DescriptorHeapType) -> &mut ShaderVisibleDescriptorAllocator {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => &mut self.view_descriptors,
            DescriptorHeapType::Sampler => &mut self.sampler_descriptors,
            other => crate::ra_violation!(RA202, "{:?}", other),
        }
    }

    fn switch_shader_visible_heap(&mut self, heap_type: DescriptorHeapType) -> Result<(), GpuAllocError> {
        let allocator = match heap_type {
            DescriptorHeapType::CbvSrvUav => &mut self.view_descriptors,
            DescriptorHeapType::Sampler => &mut self.sampler_descriptors,
            other => crate::ra_violation!(RA202, "{:?}", other),
        };
        allocator.allocate_and_switch_shader_visible_heap(&mut self.queue, &mut self.residency)
    }

    fn track_current_descriptor_heap(&mut self, heap_type: DescriptorHeapType) {
        if let Some(heap) = self.shader_visible(heap_type).current_heap() {
            self.track_heap_usage(heap);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A [`Device`] behind one mutex, for multi-threaded recorders.
///
/// Cheap to clone. Every clone locks the same device.
#[derive(Clone)]
pub struct SharedDevice {
    inner: Arc<Mutex<Device>>,
    releaser: HeapReleaser,
}

impl SharedDevice {
    /// Wrap a device.
    pub fn new(device: Device) -> Self {
        let releaser = device.heap_releaser();
        Self {
            inner: Arc::new(Mutex::new(device)),
            releaser,
        }
    }

    /// Lock the device for exclusive use.
    pub fn lock(&self) -> MutexGuard<'_, Device> {
        self.inner.lock()
    }

    /// Release a heap without taking the device lock.
    pub fn release_heap(&self, heap: PageableId) {
        self.releaser.release(heap);
    }
}
