//! Command recording and submission.
//!
//! One command list is open at a time, acquired on first use. While it is
//! open, the context collects what the submission needs: heaps that must be
//! resident, shared textures to transition back to the common state, and
//! temporary staging buffers that must outlive the GPU work.

use std::collections::HashSet;

use log::{debug, warn};

use crate::allocators::copy_split::{compute_copy_regions, BufferTextureCopy};
use crate::allocators::pageable::PageableId;
use crate::allocators::residency::ResidencyManager;
use crate::core::queue::Queue;
use crate::core::serial::{ExecutionSerial, SerialQueue};
use crate::gpu::traits::{GpuAllocError, NativeHandle, PlacedCopy, StagingBuffer};

/// The open command list of a device and the state tracked for it.
#[derive(Debug, Default)]
pub struct CommandRecordingContext {
    command_list: Option<NativeHandle>,
    needs_submit: bool,
    heaps_pending_residency: Vec<PageableId>,
    shared_textures: Vec<NativeHandle>,
    shared_texture_set: HashSet<NativeHandle>,
    temp_buffers: Vec<StagingBuffer>,
    in_flight_temp_buffers: SerialQueue<StagingBuffer>,
}

impl CommandRecordingContext {
    /// Create a context with no open command list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a command list if none is open.
    pub fn open(&mut self, queue: &mut Queue) -> Result<(), GpuAllocError> {
        if self.command_list.is_none() {
            let list = queue.backend_mut().open_command_list()?;
            debug!("opened command list {:?} for {}", list, queue.pending_serial());
            self.command_list = Some(list);
        }
        Ok(())
    }

    /// The open command list, if any.
    pub fn command_list(&self) -> Option<NativeHandle> {
        self.command_list
    }

    /// Whether a command list is open.
    pub fn is_open(&self) -> bool {
        self.command_list.is_some()
    }

    /// Whether anything was recorded since the last submission.
    pub fn needs_submit(&self) -> bool {
        self.needs_submit
    }

    /// Mark the recording as dirty.
    pub fn set_needs_submit(&mut self) {
        self.needs_submit = true;
    }

    /// Record that the open recording references `heap`.
    ///
    /// A heap is only collected once per serial.
    pub fn track_heap_usage(&mut self, residency: &mut ResidencyManager, heap: PageableId, serial: ExecutionSerial) {
        if residency.track_usage(heap, serial) {
            self.heaps_pending_residency.push(heap);
        }
    }

    /// Keep a staging buffer alive until the recording's serial completes.
    pub fn add_to_temp_buffers(&mut self, buffer: StagingBuffer) {
        self.temp_buffers.push(buffer);
    }

    /// Transition a shared texture to the common state before submission.
    pub fn track_texture(&mut self, texture: NativeHandle) {
        if self.shared_texture_set.insert(texture) {
            self.shared_textures.push(texture);
        }
    }

    /// Record a buffer/texture copy as one placed copy per split region.
    pub fn record_buffer_texture_copy(
        &mut self,
        queue: &mut Queue,
        copy: &BufferTextureCopy,
    ) -> Result<(), GpuAllocError> {
        let regions = compute_copy_regions(copy);
        if regions.is_empty() {
            return Ok(());
        }
        self.open(queue)?;
        let list = match self.command_list {
            Some(list) => list,
            None => crate::ra_violation!(RA901, "command list missing after open"),
        };
        for region in regions {
            let placed = PlacedCopy {
                direction: copy.direction,
                buffer: copy.buffer,
                texture: copy.texture,
                bytes_per_row: copy.bytes_per_row,
                region,
            };
            queue.backend_mut().record_copy(list, &placed);
        }
        self.needs_submit = true;
        Ok(())
    }

    /// Submit the open command list.
    ///
    /// Every tracked heap is made resident before the list is executed. The
    /// temporary buffers are tagged with the pending serial; the caller then
    /// signals that serial.
    pub fn execute_command_list(
        &mut self,
        queue: &mut Queue,
        residency: &mut ResidencyManager,
    ) -> Result<(), GpuAllocError> {
        let list = match self.command_list {
            Some(list) => list,
            None => {
                self.needs_submit = false;
                return Ok(());
            }
        };

        if let Err(error) = residency.ensure_heaps_are_resident(queue, &self.heaps_pending_residency) {
            self.release(queue);
            return Err(error);
        }

        for texture in &self.shared_textures {
            queue.backend_mut().record_transition_to_common(list, *texture);
        }
        if let Err(error) = queue.backend_mut().close_command_list(list) {
            warn!("closing command list {:?} failed: {}", list, error);
            self.release(queue);
            return Err(error);
        }
        if let Err(error) = queue.backend_mut().execute_command_list(list) {
            if error == GpuAllocError::DeviceLost {
                queue.set_lost();
            }
            self.release(queue);
            return Err(error);
        }

        let serial = queue.pending_serial();
        debug!(
            "executed command list {:?} for {} ({} heaps, {} temp buffers)",
            list,
            serial,
            self.heaps_pending_residency.len(),
            self.temp_buffers.len()
        );
        for buffer in self.temp_buffers.drain(..) {
            self.in_flight_temp_buffers.enqueue(buffer, serial);
        }
        self.command_list = None;
        self.reset_tracking();
        Ok(())
    }

    /// Destroy temporary buffers whose serial completed.
    pub fn tick(&mut self, queue: &mut Queue, completed: ExecutionSerial) {
        let done: Vec<_> = self.in_flight_temp_buffers.drain_up_to(completed).collect();
        for buffer in done {
            queue.backend_mut().destroy(buffer.handle());
        }
    }

    /// Number of temporary buffers waiting on the GPU.
    pub fn in_flight_temp_buffer_count(&self) -> usize {
        self.in_flight_temp_buffers.len()
    }

    /// Drop the open list and everything tracked, without submitting.
    pub fn release_all(&mut self, queue: &mut Queue) {
        self.release(queue);
        let in_flight: Vec<_> = self.in_flight_temp_buffers.drain_all().collect();
        for buffer in in_flight {
            queue.backend_mut().destroy(buffer.handle());
        }
    }

    fn release(&mut self, queue: &mut Queue) {
        if let Some(list) = self.command_list.take() {
            queue.backend_mut().release_command_list(list);
        }
        for buffer in self.temp_buffers.drain(..) {
            queue.backend_mut().destroy(buffer.handle());
        }
        self.reset_tracking();
    }

    fn reset_tracking(&mut self) {
        self.needs_submit = false;
        self.heaps_pending_residency.clear();
        self.shared_textures.clear();
        self.shared_texture_set.clear();
    }
}
