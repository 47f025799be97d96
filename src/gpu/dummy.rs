//! Dummy GPU backend for testing
//!
//! Stores staging memory in plain `Box<[u8]>` storage and models the fence,
//! residency and command submission in RAM, so the allocators can be driven
//! without GPU hardware. Fence completion is manual: tests decide when the
//! "GPU" finishes work via [`DummyBackend::complete_up_to`].
//!
//! The backend is a cheap handle; clone it before handing one copy to a
//! [`Device`](crate::Device) to keep inspecting the recorded state.

use std::collections::HashMap;
use std::sync::Arc;

use super::traits::*;
use crate::core::serial::ExecutionSerial;
use crate::sync::mutex::Mutex;

/// A command recorded into a dummy command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    /// A buffer/texture copy
    Copy(PlacedCopy),
    /// Transition of a shared texture to the common state
    TransitionToCommon(NativeHandle),
}

#[derive(Debug)]
struct DummyHeap {
    size: u64,
    resident: bool,
}

#[derive(Debug, Default)]
struct DummyCommandList {
    commands: Vec<RecordedCommand>,
    closed: bool,
}

#[derive(Debug)]
struct DummyState {
    next_handle: u64,
    signaled: ExecutionSerial,
    completed: ExecutionSerial,
    auto_complete: bool,
    lost: bool,
    uma: bool,
    budgets: [u64; 2],
    heaps: HashMap<NativeHandle, DummyHeap>,
    descriptor_heaps: HashMap<NativeHandle, (DescriptorHeapType, u32, bool)>,
    staging: HashMap<NativeHandle, Box<[u8]>>,
    command_lists: HashMap<NativeHandle, DummyCommandList>,
    executed: Vec<Vec<RecordedCommand>>,
    waits: Vec<ExecutionSerial>,
    evicted: Vec<NativeHandle>,
    made_resident: Vec<NativeHandle>,
    fail_heap_creations: u32,
    fail_make_resident: u32,
    fail_close: u32,
}

impl DummyState {
    fn allocate_handle(&mut self) -> NativeHandle {
        self.next_handle += 1;
        NativeHandle(self.next_handle)
    }

    fn check_lost(&self) -> Result<(), GpuAllocError> {
        if self.lost {
            Err(GpuAllocError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

/// In-memory backend with manual fence control and failure injection.
#[derive(Debug, Clone)]
pub struct DummyBackend {
    state: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Discrete adapter with a 256 MiB local and 1 GiB non-local budget.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DummyState {
                next_handle: 0,
                signaled: ExecutionSerial::ZERO,
                completed: ExecutionSerial::ZERO,
                auto_complete: false,
                lost: false,
                uma: false,
                budgets: [256 << 20, 1 << 30],
                heaps: HashMap::new(),
                descriptor_heaps: HashMap::new(),
                staging: HashMap::new(),
                command_lists: HashMap::new(),
                executed: Vec::new(),
                waits: Vec::new(),
                evicted: Vec::new(),
                made_resident: Vec::new(),
                fail_heap_creations: 0,
                fail_make_resident: 0,
                fail_close: 0,
            })),
        }
    }

    /// Unified memory adapter (single local segment).
    pub fn uma() -> Self {
        let backend = Self::new();
        backend.state.lock().uma = true;
        backend
    }

    /// Complete every signaled serial as soon as it is queried.
    pub fn with_auto_complete(self) -> Self {
        self.state.lock().auto_complete = true;
        self
    }

    /// Set the OS budget reported for `segment`.
    pub fn set_budget(&self, segment: MemorySegment, bytes: u64) {
        self.state.lock().budgets[segment.index()] = bytes;
    }

    /// Finish GPU work up to `serial` (clamped to the last signaled serial).
    pub fn complete_up_to(&self, serial: ExecutionSerial) {
        let mut state = self.state.lock();
        let target = serial.min(state.signaled);
        if target > state.completed {
            state.completed = target;
        }
    }

    /// Finish all signaled GPU work.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        state.completed = state.signaled;
    }

    /// Simulate device removal.
    pub fn lose(&self) {
        self.state.lock().lost = true;
    }

    /// Fail the next `count` heap creations with `OutOfMemory`.
    pub fn fail_next_heap_creations(&self, count: u32) {
        self.state.lock().fail_heap_creations = count;
    }

    /// Fail the next `count` make-resident calls with `OutOfMemory`.
    pub fn fail_next_make_resident(&self, count: u32) {
        self.state.lock().fail_make_resident = count;
    }

    /// Fail the next `count` command list closes.
    pub fn fail_next_close(&self, count: u32) {
        self.state.lock().fail_close = count;
    }

    /// Last serial signaled on the queue.
    pub fn signaled_serial(&self) -> ExecutionSerial {
        self.state.lock().signaled
    }

    /// Serials passed to `wait_for`, in call order.
    pub fn waits(&self) -> Vec<ExecutionSerial> {
        self.state.lock().waits.clone()
    }

    /// Objects passed to `evict`, in call order.
    pub fn evicted(&self) -> Vec<NativeHandle> {
        self.state.lock().evicted.clone()
    }

    /// Objects passed to `make_resident`, in call order.
    pub fn made_resident(&self) -> Vec<NativeHandle> {
        self.state.lock().made_resident.clone()
    }

    /// Whether a heap is currently resident.
    pub fn is_resident(&self, heap: NativeHandle) -> bool {
        self.state
            .lock()
            .heaps
            .get(&heap)
            .map_or(false, |heap| heap.resident)
    }

    /// Commands of every executed command list, in submission order.
    pub fn executed_lists(&self) -> Vec<Vec<RecordedCommand>> {
        self.state.lock().executed.clone()
    }

    /// Number of native objects not yet destroyed.
    pub fn live_object_count(&self) -> usize {
        let state = self.state.lock();
        state.heaps.len()
            + state.descriptor_heaps.len()
            + state.staging.len()
            + state.command_lists.len()
    }

    /// Bytes of heap memory currently resident.
    pub fn resident_bytes(&self) -> u64 {
        self.state
            .lock()
            .heaps
            .values()
            .filter(|heap| heap.resident)
            .map(|heap| heap.size)
            .sum()
    }

    /// Copy of a staging buffer's contents.
    pub fn staging_contents(&self, buffer: NativeHandle) -> Option<Vec<u8>> {
        self.state.lock().staging.get(&buffer).map(|data| data.to_vec())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuFence for DummyBackend {
    fn signal(&mut self, serial: ExecutionSerial) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.signaled = serial;
        Ok(())
    }

    fn completed_value(&mut self) -> Result<ExecutionSerial, GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if state.auto_complete {
            state.completed = state.signaled;
        }
        Ok(state.completed)
    }

    fn wait_for(&mut self, serial: ExecutionSerial) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        state.waits.push(serial);
        if serial > state.signaled {
            return Err(GpuAllocError::Backend(format!(
                "wait on unsignaled serial {}",
                serial
            )));
        }
        if serial > state.completed {
            state.completed = serial;
        }
        Ok(())
    }
}

impl GpuMemory for DummyBackend {
    fn is_uma(&self) -> bool {
        self.state.lock().uma
    }

    fn query_video_memory(&self, segment: MemorySegment) -> VideoMemoryInfo {
        let state = self.state.lock();
        let current_usage = state
            .heaps
            .values()
            .filter(|heap| heap.resident)
            .map(|heap| heap.size)
            .sum();
        VideoMemoryInfo {
            budget: state.budgets[segment.index()],
            current_usage,
        }
    }

    fn create_heap(&mut self, size: u64, _segment: MemorySegment) -> Result<NativeHandle, GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if state.fail_heap_creations > 0 {
            state.fail_heap_creations -= 1;
            return Err(GpuAllocError::OutOfMemory);
        }
        let handle = state.allocate_handle();
        state.heaps.insert(handle, DummyHeap { size, resident: true });
        Ok(handle)
    }

    fn make_resident(&mut self, objects: &[NativeHandle]) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if state.fail_make_resident > 0 {
            state.fail_make_resident -= 1;
            return Err(GpuAllocError::OutOfMemory);
        }
        for object in objects {
            if let Some(heap) = state.heaps.get_mut(object) {
                heap.resident = true;
            }
            state.made_resident.push(*object);
        }
        Ok(())
    }

    fn evict(&mut self, objects: &[NativeHandle]) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        for object in objects {
            if let Some(heap) = state.heaps.get_mut(object) {
                heap.resident = false;
            }
            state.evicted.push(*object);
        }
        Ok(())
    }

    fn destroy(&mut self, object: NativeHandle) {
        let mut state = self.state.lock();
        state.heaps.remove(&object);
        state.descriptor_heaps.remove(&object);
        state.staging.remove(&object);
        state.command_lists.remove(&object);
    }

    fn descriptor_size_increment(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::CbvSrvUav => 32,
            DescriptorHeapType::Sampler => 16,
            DescriptorHeapType::Rtv | DescriptorHeapType::Dsv => 8,
        }
    }

    fn create_descriptor_heap(
        &mut self,
        heap_type: DescriptorHeapType,
        count: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapInfo, GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if state.fail_heap_creations > 0 {
            state.fail_heap_creations -= 1;
            return Err(GpuAllocError::OutOfMemory);
        }
        let handle = state.allocate_handle();
        state
            .descriptor_heaps
            .insert(handle, (heap_type, count, shader_visible));

        // Each heap gets its own 4 GiB window of fake addresses.
        let base = handle.0 << 32;
        Ok(DescriptorHeapInfo {
            handle,
            cpu_start: base,
            gpu_start: if shader_visible { base | (1 << 63) } else { 0 },
        })
    }

    fn create_staging_buffer(&mut self, size: u64) -> Result<StagingBuffer, GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let len = usize::try_from(size).map_err(|_| GpuAllocError::InvalidSize)?;
        let handle = state.allocate_handle();
        let mut data = vec![0u8; len].into_boxed_slice();
        let mapped = data.as_mut_ptr();
        state.staging.insert(handle, data);
        // SAFETY: the boxed slice is never resized and lives until `destroy`.
        Ok(unsafe { StagingBuffer::new(handle, size, mapped) })
    }
}

impl GpuCommands for DummyBackend {
    fn open_command_list(&mut self) -> Result<NativeHandle, GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let handle = state.allocate_handle();
        state.command_lists.insert(handle, DummyCommandList::default());
        Ok(handle)
    }

    fn record_copy(&mut self, list: NativeHandle, copy: &PlacedCopy) {
        if let Some(list) = self.state.lock().command_lists.get_mut(&list) {
            list.commands.push(RecordedCommand::Copy(*copy));
        }
    }

    fn record_transition_to_common(&mut self, list: NativeHandle, texture: NativeHandle) {
        if let Some(list) = self.state.lock().command_lists.get_mut(&list) {
            list.commands.push(RecordedCommand::TransitionToCommon(texture));
        }
    }

    fn close_command_list(&mut self, list: NativeHandle) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        if state.fail_close > 0 {
            state.fail_close -= 1;
            return Err(GpuAllocError::Backend("close failed".into()));
        }
        match state.command_lists.get_mut(&list) {
            Some(list) => {
                list.closed = true;
                Ok(())
            }
            None => Err(GpuAllocError::Backend("unknown command list".into())),
        }
    }

    fn execute_command_list(&mut self, list: NativeHandle) -> Result<(), GpuAllocError> {
        let mut state = self.state.lock();
        state.check_lost()?;
        match state.command_lists.remove(&list) {
            Some(recorded) if recorded.closed => {
                state.executed.push(recorded.commands);
                Ok(())
            }
            Some(_) => Err(GpuAllocError::Backend("command list not closed".into())),
            None => Err(GpuAllocError::Backend("unknown command list".into())),
        }
    }

    fn release_command_list(&mut self, list: NativeHandle) {
        self.state.lock().command_lists.remove(&list);
    }
}
