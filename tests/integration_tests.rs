//! Integration tests for residalloc.

use residalloc::{
    compute_copy_regions, BufferTextureCopy, CopyDirection, DescriptorHeapType, Device, DummyBackend,
    ExecutionSerial, Extent3D, GpuAllocError, MemorySegment, NativeHandle, Origin3D, RecordedCommand,
    ResidencyConfig, SharedDevice, TexelBlockInfo, TextureDimension,
};
use std::thread;

fn device(gpu: &DummyBackend) -> Device {
    Device::new(Box::new(gpu.clone()), ResidencyConfig::for_testing()).unwrap()
}

fn submit(device: &mut Device) {
    device.pending_commands().unwrap().set_needs_submit();
    device.tick().unwrap();
}

fn handle_of(device: &Device, heap: residalloc::PageableId) -> NativeHandle {
    device.residency().pageable(heap).unwrap().handle()
}

#[test]
fn test_evicts_least_recently_submitted_first() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    device.restrict_budget_for_testing(300);

    let a = device.create_heap(100, MemorySegment::Local).unwrap();
    let b = device.create_heap(100, MemorySegment::Local).unwrap();
    let c = device.create_heap(100, MemorySegment::Local).unwrap();

    device.track_heap_usage(a);
    submit(&mut device);
    device.track_heap_usage(b);
    submit(&mut device);

    // c was never submitted, so it goes first without waiting.
    device.create_heap(100, MemorySegment::Local).unwrap();
    assert_eq!(gpu.evicted(), vec![handle_of(&device, c)]);
    assert!(gpu.waits().is_empty());

    // a is still executing: evicting it waits on exactly its serial.
    device.create_heap(100, MemorySegment::Local).unwrap();
    assert_eq!(gpu.evicted(), vec![handle_of(&device, c), handle_of(&device, a)]);
    assert_eq!(gpu.waits(), vec![ExecutionSerial::new(1)]);
    assert_eq!(device.residency().stall_count_for_testing(), 1);
    assert_eq!(device.completed_serial(), ExecutionSerial::new(1));
}

#[test]
fn test_never_submitted_heap_evicts_without_waiting() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    device.restrict_budget_for_testing(200);

    let a = device.create_heap(100, MemorySegment::Local).unwrap();
    device.track_heap_usage(a);
    submit(&mut device);
    let b = device.create_heap(100, MemorySegment::Local).unwrap();
    device.track_heap_usage(a);
    submit(&mut device);
    assert_eq!(device.completed_serial(), ExecutionSerial::ZERO);

    // b was created after serial 1 but no submission ever used it.
    device.create_heap(100, MemorySegment::Local).unwrap();
    assert_eq!(gpu.evicted(), vec![handle_of(&device, b)]);
    assert!(gpu.waits().is_empty());
    assert_eq!(device.residency().stall_count_for_testing(), 0);
    assert_eq!(
        device.residency().pageable(b).unwrap().last_submission(),
        ExecutionSerial::ZERO
    );
}

#[test]
fn test_locked_heaps_are_never_evicted() {
    let gpu = DummyBackend::new().with_auto_complete();
    let mut device = device(&gpu);
    device.restrict_budget_for_testing(200);

    let locked = device.create_heap(100, MemorySegment::Local).unwrap();
    device.lock_for_mapping(locked).unwrap();

    for _ in 0..5 {
        let heap = device.create_heap(100, MemorySegment::Local).unwrap();
        device.track_heap_usage(heap);
        submit(&mut device);
    }
    assert!(!gpu.evicted().contains(&handle_of(&device, locked)));
    assert!(gpu.is_resident(handle_of(&device, locked)));

    let other = device.residency().lru_for_testing(MemorySegment::Local);
    assert_eq!(other.len(), 1);
    device.lock_for_mapping(other[0]).unwrap();
    assert_eq!(
        device.create_heap(100, MemorySegment::Local).unwrap_err(),
        GpuAllocError::OutOfMemory
    );
}

#[test]
fn test_usage_stays_within_budget() {
    let gpu = DummyBackend::new().with_auto_complete();
    let mut device = device(&gpu);
    device.restrict_budget_for_testing(400);

    let mut heaps = Vec::new();
    for i in 0..40u64 {
        let size = (i * 37 % 5 + 1) * 40;
        heaps.push(device.create_heap(size, MemorySegment::Local).unwrap());
        let info = device.segment_info(MemorySegment::Local);
        assert!(info.usage <= info.budget, "step {}: {:?}", i, info);

        if i % 3 == 0 {
            // Touch an older, probably evicted heap.
            device.track_heap_usage(heaps[(i / 2) as usize]);
            submit(&mut device);
            let info = device.segment_info(MemorySegment::Local);
            assert!(info.usage <= info.budget, "step {}: {:?}", i, info);
        }
    }
    assert!(device.residency().eviction_count_for_testing() > 0);
    assert!(gpu.waits().is_empty());
}

#[test]
fn test_released_heaps_outlive_in_flight_work() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);

    let heap = device.create_heap(4096, MemorySegment::NonLocal).unwrap();
    let handle = handle_of(&device, heap);
    device.track_heap_usage(heap);
    device.release_heap(heap);
    submit(&mut device);
    assert!(gpu.is_resident(handle));

    gpu.complete_all();
    device.tick().unwrap();
    assert!(device.residency().pageable(heap).is_none());
    assert!(!gpu.is_resident(handle));
}

#[test]
fn test_shared_device_releases_from_workers() {
    let gpu = DummyBackend::new().with_auto_complete();
    let shared = SharedDevice::new(device(&gpu));
    let heaps: Vec<_> = (0..8)
        .map(|_| shared.lock().create_heap(512, MemorySegment::Local).unwrap())
        .collect();

    let workers: Vec<_> = heaps
        .chunks(2)
        .map(|chunk| {
            let shared = shared.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for heap in chunk {
                    shared.release_heap(heap);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut device = shared.lock();
    submit(&mut device);
    device.tick().unwrap();
    for heap in heaps {
        assert!(device.residency().pageable(heap).is_none());
    }
}

#[test]
fn test_descriptors_expire_with_their_submission() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);

    let allocation = device
        .allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 16)
        .unwrap();
    assert_eq!(allocation.last_usage_serial(), ExecutionSerial::new(1));
    assert!(device.is_descriptor_allocation_valid(DescriptorHeapType::CbvSrvUav, &allocation));

    submit(&mut device);
    assert!(device.is_descriptor_allocation_valid(DescriptorHeapType::CbvSrvUav, &allocation));

    gpu.complete_all();
    device.tick().unwrap();
    assert!(!device.is_descriptor_allocation_valid(DescriptorHeapType::CbvSrvUav, &allocation));
}

#[test]
fn test_descriptor_heap_is_resident_for_submission() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    device
        .allocate_gpu_descriptors(DescriptorHeapType::Sampler, 4)
        .unwrap();

    let heap = device
        .shader_visible_allocator(DescriptorHeapType::Sampler)
        .current_heap()
        .unwrap();
    submit(&mut device);
    assert_eq!(
        device.residency().pageable(heap).unwrap().last_submission(),
        ExecutionSerial::new(1)
    );
}

#[test]
fn test_cpu_descriptors_recycled_after_completion() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);

    let first = device.allocate_cpu_descriptors(DescriptorHeapType::Rtv, 4).unwrap();
    device.free_cpu_descriptors(first);
    let second = device.allocate_cpu_descriptors(DescriptorHeapType::Rtv, 4).unwrap();
    assert_ne!(first.cpu_handle(0), second.cpu_handle(0));

    submit(&mut device);
    gpu.complete_all();
    device.tick().unwrap();
    let third = device.allocate_cpu_descriptors(DescriptorHeapType::Rtv, 4).unwrap();
    assert_eq!(first.cpu_handle(0), third.cpu_handle(0));
}

#[test]
fn test_uploads_are_aligned_and_staged() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);

    let mut previous_end = 0;
    for (i, alignment) in [1u64, 4, 256, 512, 16].into_iter().enumerate() {
        let data: Vec<u8> = (0..100).map(|b| (b + i) as u8).collect();
        let upload = device.upload(&data, alignment).unwrap();
        assert_eq!(upload.start_offset() % alignment, 0);
        assert!(upload.start_offset() >= previous_end);
        previous_end = upload.start_offset() + upload.size();

        let staged = gpu.staging_contents(upload.staging_buffer()).unwrap();
        let start = upload.start_offset() as usize;
        assert_eq!(&staged[start..start + data.len()], &data[..]);
    }

    assert_eq!(device.upload(&[], 4).unwrap_err(), GpuAllocError::InvalidSize);
    assert_eq!(device.upload(&[1], 3).unwrap_err(), GpuAllocError::InvalidSize);
}

#[test]
fn test_large_uploads_flush_pending_work() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    device.pending_commands().unwrap().set_needs_submit();

    // 64 KB threshold, 4 KB per upload.
    let chunk = vec![0xAB; 4000];
    for _ in 0..17 {
        device.upload(&chunk, 4).unwrap();
    }
    assert!(gpu.executed_lists().is_empty());

    device.upload(&chunk, 4).unwrap();
    assert_eq!(gpu.executed_lists().len(), 1);
    assert_eq!(device.pending_serial(), ExecutionSerial::new(2));
}

#[test]
fn test_copy_regions_cover_array_layers() {
    let copy = BufferTextureCopy {
        direction: CopyDirection::BufferToTexture,
        buffer: NativeHandle(1),
        offset: 768,
        bytes_per_row: 256,
        rows_per_image: 3,
        texture: NativeHandle(2),
        dimension: TextureDimension::D2,
        block: TexelBlockInfo::uncompressed(4),
        origin: Origin3D::new(0, 0, 2),
        copy_size: Extent3D::new(64, 3, 3),
    };

    let regions = compute_copy_regions(&copy);
    for layer in 0..3 {
        let texels: u32 = regions
            .iter()
            .filter(|region| region.texture_offset.z == 2 + layer)
            .map(|region| region.copy_size.width * region.copy_size.height)
            .sum();
        assert_eq!(texels, 64 * 3, "layer {}", layer);
    }
    for region in &regions {
        assert_eq!(region.aligned_offset % 512, 0);
        assert_eq!(region.copy_size.depth_or_array_layers, 1);
        assert!(region.buffer_offset.x + region.copy_size.width <= region.buffer_size.width);
        assert!(region.buffer_offset.y + region.copy_size.height <= region.buffer_size.height);
    }
}

#[test]
fn test_recorded_copy_matches_regions() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    let copy = BufferTextureCopy {
        direction: CopyDirection::TextureToBuffer,
        buffer: NativeHandle(1),
        offset: 300,
        bytes_per_row: 512,
        rows_per_image: 8,
        texture: NativeHandle(2),
        dimension: TextureDimension::D3,
        block: TexelBlockInfo::uncompressed(4),
        origin: Origin3D::default(),
        copy_size: Extent3D::new(128, 8, 4),
    };

    device.copy_buffer_to_texture(&copy).unwrap();
    device.tick().unwrap();

    let regions = compute_copy_regions(&copy);
    let lists = gpu.executed_lists();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].len(), regions.len());
    for (command, region) in lists[0].iter().zip(&regions) {
        match command {
            RecordedCommand::Copy(placed) => {
                assert_eq!(placed.region, *region);
                assert_eq!(placed.direction, CopyDirection::TextureToBuffer);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}

#[test]
fn test_device_loss_teardown_never_waits() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);

    let heap = device.create_heap(1 << 20, MemorySegment::Local).unwrap();
    device.track_heap_usage(heap);
    device.upload(&[1; 256], 4).unwrap();
    device
        .allocate_gpu_descriptors(DescriptorHeapType::CbvSrvUav, 8)
        .unwrap();
    submit(&mut device);
    device.pending_commands().unwrap().set_needs_submit();

    gpu.lose();
    assert_eq!(device.tick().unwrap_err(), GpuAllocError::DeviceLost);
    assert!(device.is_lost());
    assert_eq!(device.wait_for_idle().unwrap_err(), GpuAllocError::DeviceLost);

    drop(device);
    assert!(gpu.waits().is_empty());
    assert_eq!(gpu.live_object_count(), 0);
}

#[test]
fn test_clean_teardown_waits_for_idle() {
    let gpu = DummyBackend::new();
    let mut device = device(&gpu);
    device.create_heap(1 << 16, MemorySegment::Local).unwrap();
    submit(&mut device);
    submit(&mut device);

    drop(device);
    assert_eq!(gpu.waits(), vec![ExecutionSerial::new(2)]);
    assert_eq!(gpu.live_object_count(), 0);
}
