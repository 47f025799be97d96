//! Budget tracking and LRU eviction over pageables.
//!
//! Each memory segment keeps a budget derived from the OS report and a usage
//! counter equal to the bytes of resident, tracked pageables. Before anything
//! is created or made resident, enough least-recently-submitted pageables are
//! evicted to stay under budget. Locked pageables never sit in the LRU, so
//! they can never be chosen. Eviction only waits on the candidate's own
//! submission; a pageable that was never submitted is evicted right away.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::pageable::{Pageable, PageableArena, PageableId, ResidencyState};
use crate::api::config::ResidencyConfig;
use crate::core::queue::Queue;
use crate::core::serial::ExecutionSerial;
use crate::diagnostics::tracy;
use crate::gpu::traits::{GpuAllocError, MemorySegment, NativeHandle};
use crate::util::size::format_bytes;

/// Budget bookkeeping of one memory segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySegmentInfo {
    /// Bytes tracked pageables may keep resident
    pub budget: u64,
    /// Bytes of resident, tracked pageables
    pub usage: u64,
    /// Bytes granted to memory outside the tracked pageables
    pub external_reservation: u64,
    /// Bytes requested for external memory (capped into `external_reservation`)
    pub external_request: u64,
}

/// Residency manager for every pageable of a device.
#[derive(Debug)]
pub struct ResidencyManager {
    enabled: bool,
    uma: bool,
    budget_cap: f64,
    reservation_cap: f64,
    retry_bytes: u64,
    restricted_for_testing: bool,
    segments: [MemorySegmentInfo; 2],
    pageables: PageableArena,
    eviction_count: u64,
    stall_count: u64,
}

impl ResidencyManager {
    /// Create a manager and read the initial budgets.
    pub fn new(config: &ResidencyConfig, queue: &Queue) -> Self {
        let mut manager = Self {
            enabled: config.residency_enabled,
            uma: queue.backend().is_uma(),
            budget_cap: config.budget_cap,
            reservation_cap: config.external_reservation_cap,
            retry_bytes: config.make_resident_retry_bytes,
            restricted_for_testing: false,
            segments: [MemorySegmentInfo::default(); 2],
            pageables: PageableArena::new(),
            eviction_count: 0,
            stall_count: 0,
        };
        manager.update_video_memory_info(queue);
        manager
    }

    /// Whether residency management is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Budget and usage of a segment. On UMA adapters every segment maps to local.
    pub fn segment_info(&self, segment: MemorySegment) -> MemorySegmentInfo {
        self.segments[self.resolve(segment).index()]
    }

    /// Look up a pageable.
    pub fn pageable(&self, id: PageableId) -> Option<&Pageable> {
        self.pageables.get(id)
    }

    /// Refresh every segment's budget from the OS.
    pub fn update_video_memory_info(&mut self, queue: &Queue) {
        self.update_segment(queue, MemorySegment::Local);
        if !self.uma {
            self.update_segment(queue, MemorySegment::NonLocal);
        }
    }

    /// Reserve budget for memory the manager does not track.
    ///
    /// Returns the reservation actually granted, capped to a fraction of the
    /// OS budget.
    pub fn set_external_memory_reservation(
        &mut self,
        queue: &Queue,
        segment: MemorySegment,
        bytes: u64,
    ) -> u64 {
        let segment = self.resolve(segment);
        self.segments[segment.index()].external_request = bytes;
        self.update_segment(queue, segment);
        self.segments[segment.index()].external_reservation
    }

    /// Pin the budget of every segment to its current usage plus `cap`.
    pub fn restrict_budget_for_testing(&mut self, queue: &Queue, cap: u64) {
        self.restricted_for_testing = true;
        self.update_video_memory_info(queue);
        for segment in MemorySegment::ALL {
            if segment == MemorySegment::NonLocal && self.uma {
                continue;
            }
            let info = &mut self.segments[segment.index()];
            info.budget = info.usage + cap;
            tracy::plot_segment(segment, info.usage, info.budget);
        }
    }

    /// Register a pageable for an already-created native object.
    pub fn register_pageable(&mut self, handle: NativeHandle, segment: MemorySegment, size: u64) -> PageableId {
        let segment = self.resolve(segment);
        self.pageables.insert(handle, segment, size)
    }

    /// Evict until `size` more bytes fit in `segment`'s budget.
    ///
    /// Blocks on the submission serial of an eviction candidate that is still
    /// executing. Fails with `OutOfMemory` once nothing else can be evicted.
    pub fn ensure_can_allocate(
        &mut self,
        queue: &mut Queue,
        size: u64,
        segment: MemorySegment,
    ) -> Result<(), GpuAllocError> {
        if !self.enabled {
            return Ok(());
        }
        self.ensure_can_make_resident(queue, size, self.resolve(segment))
    }

    /// Create a resident heap after making room for it, and track it.
    pub fn create_heap(
        &mut self,
        queue: &mut Queue,
        size: u64,
        segment: MemorySegment,
    ) -> Result<PageableId, GpuAllocError> {
        let segment = self.resolve(segment);
        self.ensure_can_allocate(queue, size, segment)?;
        let handle = queue.backend_mut().create_heap(size, segment)?;
        let id = self.register_pageable(handle, segment, size);
        self.track_resident_allocation(id);
        debug!("created {} heap {} ({})", segment.name(), id, format_bytes(size));
        Ok(id)
    }

    /// Destroy a pageable and its native object.
    pub fn destroy_pageable(&mut self, queue: &mut Queue, id: PageableId) {
        let pageable = match self.pageables.remove(id) {
            Some(pageable) => pageable,
            None => crate::ra_violation!(RA306, "destroying pageable {}", id),
        };
        if self.enabled && matches!(pageable.state(), ResidencyState::InLru | ResidencyState::Locked) {
            let info = &mut self.segments[pageable.segment().index()];
            info.usage = info.usage.saturating_sub(pageable.size());
            tracy::plot_segment(pageable.segment(), info.usage, info.budget);
        }
        queue.backend_mut().destroy(pageable.handle());
    }

    /// Destroy every pageable. Used during teardown.
    pub fn release_all(&mut self, queue: &mut Queue) {
        for id in self.pageables.ids() {
            self.destroy_pageable(queue, id);
        }
    }

    /// Insert or move a resident pageable to the MRU end of its list.
    pub fn track_resident_allocation(&mut self, id: PageableId) {
        if !self.enabled {
            return;
        }
        let pageable = self.pageable_mut(id);
        let (state, segment, size) = (pageable.state(), pageable.segment(), pageable.size());
        match state {
            ResidencyState::Unused => {
                pageable.set_state(ResidencyState::InLru);
                let info = &mut self.segments[segment.index()];
                info.usage += size;
                tracy::plot_segment(segment, info.usage, info.budget);
            }
            ResidencyState::InLru => {}
            ResidencyState::Locked | ResidencyState::Evicted => {
                crate::ra_violation!(RA305, "tracking pageable {} in state {:?}", id, state)
            }
        }
        self.pageables.push_mru(id);
    }

    /// Pin a pageable resident, making it resident first if evicted.
    pub fn lock_allocation(&mut self, queue: &mut Queue, id: PageableId) -> Result<(), GpuAllocError> {
        if !self.enabled {
            return Ok(());
        }
        let pageable = self.pageable_mut(id);
        let (state, segment, size, handle) = (
            pageable.state(),
            pageable.segment(),
            pageable.size(),
            pageable.handle(),
        );
        match state {
            ResidencyState::Locked => {
                let count = pageable.lock_count() + 1;
                pageable.set_lock_count(count);
                return Ok(());
            }
            ResidencyState::InLru => {
                self.pageables.unlink(id);
            }
            ResidencyState::Unused => {
                self.add_usage(segment, size);
            }
            ResidencyState::Evicted => {
                self.make_resident(queue, segment, size, &[handle])?;
                self.add_usage(segment, size);
            }
        }
        let pageable = self.pageable_mut(id);
        pageable.set_state(ResidencyState::Locked);
        pageable.set_lock_count(1);
        Ok(())
    }

    /// Release one lock. The pageable re-enters the LRU at the MRU end when
    /// the last lock goes away.
    pub fn unlock_allocation(&mut self, id: PageableId) {
        if !self.enabled {
            return;
        }
        let pageable = self.pageable_mut(id);
        crate::ra_invariant!(
            pageable.state() == ResidencyState::Locked && pageable.lock_count() > 0,
            RA304,
            "pageable {} in state {:?}",
            id,
            pageable.state()
        );
        let count = pageable.lock_count() - 1;
        pageable.set_lock_count(count);
        if count == 0 {
            pageable.set_state(ResidencyState::InLru);
            self.pageables.push_mru(id);
        }
    }

    /// Record that a command recording for `serial` references a pageable.
    ///
    /// Returns `false` if the pageable was already recorded for `serial`.
    pub fn track_usage(&mut self, id: PageableId, serial: ExecutionSerial) -> bool {
        let pageable = self.pageable_mut(id);
        if pageable.last_usage() >= serial {
            return false;
        }
        pageable.set_last_usage(serial);
        true
    }

    /// Make every listed heap resident before a submission.
    ///
    /// Evicted heaps are made resident in one backend call per segment after
    /// a single budget check for their combined size. Every listed heap is
    /// stamped with the pending serial and moved to the MRU end.
    pub fn ensure_heaps_are_resident(&mut self, queue: &mut Queue, heaps: &[PageableId]) -> Result<(), GpuAllocError> {
        if !self.enabled {
            return Ok(());
        }
        let pending = queue.pending_serial();
        let mut seen = HashSet::with_capacity(heaps.len());
        let mut to_make_resident: [Vec<PageableId>; 2] = [Vec::new(), Vec::new()];
        let mut size_to_make_resident = [0u64; 2];

        for &id in heaps {
            if !seen.insert(id) {
                continue;
            }
            let pageable = self.pageable_mut(id);
            let (state, segment, size) = (pageable.state(), pageable.segment(), pageable.size());
            match state {
                ResidencyState::Locked => {
                    pageable.set_last_submission(pending);
                }
                ResidencyState::InLru => {
                    pageable.set_last_submission(pending);
                    self.pageables.push_mru(id);
                }
                ResidencyState::Unused => {
                    pageable.set_last_submission(pending);
                    pageable.set_state(ResidencyState::InLru);
                    self.add_usage(segment, size);
                    self.pageables.push_mru(id);
                }
                ResidencyState::Evicted => {
                    to_make_resident[segment.index()].push(id);
                    size_to_make_resident[segment.index()] += size;
                }
            }
        }

        for segment in MemorySegment::ALL {
            let ids = &to_make_resident[segment.index()];
            if ids.is_empty() {
                continue;
            }
            let size = size_to_make_resident[segment.index()];
            let handles: Vec<NativeHandle> = ids
                .iter()
                .filter_map(|id| self.pageables.get(*id).map(Pageable::handle))
                .collect();
            self.make_resident(queue, segment, size, &handles)?;
            debug!(
                "made {} heaps resident in {} segment ({})",
                handles.len(),
                segment.name(),
                format_bytes(size)
            );

            for &id in ids {
                let pageable = self.pageable_mut(id);
                pageable.set_state(ResidencyState::InLru);
                pageable.set_last_submission(pending);
                self.pageables.push_mru(id);
            }
            self.add_usage(segment, size);
        }
        Ok(())
    }

    /// Ids in a segment's LRU, least recently used first.
    pub fn lru_for_testing(&self, segment: MemorySegment) -> Vec<PageableId> {
        self.pageables.lru_ids(self.resolve(segment))
    }

    /// Number of pageables evicted so far.
    pub fn eviction_count_for_testing(&self) -> u64 {
        self.eviction_count
    }

    /// Number of times eviction had to wait for the GPU.
    pub fn stall_count_for_testing(&self) -> u64 {
        self.stall_count
    }

    fn resolve(&self, segment: MemorySegment) -> MemorySegment {
        if self.uma {
            MemorySegment::Local
        } else {
            segment
        }
    }

    fn pageable_mut(&mut self, id: PageableId) -> &mut Pageable {
        match self.pageables.get_mut(id) {
            Some(pageable) => pageable,
            None => crate::ra_violation!(RA306, "pageable {}", id),
        }
    }

    fn add_usage(&mut self, segment: MemorySegment, size: u64) {
        let info = &mut self.segments[segment.index()];
        info.usage += size;
        tracy::plot_segment(segment, info.usage, info.budget);
    }

    fn update_segment(&mut self, queue: &Queue, segment: MemorySegment) {
        let os = queue.backend().query_video_memory(segment);
        let info = &mut self.segments[segment.index()];

        let max_reservation = (os.budget as f64 * self.reservation_cap) as u64;
        info.external_reservation = info.external_request.min(max_reservation);

        if !self.restricted_for_testing {
            let budget = (os.budget.saturating_sub(info.external_reservation) as f64 * self.budget_cap) as u64;
            if budget != info.budget {
                info!(
                    "{} segment budget {} (OS budget {}, reserved {})",
                    segment.name(),
                    format_bytes(budget),
                    format_bytes(os.budget),
                    format_bytes(info.external_reservation)
                );
            }
            info.budget = budget;
        }
        tracy::plot_segment(segment, info.usage, info.budget);
    }

    fn ensure_can_make_resident(
        &mut self,
        queue: &mut Queue,
        size: u64,
        segment: MemorySegment,
    ) -> Result<(), GpuAllocError> {
        self.update_segment(queue, segment);
        let info = self.segments[segment.index()];
        let usage_after = info.usage.saturating_add(size);
        if usage_after <= info.budget {
            return Ok(());
        }

        let needed = usage_after - info.budget;
        let evicted = self.evict_from_lru(queue, segment, needed)?;
        if evicted < needed {
            crate::ra_emit!(
                RA302,
                "{} segment needs {} more, evicted {}",
                segment.name(),
                format_bytes(needed),
                format_bytes(evicted)
            );
            return Err(GpuAllocError::OutOfMemory);
        }
        Ok(())
    }

    fn make_resident(
        &mut self,
        queue: &mut Queue,
        segment: MemorySegment,
        size: u64,
        handles: &[NativeHandle],
    ) -> Result<(), GpuAllocError> {
        self.ensure_can_make_resident(queue, size, segment)?;
        loop {
            match queue.backend_mut().make_resident(handles) {
                Ok(()) => return Ok(()),
                Err(GpuAllocError::DeviceLost) => {
                    queue.set_lost();
                    return Err(GpuAllocError::DeviceLost);
                }
                Err(error) => {
                    warn!(
                        "make resident of {} failed ({}), evicting {} and retrying",
                        format_bytes(size),
                        error,
                        format_bytes(self.retry_bytes)
                    );
                    let evicted = self.evict_from_lru(queue, segment, self.retry_bytes)?;
                    if evicted == 0 {
                        return Err(GpuAllocError::OutOfMemory);
                    }
                }
            }
        }
    }

    /// Least-recently-submitted LRU entry not referenced by pending work.
    ///
    /// Submissions move pageables to the MRU end, so list order is submission
    /// order. Pageables never submitted rank by when they entered the list.
    fn select_eviction_candidate(&self, segment: MemorySegment, pending: ExecutionSerial) -> Option<PageableId> {
        self.pageables.find_in_lru(segment, |id, pageable| {
            crate::ra_invariant!(
                pageable.state() == ResidencyState::InLru && pageable.lock_count() == 0,
                RA303,
                "pageable {} (state {:?}, lock count {})",
                id,
                pageable.state(),
                pageable.lock_count()
            );
            pageable.last_submission() < pending
        })
    }

    /// Evict up to `bytes` from a segment. Returns the bytes actually evicted.
    fn evict_from_lru(&mut self, queue: &mut Queue, segment: MemorySegment, bytes: u64) -> Result<u64, GpuAllocError> {
        let mut evicted_bytes = 0;
        let mut handles = Vec::new();
        let mut result = Ok(());

        while evicted_bytes < bytes {
            let id = match self.select_eviction_candidate(segment, queue.pending_serial()) {
                Some(id) => id,
                None => break,
            };
            let (serial, size, handle) = {
                let pageable = self.pageable_mut(id);
                (pageable.last_submission(), pageable.size(), pageable.handle())
            };

            if serial > queue.completed_serial() {
                let completed = match queue.check_passed_serials() {
                    Ok(completed) => completed,
                    Err(error) => {
                        result = Err(error);
                        break;
                    }
                };
                if serial > completed {
                    self.stall_count += 1;
                    crate::ra_emit!(RA301, "waiting for {} to evict pageable {}", serial, id);
                    if let Err(error) = queue.wait_for_serial(serial) {
                        result = Err(error);
                        break;
                    }
                }
            }

            self.pageables.unlink(id);
            self.pageable_mut(id).set_state(ResidencyState::Evicted);
            let info = &mut self.segments[segment.index()];
            info.usage = info.usage.saturating_sub(size);
            evicted_bytes += size;
            self.eviction_count += 1;
            handles.push(handle);
        }

        if !handles.is_empty() {
            debug!(
                "evicting {} heaps from {} segment ({})",
                handles.len(),
                segment.name(),
                format_bytes(evicted_bytes)
            );
            if let Err(error) = queue.backend_mut().evict(&handles) {
                if error == GpuAllocError::DeviceLost {
                    queue.set_lost();
                }
                return Err(error);
            }
            let info = self.segments[segment.index()];
            tracy::plot_segment(segment, info.usage, info.budget);
        }
        result.map(|()| evicted_bytes)
    }
}
