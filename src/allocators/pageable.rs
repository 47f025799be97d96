//! Pageable records and per-segment LRU lists.
//!
//! Pageables live in a generation-checked arena. The LRU is an index-based
//! doubly-linked list threaded through the arena slots, one list per memory
//! segment, so moving an entry to the MRU end or unlinking it is O(1).

use crate::core::serial::ExecutionSerial;
use crate::gpu::traits::{MemorySegment, NativeHandle};

/// Stable, generation-checked reference to a pageable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageableId {
    index: u32,
    generation: u32,
}

impl PageableId {
    /// Get the raw slot index (for debugging).
    pub fn raw_index(&self) -> u32 {
        self.index
    }

    /// Get the generation (for debugging).
    pub fn raw_generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for PageableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Where a pageable sits in the residency state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyState {
    /// Created but never tracked
    Unused,
    /// Resident and an eviction candidate
    InLru,
    /// Resident and pinned by at least one lock
    Locked,
    /// Not resident
    Evicted,
}

/// A GPU-resident allocation unit tracked for residency.
#[derive(Debug)]
pub struct Pageable {
    handle: NativeHandle,
    segment: MemorySegment,
    size: u64,
    last_usage: ExecutionSerial,
    last_submission: ExecutionSerial,
    lock_count: u32,
    state: ResidencyState,
    prev: Option<u32>,
    next: Option<u32>,
}

impl Pageable {
    /// Native object backing this pageable.
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Memory segment the pageable lives in.
    pub fn segment(&self) -> MemorySegment {
        self.segment
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last serial a command recording referenced this pageable.
    pub fn last_usage(&self) -> ExecutionSerial {
        self.last_usage
    }

    /// Last serial this pageable was submitted with.
    pub fn last_submission(&self) -> ExecutionSerial {
        self.last_submission
    }

    /// Number of outstanding residency locks.
    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// Current residency state.
    pub fn state(&self) -> ResidencyState {
        self.state
    }

    pub(crate) fn set_last_usage(&mut self, serial: ExecutionSerial) {
        self.last_usage = serial;
    }

    pub(crate) fn set_last_submission(&mut self, serial: ExecutionSerial) {
        self.last_submission = serial;
    }

    pub(crate) fn set_state(&mut self, state: ResidencyState) {
        self.state = state;
    }

    pub(crate) fn set_lock_count(&mut self, count: u32) {
        self.lock_count = count;
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    pageable: Option<Pageable>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LruList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

/// Arena of pageables plus one LRU list per segment.
#[derive(Debug, Default)]
pub struct PageableArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    lru: [LruList; 2],
}

impl PageableArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pageable in the `Unused` state.
    pub fn insert(&mut self, handle: NativeHandle, segment: MemorySegment, size: u64) -> PageableId {
        let pageable = Pageable {
            handle,
            segment,
            size,
            last_usage: ExecutionSerial::ZERO,
            last_submission: ExecutionSerial::ZERO,
            lock_count: 0,
            state: ResidencyState::Unused,
            prev: None,
            next: None,
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.pageable = Some(pageable);
            PageableId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                pageable: Some(pageable),
            });
            PageableId {
                index,
                generation: 0,
            }
        }
    }

    /// Remove a pageable, unlinking it from its LRU first.
    pub fn remove(&mut self, id: PageableId) -> Option<Pageable> {
        self.get(id)?;
        self.unlink(id);
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        slot.pageable.take()
    }

    /// Look up a pageable. `None` for stale ids.
    pub fn get(&self, id: PageableId) -> Option<&Pageable> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.pageable.as_ref()
    }

    /// Look up a pageable mutably. `None` for stale ids.
    pub fn get_mut(&mut self, id: PageableId) -> Option<&mut Pageable> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.pageable.as_mut()
    }

    /// Ids of every live pageable.
    pub fn ids(&self) -> Vec<PageableId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.pageable.is_some())
            .map(|(index, slot)| PageableId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// Whether the pageable is linked into an LRU list.
    pub fn is_linked(&self, id: PageableId) -> bool {
        let list = match self.get(id) {
            Some(pageable) => self.lru[pageable.segment.index()],
            None => return false,
        };
        let pageable = &self.slots[id.index as usize].pageable;
        match pageable {
            Some(p) => p.prev.is_some() || list.head == Some(id.index),
            None => false,
        }
    }

    /// Link a pageable at the MRU end of its segment's list, moving it if
    /// already linked.
    pub fn push_mru(&mut self, id: PageableId) {
        let segment = match self.get(id) {
            Some(pageable) => pageable.segment,
            None => return,
        };
        self.unlink(id);

        let list = &mut self.lru[segment.index()];
        let old_tail = list.tail;
        list.tail = Some(id.index);
        if list.head.is_none() {
            list.head = Some(id.index);
        }
        list.len += 1;

        if let Some(old_tail) = old_tail {
            if let Some(tail) = self.slots[old_tail as usize].pageable.as_mut() {
                tail.next = Some(id.index);
            }
        }
        if let Some(pageable) = self.slots[id.index as usize].pageable.as_mut() {
            pageable.prev = old_tail;
            pageable.next = None;
        }
    }

    /// Unlink a pageable from its LRU list. No-op if not linked.
    pub fn unlink(&mut self, id: PageableId) {
        if !self.is_linked(id) {
            return;
        }
        let (segment, prev, next) = match self.slots[id.index as usize].pageable.as_mut() {
            Some(pageable) => {
                let links = (pageable.segment, pageable.prev, pageable.next);
                pageable.prev = None;
                pageable.next = None;
                links
            }
            None => return,
        };

        match prev {
            Some(prev) => {
                if let Some(p) = self.slots[prev as usize].pageable.as_mut() {
                    p.next = next;
                }
            }
            None => self.lru[segment.index()].head = next,
        }
        match next {
            Some(next) => {
                if let Some(p) = self.slots[next as usize].pageable.as_mut() {
                    p.prev = prev;
                }
            }
            None => self.lru[segment.index()].tail = prev,
        }
        self.lru[segment.index()].len -= 1;
    }

    /// Ids in a segment's LRU list, least recently used first.
    pub fn lru_ids(&self, segment: MemorySegment) -> Vec<PageableId> {
        let mut ids = Vec::with_capacity(self.lru[segment.index()].len);
        let mut cursor = self.lru[segment.index()].head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            ids.push(PageableId {
                index,
                generation: slot.generation,
            });
            cursor = slot.pageable.as_ref().and_then(|p| p.next);
        }
        ids
    }

    /// First entry of a segment's LRU list, walking from the LRU end, that
    /// satisfies `predicate`.
    pub fn find_in_lru<F>(&self, segment: MemorySegment, mut predicate: F) -> Option<PageableId>
    where
        F: FnMut(PageableId, &Pageable) -> bool,
    {
        let mut cursor = self.lru[segment.index()].head;
        while let Some(index) = cursor {
            let slot = &self.slots[index as usize];
            let pageable = slot.pageable.as_ref()?;
            let id = PageableId {
                index,
                generation: slot.generation,
            };
            if predicate(id, pageable) {
                return Some(id);
            }
            cursor = pageable.next;
        }
        None
    }
}
