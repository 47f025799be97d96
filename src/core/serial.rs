//! Execution serials and serial-keyed deferred queues.
//!
//! Every batch of GPU work is tagged with a monotonically increasing
//! [`ExecutionSerial`]. Memory tagged with serial `s` may be reused once the
//! fence reports a completed serial `>= s`.

use std::collections::VecDeque;
use std::fmt;

/// Monotonic identifier of a submitted batch of GPU work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionSerial(u64);

impl ExecutionSerial {
    /// The serial before any submission.
    pub const ZERO: Self = Self(0);

    /// A serial that compares greater than every real serial.
    ///
    /// Used to flush deferred queues during teardown.
    pub const MAX: Self = Self(u64::MAX);

    /// Wrap a raw fence value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw fence value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The serial immediately after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ExecutionSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// FIFO of payloads keyed by the serial after which they may be reclaimed.
///
/// Serials must be enqueued in non-decreasing order; reclamation pops from the
/// front while `front.serial <= completed`.
#[derive(Debug)]
pub struct SerialQueue<T> {
    entries: VecDeque<(ExecutionSerial, T)>,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerialQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Enqueue `value`, reclaimable once `serial` has completed.
    pub fn enqueue(&mut self, value: T, serial: ExecutionSerial) {
        debug_assert!(
            self.last_serial().map_or(true, |last| last <= serial),
            "serial queue entries must be enqueued in order"
        );
        self.entries.push_back((serial, value));
    }

    /// Remove and return every entry tagged `<= completed`, oldest first.
    pub fn drain_up_to(&mut self, completed: ExecutionSerial) -> impl Iterator<Item = T> + '_ {
        let count = self
            .entries
            .iter()
            .take_while(|(serial, _)| *serial <= completed)
            .count();
        self.entries.drain(..count).map(|(_, value)| value)
    }

    /// Iterate over every queued entry with its serial.
    pub fn iter(&self) -> impl Iterator<Item = (ExecutionSerial, &T)> {
        self.entries.iter().map(|(serial, value)| (*serial, value))
    }

    /// Serial of the oldest entry.
    pub fn first_serial(&self) -> Option<ExecutionSerial> {
        self.entries.front().map(|(serial, _)| *serial)
    }

    /// Serial of the newest entry.
    pub fn last_serial(&self) -> Option<ExecutionSerial> {
        self.entries.back().map(|(serial, _)| *serial)
    }

    /// Remove every entry regardless of serial.
    pub fn drain_all(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|(_, value)| value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
