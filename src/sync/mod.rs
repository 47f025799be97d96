//! Synchronization primitives.
//!
//! One non-poisoning `Mutex` type, backed by parking_lot when the feature is
//! enabled. It guards [`SharedDevice`](crate::SharedDevice) and the dummy
//! backend's state.

pub(crate) mod mutex;
