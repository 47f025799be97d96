//! Public API for residalloc.
//!
//! This module contains all user-facing types.
//! Most users should only interact with [`device::Device`].

pub mod config;
pub mod device;
pub mod recording_context;
