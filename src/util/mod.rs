//! Utility functions.

pub(crate) mod layout;
pub(crate) mod size;
