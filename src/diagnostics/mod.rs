//! Diagnostics and profiler hooks.
//!
//! This module provides:
//! - **Runtime diagnostics**: Allocator-aware messages with codes, forwarded to `log`
//! - **Invariant checks**: Broken allocator invariants always panic
//! - **Profiler integration**: Tracy plots of segment usage
//! - **Strict mode**: Optional panic-on-error for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | RA1xx | Ring buffer / upload issues    |
//! | RA2xx | Descriptor heap issues         |
//! | RA3xx | Residency / budget issues      |
//! | RA4xx | Texture copy splitting issues  |
//! | RA5xx | Serial / device lifetime       |
//! | RA9xx | Internal errors                |

// Core diagnostic types
pub mod kind;
pub mod emit;
pub mod strict;
pub mod macros;

pub(crate) mod tracy;

// Re-export core types
pub use kind::{Diagnostic, DiagnosticKind};
pub use emit::{emit, emit_with_context, invariant_violation, suppress_diagnostics};
pub use strict::{StrictMode, set_strict_mode, strict_mode, StrictModeGuard, init_from_env, STRICT_ENV_VAR};

// Re-export predefined diagnostics
pub use kind::{
    RA101, RA102, RA201, RA202, RA203, RA301, RA302, RA303, RA304, RA305, RA306, RA401, RA402,
    RA501, RA901,
};
