//! Diagnostic macros used throughout the allocators.

/// Emit a predefined diagnostic by code.
///
/// # Example
///
/// ```rust,ignore
/// ra_emit!(RA302);
/// ra_emit!(RA301, "waiting for {} to evict {}", serial, heap);
/// ```
#[macro_export]
macro_rules! ra_emit {
    ($code:ident) => {{
        $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
    }};
    ($code:ident, $($arg:tt)+) => {{
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::$code,
            &format!($($arg)+),
        );
    }};
}

/// Assert an allocator invariant, panicking with a diagnostic when it fails.
///
/// Checked in every build profile.
///
/// # Example
///
/// ```rust,ignore
/// ra_invariant!(pageable.lock_count() > 0, RA304, "pageable {:?}", id);
/// ```
#[macro_export]
macro_rules! ra_invariant {
    ($cond:expr, $code:ident, $($arg:tt)+) => {{
        if !$cond {
            $crate::diagnostics::emit::invariant_violation(
                &$crate::diagnostics::$code,
                &format!($($arg)+),
            );
        }
    }};
}

/// Unconditionally report a broken invariant.
#[macro_export]
macro_rules! ra_violation {
    ($code:ident, $($arg:tt)+) => {{
        $crate::diagnostics::emit::invariant_violation(
            &$crate::diagnostics::$code,
            &format!($($arg)+),
        )
    }};
}

// Re-export macros at crate root for convenience
pub use crate::{ra_emit, ra_invariant, ra_violation};
