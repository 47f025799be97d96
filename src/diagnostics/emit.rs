//! Diagnostic emission backend.
//!
//! Diagnostics are always forwarded to the `log` facade and, in debug builds
//! or with the `diagnostics` feature, also printed to stderr. Strict mode
//! decides whether they are fatal.

use std::sync::atomic::{AtomicBool, Ordering};

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::strict_mode;

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic.
pub fn emit(diag: &Diagnostic) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, None);
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    emit_to_stderr(diag, None);
    escalate(diag, None);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    if is_suppressed() {
        return;
    }
    emit_to_log(diag, Some(context));
    #[cfg(any(debug_assertions, feature = "diagnostics"))]
    emit_to_stderr(diag, Some(context));
    escalate(diag, Some(context));
}

/// Report a broken internal invariant and abort the current operation.
///
/// Unlike [`emit`], this ignores suppression and strict mode: continuing
/// after a corrupted allocator state is never safe.
#[cold]
#[track_caller]
pub fn invariant_violation(diag: &Diagnostic, context: &str) -> ! {
    emit_to_log(diag, Some(context));
    panic!(
        "[residalloc][{}] {}\nContext: {}",
        diag.code, diag.message, context
    );
}

fn escalate(diag: &Diagnostic, context: Option<&str>) {
    if !strict_mode().is_fatal(diag.kind) {
        return;
    }
    match context {
        Some(context) => panic!(
            "[residalloc][{}] {}\nContext: {}\nStrict mode enabled - diagnostics are fatal.",
            diag.code, diag.message, context
        ),
        None => panic!(
            "[residalloc][{}] {}\nStrict mode enabled - diagnostics are fatal.",
            diag.code, diag.message
        ),
    }
}

/// Internal: emit to stderr.
#[cfg(any(debug_assertions, feature = "diagnostics"))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(
        stderr,
        "[residalloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );
    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }
    let _ = writeln!(stderr);
}

fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("");
    let separator = if context.is_empty() { "" } else { ": " };
    match diag.kind {
        DiagnosticKind::Error => {
            log::error!("[{}] {}{}{}", diag.code, diag.message, separator, context);
        }
        DiagnosticKind::Warning => {
            log::warn!("[{}] {}{}{}", diag.code, diag.message, separator, context);
        }
        DiagnosticKind::Note | DiagnosticKind::Help => {
            log::info!("[{}] {}{}{}", diag.code, diag.message, separator, context);
        }
    }

    if let Some(note) = diag.note {
        log::debug!("  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::debug!("  help: {}", help);
    }
}
