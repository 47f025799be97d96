//! Strict mode: which diagnostic kinds abort the process.
//!
//! Broken invariants always panic regardless of this setting. Strict mode
//! only decides the fate of recoverable diagnostics such as eviction stalls
//! or forced flushes, so CI can treat them as failures.

use std::sync::atomic::{AtomicU8, Ordering};

use super::kind::DiagnosticKind;

/// Environment variable read by [`init_from_env`].
pub const STRICT_ENV_VAR: &str = "RESIDALLOC_STRICT";

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StrictMode {
    /// Log only.
    #[default]
    Warn = 0,
    /// Panic on error diagnostics.
    PanicOnError = 1,
    /// Panic on error and warning diagnostics.
    PanicOnWarning = 2,
}

impl StrictMode {
    /// Parse an environment value. Unknown values fall back to `Warn`.
    ///
    /// Accepts `0`/`warn`, `1`/`error`/`true` and `2`/`warning`/`all`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "error" | "true" => StrictMode::PanicOnError,
            "2" | "warning" | "all" => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }

    /// Whether a diagnostic of `kind` panics under this mode.
    pub fn is_fatal(self, kind: DiagnosticKind) -> bool {
        match kind {
            DiagnosticKind::Error => self != StrictMode::Warn,
            DiagnosticKind::Warning => self == StrictMode::PanicOnWarning,
            DiagnosticKind::Note | DiagnosticKind::Help => false,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => StrictMode::PanicOnError,
            2 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

static STRICT_MODE: AtomicU8 = AtomicU8::new(StrictMode::Warn as u8);

/// Set the process-wide strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Current process-wide strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from_raw(STRICT_MODE.load(Ordering::Relaxed))
}

/// Restores the previous strict mode when dropped.
#[derive(Debug)]
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Switch to `mode` until the guard is dropped.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }

    /// Shorthand for [`StrictMode::PanicOnError`].
    pub fn panic_on_error() -> Self {
        Self::new(StrictMode::PanicOnError)
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}

/// Apply [`STRICT_ENV_VAR`] if it is set. Leaves the mode alone otherwise.
pub fn init_from_env() {
    if let Ok(value) = std::env::var(STRICT_ENV_VAR) {
        set_strict_mode(StrictMode::parse(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_values() {
        assert_eq!(StrictMode::parse("warn"), StrictMode::Warn);
        assert_eq!(StrictMode::parse(" 1 "), StrictMode::PanicOnError);
        assert_eq!(StrictMode::parse("ALL"), StrictMode::PanicOnWarning);
        assert_eq!(StrictMode::parse("bogus"), StrictMode::Warn);
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(!StrictMode::Warn.is_fatal(DiagnosticKind::Error));
        assert!(StrictMode::PanicOnError.is_fatal(DiagnosticKind::Error));
        assert!(!StrictMode::PanicOnError.is_fatal(DiagnosticKind::Warning));
        assert!(StrictMode::PanicOnWarning.is_fatal(DiagnosticKind::Warning));
        assert!(!StrictMode::PanicOnWarning.is_fatal(DiagnosticKind::Note));
    }

    #[test]
    fn test_strict_mode_guard() {
        let before = strict_mode();
        {
            let _guard = StrictModeGuard::panic_on_error();
            assert_eq!(strict_mode(), StrictMode::PanicOnError);
        }
        assert_eq!(strict_mode(), before);
    }
}
