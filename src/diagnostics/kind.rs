//! Diagnostic kinds and core types.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Additional context about another diagnostic.
    Note,
    /// Actionable suggestion to fix the issue.
    Help,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
            DiagnosticKind::Help => "help",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `RA1xx` - Ring buffer and upload issues
/// - `RA2xx` - Descriptor heap issues
/// - `RA3xx` - Residency and budget issues
/// - `RA4xx` - Texture copy splitting issues
/// - `RA5xx` - Serial and device lifetime issues
/// - `RA9xx` - Internal errors
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "RA301").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (RA1xx - Ring buffers and uploads)
// =============================================================================

/// RA101: Upload larger than the staging chunk size.
pub const RA101: Diagnostic = Diagnostic::warning(
    "RA101",
    "upload request exceeds the staging chunk size"
).with_note("a dedicated staging buffer is created for this request")
 .with_help("raise upload_chunk_size in ResidencyConfig if large uploads are common");

/// RA102: Unsubmitted staging memory crossed the flush threshold.
pub const RA102: Diagnostic = Diagnostic::warning(
    "RA102",
    "pending staging memory crossed the flush threshold"
).with_note("pending commands are submitted early so staging memory can be recycled")
 .with_help("split large uploads across several submissions");

// =============================================================================
// Predefined diagnostics (RA2xx - Descriptor heaps)
// =============================================================================

/// RA201: Descriptor range returned twice.
pub const RA201: Diagnostic = Diagnostic::error(
    "RA201",
    "descriptor range freed twice"
).with_note("the returned range overlaps a range that is already free")
 .with_help("each DescriptorHeapHandle must be deallocated exactly once");

/// RA202: Shader-visible heap requested for a CPU-only heap type.
pub const RA202: Diagnostic = Diagnostic::error(
    "RA202",
    "descriptor heap type cannot be shader-visible"
).with_note("only CBV/SRV/UAV and sampler heaps can be bound to shaders");

/// RA203: Shader-visible heap allocation failed, commands flushed to retry.
pub const RA203: Diagnostic = Diagnostic::warning(
    "RA203",
    "shader-visible descriptor heap allocation ran out of memory"
).with_note("pending commands were submitted to recycle pooled heaps before retrying");

// =============================================================================
// Predefined diagnostics (RA3xx - Residency)
// =============================================================================

/// RA301: Eviction had to wait for in-flight GPU work.
pub const RA301: Diagnostic = Diagnostic::warning(
    "RA301",
    "eviction stalled on in-flight GPU work"
).with_note("the least recently used heap was still referenced by a submitted command list")
 .with_help("reduce per-frame memory or raise the memory budget");

/// RA302: Budget exhausted with nothing left to evict.
pub const RA302: Diagnostic = Diagnostic::warning(
    "RA302",
    "residency budget exhausted"
).with_note("every evictable heap is already evicted, locked, or used by pending work");

/// RA303: A locked pageable was found in the LRU.
pub const RA303: Diagnostic = Diagnostic::error(
    "RA303",
    "locked pageable found in the residency LRU"
).with_note("locked pageables must never be eviction candidates")
 .with_help("this indicates a bug in residalloc");

/// RA304: Unlock without a matching lock.
pub const RA304: Diagnostic = Diagnostic::error(
    "RA304",
    "unlock of a pageable that is not locked"
).with_help("pair every lock_allocation with exactly one unlock_allocation");

/// RA305: Pageable tracked from a state that does not allow it.
pub const RA305: Diagnostic = Diagnostic::error(
    "RA305",
    "pageable tracked in an invalid residency state"
).with_note("only unused or already-tracked pageables can be tracked as resident");

/// RA306: Pageable id used after destruction.
pub const RA306: Diagnostic = Diagnostic::error(
    "RA306",
    "stale pageable id"
).with_note("the id's generation doesn't match, indicating the pageable was destroyed");

// =============================================================================
// Predefined diagnostics (RA4xx - Copy splitting)
// =============================================================================

/// RA401: Copy parameters break a splitter precondition.
pub const RA401: Diagnostic = Diagnostic::error(
    "RA401",
    "texture copy split precondition violated"
).with_note("copy footprints must stay within 512-byte aligned placement rules");

/// RA402: 1D texture copy with more than one layer.
pub const RA402: Diagnostic = Diagnostic::error(
    "RA402",
    "1D texture copy with depth greater than one"
);

// =============================================================================
// Predefined diagnostics (RA5xx - Serials and device lifetime)
// =============================================================================

/// RA501: Teardown after device loss.
pub const RA501: Diagnostic = Diagnostic::warning(
    "RA501",
    "device lost, releasing resources without waiting"
).with_note("serial queries are meaningless once the device is lost");

// =============================================================================
// Predefined diagnostics (RA9xx - Internal)
// =============================================================================

/// RA901: Internal allocator error.
pub const RA901: Diagnostic = Diagnostic::error(
    "RA901",
    "internal allocator error"
).with_note("this indicates a bug in residalloc")
 .with_help("please report this issue at the residalloc repository");
