// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by elaboration and the chip compiler.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0102`, `W0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes emitted by elaboration.
pub mod codes {
    use super::DiagCode;

    /// Reference to a signal that is never defined.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Duplicate definition of a signal, port, or chip.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Operand widths disagree.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Unpack field widths do not sum to the input width.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Width outside the supported 1..=64 range.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Constant value does not fit its declared width.
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Unknown primitive or chip name.
    pub const E0106: DiagCode = DiagCode("E0106");
    /// Wrong number of arguments.
    pub const E0107: DiagCode = DiagCode("E0107");
    /// Output port never assigned.
    pub const E0108: DiagCode = DiagCode("E0108");
    /// Invalid field access (no such output pin or port).
    pub const E0109: DiagCode = DiagCode("E0109");
    /// Argument form invalid (number where a signal is expected, or
    /// vice versa).
    pub const E0110: DiagCode = DiagCode("E0110");
    /// Alias chain closes on itself.
    pub const E0111: DiagCode = DiagCode("E0111");
    /// Assignment to an input port.
    pub const E0112: DiagCode = DiagCode("E0112");

    /// Signal assigned but never read.
    pub const W0100: DiagCode = DiagCode("W0100");
    /// Width of a feedback signal could not be inferred; defaulted to 1.
    pub const W0102: DiagCode = DiagCode("W0102");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}
