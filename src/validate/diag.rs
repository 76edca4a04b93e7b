//! Diagnostic classes the validator raises (spec §4.9).

use super::disasm::RasterOp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum Severity {
    /// The real hardware cannot recover from this; asserts fatally in
    /// debug builds.
    Crash,
    /// Relies on undefined behavior and will produce garbled output, but
    /// does not wedge the pipe.
    Error,
    /// Legal but suspicious.
    Warn,
}

/// A by-value copy of whichever prior command established the state a
/// diagnostic is complaining about (Design Notes §9: "carry by-value
/// copies of the cross-referenced command words, not pointers").
#[derive(Clone, Copy, Debug, defmt::Format)]
pub struct CrossRef {
    pub op: RasterOp,
}

#[derive(Clone, Debug, defmt::Format)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: &'static str,
    pub offending: RasterOp,
    pub cross_references: arrayvec::ArrayVec<[CrossRef; 4]>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: &'static str, offending: RasterOp) -> Self {
        Diagnostic {
            severity,
            message,
            offending,
            cross_references: arrayvec::ArrayVec::new(),
        }
    }

    pub fn with_ref(mut self, op: RasterOp) -> Self {
        self.cross_references.push(CrossRef { op });
        self
    }
}
