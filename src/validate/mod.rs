//! Manifest validation: two independent rule engines producing findings.
//!
//! Validation never fails; it returns a [`ValidationReport`]. The RFC 8216
//! engine (including the bis LL-HLS rules) enforces protocol compliance,
//! the Apple engine encodes the authoring guidelines as advisory findings.

mod apple;
mod rfc;

use crate::manifest::Manifest;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// One rule violation or advisory note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub severity: Severity,
    pub message: String,
    /// Dotted path into the manifest, e.g. `segments[3].duration`.
    pub field_path: String,
    pub rule_set_id: &'static str,
    pub rule_id: &'static str,
}

/// All findings from every engine, sorted by descending severity.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub(crate) fn push(
        &mut self,
        severity: Severity,
        rule_set_id: &'static str,
        rule_id: &'static str,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.results.push(ValidationResult {
            severity,
            message: message.into(),
            field_path: field_path.into(),
            rule_set_id,
            rule_id,
        });
    }

    /// A manifest is valid iff no `error`-severity finding is present.
    pub fn is_valid(&self) -> bool {
        !self
            .results
            .iter()
            .any(|r| r.severity == Severity::Error)
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Error)
    }

    fn finish(mut self) -> Self {
        self.results.sort_by(|a, b| b.severity.cmp(&a.severity));
        self
    }
}

/// Run both engines and concatenate their findings.
pub fn validate(manifest: &Manifest) -> ValidationReport {
    let mut report = ValidationReport::default();
    rfc::check(manifest, &mut report);
    apple::check(manifest, &mut report);
    report.finish()
}
