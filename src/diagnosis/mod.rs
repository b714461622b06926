//! One diagnosis pass
//!
//! The orchestrator walks cluster discovery, the resolver matrix, the
//! Corefile check and the cloud policy checks in order. A failing step is
//! recorded as a [`DiagError`] and the pass continues with what it has; only
//! writing the report can fail the run.

use std::fmt;

use derive_more::{Display, Error};

/// Report model, verdict analysis and report writer
pub mod summary;

/// Step sequencing and partial-result accumulation
pub mod orchestrator;

pub use self::orchestrator::DiagnosticOrchestrator;
pub use self::summary::{DiagnosisSummary, ReportError};

#[derive(Debug, Display, Error)]
pub enum DiagError {
    /// A cluster or cloud lookup failed
    #[display(fmt = "{}: {}", step, message)]
    Discovery { step: &'static str, message: String },
    /// The Corefile had no block to insert the logging directive into
    #[display(fmt = "{}", message)]
    MalformedConfig { message: String },
    /// The configured log keyword pattern is not a valid regex
    #[display(fmt = "invalid log error pattern {:?}: {}", pattern, source)]
    InvalidPattern { pattern: String, source: regex::Error },
    #[display(fmt = "failed to produce report: {}", source)]
    Report { source: ReportError },
}

impl DiagError {
    pub fn discovery(step: &'static str, err: impl fmt::Display) -> Self {
        DiagError::Discovery {
            step,
            message: err.to_string(),
        }
    }
}

impl From<ReportError> for DiagError {
    fn from(source: ReportError) -> Self {
        DiagError::Report { source }
    }
}
