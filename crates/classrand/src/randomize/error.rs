use crate::ir::FileLine;
use log::warn;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RandomizeError {
    #[error("{loc}: Unsupported: random member variables with type '{dtype}' (member `{member}`)")]
    UnsupportedFieldType {
        loc: FileLine,
        member: String,
        dtype: String,
    },

    #[error("{loc}: Unsupported constraint: {detail}")]
    UnsupportedConstraint { loc: FileLine, detail: String },

    /// The input tree breaks a guarantee of the front-end (unresolved class reference,
    /// enum without constant items, ...). Fatal.
    #[error("{loc}: Internal error in randomize: {detail}")]
    StructuralInvariant { loc: FileLine, detail: String },
}

impl RandomizeError {
    pub fn loc(&self) -> FileLine {
        match self {
            RandomizeError::UnsupportedFieldType { loc, .. }
            | RandomizeError::UnsupportedConstraint { loc, .. }
            | RandomizeError::StructuralInvariant { loc, .. } => *loc,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RandomizeError::StructuralInvariant { .. })
    }
}

/// Collects recoverable diagnostics. Reporting never halts the pass; the caller
/// decides afterwards whether any diagnostic is fatal for its run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reported: Vec<RandomizeError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_unsupported(&mut self, error: RandomizeError) {
        warn!("{}", error);
        self.reported.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.reported.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RandomizeError> {
        self.reported.iter()
    }

    pub fn into_vec(self) -> Vec<RandomizeError> {
        self.reported
    }
}
