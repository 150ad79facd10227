use crate::ir::FileLine;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulatorError {
    #[error("{loc}: null object handle dereferenced")]
    NullHandle { loc: FileLine },

    #[error("{loc}: class {class} has no method '{name}'")]
    MissingMethod {
        loc: FileLine,
        class: String,
        name: String,
    },

    #[error("{loc}: `{expr}` cannot be assigned")]
    NotAssignable { loc: FileLine, expr: String },

    #[error("{loc}: member access outside of a class method")]
    NoThis { loc: FileLine },

    #[error("{loc}: index {index} out of bounds for array of {len}")]
    IndexOutOfBounds {
        loc: FileLine,
        index: usize,
        len: usize,
    },

    #[error("Call depth exceeded {0}")]
    CallDepth(usize),

    #[error("{loc}: randomize() with inline constraints reached execution without a helper")]
    UnloweredInlineConstraint { loc: FileLine },

    #[error("class {class} has no member '{name}'")]
    UnknownMember { class: String, name: String },

    #[error("{loc}: expected {expected} value")]
    TypeMismatch {
        loc: FileLine,
        expected: &'static str,
    },
}
