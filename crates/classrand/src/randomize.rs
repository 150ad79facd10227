//! Synthesis of `randomize()` methods.
//!
//! The pass runs in two phases over the whole netlist:
//!
//! 1. [`mark::RandomizeMarker`] finds every class that needs a method, closing
//!    over inheritance and rand class-typed members.
//! 2. The synthesizer emits a body for each marked class and rewrites calls that
//!    carry inline constraints into calls of a private helper.

use crate::debug::{CompilationTrace, TraceOptions, format_netlist};
use crate::ir::{ClassId, ExprId, FileLine, FuncId, Netlist, VarId};
use log::info;

pub mod constraint;
pub mod enum_table;
pub mod error;
pub mod mark;
mod method;

pub use constraint::{Bound, BoundMultiset, BoundSet, TargetPath};
pub use enum_table::EnumTableCache;
pub use error::{Diagnostics, RandomizeError};
pub use mark::{MarkResult, RandomizeMarker};

use method::RandomizeSynthesizer;

/// Object whose members a generated statement reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    /// The instance a class method runs on.
    This,
    /// A handle parameter of a call-site helper.
    Param(VarId),
}

/// Reference to the member at `path` below `root`.
pub(crate) fn create_ref(netlist: &mut Netlist, root: Root, path: &[VarId], loc: FileLine) -> ExprId {
    let mut iter = path.iter();
    let mut expr = match (root, iter.next()) {
        (Root::This, Some(first)) => netlist.var_ref(*first),
        (Root::Param(param), Some(first)) => {
            let handle = netlist.var_ref(param);
            netlist.set_loc(handle, loc);
            netlist.member_sel(handle, *first)
        }
        (Root::Param(param), None) => netlist.var_ref(param),
        // A class method never refers to `this` as a whole.
        (Root::This, None) => unreachable!("empty member path"),
    };
    netlist.set_loc(expr, loc);
    for var in iter {
        expr = netlist.member_sel(expr, *var);
        netlist.set_loc(expr, loc);
    }
    expr
}

/// What the pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomizeSummary {
    /// Classes that needed a `randomize()` method.
    pub marked: Vec<ClassId>,
    /// Class methods that were declared or defined.
    pub methods: Vec<FuncId>,
    /// Call-site helpers, in creation order.
    pub helpers: Vec<FuncId>,
    pub enum_tables: usize,
}

/// Runs the randomize pass over `netlist`.
///
/// Unsupported members and constraints are reported to `diag` and skipped. A
/// broken front-end invariant aborts the pass with an error; the netlist is then
/// left partially transformed.
pub fn randomize_netlist(
    netlist: &mut Netlist,
    diag: &mut Diagnostics,
) -> Result<RandomizeSummary, RandomizeError> {
    randomize_netlist_with_trace(netlist, diag, &TraceOptions::default(), None)
}

pub fn randomize_netlist_with_trace(
    netlist: &mut Netlist,
    diag: &mut Diagnostics,
    options: &TraceOptions,
    mut trace: Option<&mut CompilationTrace>,
) -> Result<RandomizeSummary, RandomizeError> {
    if options.pre_randomize_tree {
        let dump = format_netlist(netlist);
        if options.output_to_stdout {
            println!("=== Pre-randomize tree ===\n{}", dump);
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.pre_randomize_tree = Some(dump);
        }
    }

    let marks = RandomizeMarker::new(netlist).run();
    if options.marked_classes {
        let names: Vec<String> = marks
            .marked
            .iter()
            .map(|c| netlist.class(*c).name.clone())
            .collect();
        if options.output_to_stdout {
            println!("=== Marked classes ===\n{}", names.join("\n"));
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.marked_classes = Some(names);
        }
    }

    let result = RandomizeSynthesizer::new(netlist, diag, &marks).run()?;
    info!(
        "randomize: {} class(es) marked, {} method(s), {} helper(s), {} enum table(s), {} diagnostic(s)",
        marks.marked.len(),
        result.methods.len(),
        result.helpers.len(),
        result.enum_tables,
        diag.len()
    );

    if options.post_randomize_tree {
        let dump = format_netlist(netlist);
        if options.output_to_stdout {
            println!("=== Post-randomize tree ===\n{}", dump);
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.post_randomize_tree = Some(dump);
        }
    }

    Ok(RandomizeSummary {
        marked: marks.marked.into_iter().collect(),
        methods: result.methods,
        helpers: result.helpers,
        enum_tables: result.enum_tables,
    })
}
