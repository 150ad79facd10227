mod debug;
pub mod ir;
mod pass;
pub mod randomize;
mod simulator;

pub use debug::{CompilationTrace, TraceOptions, format_netlist};
pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;
pub use ir::Netlist;
pub use pass::{NetlistPass, PassManager, RandomizePass};
pub use randomize::{
    Diagnostics, RandomizeError, RandomizeSummary, randomize_netlist, randomize_netlist_with_trace,
};
pub use simulator::{ObjectId, Simulator, SimulatorError, SimulatorOptions, Value};
