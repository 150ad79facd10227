mod output;

pub(crate) use output::format_expr;
pub use output::format_netlist;

#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub pre_randomize_tree: bool,
    pub marked_classes: bool,
    pub post_randomize_tree: bool,
    pub output_to_stdout: bool,
}

impl TraceOptions {
    pub fn all() -> Self {
        Self {
            pre_randomize_tree: true,
            marked_classes: true,
            post_randomize_tree: true,
            output_to_stdout: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompilationTrace {
    pub pre_randomize_tree: Option<String>,
    pub marked_classes: Option<Vec<String>>,
    pub post_randomize_tree: Option<String>,
}
