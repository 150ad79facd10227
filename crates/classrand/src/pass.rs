use crate::ir::Netlist;
use crate::randomize::{Diagnostics, RandomizeError, randomize_netlist};
use log::debug;

pub trait NetlistPass {
    fn name(&self) -> &'static str;
    fn run(&self, netlist: &mut Netlist, diag: &mut Diagnostics) -> Result<(), RandomizeError>;
}

#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn NetlistPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass<P>(&mut self, pass: P)
    where
        P: NetlistPass + 'static,
    {
        self.passes.push(Box::new(pass));
    }

    /// Runs every pass in order. A fatal error stops the pipeline.
    pub fn run(&self, netlist: &mut Netlist, diag: &mut Diagnostics) -> Result<(), RandomizeError> {
        for pass in &self.passes {
            debug!("pass: {}", pass.name());
            pass.run(netlist, diag)?;
        }
        Ok(())
    }
}

/// The randomize pass as a pipeline stage.
pub struct RandomizePass;

impl NetlistPass for RandomizePass {
    fn name(&self) -> &'static str {
        "randomize"
    }

    fn run(&self, netlist: &mut Netlist, diag: &mut Diagnostics) -> Result<(), RandomizeError> {
        randomize_netlist(netlist, diag).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, Stmt};

    #[test]
    fn test_pipeline_runs_randomize() {
        let mut nl = Netlist::new();
        let class = nl.add_class("A", None);
        let module = nl.add_module("top");
        let handle = nl.dtypes.add(DType::ClassRef(class));
        let obj = nl.add_module_var(module, "obj", handle);
        let from = nl.var_ref(obj);
        let call = nl.method_call(from, "randomize", vec![]);
        nl.add_initial(module, Stmt::Expr(call));

        let mut manager = PassManager::new();
        manager.add_pass(RandomizePass);
        let mut diag = Diagnostics::new();
        manager.run(&mut nl, &mut diag).unwrap();
        assert!(nl.find_member_func(class, "randomize").is_some());
    }
}
