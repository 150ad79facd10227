use crate::HashMap;
use crate::ir::{ClassId, DType, ExprKind, Netlist};
use log::{debug, trace};
use std::collections::BTreeSet;

pub type BaseToDerivedMap = HashMap<ClassId, Vec<ClassId>>;

/// Output of the marking phase.
#[derive(Debug, Clone, Default)]
pub struct MarkResult {
    pub marked: BTreeSet<ClassId>,
    /// Base class -> classes that extend it, in declaration order.
    pub base_to_derived: BaseToDerivedMap,
}

impl MarkResult {
    pub fn is_marked(&self, class: ClassId) -> bool {
        self.marked.contains(&class)
    }

    pub fn is_extended(&self, class: ClassId) -> bool {
        self.base_to_derived
            .get(&class)
            .is_some_and(|derived| !derived.is_empty())
    }
}

/// Marks every class that needs a `randomize()` method.
///
/// A class needs one when `randomize()` is called on it, when it is the type of a
/// rand member of a marked class (inherited members included), or when one of its
/// ancestors is marked. Marking runs over a worklist until no new class is added.
pub struct RandomizeMarker<'a> {
    netlist: &'a mut Netlist,
    base_to_derived: BaseToDerivedMap,
    worklist: Vec<ClassId>,
}

impl<'a> RandomizeMarker<'a> {
    pub fn new(netlist: &'a mut Netlist) -> Self {
        Self {
            netlist,
            base_to_derived: HashMap::default(),
            worklist: vec![],
        }
    }

    pub fn run(mut self) -> MarkResult {
        for class in self.netlist.classes.iter_mut() {
            class.needs_randomize = false;
        }
        self.collect_derived();
        self.mark_call_sites();
        while let Some(class) = self.worklist.pop() {
            self.mark_members(class);
            self.mark_derived(class);
        }
        let marked: BTreeSet<ClassId> = self
            .netlist
            .class_ids()
            .filter(|c| self.netlist.class(*c).needs_randomize)
            .collect();
        debug!(
            "randomize: {} of {} classes need randomize()",
            marked.len(),
            self.netlist.classes.len()
        );
        MarkResult {
            marked,
            base_to_derived: self.base_to_derived,
        }
    }

    fn collect_derived(&mut self) {
        for class in self.netlist.class_ids() {
            if let Some(base) = self.netlist.class(class).extends {
                self.base_to_derived.entry(base).or_default().push(class);
            }
        }
    }

    fn mark_call_sites(&mut self) {
        for scope in self.netlist.statement_scopes() {
            let mut exprs = vec![];
            self.netlist
                .walk_stmts(self.netlist.scope_stmts(scope), &mut exprs);
            for expr in exprs {
                let ExprKind::MethodCall { from, name, .. } = &self.netlist.expr(expr).kind else {
                    continue;
                };
                if name != "randomize" {
                    continue;
                }
                if let Some(class) = self.netlist.class_of_expr(*from) {
                    self.mark(class);
                }
            }
        }
    }

    fn mark(&mut self, class: ClassId) {
        let node = self.netlist.class_mut(class);
        if !node.needs_randomize {
            trace!("randomize: mark {}", node.name);
            node.needs_randomize = true;
            self.worklist.push(class);
        }
    }

    /// Marks the classes of rand class-typed members declared in `class` or any ancestor.
    fn mark_members(&mut self, class: ClassId) {
        let member_classes: Vec<ClassId> = self
            .netlist
            .class_chain(class)
            .flat_map(|c| self.netlist.member_vars(c))
            .filter(|v| self.netlist.var(*v).is_rand)
            .filter_map(|v| match self.netlist.dtypes.get(self.netlist.var(v).dtype) {
                DType::ClassRef(member_class) => Some(*member_class),
                _ => None,
            })
            .collect();
        for member_class in member_classes {
            self.mark(member_class);
        }
    }

    fn mark_derived(&mut self, class: ClassId) {
        let derived = self.base_to_derived.get(&class).cloned().unwrap_or_default();
        for derived_class in derived {
            self.mark(derived_class);
        }
    }
}
